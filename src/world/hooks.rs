//! Narrow contracts to the collaborators a field consumes but does not own:
//! navigation, skill metadata and trigger scripts.

use crate::world::position::Vec3;
use crate::world::time::GameTick;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait Navigator: Send + Sync {
    /// Waypoints from `from` to `to`, ending at `to`. `None` when unreachable.
    fn find_path(&self, map_id: i32, from: Vec3, to: Vec3) -> Option<Vec<Vec3>>;
}

/// Walks in a straight line. Used when a map has no navigation mesh.
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightLineNavigator;

impl Navigator for StraightLineNavigator {
    fn find_path(&self, _map_id: i32, _from: Vec3, to: Vec3) -> Option<Vec<Vec3>> {
        Some(vec![to])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkillMetadata {
    pub cast_ticks: u64,
    /// Lifetime of the field skill the cast leaves behind, 0 for none.
    pub duration_ticks: u64,
    pub interval_ticks: u64,
    pub radius: f32,
}

pub trait SkillCatalog: Send + Sync {
    fn skill(&self, skill_id: i32, level: i16) -> Option<SkillMetadata>;
}

#[derive(Debug, Default, Clone)]
pub struct StaticSkillCatalog {
    skills: HashMap<(i32, i16), SkillMetadata>,
}

impl StaticSkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(mut self, skill_id: i32, level: i16, metadata: SkillMetadata) -> Self {
        self.skills.insert((skill_id, level), metadata);
        self
    }
}

impl SkillCatalog for StaticSkillCatalog {
    fn skill(&self, skill_id: i32, level: i16) -> Option<SkillMetadata> {
        self.skills.get(&(skill_id, level)).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerAction {
    SpawnNpc { npc_id: i32, position: Vec3 },
    SetPortalEnabled { portal_id: i32, enabled: bool },
    /// Fires the trigger again after the given number of ticks.
    Rearm { delay_ticks: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub map_id: i32,
    pub trigger_id: i32,
    pub tick: GameTick,
    pub player_positions: &'a [Vec3],
}

pub trait TriggerScript: Send + Sync {
    fn evaluate(&self, context: &TriggerContext<'_>) -> Vec<TriggerAction>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoTriggers;

impl TriggerScript for NoTriggers {
    fn evaluate(&self, _context: &TriggerContext<'_>) -> Vec<TriggerAction> {
        Vec::new()
    }
}

/// Collaborators handed to every field a registry creates.
#[derive(Clone)]
pub struct FieldHooks {
    pub navigator: Arc<dyn Navigator>,
    pub skills: Arc<dyn SkillCatalog>,
    pub triggers: Arc<dyn TriggerScript>,
}

impl Default for FieldHooks {
    fn default() -> Self {
        Self {
            navigator: Arc::new(StraightLineNavigator),
            skills: Arc::new(StaticSkillCatalog::new()),
            triggers: Arc::new(NoTriggers),
        }
    }
}

impl fmt::Debug for FieldHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldHooks").finish_non_exhaustive()
    }
}
