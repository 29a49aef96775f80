//! Non-actor objects living inside one field.

use crate::entities::actor::ObjectId;
use crate::world::hooks::SkillMetadata;
use crate::world::position::Vec3;
use crate::world::time::{Cooldown, GameTick};
use std::collections::BTreeSet;

/// Distance at which a player standing next to a portal enters it.
pub const PORTAL_ENTER_RADIUS: f32 = 75.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldItem {
    pub object_id: ObjectId,
    pub item_id: i32,
    pub amount: u32,
    pub position: Vec3,
    pub despawn: Cooldown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPortal {
    pub object_id: ObjectId,
    pub portal_id: i32,
    pub position: Vec3,
    pub target_map: i32,
    pub enabled: bool,
    pub close_after_ticks: Option<u64>,
    pub close_at: Option<GameTick>,
    /// Players already inside the portal radius, so entering fires once.
    pub occupants: BTreeSet<ObjectId>,
}

impl FieldPortal {
    pub fn set_enabled(&mut self, enabled: bool, now: GameTick) {
        self.enabled = enabled;
        self.close_at = match (enabled, self.close_after_ticks) {
            (true, Some(ticks)) => Some(now.after(ticks)),
            _ => None,
        };
    }

    /// Closes the portal once its timer runs out. Returns true when it closed.
    pub fn update_timer(&mut self, now: GameTick) -> bool {
        match self.close_at {
            Some(close_at) if self.enabled && now >= close_at => {
                self.set_enabled(false, now);
                true
            }
            _ => false,
        }
    }

    /// Players that stepped into range this tick.
    pub fn entering<I>(&mut self, players: I) -> Vec<ObjectId>
    where
        I: IntoIterator<Item = (ObjectId, Vec3)>,
    {
        let mut inside = BTreeSet::new();
        let mut entered = Vec::new();
        for (object_id, position) in players {
            if position.distance(self.position) > PORTAL_ENTER_RADIUS {
                continue;
            }
            inside.insert(object_id);
            if self.enabled && !self.occupants.contains(&object_id) {
                entered.push(object_id);
            }
        }
        self.occupants = inside;
        entered
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldTrigger {
    pub object_id: ObjectId,
    pub trigger_id: i32,
    pub position: Vec3,
    /// 0 covers the whole field.
    pub radius: f32,
    pub next_check: Cooldown,
}

impl FieldTrigger {
    pub fn covers(&self, position: Vec3) -> bool {
        self.radius <= 0.0 || position.distance(self.position) <= self.radius
    }
}

/// Breakables, liftables and interacts: used once, then back after `reset_ticks`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResettableObject {
    pub object_id: ObjectId,
    pub entity_id: i32,
    pub position: Vec3,
    pub reset_ticks: u64,
    pub used_until: Option<GameTick>,
}

impl ResettableObject {
    pub fn new(object_id: ObjectId, entity_id: i32, position: Vec3, reset_ticks: u64) -> Self {
        Self {
            object_id,
            entity_id,
            position,
            reset_ticks,
            used_until: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.used_until.is_none()
    }

    /// Breaks, lifts or uses the object. Fails when it is still resetting.
    pub fn use_object(&mut self, now: GameTick) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.used_until = Some(now.after(self.reset_ticks));
        true
    }

    /// Returns true on the tick the object becomes usable again.
    pub fn update(&mut self, now: GameTick) -> bool {
        match self.used_until {
            Some(until) if now >= until => {
                self.used_until = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobSpawner {
    pub object_id: ObjectId,
    pub npc_ids: Vec<i32>,
    pub position: Vec3,
    pub population: u32,
    pub cooldown_ticks: u64,
    pub cooldown: Cooldown,
    pub spawned: BTreeSet<ObjectId>,
    next_pick: usize,
}

impl MobSpawner {
    pub fn new(object_id: ObjectId, npc_ids: Vec<i32>, position: Vec3, population: u32, cooldown_ticks: u64) -> Self {
        Self {
            object_id,
            npc_ids,
            position,
            population,
            cooldown_ticks,
            cooldown: Cooldown::ready_now(),
            spawned: BTreeSet::new(),
            next_pick: 0,
        }
    }

    /// Forgets NPCs that no longer exist; the cooldown restarts when one died.
    pub fn retain_alive<F: Fn(ObjectId) -> bool>(&mut self, alive: F, now: GameTick) {
        let before = self.spawned.len();
        self.spawned.retain(|object_id| alive(*object_id));
        if self.spawned.len() < before {
            self.cooldown.reset(now, self.cooldown_ticks);
        }
    }

    /// Next NPC id to spawn, rotating through `npc_ids`, when under population.
    pub fn due(&mut self, now: GameTick) -> Option<i32> {
        if self.npc_ids.is_empty()
            || self.spawned.len() >= self.population as usize
            || !self.cooldown.is_ready(now)
        {
            return None;
        }
        let npc_id = self.npc_ids[self.next_pick % self.npc_ids.len()];
        self.next_pick = self.next_pick.wrapping_add(1);
        Some(npc_id)
    }
}

/// Area skill left behind by a cast; fires every `interval_ticks` until it expires.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSkill {
    pub object_id: ObjectId,
    pub caster: ObjectId,
    pub skill_id: i32,
    pub level: i16,
    pub position: Vec3,
    pub metadata: SkillMetadata,
    pub expires_at: GameTick,
    pub next_fire: GameTick,
}

impl FieldSkill {
    pub fn new(
        object_id: ObjectId,
        caster: ObjectId,
        skill_id: i32,
        level: i16,
        position: Vec3,
        metadata: SkillMetadata,
        now: GameTick,
    ) -> Self {
        Self {
            object_id,
            caster,
            skill_id,
            level,
            position,
            metadata,
            expires_at: now.after(metadata.duration_ticks),
            next_fire: now,
        }
    }

    pub fn is_expired(&self, now: GameTick) -> bool {
        now >= self.expires_at
    }

    /// True when the skill fires this tick.
    pub fn fire(&mut self, now: GameTick) -> bool {
        if self.is_expired(now) || now < self.next_fire {
            return false;
        }
        self.next_fire = now.after(self.metadata.interval_ticks.max(1));
        true
    }

    pub fn covers(&self, position: Vec3) -> bool {
        position.distance(self.position) <= self.metadata.radius
    }
}
