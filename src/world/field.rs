//! One live field instance.
//!
//! `FieldState` is everything the simulation mutates; only the instance's
//! tick thread writes to it. Callers on other threads go through
//! `FieldSimulation`, which queues their requests as commands that the tick
//! thread applies at the top of its next loop iteration.

use crate::entities::actor::{FieldNpc, FieldPet, FieldPlayer, ObjectId};
use crate::entities::task::{TaskEffect, TaskId, TaskKind, TaskPriority, TaskStatus};
use crate::world::cron::CronSystem;
use crate::world::field_objects::{
    FieldItem, FieldPortal, FieldSkill, FieldTrigger, MobSpawner, ResettableObject,
};
use crate::world::hooks::{FieldHooks, TriggerAction, TriggerContext};
use crate::world::ids::LocalIds;
use crate::world::index_cache::LoadedMap;
use crate::world::position::Vec3;
use crate::world::spatial_index::SpatialIndex;
use crate::world::time::{Cooldown, GameClock, GameTick};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Events kept for consumers before the oldest are dropped.
const MAX_PENDING_EVENTS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCategory {
    Triggers,
    Players,
    Npcs,
    Pets,
    Breakables,
    Liftables,
    Interacts,
    Items,
    MobSpawners,
    Skills,
    Portals,
}

/// Per-tick update order. Later categories observe changes made by earlier ones.
pub const FIELD_UPDATE_ORDER: [FieldCategory; 11] = [
    FieldCategory::Triggers,
    FieldCategory::Players,
    FieldCategory::Npcs,
    FieldCategory::Pets,
    FieldCategory::Breakables,
    FieldCategory::Liftables,
    FieldCategory::Interacts,
    FieldCategory::Items,
    FieldCategory::MobSpawners,
    FieldCategory::Skills,
    FieldCategory::Portals,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub map_id: i32,
    /// 0 for server-owned instances.
    pub owner_id: i64,
    pub instance_id: i32,
}

impl FieldKey {
    pub const fn new(map_id: i32, owner_id: i64, instance_id: i32) -> Self {
        Self {
            map_id,
            owner_id,
            instance_id,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.map_id, self.owner_id, self.instance_id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field {0} is disposed")]
    Disposed(FieldKey),
    #[error("field {0} state lock poisoned")]
    LockPoisoned(FieldKey),
    #[error("failed to start tick thread for field {key}: {message}")]
    ThreadSpawn { key: FieldKey, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldEvent {
    PlayerJoined { object_id: ObjectId, character_id: i64 },
    PlayerLeft { object_id: ObjectId },
    ActorMoved { object_id: ObjectId, position: Vec3 },
    NpcSpawned { object_id: ObjectId, npc_id: i32 },
    NpcRemoved { object_id: ObjectId },
    PetSpawned { object_id: ObjectId, owner: ObjectId },
    PetRemoved { object_id: ObjectId },
    Emote { object_id: ObjectId, sequence: String },
    SkillCast { caster: ObjectId, skill_id: i32, level: i16 },
    SkillFired { object_id: ObjectId, skill_id: i32, targets: usize },
    SkillExpired { object_id: ObjectId },
    TaskFinished { npc: ObjectId, task: TaskId, status: TaskStatus },
    ItemSpawned { object_id: ObjectId, item_id: i32 },
    ItemDespawned { object_id: ObjectId },
    ObjectUsed { object_id: ObjectId, category: FieldCategory },
    ObjectReset { object_id: ObjectId, category: FieldCategory },
    PortalToggled { portal_id: i32, enabled: bool },
    PortalEntered { player: ObjectId, portal_id: i32, target_map: i32 },
}

pub type FieldCommand = Box<dyn FnOnce(&mut FieldState) + Send>;
pub type FieldCallback = Box<dyn FnMut(&mut FieldState) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(pub u64);

struct ScheduledCallback {
    callback: FieldCallback,
    repeat: Option<u64>,
}

pub struct FieldState {
    key: FieldKey,
    /// `None` once released.
    map: Option<Arc<LoadedMap>>,
    hooks: FieldHooks,
    ids: Arc<LocalIds>,
    clock: GameClock,
    players: BTreeMap<ObjectId, FieldPlayer>,
    pending_moves: BTreeMap<ObjectId, Vec3>,
    npcs: BTreeMap<ObjectId, FieldNpc>,
    pets: BTreeMap<ObjectId, FieldPet>,
    items: BTreeMap<ObjectId, FieldItem>,
    portals: BTreeMap<ObjectId, FieldPortal>,
    triggers: BTreeMap<ObjectId, FieldTrigger>,
    breakables: BTreeMap<ObjectId, ResettableObject>,
    liftables: BTreeMap<ObjectId, ResettableObject>,
    interacts: BTreeMap<ObjectId, ResettableObject>,
    spawners: BTreeMap<ObjectId, MobSpawner>,
    skills: BTreeMap<ObjectId, FieldSkill>,
    cron: CronSystem<CallbackId>,
    callbacks: HashMap<CallbackId, ScheduledCallback>,
    next_callback: u64,
    running_callback: Option<CallbackId>,
    events: VecDeque<FieldEvent>,
    released: bool,
}

impl fmt::Debug for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldState")
            .field("key", &self.key)
            .field("tick", &self.clock.now())
            .field("players", &self.players.len())
            .field("npcs", &self.npcs.len())
            .field("scheduled", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl FieldState {
    pub fn new(
        key: FieldKey,
        map: Arc<LoadedMap>,
        hooks: FieldHooks,
        ids: Arc<LocalIds>,
        tick_length: Duration,
    ) -> Self {
        let mut state = Self {
            key,
            map: Some(Arc::clone(&map)),
            hooks,
            ids,
            clock: GameClock::new(tick_length),
            players: BTreeMap::new(),
            pending_moves: BTreeMap::new(),
            npcs: BTreeMap::new(),
            pets: BTreeMap::new(),
            items: BTreeMap::new(),
            portals: BTreeMap::new(),
            triggers: BTreeMap::new(),
            breakables: BTreeMap::new(),
            liftables: BTreeMap::new(),
            interacts: BTreeMap::new(),
            spawners: BTreeMap::new(),
            skills: BTreeMap::new(),
            cron: CronSystem::new(),
            callbacks: HashMap::new(),
            next_callback: 0,
            running_callback: None,
            events: VecDeque::new(),
            released: false,
        };
        state.populate(&map);
        state
    }

    fn populate(&mut self, map: &LoadedMap) {
        let metadata = &map.metadata;
        for npc in &metadata.npcs {
            self.spawn_npc(npc.npc_id, npc.position);
        }
        for portal in &metadata.portals {
            let object_id = self.ids.next();
            let mut field_portal = FieldPortal {
                object_id,
                portal_id: portal.portal_id,
                position: portal.position,
                target_map: portal.target_map,
                enabled: false,
                close_after_ticks: portal.close_after_ticks,
                close_at: None,
                occupants: BTreeSet::new(),
            };
            field_portal.set_enabled(portal.enabled, GameTick(0));
            self.portals.insert(object_id, field_portal);
        }
        for spawner in &metadata.mob_spawners {
            let object_id = self.ids.next();
            self.spawners.insert(
                object_id,
                MobSpawner::new(
                    object_id,
                    spawner.npc_ids.clone(),
                    spawner.position,
                    spawner.population,
                    spawner.cooldown_ticks,
                ),
            );
        }
        for trigger in &metadata.triggers {
            let object_id = self.ids.next();
            self.triggers.insert(
                object_id,
                FieldTrigger {
                    object_id,
                    trigger_id: trigger.trigger_id,
                    position: trigger.position,
                    radius: trigger.radius,
                    next_check: Cooldown::ready_now(),
                },
            );
        }
        for (category, objects) in [
            (FieldCategory::Breakables, &metadata.breakables),
            (FieldCategory::Liftables, &metadata.liftables),
            (FieldCategory::Interacts, &metadata.interacts),
        ] {
            for object in objects {
                let object_id = self.ids.next();
                let resettable =
                    ResettableObject::new(object_id, object.entity_id, object.position, object.reset_ticks);
                if let Some(map) = self.resettables_mut(category) {
                    map.insert(object_id, resettable);
                }
            }
        }
        // Spawning from metadata is not news to anyone.
        self.events.clear();
    }

    pub fn key(&self) -> FieldKey {
        self.key
    }

    pub fn map(&self) -> Option<&Arc<LoadedMap>> {
        self.map.as_ref()
    }

    pub fn index(&self) -> Option<&SpatialIndex> {
        self.map.as_deref().map(|map| map.index.as_ref())
    }

    pub fn now(&self) -> GameTick {
        self.clock.now()
    }

    pub fn players(&self) -> &BTreeMap<ObjectId, FieldPlayer> {
        &self.players
    }

    pub fn npcs(&self) -> &BTreeMap<ObjectId, FieldNpc> {
        &self.npcs
    }

    pub fn pets(&self) -> &BTreeMap<ObjectId, FieldPet> {
        &self.pets
    }

    pub fn items(&self) -> &BTreeMap<ObjectId, FieldItem> {
        &self.items
    }

    pub fn portals(&self) -> &BTreeMap<ObjectId, FieldPortal> {
        &self.portals
    }

    pub fn spawners(&self) -> &BTreeMap<ObjectId, MobSpawner> {
        &self.spawners
    }

    pub fn skills(&self) -> &BTreeMap<ObjectId, FieldSkill> {
        &self.skills
    }

    pub fn resettables(&self, category: FieldCategory) -> Option<&BTreeMap<ObjectId, ResettableObject>> {
        match category {
            FieldCategory::Breakables => Some(&self.breakables),
            FieldCategory::Liftables => Some(&self.liftables),
            FieldCategory::Interacts => Some(&self.interacts),
            _ => None,
        }
    }

    fn resettables_mut(&mut self, category: FieldCategory) -> Option<&mut BTreeMap<ObjectId, ResettableObject>> {
        match category {
            FieldCategory::Breakables => Some(&mut self.breakables),
            FieldCategory::Liftables => Some(&mut self.liftables),
            FieldCategory::Interacts => Some(&mut self.interacts),
            _ => None,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn drain_events(&mut self) -> Vec<FieldEvent> {
        self.events.drain(..).collect()
    }

    fn push_event(&mut self, event: FieldEvent) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn add_player(&mut self, object_id: ObjectId, character_id: i64, name: &str, position: Vec3) {
        self.players.insert(
            object_id,
            FieldPlayer {
                object_id,
                character_id,
                name: name.to_string(),
                position,
            },
        );
        self.push_event(FieldEvent::PlayerJoined {
            object_id,
            character_id,
        });
    }

    /// Removes a player together with the pets following it.
    pub fn remove_player(&mut self, object_id: ObjectId) -> bool {
        if self.players.remove(&object_id).is_none() {
            return false;
        }
        self.pending_moves.remove(&object_id);
        let pets: Vec<ObjectId> = self
            .pets
            .values()
            .filter(|pet| pet.owner == object_id)
            .map(|pet| pet.object_id)
            .collect();
        for pet in pets {
            self.remove_pet(pet);
        }
        self.push_event(FieldEvent::PlayerLeft { object_id });
        true
    }

    /// Queues a position change, committed during the players update.
    pub fn move_player(&mut self, object_id: ObjectId, position: Vec3) -> bool {
        if !self.players.contains_key(&object_id) {
            return false;
        }
        self.pending_moves.insert(object_id, position);
        true
    }

    pub fn spawn_npc(&mut self, npc_id: i32, position: Vec3) -> ObjectId {
        let object_id = self.ids.next();
        self.insert_npc(object_id, npc_id, position);
        object_id
    }

    pub fn insert_npc(&mut self, object_id: ObjectId, npc_id: i32, position: Vec3) {
        self.npcs
            .insert(object_id, FieldNpc::new(object_id, npc_id, position));
        self.push_event(FieldEvent::NpcSpawned { object_id, npc_id });
    }

    pub fn remove_npc(&mut self, object_id: ObjectId) -> bool {
        let Some(mut npc) = self.npcs.remove(&object_id) else {
            return false;
        };
        npc.tasks.cancel_all();
        self.push_event(FieldEvent::NpcRemoved { object_id });
        true
    }

    pub fn queue_npc_task(
        &mut self,
        npc: ObjectId,
        priority: TaskPriority,
        kind: TaskKind,
        cancel_on_interrupt: bool,
    ) -> Option<TaskId> {
        self.npcs
            .get_mut(&npc)
            .map(|npc| npc.tasks.enqueue(priority, kind, cancel_on_interrupt))
    }

    pub fn spawn_pet(&mut self, pet_id: i32, owner: ObjectId, follow_distance: f32, speed: f32) -> Option<ObjectId> {
        let position = self.players.get(&owner)?.position;
        let object_id = self.ids.next();
        self.pets.insert(
            object_id,
            FieldPet {
                object_id,
                pet_id,
                owner,
                position,
                follow_distance,
                speed,
            },
        );
        self.push_event(FieldEvent::PetSpawned { object_id, owner });
        Some(object_id)
    }

    pub fn remove_pet(&mut self, object_id: ObjectId) -> bool {
        if self.pets.remove(&object_id).is_none() {
            return false;
        }
        self.push_event(FieldEvent::PetRemoved { object_id });
        true
    }

    pub fn spawn_item(&mut self, item_id: i32, amount: u32, position: Vec3, lifetime_ticks: u64) -> ObjectId {
        let object_id = self.ids.next();
        self.insert_item(object_id, item_id, amount, position, lifetime_ticks);
        object_id
    }

    pub fn insert_item(&mut self, object_id: ObjectId, item_id: i32, amount: u32, position: Vec3, lifetime_ticks: u64) {
        let despawn = Cooldown::from_ticks_from_now(self.clock.now(), lifetime_ticks);
        self.items.insert(
            object_id,
            FieldItem {
                object_id,
                item_id,
                amount,
                position,
                despawn,
            },
        );
        self.push_event(FieldEvent::ItemSpawned { object_id, item_id });
    }

    pub fn pick_up_item(&mut self, object_id: ObjectId) -> Option<FieldItem> {
        let item = self.items.remove(&object_id)?;
        self.push_event(FieldEvent::ItemDespawned { object_id });
        Some(item)
    }

    /// Breaks, lifts or interacts with an object of the given category.
    pub fn use_object(&mut self, category: FieldCategory, object_id: ObjectId) -> bool {
        let now = self.clock.now();
        let used = self
            .resettables_mut(category)
            .and_then(|objects| objects.get_mut(&object_id))
            .map_or(false, |object| object.use_object(now));
        if used {
            self.push_event(FieldEvent::ObjectUsed {
                object_id,
                category,
            });
        }
        used
    }

    pub fn set_portal_enabled(&mut self, portal_id: i32, enabled: bool) -> bool {
        let now = self.clock.now();
        let Some(portal) = self
            .portals
            .values_mut()
            .find(|portal| portal.portal_id == portal_id)
        else {
            return false;
        };
        portal.set_enabled(enabled, now);
        self.push_event(FieldEvent::PortalToggled { portal_id, enabled });
        true
    }

    /// Runs `callback` once, `delay_ticks` after the current tick.
    pub fn schedule<F>(&mut self, delay_ticks: u64, callback: F) -> CallbackId
    where
        F: FnOnce(&mut FieldState) + Send + 'static,
    {
        let mut callback = Some(callback);
        self.insert_callback(
            delay_ticks,
            None,
            Box::new(move |state: &mut FieldState| {
                if let Some(callback) = callback.take() {
                    callback(state);
                }
            }),
        )
    }

    /// Runs `callback` after `delay_ticks`, then every `interval_ticks` until cancelled.
    pub fn schedule_repeating<F>(&mut self, delay_ticks: u64, interval_ticks: u64, callback: F) -> CallbackId
    where
        F: FnMut(&mut FieldState) + Send + 'static,
    {
        self.insert_callback(delay_ticks, Some(interval_ticks.max(1)), Box::new(callback))
    }

    fn insert_callback(&mut self, delay_ticks: u64, repeat: Option<u64>, callback: FieldCallback) -> CallbackId {
        self.next_callback += 1;
        let id = CallbackId(self.next_callback);
        self.callbacks
            .insert(id, ScheduledCallback { callback, repeat });
        self.cron.set(id, delay_ticks, self.clock.now());
        id
    }

    /// Cancels a scheduled callback. Works from inside the callback itself.
    pub fn cancel_scheduled(&mut self, id: CallbackId) -> bool {
        if self.running_callback == Some(id) {
            self.running_callback = None;
            return true;
        }
        self.cron.stop(id, self.clock.now());
        self.callbacks.remove(&id).is_some()
    }

    pub fn scheduled_len(&self) -> usize {
        self.callbacks.len()
    }

    fn run_due_callbacks(&mut self) {
        let now = self.clock.now();
        // Callbacks scheduled while draining wait for the next tick.
        let due: Vec<CallbackId> = std::iter::from_fn(|| self.cron.pop_ready(now)).collect();
        for id in due {
            let Some(mut scheduled) = self.callbacks.remove(&id) else {
                continue;
            };
            self.running_callback = Some(id);
            (scheduled.callback)(self);
            let cancelled = self.running_callback.take() != Some(id);
            if let (Some(interval), false) = (scheduled.repeat, cancelled) {
                self.callbacks.insert(id, scheduled);
                self.cron.set(id, interval, now);
            }
        }
    }

    /// One simulation step. Skipped entirely while no player is present.
    pub fn tick(&mut self) -> bool {
        if self.players.is_empty() || self.released {
            return false;
        }
        self.run_due_callbacks();
        self.clock.advance(1);
        for category in FIELD_UPDATE_ORDER {
            self.update_category(category);
        }
        true
    }

    fn update_category(&mut self, category: FieldCategory) {
        match category {
            FieldCategory::Triggers => self.update_triggers(),
            FieldCategory::Players => self.update_players(),
            FieldCategory::Npcs => self.update_npcs(),
            FieldCategory::Pets => self.update_pets(),
            FieldCategory::Breakables | FieldCategory::Liftables | FieldCategory::Interacts => {
                self.update_resettables(category)
            }
            FieldCategory::Items => self.update_items(),
            FieldCategory::MobSpawners => self.update_spawners(),
            FieldCategory::Skills => self.update_skills(),
            FieldCategory::Portals => self.update_portals(),
        }
    }

    fn update_triggers(&mut self) {
        let now = self.clock.now();
        let positions: Vec<Vec3> = self.players.values().map(|player| player.position).collect();
        let mut fired = Vec::new();
        for trigger in self.triggers.values() {
            if !trigger.next_check.is_ready(now) {
                continue;
            }
            let inside: Vec<Vec3> = positions
                .iter()
                .copied()
                .filter(|position| trigger.covers(*position))
                .collect();
            let context = TriggerContext {
                map_id: self.key.map_id,
                trigger_id: trigger.trigger_id,
                tick: now,
                player_positions: &inside,
            };
            let actions = self.hooks.triggers.evaluate(&context);
            if !actions.is_empty() {
                fired.push((trigger.object_id, actions));
            }
        }

        for (object_id, actions) in fired {
            for action in actions {
                match action {
                    TriggerAction::SpawnNpc { npc_id, position } => {
                        self.spawn_npc(npc_id, position);
                    }
                    TriggerAction::SetPortalEnabled { portal_id, enabled } => {
                        self.set_portal_enabled(portal_id, enabled);
                    }
                    TriggerAction::Rearm { delay_ticks } => {
                        if let Some(trigger) = self.triggers.get_mut(&object_id) {
                            trigger.next_check.reset(now, delay_ticks);
                        }
                    }
                }
            }
        }
    }

    fn update_players(&mut self) {
        for (object_id, position) in std::mem::take(&mut self.pending_moves) {
            let Some(player) = self.players.get_mut(&object_id) else {
                continue;
            };
            player.position = position;
            self.push_event(FieldEvent::ActorMoved {
                object_id,
                position,
            });
        }
    }

    fn update_npcs(&mut self) {
        let map_id = self.key.map_id;
        let now = self.clock.now();
        let mut effects = Vec::new();
        let mut finished = Vec::new();
        for npc in self.npcs.values_mut() {
            if let Some(effect) = npc.update(map_id, &self.hooks) {
                effects.push((npc.object_id, npc.position, effect));
            }
            for task in npc.tasks.drain_finished() {
                finished.push((npc.object_id, task));
            }
        }

        for (object_id, position, effect) in effects {
            match effect {
                TaskEffect::Moved { position } => {
                    self.push_event(FieldEvent::ActorMoved {
                        object_id,
                        position,
                    });
                }
                TaskEffect::Emote { sequence } => {
                    self.push_event(FieldEvent::Emote {
                        object_id,
                        sequence,
                    });
                }
                TaskEffect::SkillCast {
                    skill_id,
                    level,
                    metadata,
                } => {
                    self.push_event(FieldEvent::SkillCast {
                        caster: object_id,
                        skill_id,
                        level,
                    });
                    if metadata.duration_ticks > 0 {
                        let skill_object = self.ids.next();
                        self.skills.insert(
                            skill_object,
                            FieldSkill::new(skill_object, object_id, skill_id, level, position, metadata, now),
                        );
                    }
                }
            }
        }
        for (npc, task) in finished {
            self.push_event(FieldEvent::TaskFinished {
                npc,
                task: task.id,
                status: task.status,
            });
        }
    }

    fn update_pets(&mut self) {
        let owners: BTreeMap<ObjectId, Vec3> = self
            .players
            .values()
            .map(|player| (player.object_id, player.position))
            .collect();
        let mut moved = Vec::new();
        let mut orphaned = Vec::new();
        for pet in self.pets.values_mut() {
            match owners.get(&pet.owner) {
                Some(owner_position) => {
                    if pet.follow(*owner_position) {
                        moved.push((pet.object_id, pet.position));
                    }
                }
                None => orphaned.push(pet.object_id),
            }
        }
        for (object_id, position) in moved {
            self.push_event(FieldEvent::ActorMoved {
                object_id,
                position,
            });
        }
        for object_id in orphaned {
            self.remove_pet(object_id);
        }
    }

    fn update_resettables(&mut self, category: FieldCategory) {
        let now = self.clock.now();
        let mut reset = Vec::new();
        if let Some(objects) = self.resettables_mut(category) {
            for object in objects.values_mut() {
                if object.update(now) {
                    reset.push(object.object_id);
                }
            }
        }
        for object_id in reset {
            self.push_event(FieldEvent::ObjectReset {
                object_id,
                category,
            });
        }
    }

    fn update_items(&mut self) {
        let now = self.clock.now();
        let expired: Vec<ObjectId> = self
            .items
            .values()
            .filter(|item| item.despawn.is_ready(now))
            .map(|item| item.object_id)
            .collect();
        for object_id in expired {
            self.pick_up_item(object_id);
        }
    }

    fn update_spawners(&mut self) {
        let now = self.clock.now();
        let npcs = &self.npcs;
        let mut spawns = Vec::new();
        for spawner in self.spawners.values_mut() {
            spawner.retain_alive(|object_id| npcs.contains_key(&object_id), now);
            if let Some(npc_id) = spawner.due(now) {
                spawns.push((spawner.object_id, npc_id, spawner.position));
            }
        }
        for (spawner_id, npc_id, position) in spawns {
            let object_id = self.spawn_npc(npc_id, position);
            if let Some(npc) = self.npcs.get_mut(&object_id) {
                npc.spawner = Some(spawner_id);
            }
            if let Some(spawner) = self.spawners.get_mut(&spawner_id) {
                spawner.spawned.insert(object_id);
            }
        }
    }

    fn update_skills(&mut self) {
        let now = self.clock.now();
        let targets: Vec<Vec3> = self
            .players
            .values()
            .map(|player| player.position)
            .chain(self.npcs.values().map(|npc| npc.position))
            .collect();
        let mut fired = Vec::new();
        let mut expired = Vec::new();
        for skill in self.skills.values_mut() {
            if skill.is_expired(now) {
                expired.push(skill.object_id);
            } else if skill.fire(now) {
                let hits = targets.iter().filter(|target| skill.covers(**target)).count();
                fired.push((skill.object_id, skill.skill_id, hits));
            }
        }
        for (object_id, skill_id, targets) in fired {
            self.push_event(FieldEvent::SkillFired {
                object_id,
                skill_id,
                targets,
            });
        }
        for object_id in expired {
            self.skills.remove(&object_id);
            self.push_event(FieldEvent::SkillExpired { object_id });
        }
    }

    fn update_portals(&mut self) {
        let now = self.clock.now();
        let players: Vec<(ObjectId, Vec3)> = self
            .players
            .values()
            .map(|player| (player.object_id, player.position))
            .collect();
        let mut events = Vec::new();
        for portal in self.portals.values_mut() {
            if portal.update_timer(now) {
                events.push(FieldEvent::PortalToggled {
                    portal_id: portal.portal_id,
                    enabled: false,
                });
            }
            for player in portal.entering(players.iter().copied()) {
                events.push(FieldEvent::PortalEntered {
                    player,
                    portal_id: portal.portal_id,
                    target_map: portal.target_map,
                });
            }
        }
        for event in events {
            self.push_event(event);
        }
    }

    /// Drops everything the field holds. The state is inert afterwards.
    pub fn release(&mut self) {
        self.players.clear();
        self.pending_moves.clear();
        self.npcs.clear();
        self.pets.clear();
        self.items.clear();
        self.portals.clear();
        self.triggers.clear();
        self.breakables.clear();
        self.liftables.clear();
        self.interacts.clear();
        self.spawners.clear();
        self.skills.clear();
        self.cron.clear();
        self.callbacks.clear();
        self.events.clear();
        self.map = None;
        self.released = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSettings {
    pub tick_interval: Duration,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    Empty,
    RoomTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FieldSignal {
    Running = 0,
    Stopping = 1,
}

#[derive(Debug)]
struct FieldControl {
    signal: AtomicU8,
}

impl FieldControl {
    fn new() -> Self {
        Self {
            signal: AtomicU8::new(FieldSignal::Running as u8),
        }
    }

    fn request_stop(&self) {
        self.signal.store(FieldSignal::Stopping as u8, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.signal.load(Ordering::SeqCst) == FieldSignal::Running as u8
    }
}

#[derive(Debug, Default)]
struct Occupancy {
    present: BTreeSet<ObjectId>,
    empty_since: Option<Instant>,
}

struct FieldShared {
    key: FieldKey,
    state: Mutex<FieldState>,
    inbox: Mutex<Vec<FieldCommand>>,
    control: FieldControl,
}

/// Handle to a running field. Cheap to share; every method is safe to call
/// from any thread.
pub struct FieldSimulation {
    key: FieldKey,
    map: Mutex<Option<Arc<LoadedMap>>>,
    shared: Arc<FieldShared>,
    ids: Arc<LocalIds>,
    occupancy: Mutex<Occupancy>,
    room_deadline: Option<Instant>,
    thread: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl fmt::Debug for FieldSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSimulation")
            .field("key", &self.key)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FieldSimulation {
    /// Builds the field state and starts its tick thread.
    pub fn start(
        key: FieldKey,
        map: Arc<LoadedMap>,
        hooks: FieldHooks,
        settings: FieldSettings,
    ) -> Result<Arc<Self>, FieldError> {
        let created_at = Instant::now();
        let ids = Arc::new(LocalIds::default());
        let state = FieldState::new(
            key,
            Arc::clone(&map),
            hooks,
            Arc::clone(&ids),
            settings.tick_interval,
        );
        let shared = Arc::new(FieldShared {
            key,
            state: Mutex::new(state),
            inbox: Mutex::new(Vec::new()),
            control: FieldControl::new(),
        });
        let room_deadline = map
            .metadata
            .room_timer_secs
            .map(|secs| created_at + Duration::from_secs(secs));

        let thread_shared = Arc::clone(&shared);
        let tick_interval = settings.tick_interval;
        let handle = thread::Builder::new()
            .name(format!("field-{}-{}", key.map_id, key.instance_id))
            .spawn(move || run_tick_loop(thread_shared, tick_interval))
            .map_err(|err| FieldError::ThreadSpawn {
                key,
                message: err.to_string(),
            })?;

        info!(
            map_id = key.map_id,
            owner_id = key.owner_id,
            instance_id = key.instance_id,
            map = %map.metadata.name,
            "field_started"
        );
        Ok(Arc::new(Self {
            key,
            map: Mutex::new(Some(map)),
            shared,
            ids,
            occupancy: Mutex::new(Occupancy {
                present: BTreeSet::new(),
                empty_since: Some(created_at),
            }),
            room_deadline,
            thread: Mutex::new(Some(handle)),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn key(&self) -> FieldKey {
        self.key
    }

    /// The loaded map, until the field is disposed.
    pub fn map(&self) -> Option<Arc<LoadedMap>> {
        lock_ignoring_poison(&self.map).clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), FieldError> {
        if self.is_disposed() {
            Err(FieldError::Disposed(self.key))
        } else {
            Ok(())
        }
    }

    /// Queues a command for the tick thread.
    pub fn submit<F>(&self, command: F) -> Result<(), FieldError>
    where
        F: FnOnce(&mut FieldState) + Send + 'static,
    {
        self.ensure_live()?;
        lock_ignoring_poison(&self.shared.inbox).push(Box::new(command));
        Ok(())
    }

    /// Reads the current state under the state lock.
    pub fn with_state<R>(&self, read: impl FnOnce(&FieldState) -> R) -> Result<R, FieldError> {
        self.ensure_live()?;
        let state = self
            .shared
            .state
            .lock()
            .map_err(|_| FieldError::LockPoisoned(self.key))?;
        Ok(read(&state))
    }

    pub fn player_count(&self) -> usize {
        lock_ignoring_poison(&self.occupancy).present.len()
    }

    pub fn empty_since(&self) -> Option<Instant> {
        lock_ignoring_poison(&self.occupancy).empty_since
    }

    pub fn add_player(&self, character_id: i64, name: &str, position: Vec3) -> Result<ObjectId, FieldError> {
        self.ensure_live()?;
        let object_id = self.ids.next();
        {
            let mut occupancy = lock_ignoring_poison(&self.occupancy);
            occupancy.present.insert(object_id);
            occupancy.empty_since = None;
        }
        let name = name.to_string();
        self.submit(move |state| state.add_player(object_id, character_id, &name, position))?;
        debug!(field = %self.key, object_id = object_id.0, character_id, "player_added");
        Ok(object_id)
    }

    pub fn remove_player(&self, object_id: ObjectId) -> Result<bool, FieldError> {
        self.ensure_live()?;
        {
            let mut occupancy = lock_ignoring_poison(&self.occupancy);
            if !occupancy.present.remove(&object_id) {
                return Ok(false);
            }
            if occupancy.present.is_empty() {
                occupancy.empty_since = Some(Instant::now());
            }
        }
        self.submit(move |state| {
            state.remove_player(object_id);
        })?;
        Ok(true)
    }

    pub fn move_player(&self, object_id: ObjectId, position: Vec3) -> Result<(), FieldError> {
        self.submit(move |state| {
            state.move_player(object_id, position);
        })
    }

    pub fn spawn_npc(&self, npc_id: i32, position: Vec3) -> Result<ObjectId, FieldError> {
        self.ensure_live()?;
        let object_id = self.ids.next();
        self.submit(move |state| state.insert_npc(object_id, npc_id, position))?;
        Ok(object_id)
    }

    pub fn spawn_item(&self, item_id: i32, amount: u32, position: Vec3, lifetime_ticks: u64) -> Result<ObjectId, FieldError> {
        self.ensure_live()?;
        let object_id = self.ids.next();
        self.submit(move |state| state.insert_item(object_id, item_id, amount, position, lifetime_ticks))?;
        Ok(object_id)
    }

    pub fn queue_npc_task(
        &self,
        npc: ObjectId,
        priority: TaskPriority,
        kind: TaskKind,
        cancel_on_interrupt: bool,
    ) -> Result<(), FieldError> {
        self.submit(move |state| {
            if state.queue_npc_task(npc, priority, kind, cancel_on_interrupt).is_none() {
                debug!(field = %state.key(), npc = npc.0, "task_for_missing_npc");
            }
        })
    }

    /// Schedules a one-shot callback `delay_ticks` after the tick that applies it.
    pub fn schedule<F>(&self, delay_ticks: u64, callback: F) -> Result<(), FieldError>
    where
        F: FnOnce(&mut FieldState) + Send + 'static,
    {
        self.submit(move |state| {
            state.schedule(delay_ticks, callback);
        })
    }

    /// Whether the registry should dispose this field at `now`.
    pub fn reclaim_due(&self, now: Instant, empty_timeout: Duration) -> Option<ReclaimReason> {
        if self.room_deadline.map_or(false, |deadline| now >= deadline) {
            return Some(ReclaimReason::RoomTimer);
        }
        let occupancy = lock_ignoring_poison(&self.occupancy);
        match occupancy.empty_since {
            Some(since) if occupancy.present.is_empty() => {
                (now.saturating_duration_since(since) > empty_timeout).then_some(ReclaimReason::Empty)
            }
            _ => None,
        }
    }

    /// Stops the tick thread, waits for it and releases the field's state.
    /// Calling it again does nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.control.request_stop();
        let handle = lock_ignoring_poison(&self.thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!(field = %self.key, "field_dispose_from_tick_thread");
            } else if handle.join().is_err() {
                warn!(field = %self.key, "field_thread_panicked");
            }
        }
        lock_ignoring_poison(&self.shared.inbox).clear();
        lock_ignoring_poison(&self.shared.state).release();
        lock_ignoring_poison(&self.map).take();
        info!(
            map_id = self.key.map_id,
            owner_id = self.key.owner_id,
            instance_id = self.key.instance_id,
            "field_disposed"
        );
    }
}

impl Drop for FieldSimulation {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_tick_loop(shared: Arc<FieldShared>, tick_interval: Duration) {
    while shared.control.is_running() {
        let commands = std::mem::take(&mut *lock_ignoring_poison(&shared.inbox));
        match shared.state.lock() {
            Ok(mut state) => {
                for command in commands {
                    command(&mut state);
                }
                state.tick();
            }
            Err(_) => {
                error!(field = %shared.key, "field_state_poisoned");
                break;
            }
        }
        thread::sleep(tick_interval);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::world::hooks::{SkillMetadata, StaticSkillCatalog, TriggerScript};
    use crate::world::map_data::{MapMetadata, MobSpawnerSpawn, PortalSpawn};
    use crate::world::spatial_index::IndexSettings;

    pub(crate) fn test_map(map_id: i32, metadata: MapMetadata) -> Arc<LoadedMap> {
        let index = metadata
            .build_index(map_id, IndexSettings::default())
            .expect("index");
        Arc::new(LoadedMap {
            map_id,
            metadata,
            index: Arc::new(index),
        })
    }

    fn state_with(metadata: MapMetadata, hooks: FieldHooks) -> FieldState {
        FieldState::new(
            FieldKey::new(2000001, 0, 1),
            test_map(2000001, metadata),
            hooks,
            Arc::new(LocalIds::default()),
            Duration::from_millis(50),
        )
    }

    fn join(state: &mut FieldState) -> ObjectId {
        let object_id = state.ids.next();
        state.add_player(object_id, 77, "tester", Vec3::ZERO);
        object_id
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    /// Records the player positions it sees and spawns an NPC on its first run.
    struct Recording {
        seen: Mutex<Vec<Vec<Vec3>>>,
    }

    impl TriggerScript for Recording {
        fn evaluate(&self, context: &TriggerContext<'_>) -> Vec<TriggerAction> {
            let mut seen = lock_ignoring_poison(&self.seen);
            seen.push(context.player_positions.to_vec());
            if seen.len() == 1 {
                vec![TriggerAction::SpawnNpc {
                    npc_id: 5,
                    position: Vec3::ZERO,
                }]
            } else {
                vec![TriggerAction::Rearm { delay_ticks: 10 }]
            }
        }
    }

    #[test]
    fn tick_is_skipped_without_players() {
        let mut state = state_with(MapMetadata::default(), FieldHooks::default());
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        state.schedule(0, move |_| *lock_ignoring_poison(&counter) += 1);
        assert!(!state.tick());
        assert_eq!(state.now(), GameTick(0));
        assert_eq!(*lock_ignoring_poison(&fired), 0);

        join(&mut state);
        assert!(state.tick());
        assert_eq!(state.now(), GameTick(1));
        assert_eq!(*lock_ignoring_poison(&fired), 1);
    }

    #[test]
    fn categories_observe_earlier_updates_in_the_same_tick() {
        let script = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let hooks = FieldHooks {
            triggers: script.clone(),
            ..FieldHooks::default()
        };
        let metadata = MapMetadata {
            triggers: vec![crate::world::map_data::TriggerSpawn {
                trigger_id: 1,
                position: Vec3::ZERO,
                radius: 0.0,
            }],
            ..MapMetadata::default()
        };
        let mut state = state_with(metadata, hooks);
        let player = join(&mut state);
        let pet = state.spawn_pet(9, player, 10.0, 1000.0).expect("pet");
        state.move_player(player, Vec3::new(300.0, 0.0, 0.0));
        state.drain_events();
        assert!(state.tick());

        // Triggers run before the player move is committed.
        assert_eq!(lock_ignoring_poison(&script.seen)[0], vec![Vec3::ZERO]);
        // Pets run after players and already follow the new position.
        assert!((state.pets()[&pet].position.x - 290.0).abs() < 1e-3);
        // The trigger's NPC exists before the NPC update of the same tick.
        let events = state.drain_events();
        let spawned = events
            .iter()
            .position(|event| matches!(event, FieldEvent::NpcSpawned { npc_id: 5, .. }))
            .expect("spawned");
        let moved = events
            .iter()
            .position(|event| matches!(event, FieldEvent::ActorMoved { object_id, .. } if *object_id == player))
            .expect("moved");
        assert!(spawned < moved);
        assert_eq!(state.npcs().len(), 1);
    }

    #[test]
    fn repeating_callback_runs_until_cancelled_from_inside() {
        let mut state = state_with(MapMetadata::default(), FieldHooks::default());
        join(&mut state);
        let runs = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&runs);
        let id = Arc::new(Mutex::new(None));
        let own_id = Arc::clone(&id);
        let callback = state.schedule_repeating(1, 2, move |state| {
            let mut log = lock_ignoring_poison(&log);
            log.push(state.now().0);
            if log.len() == 3 {
                if let Some(id) = *lock_ignoring_poison(&own_id) {
                    state.cancel_scheduled(id);
                }
            }
        });
        *lock_ignoring_poison(&id) = Some(callback);
        for _ in 0..12 {
            state.tick();
        }
        assert_eq!(*lock_ignoring_poison(&runs), vec![1, 3, 5]);
        assert_eq!(state.scheduled_len(), 0);
    }

    #[test]
    fn items_despawn_and_objects_reset() {
        let metadata = MapMetadata {
            breakables: vec![crate::world::map_data::ObjectSpawn {
                entity_id: 7,
                position: Vec3::ZERO,
                reset_ticks: 2,
            }],
            ..MapMetadata::default()
        };
        let mut state = state_with(metadata, FieldHooks::default());
        join(&mut state);
        let item = state.spawn_item(30000001, 1, Vec3::ZERO, 3);
        let breakable = *state
            .resettables(FieldCategory::Breakables)
            .and_then(|objects| objects.keys().next())
            .expect("breakable");
        assert!(state.use_object(FieldCategory::Breakables, breakable));
        assert!(!state.use_object(FieldCategory::Breakables, breakable));
        state.drain_events();

        state.tick();
        state.tick();
        assert!(state
            .drain_events()
            .contains(&FieldEvent::ObjectReset {
                object_id: breakable,
                category: FieldCategory::Breakables
            }));
        assert!(state.items().contains_key(&item));
        state.tick();
        assert!(!state.items().contains_key(&item));
    }

    #[test]
    fn spawners_fill_population_and_refill_after_death() {
        let metadata = MapMetadata {
            mob_spawners: vec![MobSpawnerSpawn {
                npc_ids: vec![21000001],
                position: Vec3::ZERO,
                population: 2,
                cooldown_ticks: 3,
            }],
            ..MapMetadata::default()
        };
        let mut state = state_with(metadata, FieldHooks::default());
        join(&mut state);
        for _ in 0..4 {
            state.tick();
        }
        assert_eq!(state.npcs().len(), 2);
        let victim = *state.npcs().keys().next().expect("npc");
        assert!(state.remove_npc(victim));
        state.tick();
        assert_eq!(state.npcs().len(), 1);
        for _ in 0..3 {
            state.tick();
        }
        assert_eq!(state.npcs().len(), 2);
        assert!(state
            .npcs()
            .values()
            .all(|npc| npc.spawner.is_some() && npc.npc_id == 21000001));
    }

    #[test]
    fn npc_skill_cast_leaves_area_skill() {
        let metadata = SkillMetadata {
            cast_ticks: 1,
            duration_ticks: 4,
            interval_ticks: 2,
            radius: 200.0,
        };
        let hooks = FieldHooks {
            skills: Arc::new(StaticSkillCatalog::new().with_skill(100, 1, metadata)),
            ..FieldHooks::default()
        };
        let mut state = state_with(MapMetadata::default(), hooks);
        join(&mut state);
        let npc = state.spawn_npc(5, Vec3::new(50.0, 0.0, 0.0));
        state
            .queue_npc_task(
                npc,
                TaskPriority::BattleAction,
                TaskKind::Skill {
                    skill_id: 100,
                    level: 1,
                },
                false,
            )
            .expect("npc exists");
        state.drain_events();
        state.tick();

        let events = state.drain_events();
        assert!(events.contains(&FieldEvent::SkillCast {
            caster: npc,
            skill_id: 100,
            level: 1
        }));
        // Player at the origin and the caster itself are both inside the radius.
        assert!(events
            .iter()
            .any(|event| matches!(event, FieldEvent::SkillFired { targets: 2, .. })));
        assert!(events
            .iter()
            .any(|event| matches!(event, FieldEvent::TaskFinished { status: TaskStatus::Complete, .. })));
        for _ in 0..4 {
            state.tick();
        }
        assert!(state.skills().is_empty());
    }

    #[test]
    fn player_entering_portal_is_reported_once() {
        let metadata = MapMetadata {
            portals: vec![PortalSpawn {
                portal_id: 3,
                position: Vec3::new(300.0, 0.0, 0.0),
                target_map: 2000002,
                enabled: true,
                close_after_ticks: None,
            }],
            ..MapMetadata::default()
        };
        let mut state = state_with(metadata, FieldHooks::default());
        let player = join(&mut state);
        state.move_player(player, Vec3::new(290.0, 0.0, 0.0));
        state.tick();
        state.tick();
        let entered: Vec<_> = state
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, FieldEvent::PortalEntered { .. }))
            .collect();
        assert_eq!(
            entered,
            vec![FieldEvent::PortalEntered {
                player,
                portal_id: 3,
                target_map: 2000002
            }]
        );
    }

    #[test]
    fn simulation_ticks_on_its_thread_and_disposes_once() {
        let field = FieldSimulation::start(
            FieldKey::new(2000001, 0, 9),
            test_map(2000001, MapMetadata::default()),
            FieldHooks::default(),
            FieldSettings {
                tick_interval: Duration::from_millis(1),
            },
        )
        .expect("start");
        let player = field.add_player(5, "walker", Vec3::ZERO).expect("add");
        assert_eq!(field.player_count(), 1);
        assert!(wait_until(|| field
            .with_state(|state| state.now() > GameTick(2))
            .unwrap_or(false)));
        assert!(field.with_state(|state| state.players().contains_key(&player)).expect("read"));

        field.dispose();
        assert!(field.is_disposed());
        assert_eq!(field.add_player(6, "late", Vec3::ZERO), Err(FieldError::Disposed(field.key())));
        assert!(matches!(field.with_state(|_| ()), Err(FieldError::Disposed(_))));
        field.dispose();
    }

    #[test]
    fn dispose_lets_go_of_the_map() {
        let map = test_map(2000001, MapMetadata::default());
        let field = FieldSimulation::start(
            FieldKey::new(2000001, 0, 11),
            Arc::clone(&map),
            FieldHooks::default(),
            FieldSettings {
                tick_interval: Duration::from_millis(1),
            },
        )
        .expect("start");
        assert!(Arc::strong_count(&map) > 1);
        assert!(field.map().is_some());

        field.dispose();
        assert!(field.map().is_none());
        // Only this test's handle is left while the field itself lives on.
        assert_eq!(Arc::strong_count(&map), 1);
        drop(field);
    }

    #[test]
    fn reclaim_due_tracks_occupancy_and_room_timer() {
        let field = FieldSimulation::start(
            FieldKey::new(2000001, 0, 10),
            test_map(2000001, MapMetadata::default()),
            FieldHooks::default(),
            FieldSettings::default(),
        )
        .expect("start");
        let timeout = Duration::from_secs(60);
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(field.reclaim_due(later, timeout), Some(ReclaimReason::Empty));

        let player = field.add_player(1, "stay", Vec3::ZERO).expect("add");
        assert_eq!(field.empty_since(), None);
        assert_eq!(field.reclaim_due(later, timeout), None);
        assert_eq!(field.remove_player(player), Ok(true));
        assert_eq!(field.remove_player(player), Ok(false));
        assert_eq!(field.reclaim_due(Instant::now(), timeout), None);
        field.dispose();

        let timed = FieldSimulation::start(
            FieldKey::new(2000002, 0, 11),
            test_map(
                2000002,
                MapMetadata {
                    room_timer_secs: Some(30),
                    ..MapMetadata::default()
                },
            ),
            FieldHooks::default(),
            FieldSettings::default(),
        )
        .expect("start");
        timed.add_player(2, "busy", Vec3::ZERO).expect("add");
        assert_eq!(timed.reclaim_due(Instant::now(), timeout), None);
        assert_eq!(
            timed.reclaim_due(Instant::now() + Duration::from_secs(31), timeout),
            Some(ReclaimReason::RoomTimer)
        );
    }
}
