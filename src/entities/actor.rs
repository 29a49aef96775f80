use crate::entities::task::{ActorTaskScheduler, TaskContext, TaskEffect};
use crate::world::hooks::FieldHooks;
use crate::world::position::Vec3;

/// Object id local to one field instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub i32);

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlayer {
    pub object_id: ObjectId,
    pub character_id: i64,
    pub name: String,
    pub position: Vec3,
}

#[derive(Debug)]
pub struct FieldNpc {
    pub object_id: ObjectId,
    pub npc_id: i32,
    pub position: Vec3,
    pub spawn_position: Vec3,
    /// Mob spawner that owns this NPC, if any.
    pub spawner: Option<ObjectId>,
    pub tasks: ActorTaskScheduler,
}

impl FieldNpc {
    pub fn new(object_id: ObjectId, npc_id: i32, position: Vec3) -> Self {
        Self {
            object_id,
            npc_id,
            position,
            spawn_position: position,
            spawner: None,
            tasks: ActorTaskScheduler::new(),
        }
    }

    /// Advances the NPC's behavior queue by one tick and applies movement.
    pub fn update(&mut self, map_id: i32, hooks: &FieldHooks) -> Option<TaskEffect> {
        let context = TaskContext {
            map_id,
            position: self.position,
            navigator: hooks.navigator.as_ref(),
            skills: hooks.skills.as_ref(),
        };
        let effect = self.tasks.tick(&context);
        if let Some(TaskEffect::Moved { position }) = &effect {
            self.position = *position;
        }
        effect
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPet {
    pub object_id: ObjectId,
    pub pet_id: i32,
    pub owner: ObjectId,
    pub position: Vec3,
    pub follow_distance: f32,
    pub speed: f32,
}

impl FieldPet {
    /// Steps towards the owner when it has fallen behind. Returns true if it moved.
    pub fn follow(&mut self, owner_position: Vec3) -> bool {
        let distance = self.position.distance(owner_position);
        if distance <= self.follow_distance {
            return false;
        }
        let step = self.speed.min(distance - self.follow_distance);
        self.position = self.position.step_towards(owner_position, step);
        true
    }
}
