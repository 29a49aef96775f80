//! Priority-preemption behavior queue for one NPC.
//!
//! Each priority band holds at most one live task. Only the highest occupied
//! band drives the actor; a lower band that gets outranked is paused, or
//! cancelled when it was queued with `cancel_on_interrupt`. Promotion of the
//! next task never happens inside the call that ended the previous one: it
//! waits for the following `tick`.

use crate::world::hooks::{Navigator, SkillCatalog, SkillMetadata};
use crate::world::position::Vec3;
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const PRIORITY_BANDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    Emote,
    IdleAction,
    BattleStandby,
    BattleWalk,
    BattleAction,
    Interrupt,
}

impl TaskPriority {
    pub const DESCENDING: [TaskPriority; PRIORITY_BANDS] = [
        TaskPriority::Interrupt,
        TaskPriority::BattleAction,
        TaskPriority::BattleWalk,
        TaskPriority::BattleStandby,
        TaskPriority::IdleAction,
        TaskPriority::Emote,
    ];

    fn band(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Cancelled,
    Complete,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Cancelled | TaskStatus::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Move { target: Vec3, speed: f32 },
    Skill { skill_id: i32, level: i16 },
    Emote { sequence: String, duration_ticks: u64 },
    /// `None` stands by until cancelled or preempted.
    Standby { duration_ticks: Option<u64> },
}

/// What a tick of the active task did to its actor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEffect {
    Moved {
        position: Vec3,
    },
    SkillCast {
        skill_id: i32,
        level: i16,
        metadata: SkillMetadata,
    },
    Emote {
        sequence: String,
    },
}

pub struct TaskContext<'a> {
    pub map_id: i32,
    pub position: Vec3,
    pub navigator: &'a dyn Navigator,
    pub skills: &'a dyn SkillCatalog,
}

#[derive(Debug, Clone, PartialEq)]
enum Progress {
    NotStarted,
    Walking { path: VecDeque<Vec3> },
    Casting { remaining: u64, metadata: SkillMetadata },
    Counting { remaining: u64 },
    Indefinite,
}

/// Why a task could not begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailed {
    NoPath,
    UnknownSkill { skill_id: i32, level: i16 },
}

enum Advance {
    Running(Option<TaskEffect>),
    Complete(Option<TaskEffect>),
    StartFailed(StartFailed),
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorTask {
    id: TaskId,
    priority: TaskPriority,
    kind: TaskKind,
    cancel_on_interrupt: bool,
    status: TaskStatus,
    progress: Progress,
}

impl ActorTask {
    fn new(id: TaskId, priority: TaskPriority, kind: TaskKind, cancel_on_interrupt: bool) -> Self {
        Self {
            id,
            priority,
            kind,
            cancel_on_interrupt,
            status: TaskStatus::Pending,
            progress: Progress::NotStarted,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn cancel_on_interrupt(&self) -> bool {
        self.cancel_on_interrupt
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    fn start(&mut self, context: &TaskContext<'_>) -> Result<Option<TaskEffect>, StartFailed> {
        let mut effect = None;
        self.progress = match &self.kind {
            TaskKind::Move { target, .. } => {
                let path = context
                    .navigator
                    .find_path(context.map_id, context.position, *target)
                    .ok_or(StartFailed::NoPath)?;
                Progress::Walking { path: path.into() }
            }
            TaskKind::Skill { skill_id, level } => {
                let metadata = context
                    .skills
                    .skill(*skill_id, *level)
                    .ok_or(StartFailed::UnknownSkill {
                        skill_id: *skill_id,
                        level: *level,
                    })?;
                Progress::Casting {
                    remaining: metadata.cast_ticks,
                    metadata,
                }
            }
            TaskKind::Emote {
                sequence,
                duration_ticks,
            } => {
                effect = Some(TaskEffect::Emote {
                    sequence: sequence.clone(),
                });
                Progress::Counting {
                    remaining: *duration_ticks,
                }
            }
            TaskKind::Standby {
                duration_ticks: Some(ticks),
            } => Progress::Counting { remaining: *ticks },
            TaskKind::Standby {
                duration_ticks: None,
            } => Progress::Indefinite,
        };
        Ok(effect)
    }

    fn advance(&mut self, context: &TaskContext<'_>) -> Advance {
        let mut started = None;
        if self.progress == Progress::NotStarted {
            match self.start(context) {
                Ok(effect) => started = effect,
                Err(reason) => return Advance::StartFailed(reason),
            }
        }

        match &mut self.progress {
            Progress::NotStarted => Advance::Failed,
            Progress::Walking { path } => {
                let speed = match self.kind {
                    TaskKind::Move { speed, .. } => speed,
                    _ => 0.0,
                };
                let mut position = context.position;
                if let Some(next) = path.front().copied() {
                    position = position.step_towards(next, speed);
                    if position == next {
                        path.pop_front();
                    }
                }
                let effect = Some(TaskEffect::Moved { position });
                if path.is_empty() {
                    Advance::Complete(effect)
                } else {
                    Advance::Running(effect)
                }
            }
            Progress::Casting {
                remaining,
                metadata,
            } => {
                *remaining = remaining.saturating_sub(1);
                if *remaining > 0 {
                    return Advance::Running(started);
                }
                let TaskKind::Skill { skill_id, level } = self.kind else {
                    return Advance::Failed;
                };
                Advance::Complete(Some(TaskEffect::SkillCast {
                    skill_id,
                    level,
                    metadata: *metadata,
                }))
            }
            Progress::Counting { remaining } => {
                *remaining = remaining.saturating_sub(1);
                if *remaining > 0 {
                    Advance::Running(started)
                } else {
                    Advance::Complete(started)
                }
            }
            Progress::Indefinite => Advance::Running(started),
        }
    }
}

/// A task that reached Cancelled or Complete.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTask {
    pub id: TaskId,
    pub priority: TaskPriority,
    pub kind: TaskKind,
    pub status: TaskStatus,
}

#[derive(Debug, Default)]
pub struct ActorTaskScheduler {
    bands: [Option<ActorTask>; PRIORITY_BANDS],
    active: Option<TaskPriority>,
    next_id: u64,
    finished: Vec<FinishedTask>,
}

impl ActorTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a behavior. A band that already holds a task only gives way
    /// when its occupant was queued with `cancel_on_interrupt`; otherwise the
    /// new task is rejected and reported as cancelled. Moves without a
    /// positive finite speed are rejected the same way.
    pub fn enqueue(&mut self, priority: TaskPriority, kind: TaskKind, cancel_on_interrupt: bool) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);

        if let TaskKind::Move { speed, .. } = kind {
            if !(speed.is_finite() && speed > 0.0) {
                debug!(task = id.0, speed, ?priority, "task_rejected");
                return self.reject(id, priority, kind);
            }
        }
        if let Some(occupant) = &self.bands[priority.band()] {
            if !occupant.cancel_on_interrupt {
                debug!(task = id.0, occupant = occupant.id.0, ?priority, "task_rejected");
                return self.reject(id, priority, kind);
            }
            self.terminate(priority, TaskStatus::Cancelled);
        }
        self.bands[priority.band()] = Some(ActorTask::new(id, priority, kind, cancel_on_interrupt));

        if let Some(active) = self.active {
            if priority > active {
                self.preempt(active);
            }
        }
        id
    }

    fn reject(&mut self, id: TaskId, priority: TaskPriority, kind: TaskKind) -> TaskId {
        self.finished.push(FinishedTask {
            id,
            priority,
            kind,
            status: TaskStatus::Cancelled,
        });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.band_of(id) {
            Some(priority) => self.terminate(priority, TaskStatus::Cancelled).is_some(),
            None => false,
        }
    }

    /// Marks the running task as naturally finished.
    pub fn complete(&mut self, id: TaskId) -> bool {
        match self.active {
            Some(priority) if self.band_of(id) == Some(priority) => {
                self.terminate(priority, TaskStatus::Complete).is_some()
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for priority in TaskPriority::DESCENDING {
            self.terminate(priority, TaskStatus::Cancelled);
        }
    }

    /// Promotes the head task if nothing is running, then advances the
    /// running task by one tick.
    pub fn tick(&mut self, context: &TaskContext<'_>) -> Option<TaskEffect> {
        if self.active.is_none() {
            self.promote();
        }
        let priority = self.active?;
        let task = self.bands[priority.band()].as_mut()?;
        match task.advance(context) {
            Advance::Running(effect) => effect,
            Advance::Complete(effect) => {
                self.terminate(priority, TaskStatus::Complete);
                effect
            }
            Advance::StartFailed(reason) => {
                debug!(task = task.id.0, ?priority, ?reason, "task_start_failed");
                self.terminate(priority, TaskStatus::Cancelled);
                None
            }
            Advance::Failed => {
                warn!(task = task.id.0, ?priority, "task_state_invalid");
                self.terminate(priority, TaskStatus::Cancelled);
                None
            }
        }
    }

    /// The task currently driving the actor.
    pub fn active(&self) -> Option<&ActorTask> {
        self.active
            .and_then(|priority| self.bands[priority.band()].as_ref())
    }

    /// Highest-priority live task, whether or not it has been promoted yet.
    pub fn head(&self) -> Option<&ActorTask> {
        TaskPriority::DESCENDING
            .iter()
            .find_map(|priority| self.bands[priority.band()].as_ref())
    }

    pub fn queued(&self, priority: TaskPriority) -> Option<&ActorTask> {
        self.bands[priority.band()].as_ref()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ActorTask> + '_ {
        self.bands.iter().rev().flatten()
    }

    /// Status of a live task, or of a finished one that has not been drained.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks()
            .find(|task| task.id == id)
            .map(|task| task.status)
            .or_else(|| {
                self.finished
                    .iter()
                    .find(|task| task.id == id)
                    .map(|task| task.status)
            })
    }

    pub fn is_idle(&self) -> bool {
        self.bands.iter().all(Option::is_none)
    }

    pub fn drain_finished(&mut self) -> Vec<FinishedTask> {
        std::mem::take(&mut self.finished)
    }

    fn band_of(&self, id: TaskId) -> Option<TaskPriority> {
        self.tasks().find(|task| task.id == id).map(|task| task.priority)
    }

    fn promote(&mut self) {
        for priority in TaskPriority::DESCENDING {
            if let Some(task) = self.bands[priority.band()].as_mut() {
                task.status = TaskStatus::Running;
                self.active = Some(priority);
                return;
            }
        }
    }

    fn preempt(&mut self, priority: TaskPriority) {
        self.active = None;
        let Some(task) = self.bands[priority.band()].as_mut() else {
            return;
        };
        if task.cancel_on_interrupt {
            self.terminate(priority, TaskStatus::Cancelled);
        } else {
            task.status = TaskStatus::Paused;
        }
    }

    fn terminate(&mut self, priority: TaskPriority, status: TaskStatus) -> Option<TaskId> {
        let task = self.bands[priority.band()].take()?;
        if self.active == Some(priority) {
            self.active = None;
        }
        self.finished.push(FinishedTask {
            id: task.id,
            priority,
            kind: task.kind,
            status,
        });
        Some(task.id)
    }
}
