use crate::entities::actor::ObjectId;
use std::sync::atomic::{AtomicI32, Ordering};

/// First id handed out for objects spawned inside a field. Global instance
/// ids stay below it.
pub const LOCAL_ID_BASE: i32 = 0x1000_0000;

/// Process-wide instance id source, owned by the composition root and passed
/// to the registry.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Deterministic allocator for tests and tools.
    pub fn starting_at(first: i32) -> Self {
        Self {
            next: AtomicI32::new(first.clamp(1, LOCAL_ID_BASE)),
        }
    }

    /// Next global id, or `None` once the global range is used up.
    pub fn next_global(&self) -> Option<i32> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                (id < LOCAL_ID_BASE).then_some(id + 1)
            })
            .ok()
    }
}

/// Per-field object id counter. Shared between the tick thread and callers
/// that need an id before their spawn command has been applied.
#[derive(Debug)]
pub struct LocalIds {
    next: AtomicI32,
}

impl Default for LocalIds {
    fn default() -> Self {
        Self {
            next: AtomicI32::new(LOCAL_ID_BASE),
        }
    }
}

impl LocalIds {
    pub fn next(&self) -> ObjectId {
        let id = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                Some(id.checked_add(1).unwrap_or(LOCAL_ID_BASE))
            })
            .unwrap_or(LOCAL_ID_BASE);
        ObjectId(id)
    }
}
