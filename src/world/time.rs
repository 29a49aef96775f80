use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameTick(pub u64);

impl GameTick {
    pub fn after(self, ticks: u64) -> GameTick {
        GameTick(self.0.saturating_add(ticks))
    }

    pub fn since(self, earlier: GameTick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Per-field tick counter. Only the owning tick thread advances it.
#[derive(Debug, Clone)]
pub struct GameClock {
    tick_length: Duration,
    tick: GameTick,
}

impl GameClock {
    pub fn new(tick_length: Duration) -> Self {
        let tick_length = if tick_length.is_zero() {
            Duration::from_millis(1)
        } else {
            tick_length
        };
        Self {
            tick_length,
            tick: GameTick(0),
        }
    }

    pub fn tick_length(&self) -> Duration {
        self.tick_length
    }

    pub fn now(&self) -> GameTick {
        self.tick
    }

    pub fn advance(&mut self, ticks: u64) -> GameTick {
        self.tick.0 = self.tick.0.saturating_add(ticks);
        self.tick
    }

    pub fn ticks_from_duration_round_up(&self, duration: Duration) -> u64 {
        if duration.is_zero() {
            return 0;
        }
        let tick_nanos = self.tick_length.as_nanos().max(1);
        let ticks = (duration.as_nanos() + tick_nanos - 1) / tick_nanos;
        ticks.min(u64::MAX as u128) as u64
    }

    pub fn duration_for_ticks(&self, ticks: u64) -> Duration {
        let nanos = self
            .tick_length
            .as_nanos()
            .saturating_mul(ticks as u128)
            .min(u64::MAX as u128) as u64;
        Duration::from_nanos(nanos)
    }
}

/// Tick at which something becomes available again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldown {
    ready_at: GameTick,
}

impl Cooldown {
    pub fn ready_now() -> Self {
        Self::default()
    }

    pub fn from_ticks_from_now(now: GameTick, ticks: u64) -> Self {
        Self {
            ready_at: now.after(ticks),
        }
    }

    pub fn ready_at(&self) -> GameTick {
        self.ready_at
    }

    pub fn is_ready(&self, now: GameTick) -> bool {
        now >= self.ready_at
    }

    pub fn remaining_ticks(&self, now: GameTick) -> u64 {
        self.ready_at.since(now)
    }

    pub fn reset(&mut self, now: GameTick, ticks: u64) {
        self.ready_at = now.after(ticks);
    }
}
