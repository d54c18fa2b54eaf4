use std::time::{Duration, Instant};

/// Coalesces high-frequency content updates to at most one applied update
/// per frame interval. Each scheduled value replaces the previous pending
/// one, so the final applied value is always the latest.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Duration,
    last_applied: Option<Instant>,
    pending: Option<String>,
}

impl FrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_applied: None,
            pending: None,
        }
    }

    /// Applies every update as soon as it is scheduled.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the value to apply now, or holds it until the next frame.
    pub fn schedule(&mut self, value: String, now: Instant) -> Option<String> {
        self.pending = Some(value);
        self.flush_due(now)
    }

    /// Pending value if a full frame has passed since the last applied one.
    pub fn flush_due(&mut self, now: Instant) -> Option<String> {
        let due = match self.last_applied {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if due {
            self.take_pending(now)
        } else {
            None
        }
    }

    /// Pending value regardless of frame timing.
    pub fn flush_now(&mut self) -> Option<String> {
        self.take_pending(Instant::now())
    }

    /// Drop the pending value without applying it.
    pub fn discard(&mut self) {
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Time left until the pending value becomes due.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.pending.as_ref()?;
        let last = self.last_applied?;
        Some(self.interval.saturating_sub(now.saturating_duration_since(last)))
    }

    fn take_pending(&mut self, now: Instant) -> Option<String> {
        let value = self.pending.take()?;
        self.last_applied = Some(now);
        Some(value)
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}
