//! Sliding-window rate limiter for the deep cloud tier.

/// Tracks acquisition timestamps inside a rolling window. Time always
/// arrives as a parameter so the limiter is deterministic under test.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: u32,
    window_ms: u64,
    acquired_at: Vec<u64>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            acquired_at: Vec::new(),
        }
    }

    fn prune(&mut self, now_ms: u64) {
        let window = self.window_ms;
        self.acquired_at.retain(|&t| t + window > now_ms);
    }

    /// Take one slot if any remain in the current window.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        self.prune(now_ms);
        if (self.acquired_at.len() as u32) < self.limit {
            self.acquired_at.push(now_ms);
            true
        } else {
            false
        }
    }

    /// Give back the most recent acquisition. Used when the guarded call
    /// never reached the service (connection refused, no route): an
    /// attempt that never arrived should not count against the window.
    pub fn refund(&mut self) {
        self.acquired_at.pop();
    }

    /// Slots remaining in the current window.
    pub fn remaining(&mut self, now_ms: u64) -> u32 {
        self.prune(now_ms);
        self.limit.saturating_sub(self.acquired_at.len() as u32)
    }

    /// When the oldest in-window acquisition expires, freeing a slot.
    /// `None` when nothing is held.
    pub fn reset_at(&mut self, now_ms: u64) -> Option<u64> {
        self.prune(now_ms);
        self.acquired_at
            .iter()
            .min()
            .map(|&oldest| oldest + self.window_ms)
    }
}
