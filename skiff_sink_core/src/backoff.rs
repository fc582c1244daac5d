use std::time::Duration;

/// Exponential retry delay generator.
///
/// `next` returns the current delay and doubles it for the following call,
/// capped at the configured maximum. `reset` restores the initial delay;
/// a pooled attempt resets its backoff before reuse so a fresh occupant
/// never inherits accumulated delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next(&mut self) -> Duration {
        let current = self.next;
        self.next = (current * 2).min(self.max);
        current
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
