//! Small exponential backoff helper for transient forward/SFTP failures,
//! per SPEC_FULL.md §5 (ambient): "Retry/backoff for transient forward/
//! SFTP errors uses a small exponential backoff helper local to
//! `siphon-client`, capped as specified; it is not a generic crate
//! dependency since the policy is specific." No jitter is specified, so
//! none is added.

use std::time::Duration;

/// Exponential backoff starting at `initial` and doubling each step, never
/// exceeding `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff { initial, max, attempt: 0 }
    }

    /// The retry/SFTP default: starts at 200ms, caps at 5s.
    pub fn default_transient() -> Self {
        Backoff::new(Duration::from_millis(200), Duration::from_secs(5))
    }

    /// Duration to wait before the next attempt, advancing internal state.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(16); // avoid overflowing the u32 shift
        self.attempt += 1;
        let scaled = self.initial.checked_mul(1u32 << shift).unwrap_or(self.max);
        scaled.min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub async fn sleep(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_each_attempt_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn reset_returns_to_the_initial_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
