use std::time::Duration;
use tokio::time::Instant;

/// Default delay before an unconfirmed change is rolled back.
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-shot deadline. Re-arming replaces the previous deadline, so an owner
/// never has more than one pending expiry.
#[derive(Debug, Clone)]
pub struct Timeout {
    duration: Duration,
    deadline: Option<Instant>,
}

impl Default for Timeout {
    fn default() -> Self {
        Self::new(ROLLBACK_TIMEOUT)
    }
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration, deadline: None }
    }

    pub fn duration(&self) -> Duration { self.duration }

    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    pub fn is_armed(&self) -> bool { self.deadline.is_some() }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.duration);
    }

    /// Returns true if a deadline was armed.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(t) if now >= t)
    }

    /// Disarms and returns true if the deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> bool {
        if self.is_expired(now) {
            self.deadline = None;
            return true;
        }
        false
    }
}
