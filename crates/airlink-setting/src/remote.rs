use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::timeout::Timeout;

/// Sends a requested value towards the device. Returns whether the request was
/// accepted for tracking, not whether the device applied it.
pub type Transmit<T> = Box<dyn FnMut(&T) -> bool + Send>;

/// What a setting does when `transmit` refuses a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectPolicy {
    /// Keep the current value.
    #[default]
    Drop,
    /// Adopt the value as confirmed: there is no device to disagree with.
    ApplyLocally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Requested value equals the current one.
    Unchanged,
    /// Outside the supported set.
    Unsupported,
    /// `transmit` refused and the policy is [`RejectPolicy::Drop`].
    Rejected,
    /// `transmit` refused and the value was adopted without a deadline.
    AppliedLocally,
    /// Value shown optimistically, awaiting confirmation.
    Updating,
}

impl SetOutcome {
    /// Whether observers must be told.
    pub fn changed(self) -> bool {
        matches!(self, SetOutcome::AppliedLocally | SetOutcome::Updating)
    }
}

/// Optimistically updated value mirrored from a device.
///
/// Application writes go through [`set`](Self::set): the value is shown at
/// once and a rollback deadline is armed. A backend [`update`](Self::update)
/// settles it; if none arrives before the deadline,
/// [`poll_timeout`](Self::poll_timeout) reverts to the last confirmed value.
///
/// While updating, `confirmed` does not move, so it is the rollback target of
/// the first outstanding change even if the application keeps writing.
pub struct RemoteSetting<T> {
    name: &'static str,
    confirmed: T,
    value: T,
    timeout: Timeout,
    policy: RejectPolicy,
    transmit: Transmit<T>,
}

impl<T: fmt::Debug> fmt::Debug for RemoteSetting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSetting")
            .field("name", &self.name)
            .field("confirmed", &self.confirmed)
            .field("value", &self.value)
            .field("deadline", &self.timeout.deadline())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T> RemoteSetting<T>
where
    T: Clone + PartialEq + fmt::Debug,
{
    pub fn new<F>(name: &'static str, initial: T, transmit: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self {
            name,
            confirmed: initial.clone(),
            value: initial,
            timeout: Timeout::default(),
            policy: RejectPolicy::default(),
            transmit: Box::new(transmit),
        }
    }

    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Timeout::new(duration);
        self
    }

    pub fn with_policy(mut self, policy: RejectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &'static str { self.name }

    /// Observable value, possibly optimistic.
    pub fn value(&self) -> &T { &self.value }

    pub fn confirmed(&self) -> &T { &self.confirmed }

    pub fn updating(&self) -> bool { self.timeout.is_armed() }

    pub fn deadline(&self) -> Option<Instant> { self.timeout.deadline() }

    pub fn set(&mut self, value: T, now: Instant) -> SetOutcome {
        if value == self.value {
            return SetOutcome::Unchanged;
        }
        if !(self.transmit)(&value) {
            return match self.policy {
                RejectPolicy::Drop => {
                    debug!("setting {}: transmit refused value={:?}", self.name, value);
                    SetOutcome::Rejected
                }
                RejectPolicy::ApplyLocally => {
                    debug!("setting {}: applied locally value={:?}", self.name, value);
                    self.timeout.cancel();
                    self.confirmed = value.clone();
                    self.value = value;
                    SetOutcome::AppliedLocally
                }
            };
        }
        debug!("setting {}: sent value={:?} rollback_to={:?}", self.name, value, self.confirmed);
        self.value = value;
        self.timeout.arm(now);
        SetOutcome::Updating
    }

    /// Backend-confirmed value. Returns true if observers must be told.
    pub fn update(&mut self, value: T) -> bool {
        if !self.updating() && value == self.value {
            return false;
        }
        self.timeout.cancel();
        self.confirmed = value.clone();
        self.value = value;
        true
    }

    /// Rolls back if the deadline has passed. Returns true if observers must
    /// be told.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        if !self.timeout.take_expired(now) {
            return false;
        }
        if self.value != self.confirmed {
            debug!("setting {}: no confirmation, rollback {:?} -> {:?}", self.name, self.value, self.confirmed);
            self.value = self.confirmed.clone();
        }
        true
    }

    /// Drops a pending rollback, keeping the observable value, and runs
    /// `on_cancelled` if one was pending.
    pub fn cancel_rollback<F: FnOnce()>(&mut self, on_cancelled: F) {
        if self.timeout.cancel() {
            self.confirmed = self.value.clone();
            on_cancelled();
        }
    }
}
