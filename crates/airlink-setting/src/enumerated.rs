use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::remote::{RejectPolicy, RemoteSetting, SetOutcome};

/// Setting restricted to the values the device advertises.
///
/// Nothing is supported until the backend reports a set. Narrowing the set
/// never corrects the current value; that is left to the device.
#[derive(Debug)]
pub struct EnumeratedSetting<T> {
    inner: RemoteSetting<T>,
    supported: HashSet<T>,
}

impl<T> EnumeratedSetting<T>
where
    T: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new<F>(name: &'static str, initial: T, transmit: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self { inner: RemoteSetting::new(name, initial, transmit), supported: HashSet::new() }
    }

    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.inner = self.inner.with_timeout(duration);
        self
    }

    pub fn with_policy(mut self, policy: RejectPolicy) -> Self {
        self.inner = self.inner.with_policy(policy);
        self
    }

    pub fn value(&self) -> &T { self.inner.value() }
    pub fn confirmed(&self) -> &T { self.inner.confirmed() }
    pub fn updating(&self) -> bool { self.inner.updating() }
    pub fn deadline(&self) -> Option<Instant> { self.inner.deadline() }
    pub fn supported(&self) -> &HashSet<T> { &self.supported }

    pub fn is_supported(&self, value: &T) -> bool {
        self.supported.contains(value)
    }

    pub fn set(&mut self, value: T, now: Instant) -> SetOutcome {
        if !self.supported.contains(&value) {
            debug!("setting {}: unsupported value={:?}", self.inner.name(), value);
            return SetOutcome::Unsupported;
        }
        self.inner.set(value, now)
    }

    pub fn update_supported<I: IntoIterator<Item = T>>(&mut self, values: I) -> bool {
        let values: HashSet<T> = values.into_iter().collect();
        if values == self.supported {
            return false;
        }
        self.supported = values;
        true
    }

    pub fn update(&mut self, value: T) -> bool {
        self.inner.update(value)
    }

    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        self.inner.poll_timeout(now)
    }

    pub fn cancel_rollback<F: FnOnce()>(&mut self, on_cancelled: F) {
        self.inner.cancel_rollback(on_cancelled)
    }
}
