use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::remote::{RejectPolicy, SetOutcome, Transmit};
use crate::timeout::Timeout;

/// A struct whose fields are confirmed one by one but sent as a whole.
pub trait Fields: Clone + PartialEq + fmt::Debug {
    type Key: Copy + Eq + fmt::Debug + 'static;

    const KEYS: &'static [Self::Key];

    fn field_eq(&self, other: &Self, key: Self::Key) -> bool;

    fn copy_field(&mut self, from: &Self, key: Self::Key);
}

/// Multi-field setting with one transmit call and one shared deadline.
///
/// Every field the application changes is marked as awaiting confirmation.
/// The deadline is cancelled once all awaiting fields are reconfirmed; on
/// expiry, every field still awaiting reverts together.
pub struct CompositeSetting<T: Fields> {
    name: &'static str,
    confirmed: T,
    value: T,
    awaiting: Vec<T::Key>,
    timeout: Timeout,
    policy: RejectPolicy,
    transmit: Transmit<T>,
}

impl<T: Fields> fmt::Debug for CompositeSetting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSetting")
            .field("name", &self.name)
            .field("confirmed", &self.confirmed)
            .field("value", &self.value)
            .field("awaiting", &self.awaiting)
            .field("deadline", &self.timeout.deadline())
            .finish()
    }
}

impl<T: Fields> CompositeSetting<T> {
    pub fn new<F>(name: &'static str, initial: T, transmit: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self {
            name,
            confirmed: initial.clone(),
            value: initial,
            awaiting: Vec::new(),
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

    pub fn value(&self) -> &T { &self.value }
    pub fn confirmed(&self) -> &T { &self.confirmed }
    pub fn updating(&self) -> bool { self.timeout.is_armed() }
    pub fn deadline(&self) -> Option<Instant> { self.timeout.deadline() }

    /// Fields sent but not yet reconfirmed.
    pub fn awaiting(&self) -> &[T::Key] { &self.awaiting }

    /// Applies `edit` to a copy of the current value and sends the whole
    /// result if anything changed.
    pub fn set<E: FnOnce(&mut T)>(&mut self, edit: E, now: Instant) -> SetOutcome {
        let mut next = self.value.clone();
        edit(&mut next);
        if next == self.value {
            return SetOutcome::Unchanged;
        }

        if !(self.transmit)(&next) {
            return match self.policy {
                RejectPolicy::Drop => {
                    debug!("setting {}: transmit refused value={:?}", self.name, next);
                    SetOutcome::Rejected
                }
                RejectPolicy::ApplyLocally => {
                    self.timeout.cancel();
                    self.awaiting.clear();
                    self.confirmed = next.clone();
                    self.value = next;
                    SetOutcome::AppliedLocally
                }
            };
        }

        for &key in T::KEYS {
            if !next.field_eq(&self.value, key) && !self.awaiting.contains(&key) {
                self.awaiting.push(key);
            }
        }
        debug!("setting {}: sent value={:?} awaiting={:?}", self.name, next, self.awaiting);
        self.value = next;
        self.timeout.arm(now);
        SetOutcome::Updating
    }

    /// Backend confirmation of a single field. `edit` must only touch `key`.
    pub fn update_field<E: FnOnce(&mut T)>(&mut self, key: T::Key, edit: E) -> bool {
        edit(&mut self.confirmed);

        let mut changed = false;
        if !self.value.field_eq(&self.confirmed, key) {
            self.value.copy_field(&self.confirmed, key);
            changed = true;
        }

        let before = self.awaiting.len();
        self.awaiting.retain(|k| *k != key);
        if before != self.awaiting.len() && self.awaiting.is_empty() && self.timeout.cancel() {
            changed = true;
        }
        changed
    }

    /// Backend confirmation of every field at once.
    pub fn update(&mut self, value: T) -> bool {
        if !self.updating() && value == self.value {
            return false;
        }
        self.timeout.cancel();
        self.awaiting.clear();
        self.confirmed = value.clone();
        self.value = value;
        true
    }

    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        if !self.timeout.take_expired(now) {
            return false;
        }
        debug!("setting {}: no confirmation, rollback fields={:?}", self.name, self.awaiting);
        for key in self.awaiting.drain(..) {
            self.value.copy_field(&self.confirmed, key);
        }
        true
    }

    pub fn cancel_rollback<F: FnOnce()>(&mut self, on_cancelled: F) {
        if self.timeout.cancel() {
            self.awaiting.clear();
            self.confirmed = self.value.clone();
            on_cancelled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Apn {
        manual: bool,
        url: String,
        username: String,
        password: String,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key { Manual, Url, Username, Password }

    impl Fields for Apn {
        type Key = Key;
        const KEYS: &'static [Key] = &[Key::Manual, Key::Url, Key::Username, Key::Password];

        fn field_eq(&self, other: &Self, key: Key) -> bool {
            match key {
                Key::Manual => self.manual == other.manual,
                Key::Url => self.url == other.url,
                Key::Username => self.username == other.username,
                Key::Password => self.password == other.password,
            }
        }

        fn copy_field(&mut self, from: &Self, key: Key) {
            match key {
                Key::Manual => self.manual = from.manual,
                Key::Url => self.url = from.url.clone(),
                Key::Username => self.username = from.username.clone(),
                Key::Password => self.password = from.password.clone(),
            }
        }
    }

    fn initial() -> Apn {
        Apn { manual: true, url: "old.apn".into(), username: "bob".into(), password: "pw".into() }
    }

    #[test]
    fn single_field_change_sends_whole_tuple() {
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());

        assert_eq!(s.set(|a| a.url = "new.apn".into(), Instant::now()), SetOutcome::Updating);
        let sent = rec.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], Apn { url: "new.apn".into(), ..initial() });
        assert_eq!(s.awaiting(), &[Key::Url]);
    }

    #[test]
    fn expiry_reverts_every_awaiting_field() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit()).with_timeout(Duration::from_secs(5));

        s.set(|a| a.url = "new.apn".into(), t0);
        s.set(|a| a.username = "alice".into(), t0 + Duration::from_secs(1));
        assert_eq!(rec.sent()[1], Apn { url: "new.apn".into(), username: "alice".into(), ..initial() });

        assert!(!s.poll_timeout(t0 + Duration::from_secs(5)));
        assert!(s.poll_timeout(t0 + Duration::from_secs(6)));
        assert_eq!(*s.value(), initial());
        assert!(!s.updating());
        assert!(s.awaiting().is_empty());
    }

    #[test]
    fn deadline_holds_until_all_fields_confirmed() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());

        s.set(|a| { a.url = "new.apn".into(); a.username = "alice".into(); }, t0);
        assert!(!s.update_field(Key::Url, |a| a.url = "new.apn".into()));
        assert!(s.updating());
        assert_eq!(s.awaiting(), &[Key::Username]);

        assert!(s.update_field(Key::Username, |a| a.username = "alice".into()));
        assert!(!s.updating());
        assert_eq!(s.value(), s.confirmed());
    }

    #[test]
    fn partial_confirmation_then_expiry_reverts_rest() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());

        s.set(|a| { a.url = "new.apn".into(); a.password = "secret".into(); }, t0);
        s.update_field(Key::Url, |a| a.url = "new.apn".into());
        assert!(s.poll_timeout(t0 + crate::ROLLBACK_TIMEOUT));
        assert_eq!(*s.value(), Apn { url: "new.apn".into(), ..initial() });
    }

    #[test]
    fn unrelated_field_report_is_adopted_while_updating() {
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());

        s.set(|a| a.url = "new.apn".into(), Instant::now());
        assert!(s.update_field(Key::Manual, |a| a.manual = false));
        assert!(!s.value().manual);
        assert_eq!(s.value().url, "new.apn");
        assert!(s.updating());
    }

    #[test]
    fn full_update_is_idempotent_when_stable() {
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());
        assert!(!s.update(initial()));
        assert!(!s.update_field(Key::Url, |a| a.url = "old.apn".into()));
        assert_eq!(s.set(|a| a.manual = true, Instant::now()), SetOutcome::Unchanged);
        assert!(rec.sent().is_empty());
    }

    #[test]
    fn refused_transmit_leaves_value() {
        let rec = Recorder::refusing();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());
        assert_eq!(s.set(|a| a.url = "x".into(), Instant::now()), SetOutcome::Rejected);
        assert_eq!(*s.value(), initial());

        let mut s = CompositeSetting::new("apn", initial(), rec.transmit()).with_policy(RejectPolicy::ApplyLocally);
        assert_eq!(s.set(|a| a.url = "x".into(), Instant::now()), SetOutcome::AppliedLocally);
        assert_eq!(s.confirmed().url, "x");
        assert!(!s.updating());
    }

    #[test]
    fn cancel_rollback_adopts_pending_fields() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());

        s.set(|a| a.url = "new.apn".into(), t0);
        let mut cancelled = false;
        s.cancel_rollback(|| cancelled = true);
        assert!(cancelled);
        assert!(!s.updating());
        assert!(s.awaiting().is_empty());
        assert_eq!(s.value(), s.confirmed());
        assert_eq!(s.confirmed().url, "new.apn");
        assert!(!s.poll_timeout(t0 + crate::ROLLBACK_TIMEOUT));

        let mut again = false;
        s.cancel_rollback(|| again = true);
        assert!(!again);
    }

    #[test]
    fn full_update_while_awaiting_settles_everything() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = CompositeSetting::new("apn", initial(), rec.transmit());

        s.set(|a| { a.url = "new.apn".into(); a.username = "alice".into(); }, t0);
        assert_eq!(s.awaiting().len(), 2);

        let reported = Apn { url: "carrier.apn".into(), ..initial() };
        assert!(s.update(reported.clone()));
        assert!(!s.updating());
        assert!(s.awaiting().is_empty());
        assert_eq!(*s.value(), reported);
        assert_eq!(*s.confirmed(), reported);
        assert!(!s.poll_timeout(t0 + crate::ROLLBACK_TIMEOUT));
        assert_eq!(*s.value(), reported);
    }
}
