//! Camera anti-flicker mode.

use std::time::Duration;

use airlink_setting::{EnumeratedSetting, RejectPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::change::ChangeSet;
use crate::command::transmit_via;
use crate::driver::Peripheral;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiflickerMode {
    Off,
    Auto,
    Hz50,
    Hz60,
}

#[derive(Debug)]
pub enum AntiflickerRequest {
    SetMode(AntiflickerMode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntiflickerCommand {
    SetMode(AntiflickerMode),
}

#[derive(Debug)]
pub enum AntiflickerReport {
    SupportedModes(Vec<AntiflickerMode>),
    Mode(AntiflickerMode),
    /// Full state pushed on connection.
    State { supported: Vec<AntiflickerMode>, mode: AntiflickerMode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AntiflickerState {
    pub mode: AntiflickerMode,
    pub supported: Vec<AntiflickerMode>,
    pub updating: bool,
}

#[derive(Debug)]
pub struct AntiflickerCore {
    mode: EnumeratedSetting<AntiflickerMode>,
}

impl AntiflickerCore {
    pub fn new(initial: AntiflickerMode, timeout: Duration, commands: &mpsc::Sender<AntiflickerCommand>) -> Self {
        // Without a camera link the mode cannot be applied anywhere: drop it.
        let mode = EnumeratedSetting::new("antiflicker.mode", initial, transmit_via(commands, |m: &AntiflickerMode| AntiflickerCommand::SetMode(*m)))
            .with_timeout(timeout)
            .with_policy(RejectPolicy::Drop);
        Self { mode }
    }
}

impl Peripheral for AntiflickerCore {
    type Request = AntiflickerRequest;
    type Report = AntiflickerReport;
    type Snapshot = AntiflickerState;

    const NAME: &'static str = "antiflicker";

    fn handle_request(&mut self, request: AntiflickerRequest, now: Instant, changes: &mut ChangeSet) {
        match request {
            AntiflickerRequest::SetMode(m) => changes.record(self.mode.set(m, now)),
        }
    }

    fn handle_report(&mut self, report: AntiflickerReport, changes: &mut ChangeSet) {
        match report {
            AntiflickerReport::SupportedModes(modes) => changes.mark_if(self.mode.update_supported(modes)),
            AntiflickerReport::Mode(m) => changes.mark_if(self.mode.update(m)),
            AntiflickerReport::State { supported, mode } => {
                self.mode.cancel_rollback(|| changes.mark());
                changes.mark_if(self.mode.update_supported(supported));
                changes.mark_if(self.mode.update(mode));
            }
        }
    }

    fn poll_timeouts(&mut self, now: Instant, changes: &mut ChangeSet) {
        changes.mark_if(self.mode.poll_timeout(now));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.mode.deadline()
    }

    fn snapshot(&self) -> AntiflickerState {
        let mut supported: Vec<_> = self.mode.supported().iter().copied().collect();
        supported.sort();
        AntiflickerState { mode: *self.mode.value(), supported, updating: self.mode.updating() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command_channel;

    #[test]
    fn unconfirmed_mode_rolls_back() {
        let t0 = Instant::now();
        let (tx, mut rx) = command_channel();
        let mut core = AntiflickerCore::new(AntiflickerMode::Off, Duration::from_secs(5), &tx);
        let mut changes = ChangeSet::default();

        core.handle_report(AntiflickerReport::SupportedModes(vec![AntiflickerMode::Off, AntiflickerMode::Hz60]), &mut changes);
        assert!(changes.take());

        core.handle_request(AntiflickerRequest::SetMode(AntiflickerMode::Hz60), t0, &mut changes);
        assert!(changes.take());
        assert_eq!(rx.try_recv().ok(), Some(AntiflickerCommand::SetMode(AntiflickerMode::Hz60)));
        let s = core.snapshot();
        assert_eq!(s.mode, AntiflickerMode::Hz60);
        assert!(s.updating);

        core.poll_timeouts(t0 + Duration::from_secs(5), &mut changes);
        assert!(changes.take());
        let s = core.snapshot();
        assert_eq!(s.mode, AntiflickerMode::Off);
        assert!(!s.updating);
    }

    #[test]
    fn unsupported_mode_sends_nothing() {
        let (tx, mut rx) = command_channel();
        let mut core = AntiflickerCore::new(AntiflickerMode::Off, Duration::from_secs(5), &tx);
        let mut changes = ChangeSet::default();

        core.handle_report(AntiflickerReport::SupportedModes(vec![AntiflickerMode::Off, AntiflickerMode::Hz60]), &mut changes);
        changes.take();
        core.handle_request(AntiflickerRequest::SetMode(AntiflickerMode::Hz50), Instant::now(), &mut changes);
        assert!(!changes.take());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_state_cancels_pending_rollback() {
        let t0 = Instant::now();
        let (tx, _rx) = command_channel();
        let mut core = AntiflickerCore::new(AntiflickerMode::Off, Duration::from_secs(5), &tx);
        let mut changes = ChangeSet::default();

        core.handle_report(AntiflickerReport::SupportedModes(vec![AntiflickerMode::Off, AntiflickerMode::Auto]), &mut changes);
        core.handle_request(AntiflickerRequest::SetMode(AntiflickerMode::Auto), t0, &mut changes);
        changes.take();

        core.handle_report(
            AntiflickerReport::State { supported: vec![AntiflickerMode::Off, AntiflickerMode::Auto], mode: AntiflickerMode::Auto },
            &mut changes,
        );
        assert!(changes.take());
        assert!(core.next_deadline().is_none());
        assert_eq!(core.snapshot().mode, AntiflickerMode::Auto);
    }

    #[test]
    fn no_link_drops_request() {
        let (tx, rx) = command_channel();
        drop(rx);
        let mut core = AntiflickerCore::new(AntiflickerMode::Off, Duration::from_secs(5), &tx);
        let mut changes = ChangeSet::default();
        core.handle_report(AntiflickerReport::SupportedModes(vec![AntiflickerMode::Off, AntiflickerMode::Auto]), &mut changes);
        changes.take();
        core.handle_request(AntiflickerRequest::SetMode(AntiflickerMode::Auto), Instant::now(), &mut changes);
        assert!(!changes.take());
        assert_eq!(core.snapshot().mode, AntiflickerMode::Off);
    }
}
