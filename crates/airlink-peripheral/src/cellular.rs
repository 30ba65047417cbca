//! Cellular modem: operating mode, roaming preference and APN configuration.

use std::fmt;
use std::time::Duration;

use airlink_setting::{CompositeSetting, EnumeratedSetting, Fields, RejectPolicy, RemoteSetting};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::change::ChangeSet;
use crate::command::transmit_via;
use crate::driver::Peripheral;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellularMode {
    Disabled,
    /// Registered on the network, no data session.
    Nodata,
    Data,
}

/// Access point name configuration. `manual = false` lets the modem pick
/// the operator's default and ignores the other fields.
#[derive(Clone, PartialEq, Eq, Default, Serialize)]
pub struct ApnConfig {
    pub manual: bool,
    pub url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for ApnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApnConfig")
            .field("manual", &self.manual)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApnField {
    Manual,
    Url,
    Username,
    Password,
}

impl Fields for ApnConfig {
    type Key = ApnField;

    const KEYS: &'static [ApnField] = &[ApnField::Manual, ApnField::Url, ApnField::Username, ApnField::Password];

    fn field_eq(&self, other: &Self, key: ApnField) -> bool {
        match key {
            ApnField::Manual => self.manual == other.manual,
            ApnField::Url => self.url == other.url,
            ApnField::Username => self.username == other.username,
            ApnField::Password => self.password == other.password,
        }
    }

    fn copy_field(&mut self, from: &Self, key: ApnField) {
        match key {
            ApnField::Manual => self.manual = from.manual,
            ApnField::Url => self.url.clone_from(&from.url),
            ApnField::Username => self.username.clone_from(&from.username),
            ApnField::Password => self.password.clone_from(&from.password),
        }
    }
}

#[derive(Debug)]
pub enum CellularRequest {
    SetMode(CellularMode),
    SetRoaming(bool),
    SetApnManual(bool),
    SetApnUrl(String),
    SetApnUsername(String),
    SetApnPassword(String),
    /// Switches to a manual APN with all credentials at once.
    SetManualApn { url: String, username: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellularCommand {
    SetMode(CellularMode),
    SetRoaming(bool),
    SetApn(ApnConfig),
}

#[derive(Debug)]
pub enum CellularReport {
    SupportedModes(Vec<CellularMode>),
    Mode(CellularMode),
    Roaming(bool),
    ApnManual(bool),
    ApnUrl(String),
    ApnUsername(String),
    ApnPassword(String),
    Apn(ApnConfig),
    /// Full state pushed on connection.
    State { supported: Vec<CellularMode>, mode: CellularMode, roaming: bool, apn: ApnConfig },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellularState {
    pub mode: CellularMode,
    pub supported_modes: Vec<CellularMode>,
    pub mode_updating: bool,
    pub roaming: bool,
    pub roaming_updating: bool,
    pub apn: ApnConfig,
    pub apn_updating: bool,
}

#[derive(Debug)]
pub struct CellularCore {
    mode: EnumeratedSetting<CellularMode>,
    roaming: RemoteSetting<bool>,
    apn: CompositeSetting<ApnConfig>,
}

impl CellularCore {
    pub fn new(apn: ApnConfig, timeout: Duration, commands: &mpsc::Sender<CellularCommand>) -> Self {
        let mode = EnumeratedSetting::new("cellular.mode", CellularMode::Disabled, transmit_via(commands, |m: &CellularMode| CellularCommand::SetMode(*m)))
            .with_timeout(timeout);
        // Roaming is a user preference the backend replays on connection, so
        // it is kept even when no modem is reachable.
        let roaming = RemoteSetting::new("cellular.roaming", false, transmit_via(commands, |r: &bool| CellularCommand::SetRoaming(*r)))
            .with_timeout(timeout)
            .with_policy(RejectPolicy::ApplyLocally);
        let apn = CompositeSetting::new("cellular.apn", apn, transmit_via(commands, |a: &ApnConfig| CellularCommand::SetApn(a.clone())))
            .with_timeout(timeout);
        Self { mode, roaming, apn }
    }
}

impl Peripheral for CellularCore {
    type Request = CellularRequest;
    type Report = CellularReport;
    type Snapshot = CellularState;

    const NAME: &'static str = "cellular";

    fn handle_request(&mut self, request: CellularRequest, now: Instant, changes: &mut ChangeSet) {
        let outcome = match request {
            CellularRequest::SetMode(m) => self.mode.set(m, now),
            CellularRequest::SetRoaming(r) => self.roaming.set(r, now),
            CellularRequest::SetApnManual(manual) => self.apn.set(|a| a.manual = manual, now),
            CellularRequest::SetApnUrl(url) => self.apn.set(|a| a.url = url, now),
            CellularRequest::SetApnUsername(username) => self.apn.set(|a| a.username = username, now),
            CellularRequest::SetApnPassword(password) => self.apn.set(|a| a.password = password, now),
            CellularRequest::SetManualApn { url, username, password } => self.apn.set(
                |a| {
                    a.manual = true;
                    a.url = url;
                    a.username = username;
                    a.password = password;
                },
                now,
            ),
        };
        changes.record(outcome);
    }

    fn handle_report(&mut self, report: CellularReport, changes: &mut ChangeSet) {
        let changed = match report {
            CellularReport::SupportedModes(modes) => self.mode.update_supported(modes),
            CellularReport::Mode(m) => self.mode.update(m),
            CellularReport::Roaming(r) => self.roaming.update(r),
            CellularReport::ApnManual(manual) => self.apn.update_field(ApnField::Manual, |a| a.manual = manual),
            CellularReport::ApnUrl(url) => self.apn.update_field(ApnField::Url, |a| a.url = url),
            CellularReport::ApnUsername(username) => self.apn.update_field(ApnField::Username, |a| a.username = username),
            CellularReport::ApnPassword(password) => self.apn.update_field(ApnField::Password, |a| a.password = password),
            CellularReport::Apn(apn) => self.apn.update(apn),
            CellularReport::State { supported, mode, roaming, apn } => {
                self.mode.cancel_rollback(|| changes.mark());
                self.roaming.cancel_rollback(|| changes.mark());
                self.apn.cancel_rollback(|| changes.mark());
                let mut changed = self.mode.update_supported(supported);
                changed |= self.mode.update(mode);
                changed |= self.roaming.update(roaming);
                changed |= self.apn.update(apn);
                changed
            }
        };
        changes.mark_if(changed);
    }

    fn poll_timeouts(&mut self, now: Instant, changes: &mut ChangeSet) {
        changes.mark_if(self.mode.poll_timeout(now));
        changes.mark_if(self.roaming.poll_timeout(now));
        changes.mark_if(self.apn.poll_timeout(now));
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.mode.deadline(), self.roaming.deadline(), self.apn.deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    fn snapshot(&self) -> CellularState {
        let mut supported_modes: Vec<_> = self.mode.supported().iter().copied().collect();
        supported_modes.sort();
        CellularState {
            mode: *self.mode.value(),
            supported_modes,
            mode_updating: self.mode.updating(),
            roaming: *self.roaming.value(),
            roaming_updating: self.roaming.updating(),
            apn: self.apn.value().clone(),
            apn_updating: self.apn.updating(),
        }
    }
}
