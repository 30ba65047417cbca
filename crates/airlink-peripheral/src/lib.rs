pub mod antiflicker;
pub mod cellular;
pub mod change;
pub mod command;
pub mod driver;
pub mod error;
pub mod gimbal;

use std::time::Duration;

use serde::Deserialize;

pub use change::ChangeSet;
pub use command::{command_channel, transmit_via};
pub use driver::{spawn, Peripheral, PeripheralHandle, Reporter};
pub use error::PeripheralError;

/// Timing shared by every setting of a peripheral.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingConfig {
    /// Delay before an unconfirmed change is rolled back. Default 5000.
    pub rollback_timeout_ms: Option<u64>,
}

impl SettingConfig {
    pub fn rollback_timeout(&self) -> Duration {
        self.rollback_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(airlink_setting::ROLLBACK_TIMEOUT)
    }
}
