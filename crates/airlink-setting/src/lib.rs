//! Optimistic device settings.
//!
//! A remote setting shows the value the application asked for at once, sends
//! it to the device through an injected `transmit` function, and rolls back
//! to the last confirmed value if the device does not confirm before a
//! deadline. All methods take `&mut self`; the owner serialises calls.

pub mod bounded;
pub mod composite;
pub mod enumerated;
pub mod error;
pub mod remote;
pub mod timeout;

pub use bounded::BoundedSetting;
pub use composite::{CompositeSetting, Fields};
pub use enumerated::EnumeratedSetting;
pub use error::SettingError;
pub use remote::{RejectPolicy, RemoteSetting, SetOutcome, Transmit};
pub use timeout::{Timeout, ROLLBACK_TIMEOUT};
