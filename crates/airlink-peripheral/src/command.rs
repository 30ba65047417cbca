use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Depth of the command queue towards the backend.
pub const COMMAND_QUEUE: usize = 16;

pub fn command_channel<C>() -> (mpsc::Sender<C>, mpsc::Receiver<C>) {
    mpsc::channel(COMMAND_QUEUE)
}

/// Builds a setting's `transmit` function that wraps the value into a backend
/// command. A full or closed queue refuses the request.
pub fn transmit_via<C, T, F>(commands: &mpsc::Sender<C>, wrap: F) -> impl FnMut(&T) -> bool + Send + 'static
where
    C: Send + 'static,
    F: Fn(&T) -> C + Send + 'static,
{
    let commands = commands.clone();
    move |value: &T| match commands.try_send(wrap(value)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("command queue full, request dropped");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("backend not connected");
            false
        }
    }
}
