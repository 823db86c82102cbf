//! Background task spawning.

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// Spawns `future` on the current tokio runtime.
///
/// Returns `None` instead of panicking when called outside a runtime.
pub(crate) fn spawn<F>(what: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            warn!(task = what, "no async runtime available, task not started");
            None
        }
    }
}
