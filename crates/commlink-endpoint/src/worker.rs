use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::error::{EndpointError, Result};

/// Spawn a named background thread.
pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| EndpointError::Spawn { name, source })
}

/// Join background threads. A thread never joins itself; when `close` runs
/// from inside a handler, that thread is left to finish on its own.
pub(crate) fn join_all(handles: impl IntoIterator<Item = JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() == current {
            continue;
        }
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if handle.join().is_err() {
            warn!(thread = %name, "background thread panicked");
        }
    }
}

/// Drop handles of threads that already exited.
pub(crate) fn prune_finished(handles: &mut Vec<JoinHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        handles.drain(..).partition(|handle| handle.is_finished());
    *handles = running;
    join_all(finished);
}
