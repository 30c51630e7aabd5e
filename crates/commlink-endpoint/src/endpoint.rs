use std::time::Duration;

use crate::error::Result;
use crate::events::Events;

/// Lifecycle shared by serial lines, TCP clients and TCP servers.
pub trait Endpoint: Send + Sync {
    /// Start the endpoint. Background receive work begins here.
    fn open(&self) -> Result<()>;

    /// Stop background work and release every handle. Idempotent.
    fn close(&self);

    /// Whether at least one link is currently usable.
    fn is_connected(&self) -> bool;

    /// Human-readable label: port name, remote address or listen address.
    fn identity(&self) -> String;

    /// Handler registry of this endpoint.
    fn events(&self) -> &Events;
}

/// A point-to-point endpoint with a single remote: serial line or TCP client.
pub trait Connection: Endpoint {
    /// Write `payload` as is. Fails if not connected or if the write fails.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Write `payload` and wait until a frame handler reports completion.
    ///
    /// `Duration::ZERO` waits without bound. Concurrent callers are
    /// serialized for the whole exchange.
    fn send_sync(&self, payload: &[u8], timeout: Duration) -> Result<()>;
}
