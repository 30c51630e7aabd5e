/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] commlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] commlink_frame::FrameError),

    /// The endpoint has no live connection.
    #[error("not connected")]
    NotConnected,

    /// No registered peer has this address.
    #[error("no connected peer at {0}")]
    UnknownPeer(String),

    /// No reply completed the exchange in time.
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),

    /// The endpoint was closed while the operation was pending.
    #[error("endpoint closed")]
    Closed,

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EndpointError>;
