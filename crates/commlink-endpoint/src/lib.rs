//! Communication endpoints for industrial equipment.
//!
//! This is the "just works" layer. Open a serial line, a TCP client or a
//! TCP server, register handlers for inbound frames and connection changes,
//! and send raw payloads, optionally waiting for the reply that completes a
//! request.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod gate;
pub mod serial;
pub mod server;
pub mod shutdown;
pub mod state;

mod registry;
mod worker;

pub use client::{Heartbeat, TcpClientEndpoint};
pub use config::{
    Framing, SerialConfig, TcpClientConfig, TcpServerConfig, DEFAULT_ACCEPT_POLL,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_INTERVAL,
    DEFAULT_SEND_TIMEOUT,
};
pub use endpoint::{Connection, Endpoint};
pub use error::{EndpointError, Result};
pub use events::{Events, FrameEvent, FrameHandler, PeersHandler, StateHandler};
pub use gate::{GateOutcome, SyncGate};
pub use serial::SerialEndpoint;
pub use server::TcpServerEndpoint;
pub use shutdown::Shutdown;
pub use state::ConnectionState;
