//! Byte-stream transports for equipment links.
//!
//! Provides a unified stream type over the physical links used to reach
//! industrial equipment:
//! - TCP sockets (client connect with optional fixed local port, server accept)
//! - Serial lines (RS-232/RS-485 adapters)
//!
//! This is the lowest layer of commlink. Everything else builds on top of
//! the [`LinkStream`] type provided here.

pub mod error;
pub mod probe;
pub mod serial;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use probe::{AlwaysReachable, IcmpProbe, ReachabilityProbe, DEFAULT_PROBE_TIMEOUT};
pub use serial::{available_ports, LineSettings, Parity, StopBits};
pub use stream::LinkStream;
pub use tcp::{connect, TcpAcceptor};
