//! Serial and TCP links to industrial equipment.
//!
//! commlink turns raw byte streams into terminator-delimited frames and wraps
//! them in endpoints that handle the tedious parts: background receive
//! threads, synchronous request/reply, automatic reconnect with a
//! reachability probe, heartbeats, and a peer registry for servers.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams over TCP sockets and serial lines
//! - [`frame`]: terminator-byte framing
//! - [`endpoint`]: serial, TCP client and TCP server endpoints

/// Re-export transport types.
pub mod transport {
    pub use commlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use commlink_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use commlink_endpoint::*;
}
