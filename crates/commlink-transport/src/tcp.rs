use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// TCP listening socket.
///
/// Provides bind/accept for the server side. Accepting can be switched to
/// non-blocking so an accept loop can observe shutdown between polls.
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen on all IPv4 interfaces at `port` (0 picks an ephemeral port).
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    /// Bind and listen on an explicit socket address.
    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Switch accept between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Accept an incoming connection.
    ///
    /// In non-blocking mode, `Ok(None)` means no connection is pending.
    /// Accepted streams are always returned in blocking mode.
    pub fn accept(&self) -> Result<Option<(LinkStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(false)?;
                let _ = stream.set_nodelay(true);
                debug!(peer = %addr, "accepted connection");
                Ok(Some((LinkStream::from_tcp(stream), addr)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// Connect to `remote`, optionally from a fixed local port.
///
/// A `local_port` of 0 lets the OS choose. A fixed local port binds a fresh
/// socket with `SO_REUSEADDR` before connecting, so the port can be reused
/// right after a previous connection on it was torn down. `timeout` bounds
/// the connect on either path; `None` or zero leaves it to the OS.
pub fn connect(remote: SocketAddr, local_port: u16, timeout: Option<Duration>) -> Result<LinkStream> {
    let stream = dial(remote, local_port, timeout).map_err(|source| TransportError::Connect {
        addr: remote,
        source,
    })?;

    let _ = stream.set_nodelay(true);
    debug!(%remote, local = ?stream.local_addr().ok(), "connected tcp socket");
    Ok(LinkStream::from_tcp(stream))
}

fn dial(remote: SocketAddr, local_port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;

    if local_port != 0 {
        let unspecified = match remote {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::new(unspecified, local_port).into())?;
    }

    let remote = SockAddr::from(remote);
    match timeout.filter(|timeout| !timeout.is_zero()) {
        Some(timeout) => socket.connect_timeout(&remote, timeout)?,
        None => socket.connect(&remote)?,
    }
    Ok(socket.into())
}
