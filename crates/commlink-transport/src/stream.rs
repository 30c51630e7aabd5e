use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tokio_serial::{ClearBuffer, SerialPort};

use crate::error::{Result, TransportError};

/// Serial drivers take a finite timeout; "block forever" is approximated with a day.
const SERIAL_BLOCKING_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// A connected byte stream to a piece of equipment. Implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a TCP socket or an open serial line.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    Tcp(TcpStream),
    Serial {
        port: Box<dyn SerialPort>,
        name: String,
    },
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.read(buf),
            LinkStreamInner::Serial { port, .. } => port.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.write(buf),
            LinkStreamInner::Serial { port, .. } => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.flush(),
            LinkStreamInner::Serial { port, .. } => port.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: LinkStreamInner::Tcp(stream),
        }
    }

    /// Wrap an open serial port.
    pub(crate) fn from_serial(port: Box<dyn SerialPort>, name: impl Into<String>) -> Self {
        Self {
            inner: LinkStreamInner::Serial {
                port,
                name: name.into(),
            },
        }
    }

    /// Set read timeout on the underlying stream. `None` blocks until data arrives.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            LinkStreamInner::Serial { port, name } => port
                .set_timeout(timeout.unwrap_or(SERIAL_BLOCKING_TIMEOUT))
                .map_err(|source| TransportError::Serial {
                    port: name.clone(),
                    source,
                }),
        }
    }

    /// Set write timeout on the underlying stream.
    ///
    /// Serial lines share one timeout for reads and writes, so this is a no-op there.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            LinkStreamInner::Serial { .. } => Ok(()),
        }
    }

    /// Try to clone this stream (creates a new handle to the same socket or line).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            LinkStreamInner::Serial { port, name } => {
                let cloned = port.try_clone().map_err(|source| TransportError::Serial {
                    port: name.clone(),
                    source,
                })?;
                Ok(Self::from_serial(cloned, name.clone()))
            }
        }
    }

    /// Shut down both directions of a TCP stream, waking any thread blocked in `read`.
    ///
    /// Serial lines have no equivalent; their readers poll with a timeout instead.
    pub fn shutdown(&self) {
        if let LinkStreamInner::Tcp(stream) = &self.inner {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Discard bytes pending in the driver's receive and transmit buffers.
    pub fn clear_buffers(&self) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(_) => Ok(()),
            LinkStreamInner::Serial { port, name } => {
                port.clear(ClearBuffer::All)
                    .map_err(|source| TransportError::Serial {
                        port: name.clone(),
                        source,
                    })
            }
        }
    }

    /// Remote address of a TCP stream.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            LinkStreamInner::Serial { .. } => None,
        }
    }

    /// Local address of a TCP stream.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.local_addr().ok(),
            LinkStreamInner::Serial { .. } => None,
        }
    }

    /// Human-readable identity: the remote socket address or the serial port name.
    pub fn label(&self) -> String {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            LinkStreamInner::Serial { name, .. } => name.clone(),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            LinkStreamInner::Tcp(_) => "tcp",
            LinkStreamInner::Serial { .. } => "serial",
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => f
                .debug_struct("LinkStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
            LinkStreamInner::Serial { name, .. } => f
                .debug_struct("LinkStream")
                .field("type", &"serial")
                .field("port", name)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn tcp_pair() -> (LinkStream, LinkStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (LinkStream::from_tcp(client), LinkStream::from_tcp(server))
    }

    #[test]
    fn tcp_read_write() {
        let (mut left, mut right) = tcp_pair();
        left.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(left.transport_name(), "tcp");
    }

    #[test]
    fn shutdown_wakes_blocked_reader() {
        let (left, _right) = tcp_pair();
        let mut reader = left.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(50));
        left.shutdown();

        let result = handle.join().unwrap();
        assert!(matches!(result, Ok(0) | Err(_)));
    }

    #[test]
    fn label_reports_peer_address() {
        let (left, right) = tcp_pair();
        assert_eq!(left.label(), right.local_addr().unwrap().to_string());
        assert_eq!(left.peer_addr(), right.local_addr());
    }

    #[test]
    fn clear_buffers_is_noop_for_tcp() {
        let (left, _right) = tcp_pair();
        assert!(left.clear_buffers().is_ok());
    }
}
