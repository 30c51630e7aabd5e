use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use commlink_frame::{FrameConfig, FrameMode, DEFAULT_BUFFER_SIZE, DEFAULT_TERMINATOR};
use commlink_transport::{LineSettings, DEFAULT_PROBE_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Default heartbeat period of a TCP client.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default delay between reconnect attempts of a TCP client.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Default bound on one connect attempt of a TCP client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default bound on a single outbound write of a TCP client.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default poll interval of a TCP server's accept loop.
pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Framing parameters shared by every endpoint kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Framing {
    /// End-of-frame marker. Default: `0x00`.
    pub terminator: u8,
    /// Receive buffer size, the largest frame a single read can return.
    pub buffer_size: usize,
    pub mode: FrameMode,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            buffer_size: DEFAULT_BUFFER_SIZE,
            mode: FrameMode::SingleRead,
        }
    }
}

impl Framing {
    pub(crate) fn frame_config(
        &self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> FrameConfig {
        FrameConfig {
            terminator: self.terminator,
            buffer_size: self.buffer_size.max(1),
            mode: self.mode,
            read_timeout,
            write_timeout,
            ..FrameConfig::default()
        }
    }
}

/// Serial line endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub line: LineSettings,
    #[serde(default)]
    pub framing: Framing,
}

impl SerialConfig {
    /// 8N1 line at `baud_rate` with default framing.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            line: LineSettings::new(port_name, baud_rate),
            framing: Framing::default(),
        }
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.framing.terminator = terminator;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.framing.buffer_size = buffer_size;
        self
    }

    pub fn with_frame_mode(mut self, mode: FrameMode) -> Self {
        self.framing.mode = mode;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(default_serial_port(), 9600)
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(windows) {
        "COM1"
    } else {
        "/dev/ttyS0"
    }
}

/// TCP client endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpClientConfig {
    pub remote: SocketAddr,
    /// Fixed local port to bind before connecting; 0 lets the OS choose.
    pub local_port: u16,
    pub framing: Framing,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    /// Bound of one reachability probe.
    pub probe_timeout: Duration,
    /// Bound of one connect attempt. `close()` waits for an attempt in
    /// flight, so `None` (the OS default, minutes) also delays closing.
    pub connect_timeout: Option<Duration>,
    /// Bound of one outbound write.
    pub send_timeout: Option<Duration>,
}

impl TcpClientConfig {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            local_port: 0,
            framing: Framing::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
        }
    }

    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.framing.terminator = terminator;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.framing.buffer_size = buffer_size;
        self
    }

    pub fn with_frame_mode(mut self, mode: FrameMode) -> Self {
        self.framing.mode = mode;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }
}

/// TCP server endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpServerConfig {
    /// Port to listen on; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Interface to listen on. Default: all IPv4 interfaces.
    pub bind_address: IpAddr,
    pub framing: Framing,
    /// How often the accept loop checks for shutdown when idle.
    pub accept_poll: Duration,
    /// Bound of one outbound write to a peer; `None` blocks.
    pub send_timeout: Option<Duration>,
}

impl TcpServerConfig {
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            framing: Framing::default(),
            accept_poll: DEFAULT_ACCEPT_POLL,
            send_timeout: None,
        }
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.framing.terminator = terminator;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.framing.buffer_size = buffer_size;
        self
    }

    pub fn with_frame_mode(mut self, mode: FrameMode) -> Self {
        self.framing.mode = mode;
        self
    }

    pub(crate) fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let config = TcpClientConfig::new("10.0.0.5:502".parse().unwrap());
        assert_eq!(config.local_port, 0);
        assert_eq!(config.framing.terminator, 0x00);
        assert_eq!(config.framing.buffer_size, 1024);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1000));
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert_eq!(config.probe_timeout, Duration::from_millis(700));
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(3000)));
    }

    #[test]
    fn serial_defaults_are_8n1_at_9600() {
        let config = SerialConfig::default();
        assert_eq!(config.line.baud_rate, 9600);
        assert_eq!(config.line.data_bits, 8);
        assert_eq!(config.line.parity, commlink_transport::Parity::None);
        assert_eq!(config.line.stop_bits, commlink_transport::StopBits::One);
    }

    #[test]
    fn server_listens_on_all_interfaces() {
        let config = TcpServerConfig::new(6000);
        assert_eq!(config.listen_addr(), "0.0.0.0:6000".parse().unwrap());
    }

    #[test]
    fn zero_buffer_size_is_clamped() {
        let framing = Framing {
            buffer_size: 0,
            ..Framing::default()
        };
        assert_eq!(framing.frame_config(None, None).buffer_size, 1);
    }

    #[test]
    fn client_config_fills_missing_fields_from_defaults() {
        let config: TcpClientConfig =
            serde_json::from_str(r#"{"remote":"192.168.1.20:4001","local_port":5000}"#).unwrap();
        assert_eq!(config.remote, "192.168.1.20:4001".parse().unwrap());
        assert_eq!(config.local_port, 5000);
        assert_eq!(config.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(config.framing, Framing::default());
    }
}
