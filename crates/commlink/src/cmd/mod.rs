use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{ArgGroup, Args, Subcommand, ValueEnum};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod client;
pub mod ports;
pub mod serial;
pub mod server;
pub mod session;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for TCP peers and print received frames.
    Server(ServerArgs),
    /// Connect to a TCP device, optionally send a request, print frames.
    Client(ClientArgs),
    /// Open a serial line, optionally send a request, print frames.
    Serial(SerialArgs),
    /// List serial ports on this machine.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Server(args) => server::run(args, format),
        Command::Client(args) => client::run(args, format),
        Command::Serial(args) => serial::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Clone)]
pub struct FramingArgs {
    /// End-of-frame byte (decimal or 0x-prefixed hex).
    #[arg(long, value_name = "BYTE", default_value = "0x00", value_parser = session::parse_byte)]
    pub terminator: u8,
    /// Receive buffer size in bytes.
    #[arg(long, default_value_t = 1024)]
    pub buffer_size: usize,
    /// Keep partial frames across reads instead of one frame per read.
    #[arg(long)]
    pub accumulate: bool,
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("payload").args(["data", "hex", "file"])))]
pub struct ExchangeArgs {
    /// Text payload.
    #[arg(long)]
    pub data: Option<String>,
    /// Hex payload, e.g. "01 03 00".
    #[arg(long)]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Append the terminator byte to the payload.
    #[arg(long, requires = "payload")]
    pub terminate: bool,
    /// Wait until a frame comes back before continuing.
    #[arg(long, requires = "payload")]
    pub sync: bool,
    /// Maximum time to wait for the reply when --sync is set (e.g. 2s, 500ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Keep printing frames after the payload was sent, until interrupted.
    #[arg(long)]
    pub listen: bool,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// TCP port to listen on.
    pub port: u16,
    /// Interface to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,
    /// Send every received frame back to the peer it came from.
    #[arg(long)]
    pub echo: bool,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Remote address, e.g. 192.168.1.20:4001.
    pub remote: SocketAddr,
    /// Bind this local port before connecting.
    #[arg(long, default_value_t = 0)]
    pub local_port: u16,
    /// How long to wait for the first connection (e.g. 5s).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Delay between reconnect attempts.
    #[arg(long, default_value = "3s")]
    pub reconnect_interval: String,
    /// Skip the ICMP reachability probe before connecting.
    #[arg(long)]
    pub no_probe: bool,
    /// Heartbeat payload in hex, sent periodically while connected.
    #[arg(long, value_name = "HEX")]
    pub heartbeat: Option<String>,
    /// Heartbeat period.
    #[arg(long, default_value = "1s", requires = "heartbeat")]
    pub heartbeat_interval: String,
    #[command(flatten)]
    pub exchange: ExchangeArgs,
    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ParityArg {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "1.5")]
    OnePointFive,
    #[value(name = "2")]
    Two,
}

#[derive(Args, Debug)]
pub struct SerialArgs {
    /// Port name, e.g. /dev/ttyUSB0 or COM3.
    pub port: String,
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
    #[arg(long, value_enum, default_value = "none")]
    pub parity: ParityArg,
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(5..=8))]
    pub data_bits: u8,
    #[arg(long, value_enum, default_value = "1")]
    pub stop_bits: StopBitsArg,
    /// Drop anything already buffered on the line after opening.
    #[arg(long)]
    pub discard: bool,
    #[command(flatten)]
    pub exchange: ExchangeArgs,
    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
