use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Parity checking mode of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Number of stop bits of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

/// Line parameters of a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    /// Poll interval of blocking reads; bounds how long a reader takes to notice shutdown.
    pub read_timeout: Duration,
}

impl LineSettings {
    /// 8 data bits, one stop bit, no parity.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Open a serial port with the given line parameters (blocking).
pub fn open(settings: &LineSettings) -> Result<LinkStream> {
    let data_bits = data_bits(settings.data_bits)?;
    let parity = parity(settings.parity)?;
    let stop_bits = stop_bits(settings.stop_bits)?;

    let port = tokio_serial::new(&settings.port_name, settings.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(settings.read_timeout)
        .open()
        .map_err(|source| TransportError::Serial {
            port: settings.port_name.clone(),
            source,
        })?;

    info!(
        port = %settings.port_name,
        baud = settings.baud_rate,
        parity = ?settings.parity,
        data_bits = settings.data_bits,
        stop_bits = ?settings.stop_bits,
        "opened serial port"
    );

    Ok(LinkStream::from_serial(port, settings.port_name.clone()))
}

/// Names of the serial ports present on this host.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|source| TransportError::Serial {
        port: "*".to_string(),
        source,
    })?;
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports.into_iter().map(|info| info.port_name).collect())
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(TransportError::InvalidConfig(format!(
            "unsupported data bits: {other} (expected 5-8)"
        ))),
    }
}

fn parity(parity: Parity) -> Result<tokio_serial::Parity> {
    match parity {
        Parity::None => Ok(tokio_serial::Parity::None),
        Parity::Odd => Ok(tokio_serial::Parity::Odd),
        Parity::Even => Ok(tokio_serial::Parity::Even),
        Parity::Mark | Parity::Space => Err(TransportError::InvalidConfig(format!(
            "parity {parity:?} is not supported by the serial driver"
        ))),
    }
}

fn stop_bits(stop_bits: StopBits) -> Result<tokio_serial::StopBits> {
    match stop_bits {
        StopBits::One => Ok(tokio_serial::StopBits::One),
        StopBits::Two => Ok(tokio_serial::StopBits::Two),
        StopBits::OnePointFive => Err(TransportError::InvalidConfig(
            "1.5 stop bits are not supported by the serial driver".to_string(),
        )),
    }
}
