//! Reachability probes run before a TCP connect attempt.
//!
//! A probe answers "does the host respond at the network layer?" cheaply, so a
//! reconnect loop can skip a full connect (and its timeout) while the link is down.

use std::net::IpAddr;
use std::time::Duration;

/// Default time a probe waits for an answer.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(700);

/// Lightweight pre-connect check of a remote host.
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if `host` answered within `timeout`.
    fn is_reachable(&self, host: IpAddr, timeout: Duration) -> bool;
}

impl<F> ReachabilityProbe for F
where
    F: Fn(IpAddr, Duration) -> bool + Send + Sync,
{
    fn is_reachable(&self, host: IpAddr, timeout: Duration) -> bool {
        self(host, timeout)
    }
}

/// Probe that reports every host as reachable, leaving the decision to `connect()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl ReachabilityProbe for AlwaysReachable {
    fn is_reachable(&self, _host: IpAddr, _timeout: Duration) -> bool {
        true
    }
}

/// ICMP echo ("ping") probe over an unprivileged datagram ICMP socket.
///
/// Loopback hosts are always reachable. If the host does not allow opening
/// the probe socket (e.g. `net.ipv4.ping_group_range` excludes this process)
/// or the target is IPv6, the probe reports reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpProbe;

impl ReachabilityProbe for IcmpProbe {
    fn is_reachable(&self, host: IpAddr, timeout: Duration) -> bool {
        if host.is_loopback() {
            return true;
        }
        match host {
            IpAddr::V4(v4) => match icmp::echo(v4, timeout) {
                Ok(answered) => answered,
                Err(err) => {
                    tracing::debug!(%host, error = %err, "icmp probe unavailable; assuming reachable");
                    true
                }
            },
            IpAddr::V6(_) => true,
        }
    }
}

mod icmp {
    use std::io::{self, Read};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::time::{Duration, Instant};

    use socket2::{Domain, Protocol, Socket, Type};

    const ECHO_REQUEST: u8 = 8;
    const ECHO_REPLY: u8 = 0;
    const PAYLOAD: [u8; 8] = *b"commlink";

    static SEQUENCE: AtomicU16 = AtomicU16::new(1);

    /// Send one echo request and wait for the matching reply.
    ///
    /// `Err` means the probe itself could not run; `Ok(false)` means no answer.
    pub(super) fn echo(host: Ipv4Addr, timeout: Duration) -> io::Result<bool> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;

        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let packet = echo_request(seq);
        socket.send_to(&packet, &SocketAddr::from((host, 0)).into())?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 128];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            socket.set_read_timeout(Some(remaining))?;

            match (&socket).read(&mut buf) {
                Ok(received) if is_echo_reply(&buf[..received], seq) => return Ok(true),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return Ok(false),
            }
        }
    }

    /// ICMP echo request. The identifier is left zero; datagram ICMP sockets fill it in.
    pub(super) fn echo_request(seq: u16) -> [u8; 16] {
        let mut packet = [0u8; 16];
        packet[0] = ECHO_REQUEST;
        packet[6..8].copy_from_slice(&seq.to_be_bytes());
        packet[8..].copy_from_slice(&PAYLOAD);
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        packet
    }

    /// Some platforms hand back the IPv4 header in front of the ICMP message.
    pub(super) fn is_echo_reply(datagram: &[u8], seq: u16) -> bool {
        let icmp = match datagram.first() {
            Some(byte) if byte >> 4 == 4 => {
                let header_len = usize::from(byte & 0x0F) * 4;
                datagram.get(header_len..).unwrap_or_default()
            }
            _ => datagram,
        };
        icmp.len() >= 8 && icmp[0] == ECHO_REPLY && icmp[6..8] == seq.to_be_bytes()
    }

    pub(super) fn checksum(data: &[u8]) -> u16 {
        let mut sum = 0u32;
        for chunk in data.chunks(2) {
            let word = match chunk {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [hi] => u16::from_be_bytes([*hi, 0]),
                _ => 0,
            };
            sum += u32::from(word);
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn loopback_is_always_reachable() {
        assert!(IcmpProbe.is_reachable(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PROBE_TIMEOUT));
    }

    #[test]
    fn closures_act_as_probes() {
        let up = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&up);
        let probe = move |_: IpAddr, _: Duration| flag.load(Ordering::SeqCst);
        let host = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert!(!probe.is_reachable(host, DEFAULT_PROBE_TIMEOUT));
        up.store(true, Ordering::SeqCst);
        assert!(probe.is_reachable(host, DEFAULT_PROBE_TIMEOUT));
    }

    #[test]
    fn echo_request_checksum_verifies() {
        let packet = icmp::echo_request(7);
        assert_eq!(packet[0], 8);
        assert_eq!(icmp::checksum(&packet), 0);
    }

    #[test]
    fn echo_reply_matches_with_and_without_ip_header() {
        let mut reply = icmp::echo_request(9);
        reply[0] = 0;
        assert!(icmp::is_echo_reply(&reply, 9));
        assert!(!icmp::is_echo_reply(&reply, 10));

        let mut with_header = vec![0x45u8];
        with_header.extend_from_slice(&[0u8; 19]);
        with_header.extend_from_slice(&reply);
        assert!(icmp::is_echo_reply(&with_header, 9));
    }
}
