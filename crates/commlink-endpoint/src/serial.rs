//! Serial line endpoint.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use commlink_frame::{FrameError, FrameReader, FrameWriter};
use commlink_transport::{serial, LinkStream};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::endpoint::{Connection, Endpoint};
use crate::error::{EndpointError, Result};
use crate::events::{Events, FrameEvent};
use crate::gate::{GateOutcome, SyncGate};
use crate::shutdown::Shutdown;
use crate::state::{ConnectionState, LinkState};
use crate::worker;

/// An endpoint on one serial line.
///
/// `open` starts a receive thread that polls the line with the configured
/// read timeout and hands every frame to the registered frame handlers.
pub struct SerialEndpoint {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

struct Shared {
    config: SerialConfig,
    events: Events,
    link: LinkState,
    gate: SyncGate,
    exchange: Mutex<()>,
    writer: Mutex<Option<FrameWriter<LinkStream>>>,
    control: Mutex<Option<LinkStream>>,
}

impl SerialEndpoint {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events: Events::new(),
                link: LinkState::new(),
                gate: SyncGate::new(),
                exchange: Mutex::new(()),
                writer: Mutex::new(None),
                control: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.phase()
    }

    /// Run the endpoint over an already opened stream instead of the
    /// configured device. Any previous line is closed first.
    pub fn open_with(&self, stream: LinkStream) -> Result<()> {
        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take() {
            self.shutdown_worker(previous);
        }

        let shared = &self.shared;
        let frame_config = shared
            .config
            .framing
            .frame_config(Some(shared.config.line.read_timeout), None);
        let reader = FrameReader::with_config_link(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_link(stream.try_clone()?, frame_config)?;

        shared.gate.reset();
        *lock(&shared.writer) = Some(writer);
        *lock(&shared.control) = Some(stream);

        let shutdown = Shutdown::new();
        let handle = {
            let shared = Arc::clone(shared);
            let shutdown = shutdown.clone();
            worker::spawn("commlink-serial-rx", move || shared.receive_loop(reader, shutdown))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                shared.release();
                return Err(err);
            }
        };
        *worker = Some(Worker { shutdown, handle });
        drop(worker);

        let tx = shared.link.transition();
        tx.set_phase(ConnectionState::Connected);
        tx.set_connected(true, &shared.events);
        Ok(())
    }

    /// Drop whatever sits in the line's input and output buffers.
    pub fn discard_buffers(&self) -> Result<()> {
        match lock(&self.shared.control).as_ref() {
            Some(stream) => Ok(stream.clear_buffers()?),
            None => Err(EndpointError::NotConnected),
        }
    }

    /// Serial ports present on this machine.
    pub fn port_names() -> Result<Vec<String>> {
        Ok(serial::available_ports()?)
    }

    fn shutdown_worker(&self, worker: Worker) {
        worker.shutdown.cancel();
        self.shared.gate.close();
        self.shared.release();
        worker::join_all([worker.handle]);
    }
}

impl Endpoint for SerialEndpoint {
    /// Open the configured port. A port that is already open is closed and
    /// reopened.
    fn open(&self) -> Result<()> {
        let stream = serial::open(&self.shared.config.line)?;
        self.open_with(stream)
    }

    fn close(&self) {
        let worker = lock(&self.worker).take();
        let Some(worker) = worker else {
            return;
        };
        {
            let tx = self.shared.link.transition();
            tx.set_phase(ConnectionState::Closed);
            tx.set_connected(false, &self.shared.events);
        }
        self.shutdown_worker(worker);
        info!(port = %self.shared.config.line.port_name, "serial endpoint closed");
    }

    fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    fn identity(&self) -> String {
        self.shared.config.line.port_name.clone()
    }

    fn events(&self) -> &Events {
        &self.shared.events
    }
}

impl Connection for SerialEndpoint {
    fn send(&self, payload: &[u8]) -> Result<()> {
        self.shared.send(payload)
    }

    /// Only the write itself holds the line, so frame handlers may send
    /// while the reply is awaited.
    fn send_sync(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        let _exchange = lock(&self.shared.exchange);
        self.shared.send(payload)?;

        match self.shared.gate.wait_for(timeout) {
            GateOutcome::Signaled => Ok(()),
            GateOutcome::TimedOut => Err(EndpointError::Timeout(timeout)),
            GateOutcome::Closed if self.state() == ConnectionState::Closed => {
                Err(EndpointError::Closed)
            }
            GateOutcome::Closed => Err(EndpointError::NotConnected),
        }
    }
}

impl Drop for SerialEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SerialEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialEndpoint")
            .field("port", &self.shared.config.line.port_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn receive_loop(&self, mut reader: FrameReader<LinkStream>, shutdown: Shutdown) {
        let port = &self.config.line.port_name;
        debug!(%port, "serial receive loop started");

        while !shutdown.is_cancelled() {
            match reader.read_frame() {
                Ok(frame) => {
                    let event = FrameEvent {
                        source: None,
                        local: None,
                        payload: frame.payload,
                    };
                    if self.events.dispatch_frame(&event) {
                        self.gate.signal();
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err @ FrameError::FrameTooLarge { .. }) => {
                    warn!(%port, error = %err, "discarding unterminated input");
                }
                Err(err) => {
                    if !shutdown.is_cancelled() {
                        warn!(%port, error = %err, "serial line failed");
                        self.fault();
                    }
                    break;
                }
            }
        }

        debug!(%port, "serial receive loop stopped");
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.link.is_connected() {
            return Err(EndpointError::NotConnected);
        }
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(EndpointError::NotConnected)?;
        writer.send(payload)?;
        Ok(())
    }

    /// The line broke underneath us; release it and report the loss.
    fn fault(&self) {
        let tx = self.link.transition();
        if tx.phase() == ConnectionState::Closed {
            return;
        }
        tx.set_phase(ConnectionState::Disconnected);
        tx.set_connected(false, &self.events);
        drop(tx);
        self.gate.close();
        self.release();
    }

    fn release(&self) {
        let control = lock(&self.control).take();
        if let Some(stream) = control {
            stream.shutdown();
        }
        lock(&self.writer).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    use super::*;

    /// A TCP pair stands in for a serial line: the endpoint gets one end,
    /// the test plays the device on the other.
    fn line_pair() -> (LinkStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have addr");
        let endpoint_side = TcpStream::connect(addr).expect("connect should succeed");
        let (device_side, _) = listener.accept().expect("accept should succeed");
        (LinkStream::from_tcp(endpoint_side), device_side)
    }

    fn endpoint() -> SerialEndpoint {
        let mut config = SerialConfig::new("loop0", 9600);
        config.line.read_timeout = Duration::from_millis(20);
        SerialEndpoint::new(config)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn send_before_open_fails() {
        let endpoint = endpoint();
        assert!(matches!(
            endpoint.send(b"\x01\x00"),
            Err(EndpointError::NotConnected)
        ));
        assert_eq!(endpoint.state(), ConnectionState::Idle);
    }

    #[test]
    fn open_and_close_report_state() {
        let endpoint = endpoint();
        let states = Arc::new(Mutex::new(Vec::new()));
        {
            let states = Arc::clone(&states);
            endpoint
                .events()
                .on_state_changed(move |connected| states.lock().unwrap().push(connected));
        }

        let (stream, _device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");
        assert!(endpoint.is_connected());
        endpoint.close();
        endpoint.close();

        assert!(!endpoint.is_connected());
        assert_eq!(endpoint.state(), ConnectionState::Closed);
        assert_eq!(*states.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn frames_reach_handlers() {
        let endpoint = endpoint();
        let frames = Arc::new(Mutex::new(Vec::new()));
        {
            let frames = Arc::clone(&frames);
            endpoint.events().on_frame(move |event| {
                frames.lock().unwrap().push(event.clone());
                false
            });
        }

        let (stream, mut device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");
        device.write_all(&[0x10, 0x20, 0x00]).expect("device write");

        assert!(wait_until(|| !frames.lock().unwrap().is_empty()));
        let frames = frames.lock().unwrap();
        assert_eq!(frames[0].source, None);
        assert_eq!(frames[0].payload.as_ref(), &[0x10, 0x20, 0x00]);
    }

    #[test]
    fn send_writes_payload_unchanged() {
        let endpoint = endpoint();
        let (stream, mut device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");

        endpoint.send(&[0x01, 0x02, 0x03]).expect("send should succeed");
        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).expect("device read");
        assert_eq!(buf, [0x01, 0x02, 0x03]);
    }

    #[test]
    fn send_sync_completes_on_handler_signal() {
        let endpoint = endpoint();
        endpoint.events().on_frame(|event| event.payload.first() == Some(&0xAA));

        let (stream, mut device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 3];
            device.read_exact(&mut buf).expect("device read");
            device.write_all(&[0xAA, 0x00]).expect("device write");
            device
        });

        endpoint
            .send_sync(&[0x01, 0x02, 0x00], Duration::from_secs(2))
            .expect("exchange should complete");
        responder.join().expect("responder should finish");
    }

    #[test]
    fn send_sync_times_out_without_reply() {
        let endpoint = endpoint();
        let (stream, _device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");

        let started = Instant::now();
        let result = endpoint.send_sync(&[0x01, 0x00], Duration::from_millis(100));
        assert!(matches!(result, Err(EndpointError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn close_releases_pending_exchange() {
        let endpoint = Arc::new(endpoint());
        let (stream, _device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");

        let waiter = {
            let endpoint = Arc::clone(&endpoint);
            thread::spawn(move || endpoint.send_sync(&[0x01, 0x00], Duration::ZERO))
        };
        thread::sleep(Duration::from_millis(50));
        endpoint.close();

        let result = waiter.join().expect("waiter should finish");
        assert!(matches!(result, Err(EndpointError::Closed)));
    }

    #[test]
    fn handler_can_send_while_exchange_pending() {
        let endpoint = Arc::new(endpoint());
        {
            let sender = Arc::downgrade(&endpoint);
            endpoint.events().on_frame(move |event| {
                if event.payload.first() != Some(&0xAA) {
                    return false;
                }
                if let Some(endpoint) = sender.upgrade() {
                    endpoint.send(&[0x06, 0x00]).expect("ack from handler should send");
                }
                true
            });
        }

        let (stream, mut device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");
        let responder = thread::spawn(move || {
            let mut request = [0u8; 2];
            device.read_exact(&mut request).expect("device read");
            device.write_all(&[0xAA, 0x00]).expect("device write");
            let mut ack = [0u8; 2];
            device.read_exact(&mut ack).expect("ack read");
            (device, ack)
        });

        let started = Instant::now();
        endpoint
            .send_sync(&[0x01, 0x00], Duration::from_secs(2))
            .expect("exchange should complete");
        assert!(started.elapsed() < Duration::from_secs(1));
        let (_device, ack) = responder.join().expect("responder should finish");
        assert_eq!(ack, [0x06, 0x00]);
        endpoint.close();
    }

    #[test]
    fn device_hangup_fails_pending_exchange_as_not_connected() {
        let endpoint = Arc::new(endpoint());
        let (stream, device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");

        let waiter = {
            let endpoint = Arc::clone(&endpoint);
            thread::spawn(move || endpoint.send_sync(&[0x01, 0x00], Duration::ZERO))
        };
        thread::sleep(Duration::from_millis(50));
        drop(device);

        let result = waiter.join().expect("waiter should finish");
        assert!(matches!(result, Err(EndpointError::NotConnected)));
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn device_hangup_reports_disconnect() {
        let endpoint = endpoint();
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let drops = Arc::clone(&drops);
            endpoint.events().on_state_changed(move |connected| {
                if !connected {
                    drops.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let (stream, device) = line_pair();
        endpoint.open_with(stream).expect("open should succeed");
        drop(device);

        assert!(wait_until(|| !endpoint.is_connected()));
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reopen_replaces_previous_line() {
        let endpoint = endpoint();
        let (first, _first_device) = line_pair();
        endpoint.open_with(first).expect("first open");

        let (second, mut second_device) = line_pair();
        endpoint.open_with(second).expect("second open");
        endpoint.send(&[0x05, 0x00]).expect("send on new line");

        let mut buf = [0u8; 2];
        second_device.read_exact(&mut buf).expect("device read");
        assert_eq!(buf, [0x05, 0x00]);
    }

    #[test]
    fn discard_buffers_requires_open_line() {
        let endpoint = endpoint();
        assert!(matches!(
            endpoint.discard_buffers(),
            Err(EndpointError::NotConnected)
        ));
    }
}
