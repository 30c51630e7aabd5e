//! TCP client endpoint with automatic reconnect and an optional heartbeat.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use commlink_frame::{FrameError, FrameReader, FrameWriter};
use commlink_transport::{IcmpProbe, LinkStream, ReachabilityProbe};
use tracing::{debug, info, warn};

use crate::config::TcpClientConfig;
use crate::endpoint::{Connection, Endpoint};
use crate::error::{EndpointError, Result};
use crate::events::{Events, FrameEvent};
use crate::gate::{GateOutcome, SyncGate};
use crate::shutdown::Shutdown;
use crate::state::{ConnectionState, LinkState};
use crate::worker;

/// Periodic keep-alive write of a TCP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub payload: Bytes,
    pub interval: Duration,
    pub enabled: bool,
}

/// A TCP client that keeps one connection to a fixed remote alive.
///
/// `open` returns immediately; a background thread connects, reads frames
/// and reconnects whenever the link drops. Before each connect attempt the
/// remote host is probed for reachability so that an absent device costs a
/// cheap probe instead of a full connect timeout.
pub struct TcpClientEndpoint {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

#[derive(Default)]
struct Workers {
    shutdown: Option<Shutdown>,
    receiver: Option<JoinHandle<()>>,
    heartbeat: Option<HeartbeatWorker>,
}

struct HeartbeatWorker {
    stop: Shutdown,
    handle: JoinHandle<()>,
}

struct Shared {
    config: TcpClientConfig,
    probe: Arc<dyn ReachabilityProbe>,
    events: Events,
    link: LinkState,
    gate: SyncGate,
    /// Held for a whole request/reply exchange.
    exchange: Mutex<()>,
    /// Held only for one physical write.
    writer: Mutex<Option<FrameWriter<LinkStream>>>,
    control: Mutex<Option<LinkStream>>,
    local_addr: Mutex<Option<SocketAddr>>,
    heartbeat: Mutex<Heartbeat>,
}

impl TcpClientEndpoint {
    /// Client that probes the remote with ICMP echo before connecting.
    pub fn new(config: TcpClientConfig) -> Self {
        Self::with_probe(config, Arc::new(IcmpProbe))
    }

    pub fn with_probe(config: TcpClientConfig, probe: Arc<dyn ReachabilityProbe>) -> Self {
        let heartbeat = Heartbeat {
            payload: Bytes::new(),
            interval: config.heartbeat_interval,
            enabled: false,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                probe,
                events: Events::new(),
                link: LinkState::new(),
                gate: SyncGate::new(),
                exchange: Mutex::new(()),
                writer: Mutex::new(None),
                control: Mutex::new(None),
                local_addr: Mutex::new(None),
                heartbeat: Mutex::new(heartbeat),
            }),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.shared.config
    }

    pub fn remote(&self) -> SocketAddr {
        self.shared.config.remote
    }

    /// Configured local port; 0 when the OS picks one.
    pub fn local_port(&self) -> u16 {
        self.shared.config.local_port
    }

    /// Local address of the current connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.phase()
    }

    pub fn heartbeat(&self) -> Heartbeat {
        lock(&self.shared.heartbeat).clone()
    }

    /// Change the heartbeat period; applies from the next beat.
    pub fn set_heartbeat_interval(&self, interval: Duration) {
        lock(&self.shared.heartbeat).interval = interval;
    }

    /// Send `payload` every heartbeat interval while connected.
    ///
    /// Replaces the payload of a heartbeat that is already running. Before
    /// `open` this only arms the heartbeat.
    pub fn start_heartbeat(&self, payload: impl Into<Bytes>) -> Result<()> {
        {
            let mut heartbeat = lock(&self.shared.heartbeat);
            heartbeat.payload = payload.into();
            heartbeat.enabled = true;
        }
        let mut workers = lock(&self.workers);
        self.ensure_heartbeat(&mut workers)
    }

    /// Stop sending heartbeats.
    pub fn stop_heartbeat(&self) {
        lock(&self.shared.heartbeat).enabled = false;
        let heartbeat = lock(&self.workers).heartbeat.take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop.cancel();
            worker::join_all([heartbeat.handle]);
        }
    }

    fn ensure_heartbeat(&self, workers: &mut Workers) -> Result<()> {
        let Some(shutdown) = workers.shutdown.clone() else {
            return Ok(());
        };
        if !lock(&self.shared.heartbeat).enabled {
            return Ok(());
        }
        if let Some(running) = &workers.heartbeat {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }

        let stop = Shutdown::new();
        let handle = {
            let shared = Arc::clone(&self.shared);
            let stop = stop.clone();
            worker::spawn("commlink-client-heartbeat", move || {
                shared.heartbeat_loop(&shutdown, &stop)
            })?
        };
        if let Some(previous) = workers.heartbeat.replace(HeartbeatWorker { stop, handle }) {
            worker::join_all([previous.handle]);
        }
        Ok(())
    }
}

impl Endpoint for TcpClientEndpoint {
    /// Start connecting in the background. Returns at once; watch the state
    /// handlers or [`is_connected`](Endpoint::is_connected) for the outcome.
    fn open(&self) -> Result<()> {
        let mut workers = lock(&self.workers);
        if workers.shutdown.is_some() {
            return Ok(());
        }

        let shutdown = Shutdown::new();
        self.shared
            .link
            .transition()
            .set_phase(ConnectionState::Connecting);

        let handle = {
            let shared = Arc::clone(&self.shared);
            let shutdown = shutdown.clone();
            worker::spawn("commlink-client-rx", move || shared.run(&shutdown))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.link.transition().set_phase(ConnectionState::Idle);
                return Err(err);
            }
        };
        workers.shutdown = Some(shutdown);
        workers.receiver = Some(handle);
        info!(remote = %self.shared.config.remote, "tcp client started");

        self.ensure_heartbeat(&mut workers)
    }

    fn close(&self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        let Some(shutdown) = workers.shutdown else {
            return;
        };

        {
            let tx = self.shared.link.transition();
            tx.set_phase(ConnectionState::Closed);
            tx.set_connected(false, &self.shared.events);
        }
        shutdown.cancel();
        if let Some(heartbeat) = &workers.heartbeat {
            heartbeat.stop.cancel();
        }
        self.shared.gate.close();
        self.shared.release();

        worker::join_all(
            workers
                .receiver
                .into_iter()
                .chain(workers.heartbeat.map(|heartbeat| heartbeat.handle)),
        );
        info!(remote = %self.shared.config.remote, "tcp client closed");
    }

    fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    fn identity(&self) -> String {
        self.shared.config.remote.to_string()
    }

    fn events(&self) -> &Events {
        &self.shared.events
    }
}

impl Connection for TcpClientEndpoint {
    /// Write `payload` as is. A failed write marks the client disconnected
    /// and the receive thread starts reconnecting.
    fn send(&self, payload: &[u8]) -> Result<()> {
        self.shared.send(payload)
    }

    fn send_sync(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        self.shared.send_sync(payload, timeout)
    }
}

impl Drop for TcpClientEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpClientEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClientEndpoint")
            .field("remote", &self.shared.config.remote)
            .field("local_port", &self.shared.config.local_port)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn run(&self, shutdown: &Shutdown) {
        let remote = self.config.remote;
        let mut reader: Option<FrameReader<LinkStream>> = None;
        let mut local = None;

        while !shutdown.is_cancelled() {
            let Some(frames) = reader.as_mut() else {
                reader = self.reconnect(shutdown);
                local = lock(&self.local_addr).map(|addr| addr.to_string());
                continue;
            };

            match frames.read_frame() {
                Ok(frame) => {
                    let event = FrameEvent {
                        source: Some(remote.to_string()),
                        local: local.clone(),
                        payload: frame.payload,
                    };
                    if self.events.dispatch_frame(&event) {
                        self.gate.signal();
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err @ FrameError::FrameTooLarge { .. }) => {
                    warn!(%remote, error = %err, "discarding unterminated input");
                }
                Err(err) => {
                    if !shutdown.is_cancelled() {
                        info!(%remote, error = %err, "connection lost");
                        self.connection_lost();
                    }
                    reader = None;
                }
            }
        }

        debug!(%remote, "client receive loop stopped");
    }

    /// Probe and connect until a connection is up or the client is closed.
    fn reconnect(&self, shutdown: &Shutdown) -> Option<FrameReader<LinkStream>> {
        let remote = self.config.remote;
        self.connection_lost();
        {
            let tx = self.link.transition();
            if tx.phase() == ConnectionState::Closed {
                return None;
            }
            tx.set_phase(ConnectionState::Connecting);
        }

        let mut attempt: u64 = 0;
        while !shutdown.is_cancelled() {
            attempt += 1;
            if self.probe.is_reachable(remote.ip(), self.config.probe_timeout) {
                match self.establish() {
                    Ok(reader) => return Some(reader),
                    Err(EndpointError::Closed) => return None,
                    Err(err) => debug!(%remote, attempt, error = %err, "connect attempt failed"),
                }
            } else {
                debug!(%remote, attempt, "remote unreachable");
            }

            if shutdown.sleep(self.config.reconnect_interval) {
                break;
            }
        }
        None
    }

    fn establish(&self) -> Result<FrameReader<LinkStream>> {
        let remote = self.config.remote;
        let stream = commlink_transport::connect(
            remote,
            self.config.local_port,
            self.config.connect_timeout,
        )?;
        let frame_config = self
            .config
            .framing
            .frame_config(None, self.config.send_timeout);
        let reader = FrameReader::with_config_link(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_link(stream.try_clone()?, frame_config)?;
        let local = stream.local_addr();

        let tx = self.link.transition();
        if tx.phase() == ConnectionState::Closed {
            stream.shutdown();
            return Err(EndpointError::Closed);
        }
        self.gate.reset();
        *lock(&self.writer) = Some(writer);
        *lock(&self.control) = Some(stream);
        *lock(&self.local_addr) = local;
        tx.set_phase(ConnectionState::Connected);
        info!(%remote, local = ?local, "connected");
        tx.set_connected(true, &self.events);

        Ok(reader)
    }

    /// Tear down the current connection, if any, and report the loss.
    fn connection_lost(&self) {
        self.gate.close();
        self.release();
        let tx = self.link.transition();
        if tx.phase() != ConnectionState::Closed {
            tx.set_phase(ConnectionState::Disconnected);
        }
        tx.set_connected(false, &self.events);
    }

    fn release(&self) {
        let control = lock(&self.control).take();
        if let Some(stream) = control {
            stream.shutdown();
        }
        lock(&self.writer).take();
        lock(&self.local_addr).take();
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.link.is_connected() {
            return Err(EndpointError::NotConnected);
        }
        let result = match lock(&self.writer).as_mut() {
            Some(writer) => writer.send(payload),
            None => return Err(EndpointError::NotConnected),
        };
        if let Err(err) = result {
            debug!(remote = %self.config.remote, error = %err, "send failed");
            self.connection_lost();
            return Err(err.into());
        }
        Ok(())
    }

    /// The writer is free again once the request is out, so frame handlers
    /// and the heartbeat can send while the reply is awaited.
    fn send_sync(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        let _exchange = lock(&self.exchange);
        self.send(payload)?;

        match self.gate.wait_for(timeout) {
            GateOutcome::Signaled => Ok(()),
            GateOutcome::TimedOut => Err(EndpointError::Timeout(timeout)),
            GateOutcome::Closed if self.link.phase() == ConnectionState::Closed => {
                Err(EndpointError::Closed)
            }
            GateOutcome::Closed => Err(EndpointError::NotConnected),
        }
    }

    fn heartbeat_loop(&self, shutdown: &Shutdown, stop: &Shutdown) {
        loop {
            let beat = lock(&self.heartbeat).clone();
            if !beat.enabled || shutdown.is_cancelled() || stop.is_cancelled() {
                break;
            }
            if self.link.is_connected() {
                if let Err(err) = self.send(&beat.payload) {
                    debug!(remote = %self.config.remote, error = %err, "heartbeat not sent");
                }
            }
            if stop.sleep(beat.interval.max(Duration::from_millis(1))) {
                break;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
