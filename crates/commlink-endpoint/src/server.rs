//! TCP server endpoint with a registry of connected peers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use commlink_frame::{FrameError, FrameReader, FrameWriter};
use commlink_transport::{LinkStream, TcpAcceptor};
use tracing::{debug, info, warn};

use crate::config::TcpServerConfig;
use crate::endpoint::Endpoint;
use crate::error::{EndpointError, Result};
use crate::events::{Events, FrameEvent};
use crate::gate::GateOutcome;
use crate::registry::{PeerLink, PeerRegistry};
use crate::shutdown::Shutdown;
use crate::worker;

/// A TCP server talking to any number of peers.
///
/// An accept thread admits peers into the registry and gives each one a
/// receive thread. Frames carry the peer's address as their source, and every
/// change of the peer set is reported to the peer list handlers with the
/// complete list of connected addresses.
pub struct TcpServerEndpoint {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

#[derive(Default)]
struct Workers {
    shutdown: Option<Shutdown>,
    acceptor: Option<JoinHandle<()>>,
}

struct Shared {
    config: TcpServerConfig,
    events: Events,
    registry: PeerRegistry,
    listening: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    peer_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpServerEndpoint {
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events: Events::new(),
                registry: PeerRegistry::new(),
                listening: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                peer_threads: Mutex::new(Vec::new()),
            }),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn config(&self) -> &TcpServerConfig {
        &self.shared.config
    }

    /// Bound listen address; resolves port 0 to the actual port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Addresses of every connected peer.
    pub fn peers(&self) -> Vec<String> {
        self.shared.registry.addresses()
    }

    /// Write `payload` to the peer at `addr`.
    ///
    /// A failed write disconnects that peer.
    pub fn send_to(&self, addr: &str, payload: &[u8]) -> Result<()> {
        let link = self.shared.lookup(addr)?;
        let result = link.writer().send(payload);
        if let Err(err) = result {
            self.shared.drop_peer(&link, &err);
            return Err(err.into());
        }
        Ok(())
    }

    /// Write `payload` to the peer at `addr` and wait until a frame handler
    /// reports completion for a frame from that same peer.
    ///
    /// `Duration::ZERO` waits without bound. Exchanges with one peer are
    /// serialized; exchanges with different peers run independently. Plain
    /// sends, including those from frame handlers, are not held up by a
    /// pending exchange.
    pub fn send_sync_to(&self, addr: &str, payload: &[u8], timeout: Duration) -> Result<()> {
        let link = self.shared.lookup(addr)?;
        let _exchange = link.exchange();
        let result = link.writer().send(payload);
        if let Err(err) = result {
            self.shared.drop_peer(&link, &err);
            return Err(err.into());
        }

        match link.gate().wait_for(timeout) {
            GateOutcome::Signaled => Ok(()),
            GateOutcome::TimedOut => Err(EndpointError::Timeout(timeout)),
            GateOutcome::Closed if !self.is_listening() => Err(EndpointError::Closed),
            GateOutcome::Closed => Err(EndpointError::NotConnected),
        }
    }

    /// Write `payload` to every connected peer. Returns how many writes
    /// succeeded; peers whose write fails are disconnected.
    pub fn broadcast(&self, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for link in self.shared.registry.links() {
            let result = link.writer().send(payload);
            match result {
                Ok(()) => delivered += 1,
                Err(err) => self.shared.drop_peer(&link, &err),
            }
        }
        delivered
    }
}

impl Endpoint for TcpServerEndpoint {
    /// Bind the listen address and start accepting. Fails if the address
    /// cannot be bound; calling it on a listening server does nothing.
    fn open(&self) -> Result<()> {
        let mut workers = lock(&self.workers);
        if workers.shutdown.is_some() {
            return Ok(());
        }

        let acceptor = TcpAcceptor::bind_addr(self.shared.config.listen_addr())?;
        acceptor.set_nonblocking(true)?;
        let local = acceptor.local_addr();

        let shutdown = Shutdown::new();
        let handle = {
            let shared = Arc::clone(&self.shared);
            let shutdown = shutdown.clone();
            worker::spawn("commlink-server-accept", move || {
                shared.accept_loop(acceptor, &shutdown)
            })?
        };

        *lock(&self.shared.local_addr) = Some(local);
        self.shared.listening.store(true, Ordering::SeqCst);
        workers.shutdown = Some(shutdown);
        workers.acceptor = Some(handle);
        info!(addr = %local, "tcp server listening");
        Ok(())
    }

    /// Stop accepting, disconnect every peer and report an empty peer list.
    fn close(&self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        let Some(shutdown) = workers.shutdown else {
            return;
        };

        self.shared.listening.store(false, Ordering::SeqCst);
        shutdown.cancel();
        worker::join_all(workers.acceptor);

        let events = &self.shared.events;
        let drained = self
            .shared
            .registry
            .drain(|addresses| events.dispatch_peers(addresses));
        let peer_threads = std::mem::take(&mut *lock(&self.shared.peer_threads));
        worker::join_all(peer_threads);

        lock(&self.shared.local_addr).take();
        info!(peers = drained.len(), "tcp server closed");
    }

    /// True while at least one peer is connected.
    fn is_connected(&self) -> bool {
        !self.shared.registry.is_empty()
    }

    fn identity(&self) -> String {
        self.local_addr()
            .unwrap_or_else(|| self.shared.config.listen_addr())
            .to_string()
    }

    fn events(&self) -> &Events {
        &self.shared.events
    }
}

impl Drop for TcpServerEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServerEndpoint")
            .field("addr", &self.identity())
            .field("listening", &self.is_listening())
            .field("peers", &self.shared.registry.len())
            .finish()
    }
}

impl Shared {
    fn accept_loop(self: &Arc<Self>, acceptor: TcpAcceptor, shutdown: &Shutdown) {
        while !shutdown.is_cancelled() {
            match acceptor.accept() {
                Ok(Some((stream, addr))) => self.admit(stream, addr, shutdown),
                Ok(None) => {
                    if shutdown.sleep(self.config.accept_poll) {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    if shutdown.sleep(self.config.accept_poll) {
                        break;
                    }
                }
            }
        }
        debug!(addr = %acceptor.local_addr(), "accept loop stopped");
    }

    fn admit(self: &Arc<Self>, stream: LinkStream, addr: SocketAddr, shutdown: &Shutdown) {
        let frame_config = self.config.framing.frame_config(None, self.config.send_timeout);
        let parts = stream.try_clone().and_then(|reader_side| {
            let writer_side = stream.try_clone()?;
            Ok((reader_side, writer_side))
        });
        let (reader_side, writer_side) = match parts {
            Ok(parts) => parts,
            Err(err) => {
                warn!(peer = %addr, error = %err, "cannot set up peer");
                stream.shutdown();
                return;
            }
        };
        let reader = FrameReader::with_config_link(reader_side, frame_config.clone());
        let writer = FrameWriter::with_config_link(writer_side, frame_config);
        let (reader, writer) = match (reader, writer) {
            (Ok(reader), Ok(writer)) => (reader, writer),
            (Err(err), _) | (_, Err(err)) => {
                warn!(peer = %addr, error = %err, "cannot set up peer");
                stream.shutdown();
                return;
            }
        };

        let local = stream.local_addr().map(|local| local.to_string());
        let link = Arc::new(PeerLink::new(addr, writer, stream));
        if !self
            .registry
            .register(Arc::clone(&link), |addresses| self.events.dispatch_peers(addresses))
        {
            warn!(peer = %addr, "peer already registered");
            return;
        }
        info!(peer = %addr, peers = self.registry.len(), "peer connected");

        let handle = {
            let shared = Arc::clone(self);
            let link = Arc::clone(&link);
            let shutdown = shutdown.clone();
            worker::spawn("commlink-server-peer", move || {
                shared.peer_loop(&link, local, reader, &shutdown)
            })
        };
        match handle {
            Ok(handle) => {
                let mut threads = lock(&self.peer_threads);
                worker::prune_finished(&mut threads);
                threads.push(handle);
            }
            Err(err) => {
                warn!(peer = %addr, error = %err, "cannot start peer receiver");
                self.registry
                    .deregister(&link, |addresses| self.events.dispatch_peers(addresses));
            }
        }
    }

    fn peer_loop(
        &self,
        link: &Arc<PeerLink>,
        local: Option<String>,
        mut reader: FrameReader<LinkStream>,
        shutdown: &Shutdown,
    ) {
        let addr = link.addr();
        let source = addr.to_string();

        while !shutdown.is_cancelled() {
            match reader.read_frame() {
                Ok(frame) => {
                    let event = FrameEvent {
                        source: Some(source.clone()),
                        local: local.clone(),
                        payload: frame.payload,
                    };
                    if self.events.dispatch_frame(&event) {
                        link.gate().signal();
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err @ FrameError::FrameTooLarge { .. }) => {
                    warn!(peer = %addr, error = %err, "discarding unterminated input");
                }
                Err(err) => {
                    debug!(peer = %addr, error = %err, "peer receive ended");
                    break;
                }
            }
        }

        if self
            .registry
            .deregister(link, |addresses| self.events.dispatch_peers(addresses))
        {
            info!(peer = %addr, peers = self.registry.len(), "peer disconnected");
        }
    }

    fn lookup(&self, addr: &str) -> Result<Arc<PeerLink>> {
        addr.parse::<SocketAddr>()
            .ok()
            .and_then(|parsed| self.registry.get(&parsed))
            .ok_or_else(|| EndpointError::UnknownPeer(addr.to_string()))
    }

    fn drop_peer(&self, link: &Arc<PeerLink>, err: &FrameError) {
        debug!(peer = %link.addr(), error = %err, "send failed");
        if self
            .registry
            .deregister(link, |addresses| self.events.dispatch_peers(addresses))
        {
            info!(peer = %link.addr(), peers = self.registry.len(), "peer disconnected");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
