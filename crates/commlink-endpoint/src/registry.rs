use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use commlink_frame::FrameWriter;
use commlink_transport::LinkStream;

use crate::gate::SyncGate;

/// One connected peer of a TCP server.
pub(crate) struct PeerLink {
    addr: SocketAddr,
    writer: Mutex<FrameWriter<LinkStream>>,
    control: Mutex<LinkStream>,
    gate: SyncGate,
    exchange: Mutex<()>,
}

impl PeerLink {
    pub(crate) fn new(
        addr: SocketAddr,
        writer: FrameWriter<LinkStream>,
        control: LinkStream,
    ) -> Self {
        Self {
            addr,
            writer: Mutex::new(writer),
            control: Mutex::new(control),
            gate: SyncGate::new(),
            exchange: Mutex::new(()),
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn gate(&self) -> &SyncGate {
        &self.gate
    }

    /// Send lock of this peer; held for one write only.
    pub(crate) fn writer(&self) -> MutexGuard<'_, FrameWriter<LinkStream>> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serializes synchronous exchanges with this peer.
    pub(crate) fn exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unblock everything using this peer's socket.
    fn disconnect(&self) {
        self.gate.close();
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .shutdown();
    }
}

/// Connected peers of a TCP server, keyed by remote address.
///
/// Each entry owns the peer's socket and its reply gate together, so a peer
/// is either fully registered or not at all. Every mutation is followed by a
/// peer list notification; mutations and their notifications are serialized,
/// so handlers observe lists in the order the changes happened.
#[derive(Default)]
pub(crate) struct PeerRegistry {
    peers: Mutex<BTreeMap<SocketAddr, Arc<PeerLink>>>,
    notify: Mutex<()>,
}

impl PeerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns false, leaving the registry untouched, if the
    /// address is already registered.
    pub(crate) fn register(
        &self,
        link: Arc<PeerLink>,
        notify: impl FnOnce(&[String]),
    ) -> bool {
        let _order = self.lock_notify();
        let addresses = {
            let mut peers = self.lock_peers();
            if peers.contains_key(&link.addr) {
                return false;
            }
            peers.insert(link.addr, link);
            Self::addresses_of(&peers)
        };
        notify(&addresses);
        true
    }

    /// Remove `link` if it is still the registered entry for its address.
    /// Its socket is shut down and its gate closed. Returns whether the
    /// registry changed.
    pub(crate) fn deregister(
        &self,
        link: &Arc<PeerLink>,
        notify: impl FnOnce(&[String]),
    ) -> bool {
        let _order = self.lock_notify();
        let addresses = {
            let mut peers = self.lock_peers();
            match peers.get(&link.addr) {
                Some(current) if Arc::ptr_eq(current, link) => {
                    peers.remove(&link.addr);
                }
                _ => return false,
            }
            Self::addresses_of(&peers)
        };
        link.disconnect();
        notify(&addresses);
        true
    }

    /// Remove and disconnect every peer, then report the empty list.
    pub(crate) fn drain(&self, notify: impl FnOnce(&[String])) -> Vec<Arc<PeerLink>> {
        let _order = self.lock_notify();
        let drained: Vec<_> = std::mem::take(&mut *self.lock_peers())
            .into_values()
            .collect();
        for link in &drained {
            link.disconnect();
        }
        notify(&[]);
        drained
    }

    pub(crate) fn get(&self, addr: &SocketAddr) -> Option<Arc<PeerLink>> {
        self.lock_peers().get(addr).cloned()
    }

    pub(crate) fn links(&self) -> Vec<Arc<PeerLink>> {
        self.lock_peers().values().cloned().collect()
    }

    pub(crate) fn addresses(&self) -> Vec<String> {
        Self::addresses_of(&self.lock_peers())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock_peers().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock_peers().is_empty()
    }

    fn addresses_of(peers: &BTreeMap<SocketAddr, Arc<PeerLink>>) -> Vec<String> {
        peers.keys().map(ToString::to_string).collect()
    }

    fn lock_peers(&self) -> MutexGuard<'_, BTreeMap<SocketAddr, Arc<PeerLink>>> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_notify(&self) -> MutexGuard<'_, ()> {
        self.notify
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};

    use super::*;

    /// Build a peer link over a real loopback connection.
    fn link() -> (Arc<PeerLink>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let remote = TcpStream::connect(listener.local_addr().expect("addr"))
            .expect("connect should succeed");
        let (accepted, addr) = listener.accept().expect("accept should succeed");
        let stream = LinkStream::from_tcp(accepted);
        let writer = FrameWriter::new(stream.try_clone().expect("clone should succeed"));
        (Arc::new(PeerLink::new(addr, writer, stream)), remote)
    }

    /// A second link sharing `link`'s address and socket.
    fn relink(link: &PeerLink) -> Arc<PeerLink> {
        let control = link.control.lock().unwrap();
        let writer = FrameWriter::new(control.try_clone().expect("clone should succeed"));
        Arc::new(PeerLink::new(
            link.addr(),
            writer,
            control.try_clone().expect("clone should succeed"),
        ))
    }

    #[test]
    fn register_notifies_with_full_list() {
        let registry = PeerRegistry::new();
        let (first, _r1) = link();
        let (second, _r2) = link();

        let mut seen = Vec::new();
        assert!(registry.register(Arc::clone(&first), |addrs| seen.push(addrs.len())));
        assert!(registry.register(Arc::clone(&second), |addrs| seen.push(addrs.len())));

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(registry.len(), 2);
        assert!(registry.addresses().contains(&first.addr().to_string()));
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let registry = PeerRegistry::new();
        let (first, _remote) = link();
        let duplicate = relink(&first);

        assert!(registry.register(first, |_| {}));
        let mut notified = false;
        assert!(!registry.register(duplicate, |_| notified = true));
        assert!(!notified);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_removes_only_that_peer_and_closes_its_gate() {
        let registry = PeerRegistry::new();
        let (first, _r1) = link();
        let (second, _r2) = link();
        registry.register(Arc::clone(&first), |_| {});
        registry.register(Arc::clone(&second), |_| {});

        let mut remaining = Vec::new();
        assert!(registry.deregister(&first, |addrs| remaining = addrs.to_vec()));
        assert_eq!(remaining, vec![second.addr().to_string()]);
        assert!(first.gate().is_closed());
        assert!(!second.gate().is_closed());

        assert!(!registry.deregister(&first, |_| panic!("no second notification")));
    }

    #[test]
    fn stale_link_does_not_remove_reregistered_address() {
        let registry = PeerRegistry::new();
        let (first, _remote) = link();
        registry.register(Arc::clone(&first), |_| {});
        registry.deregister(&first, |_| {});

        let again = relink(&first);
        assert!(registry.register(Arc::clone(&again), |_| {}));
        assert!(!registry.deregister(&first, |_| {}));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&first.addr()).is_some());
    }

    #[test]
    fn drain_reports_empty_list() {
        let registry = PeerRegistry::new();
        let (first, _remote) = link();
        registry.register(first, |_| {});

        let mut last = None;
        let drained = registry.drain(|addrs| last = Some(addrs.to_vec()));
        assert_eq!(drained.len(), 1);
        assert_eq!(last, Some(Vec::new()));
        assert!(registry.is_empty());
    }
}
