use std::fmt;
use std::io::Write;
use std::net::{Shutdown as NetShutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use datasocket_frame::{frame_bytes, FrameConfig, FrameWriter};
use datasocket_payload::Format;
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::handshake::send_format;

/// Shuts a stream down from any thread, even while another thread is
/// blocked writing to it.
pub struct Closer(Box<dyn Fn() + Send + Sync>);

impl Closer {
    pub fn new(close: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(close))
    }

    pub fn close(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closer")
    }
}

/// A connected byte stream the manager can write to and force closed.
pub trait PeerStream: Write + Send + 'static {
    fn closer(&self) -> std::io::Result<Closer>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl PeerStream for TcpStream {
    fn closer(&self) -> std::io::Result<Closer> {
        let handle = self.try_clone()?;
        Ok(Closer::new(move || {
            let _ = handle.shutdown(NetShutdown::Both);
        }))
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

/// Bytes ready to be written to every peer unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    /// A complete `[length][payload]` frame.
    Framed(Bytes),
    /// Payload bytes with no prefix.
    Unframed(Bytes),
}

impl Wire {
    /// Frame `payload` once for all peers.
    pub fn framed(payload: &[u8]) -> Result<Self> {
        Ok(Wire::Framed(frame_bytes(payload)?))
    }

    pub fn len(&self) -> usize {
        match self {
            Wire::Framed(bytes) | Wire::Unframed(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One accepted or connected stream owned by a [`ConnectionManager`].
///
/// Liveness only goes from true to false.
pub struct PeerConnection<S> {
    id: u64,
    addr: Option<SocketAddr>,
    writer: Mutex<FrameWriter<S>>,
    closer: Closer,
    alive: AtomicBool,
}

impl<S: PeerStream> PeerConnection<S> {
    pub fn new(id: u64, stream: S, config: FrameConfig) -> Result<Self> {
        let closer = stream.closer().map_err(datasocket_frame::FrameError::Io)?;
        let addr = stream.peer_addr();
        Ok(Self {
            id,
            addr,
            writer: Mutex::new(FrameWriter::with_config(stream, config)),
            closer,
            alive: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the peer dead. Returns true if it was alive.
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Mark dead and shut the stream down.
    pub fn close(&self) {
        self.mark_dead();
        self.closer.close();
    }

    /// Write the handshake tag. Must happen before the peer is registered.
    pub fn send_format(&self, format: Format) -> Result<()> {
        let mut writer = self.lock_writer();
        let result = send_format(&mut *writer, format);
        drop(writer);
        if result.is_err() {
            self.mark_dead();
        }
        result
    }

    /// Write one message. Any failure marks the peer dead.
    pub fn write(&self, wire: &Wire) -> Result<()> {
        if !self.is_alive() {
            return Err(PeerError::Disconnected(format!("peer {} is closed", self.id)));
        }
        let mut writer = self.lock_writer();
        let result = match wire {
            Wire::Framed(frame) => writer.write_encoded(frame),
            Wire::Unframed(payload) => writer.write_unframed(payload),
        };
        drop(writer);
        if let Err(err) = result {
            self.mark_dead();
            return Err(err.into());
        }
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, FrameWriter<S>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> fmt::Debug for PeerConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Owns the live peers of one socket and writes to all of them.
///
/// Broadcast iterates a snapshot, so registration and pruning never wait
/// on a slow write. Once [`close_all`](Self::close_all) has run, new
/// registrations are refused and their streams closed immediately.
pub struct ConnectionManager<S> {
    state: Mutex<ManagerState<S>>,
    changed: Condvar,
    next_id: AtomicU64,
    verbose: bool,
}

struct ManagerState<S> {
    peers: Vec<Arc<PeerConnection<S>>>,
    closed: bool,
}

impl<S: PeerStream> ConnectionManager<S> {
    pub fn new(verbose: bool) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                peers: Vec::new(),
                closed: false,
            }),
            changed: Condvar::new(),
            next_id: AtomicU64::new(1),
            verbose,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id for a new connection.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a peer. Returns `None` (and closes the stream) during shutdown.
    pub fn register(&self, peer: PeerConnection<S>) -> Option<Arc<PeerConnection<S>>> {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            debug!(peer = peer.id(), "connection refused during shutdown");
            peer.close();
            return None;
        }
        let peer = Arc::new(peer);
        state.peers.push(Arc::clone(&peer));
        self.changed.notify_all();
        drop(state);

        crate::status!(self.verbose, peer = peer.id(), addr = ?peer.addr(), "peer connected");
        Some(peer)
    }

    /// Live peers at this instant.
    pub fn snapshot(&self) -> Vec<Arc<PeerConnection<S>>> {
        self.lock()
            .peers
            .iter()
            .filter(|peer| peer.is_alive())
            .cloned()
            .collect()
    }

    /// Write `wire` to every live peer. A failing peer is marked dead and
    /// pruned; the others still receive the message.
    pub fn broadcast(&self, wire: &Wire) -> Delivery {
        let mut delivery = Delivery::default();
        for peer in self.snapshot() {
            match peer.write(wire) {
                Ok(()) => delivery.delivered += 1,
                Err(err) => {
                    delivery.failed += 1;
                    crate::status!(
                        self.verbose,
                        peer = peer.id(),
                        addr = ?peer.addr(),
                        error = %err,
                        "peer disconnected"
                    );
                }
            }
        }
        if delivery.failed > 0 {
            self.prune();
        }
        delivery
    }

    /// Drop dead peers. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut state = self.lock();
        let before = state.peers.len();
        state.peers.retain(|peer| {
            if peer.is_alive() {
                return true;
            }
            peer.close();
            false
        });
        let removed = before - state.peers.len();
        if removed > 0 {
            self.changed.notify_all();
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.lock().peers.iter().filter(|peer| peer.is_alive()).count()
    }

    /// Wait up to `timeout` for at least one live peer.
    ///
    /// Returns false on timeout or once the manager is closed.
    pub fn wait_for_peer(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |state| !state.peers.iter().any(|peer| peer.is_alive()))
    }

    /// Wait up to `timeout` until no live peer remains (or the manager closes).
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |state| state.peers.iter().any(|peer| peer.is_alive()));
        self.live_count() == 0
    }

    fn wait_while(&self, timeout: Duration, blocked: impl Fn(&ManagerState<S>) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while blocked(&state) {
            let now = Instant::now();
            if state.closed || now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !state.closed
    }

    /// Close every peer and refuse new ones until [`reopen`](Self::reopen).
    pub fn close_all(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let peers = std::mem::take(&mut state.peers);
        self.changed.notify_all();
        drop(state);

        for peer in &peers {
            peer.close();
        }
        peers.len()
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read};
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use datasocket_frame::FrameReader;

    use super::*;

    #[derive(Clone, Default)]
    struct MockStream {
        written: Arc<Mutex<Vec<u8>>>,
        writes: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl MockStream {
        fn failing() -> Self {
            let stream = Self::default();
            stream.failing.store(true, Ordering::SeqCst);
            stream
        }

        fn bytes(&self) -> Vec<u8> {
            self.written.lock().expect("mock lock").clone()
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(std::io::Error::from(ErrorKind::BrokenPipe));
            }
            self.written.lock().expect("mock lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl PeerStream for MockStream {
        fn closer(&self) -> std::io::Result<Closer> {
            let closed = Arc::clone(&self.closed);
            Ok(Closer::new(move || closed.store(true, Ordering::SeqCst)))
        }
    }

    fn connection(manager: &ConnectionManager<MockStream>, stream: &MockStream) -> PeerConnection<MockStream> {
        PeerConnection::new(manager.next_id(), stream.clone(), FrameConfig::default())
            .expect("peer should build")
    }

    #[test]
    fn broadcast_isolates_failing_peer() {
        let manager = ConnectionManager::new(false);
        let healthy = MockStream::default();
        let broken = MockStream::failing();
        manager.register(connection(&manager, &healthy)).expect("registered");
        manager.register(connection(&manager, &broken)).expect("registered");

        let wire = Wire::framed(b"tick").expect("frame");
        let delivery = manager.broadcast(&wire);
        assert_eq!(delivery, Delivery { delivered: 1, failed: 1 });
        assert_eq!(manager.live_count(), 1);
        assert!(broken.closed.load(Ordering::SeqCst), "dead peer is closed on prune");

        let attempts = broken.writes.load(Ordering::SeqCst);
        let delivery = manager.broadcast(&Wire::framed(b"tock").expect("frame"));
        assert_eq!(delivery, Delivery { delivered: 1, failed: 0 });
        assert_eq!(broken.writes.load(Ordering::SeqCst), attempts, "dead peer not written again");

        let mut reader = FrameReader::new(std::io::Cursor::new(healthy.bytes()));
        assert_eq!(reader.read_frame().expect("first").as_ref(), b"tick");
        assert_eq!(reader.read_frame().expect("second").as_ref(), b"tock");
    }

    #[test]
    fn every_peer_gets_identical_bytes() {
        let manager = ConnectionManager::new(false);
        let streams: Vec<MockStream> = (0..3).map(|_| MockStream::default()).collect();
        for stream in &streams {
            manager.register(connection(&manager, stream)).expect("registered");
        }

        let wire = Wire::framed(b"same for all").expect("frame");
        assert_eq!(manager.broadcast(&wire).delivered, 3);
        for stream in &streams {
            assert_eq!(stream.bytes(), frame_bytes(b"same for all").expect("frame").to_vec());
        }
    }

    #[test]
    fn unframed_wire_has_no_prefix() {
        let manager = ConnectionManager::new(false);
        let stream = MockStream::default();
        manager.register(connection(&manager, &stream)).expect("registered");

        manager.broadcast(&Wire::Unframed(Bytes::from_static(b"raw")));
        assert_eq!(stream.bytes(), b"raw".to_vec());
    }

    #[test]
    fn format_tag_precedes_frames() {
        let manager = ConnectionManager::new(false);
        let stream = MockStream::default();
        let peer = connection(&manager, &stream);
        peer.send_format(Format::Array).expect("tag");
        manager.register(peer).expect("registered");

        manager.broadcast(&Wire::framed(b"x").expect("frame"));
        assert_eq!(stream.bytes(), vec![1, 0, 0, 0, 1, 0, 0, 0, b'x']);
    }

    #[test]
    fn registration_refused_after_close_all() {
        let manager = ConnectionManager::new(false);
        let first = MockStream::default();
        manager.register(connection(&manager, &first)).expect("registered");

        assert_eq!(manager.close_all(), 1);
        assert!(first.closed.load(Ordering::SeqCst));

        let late = MockStream::default();
        assert!(manager.register(connection(&manager, &late)).is_none());
        assert!(late.closed.load(Ordering::SeqCst), "late stream must not escape closure");
        assert_eq!(manager.live_count(), 0);

        manager.reopen();
        assert!(manager.register(connection(&manager, &late)).is_some());
    }

    #[test]
    fn wait_for_peer_wakes_on_register() {
        let manager = Arc::new(ConnectionManager::new(false));
        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.wait_for_peer(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        let stream = MockStream::default();
        manager.register(connection(&manager, &stream)).expect("registered");
        assert!(waiter.join().expect("waiter should finish"));
    }

    #[test]
    fn wait_for_peer_returns_false_when_closed() {
        let manager = Arc::new(ConnectionManager::<MockStream>::new(false));
        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let started = Instant::now();
                (manager.wait_for_peer(Duration::from_secs(10)), started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        manager.close_all();
        let (ready, elapsed) = waiter.join().expect("waiter should finish");
        assert!(!ready);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn wait_until_empty_wakes_on_prune() {
        let manager = Arc::new(ConnectionManager::new(false));
        let stream = MockStream::failing();
        manager.register(connection(&manager, &stream)).expect("registered");

        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.wait_until_empty(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        manager.broadcast(&Wire::framed(b"x").expect("frame"));
        assert!(waiter.join().expect("waiter should finish"));
    }

    #[test]
    fn close_all_unblocks_remote_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).expect("connect");
            let mut buf = [0u8; 16];
            stream.read(&mut buf).expect("read should end cleanly")
        });

        let (stream, _) = listener.accept().expect("accept");
        let manager = ConnectionManager::new(false);
        let peer = PeerConnection::new(manager.next_id(), stream, FrameConfig::default())
            .expect("peer should build");
        assert!(peer.addr().is_some());
        manager.register(peer).expect("registered");

        manager.close_all();
        assert_eq!(client.join().expect("client should finish"), 0);
    }
}
