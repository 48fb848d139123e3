use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use datasocket_frame::{
    DatagramAssembler, FrameConfig, FrameError, FrameReader, WindowReader, MAX_DATAGRAM_PAYLOAD,
};
use datasocket_payload::{Format, Payload, PayloadCodec};
use datasocket_transport::{connect, DatagramSocket, Endpoint, SocketOptions, TcpServer};
use tracing::{debug, trace, warn};

use crate::error::{PeerError, Result};
use crate::handshake::{receive_format, FormatNegotiator};
use crate::manager::{Closer, PeerStream};
use crate::outbound::ACCEPT_POLL;
use crate::shutdown::{Flag, Shutdown};
use crate::slot::LatestValue;

/// Receive buffer for one datagram; larger than any UDP payload.
const DATAGRAM_BUFFER: usize = 64 * 1024;

/// Longest a datagram read blocks before re-checking the stop signal.
const DATAGRAM_POLL: Duration = Duration::from_millis(1);

/// The stream a receiver is currently reading, closable from `stop`.
#[derive(Debug, Default)]
pub(crate) struct ActiveStream {
    state: Mutex<ActiveState>,
}

#[derive(Debug, Default)]
struct ActiveState {
    closer: Option<Closer>,
    closed: bool,
}

impl ActiveStream {
    fn lock(&self) -> MutexGuard<'_, ActiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `closer` the current stream. Refused (and closed) after [`close`](Self::close).
    pub(crate) fn install(&self, closer: Closer) -> bool {
        let mut state = self.lock();
        if state.closed {
            closer.close();
            return false;
        }
        state.closer = Some(closer);
        true
    }

    pub(crate) fn clear(&self) {
        self.lock().closer = None;
    }

    /// Shut down the current stream, unblocking its reader.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(closer) = state.closer.take() {
            closer.close();
        }
    }

    pub(crate) fn reopen(&self) {
        self.lock().closed = false;
    }
}

/// Everything a receive loop shares with its socket.
#[derive(Clone)]
pub(crate) struct ReceiveContext {
    pub(crate) slot: Arc<LatestValue<Payload>>,
    pub(crate) shutdown: Arc<Shutdown>,
    pub(crate) negotiator: Arc<FormatNegotiator>,
    pub(crate) active: Arc<ActiveStream>,
    pub(crate) connected: Arc<Flag>,
    pub(crate) frame_config: FrameConfig,
    /// Expect a format tag before the first frame.
    pub(crate) handshake: bool,
    /// RAW without length prefixes: message boundaries come from draining.
    pub(crate) unframed: bool,
    pub(crate) receive_buffer_size: usize,
    pub(crate) verbose: bool,
}

impl ReceiveContext {
    /// Decode one payload and make it the latest value. Undecodable
    /// payloads are skipped.
    fn publish(&self, codec: &dyn PayloadCodec, bytes: Bytes) {
        let len = bytes.len();
        match codec.decode(bytes) {
            Ok(payload) => {
                trace!(len, format = %codec.format(), "received value");
                if self.slot.publish(payload) {
                    trace!("unread value replaced by a newer one");
                }
            }
            Err(err) => crate::status!(
                self.verbose,
                len,
                format = %codec.format(),
                error = %err,
                "skipping payload that could not be decoded"
            ),
        }
    }

    /// Read one connection until it closes or fails.
    fn run_session(&self, stream: TcpStream) {
        let addr = PeerStream::peer_addr(&stream);
        let closer = match stream.closer() {
            Ok(closer) => closer,
            Err(err) => {
                warn!(error = %err, "could not set up connection");
                return;
            }
        };
        if !self.active.install(closer) {
            debug!("connection arrived during shutdown");
            return;
        }
        self.connected.set(true);
        crate::status!(self.verbose, addr = ?addr, "sender connected");

        let result = if self.unframed {
            self.read_unframed(stream)
        } else {
            self.read_framed(stream)
        };

        self.active.clear();
        self.connected.set(false);
        match result {
            Ok(()) | Err(PeerError::Frame(FrameError::ConnectionClosed)) => {
                crate::status!(self.verbose, addr = ?addr, "sender disconnected");
            }
            Err(err) if self.shutdown.is_triggered() => {
                debug!(error = %err, "connection closed by shutdown");
            }
            Err(err) => crate::status!(self.verbose, addr = ?addr, error = %err, "connection dropped"),
        }
    }

    fn read_framed(&self, stream: TcpStream) -> Result<()> {
        let mut reader = FrameReader::with_config(stream, self.frame_config.clone());
        let format = if self.handshake {
            let announced = receive_format(&mut reader)?;
            let format = self.negotiator.accept(announced)?;
            crate::status!(self.verbose, %format, "handshake complete");
            format
        } else {
            Format::Raw
        };

        let codec = format.codec();
        while !self.shutdown.is_triggered() {
            let frame = reader.read_frame()?;
            self.publish(codec, frame);
        }
        Ok(())
    }

    fn read_unframed(&self, stream: TcpStream) -> Result<()> {
        let mut reader = WindowReader::with_max_message(
            stream,
            self.receive_buffer_size,
            self.frame_config.max_payload_size,
        );
        let codec = Format::Raw.codec();
        while !self.shutdown.is_triggered() {
            let message = reader.read_message()?;
            self.publish(codec, message);
        }
        Ok(())
    }
}

/// Accept senders one at a time until shutdown.
pub(crate) fn serve_loop(server: TcpServer, ctx: ReceiveContext) {
    crate::status!(ctx.verbose, addr = %server.local_addr(), "waiting for a sender");
    while !ctx.shutdown.is_triggered() {
        match server.try_accept() {
            Ok(Some(stream)) => ctx.run_session(stream),
            Ok(None) => {
                if ctx.shutdown.sleep(ACCEPT_POLL) {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                if ctx.shutdown.sleep(ACCEPT_POLL) {
                    break;
                }
            }
        }
    }
    debug!("receive loop stopped");
}

/// Connect to a sender, read until it goes away, and reconnect.
pub(crate) fn connect_loop(
    endpoint: Endpoint,
    options: SocketOptions,
    retry_delay: Duration,
    ctx: ReceiveContext,
) {
    crate::status!(ctx.verbose, addr = %endpoint, "connecting");
    while !ctx.shutdown.is_triggered() {
        match connect(&endpoint, &options) {
            Ok(stream) => ctx.run_session(stream),
            Err(err) => {
                if !err.is_transient() {
                    debug!(addr = %endpoint, error = %err, "connect attempt failed");
                }
                if ctx.shutdown.sleep(retry_delay) {
                    break;
                }
            }
        }
    }
    debug!("receive loop stopped");
}

/// Reassemble length/payload datagram pairs until shutdown.
pub(crate) fn datagram_loop(socket: DatagramSocket, format: Format, ctx: ReceiveContext) {
    if let Err(err) = socket.set_read_timeout(Some(DATAGRAM_POLL)) {
        warn!(error = %err, "could not set datagram read timeout");
        return;
    }

    let codec = format.codec();
    let mut assembler =
        DatagramAssembler::new(ctx.frame_config.max_payload_size.min(MAX_DATAGRAM_PAYLOAD));
    let mut buf = vec![0u8; DATAGRAM_BUFFER];

    ctx.connected.set(true);
    crate::status!(ctx.verbose, addr = %socket.local_addr(), %format, "receiving datagrams");
    while !ctx.shutdown.is_triggered() {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => match assembler.push(&buf[..len]) {
                Ok(Some(payload)) => ctx.publish(codec, payload),
                Ok(None) => {}
                Err(err) => debug!(%from, error = %err, "dropping datagram"),
            },
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!(error = %err, "datagram receive failed");
                if ctx.shutdown.sleep(ACCEPT_POLL) {
                    break;
                }
            }
        }
    }
    ctx.connected.set(false);
    debug!("datagram loop stopped");
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::{TcpListener, UdpSocket};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use datasocket_frame::{frame_bytes, length_datagram};
    use serde_json::json;

    use super::*;
    use crate::worker::Worker;

    fn context(format: Option<Format>) -> ReceiveContext {
        ReceiveContext {
            slot: Arc::new(LatestValue::new()),
            shutdown: Arc::new(Shutdown::new()),
            negotiator: Arc::new(FormatNegotiator::new(format)),
            active: Arc::new(ActiveStream::default()),
            connected: Arc::new(Flag::new(false)),
            frame_config: FrameConfig::default(),
            handshake: format != Some(Format::Raw),
            unframed: false,
            receive_buffer_size: 1024,
            verbose: false,
        }
    }

    /// Run one session on the accepted end of a loopback pair.
    fn session(ctx: &ReceiveContext) -> (TcpStream, Worker) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let sender = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (stream, _) = listener.accept().expect("accept");
        let ctx = ctx.clone();
        let worker = Worker::spawn("test", "receive", move || ctx.run_session(stream))
            .expect("worker should spawn");
        (sender, worker)
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[test]
    fn framed_session_publishes_values() {
        let ctx = context(None);
        let (mut sender, worker) = session(&ctx);

        sender.write_all(&Format::Text.tag().to_le_bytes()).expect("tag");
        sender.write_all(&frame_bytes(b"[1,2,3]").expect("frame")).expect("frame");
        wait_for(|| ctx.slot.latest().is_some());

        assert_eq!(ctx.negotiator.current(), Some(Format::Text));
        assert!(ctx.connected.get());
        assert_eq!(ctx.slot.latest(), Some(Payload::Text(json!([1, 2, 3]))));

        drop(sender);
        assert!(worker.join_until(deadline()));
        assert!(!ctx.connected.get());
    }

    #[test]
    fn undecodable_frame_is_skipped() {
        let ctx = context(Some(Format::Text));
        let (mut sender, worker) = session(&ctx);

        sender.write_all(&Format::Text.tag().to_le_bytes()).expect("tag");
        sender.write_all(&frame_bytes(b"{not json").expect("frame")).expect("frame");
        sender.write_all(&frame_bytes(b"\"ok\"").expect("frame")).expect("frame");
        wait_for(|| ctx.slot.latest().is_some());
        assert_eq!(ctx.slot.latest(), Some(Payload::Text(json!("ok"))));

        drop(sender);
        assert!(worker.join_until(deadline()));
    }

    #[test]
    fn mismatched_format_drops_the_connection() {
        let ctx = context(Some(Format::Array));
        let (mut sender, worker) = session(&ctx);

        sender.write_all(&Format::Text.tag().to_le_bytes()).expect("tag");
        assert!(worker.join_until(deadline()), "session ends on its own");
        assert!(ctx.slot.latest().is_none());
        assert!(!ctx.connected.get());
    }

    #[test]
    fn length_prefixed_raw_skips_the_handshake() {
        let ctx = context(Some(Format::Raw));
        let (mut sender, worker) = session(&ctx);

        sender.write_all(&frame_bytes(&[9, 8, 7]).expect("frame")).expect("frame");
        wait_for(|| ctx.slot.latest().is_some());
        assert_eq!(ctx.slot.latest(), Some(Payload::Raw(Bytes::from_static(&[9, 8, 7]))));

        drop(sender);
        assert!(worker.join_until(deadline()));
    }

    #[test]
    fn unframed_raw_reads_drained_messages() {
        let ctx = ReceiveContext {
            unframed: true,
            ..context(Some(Format::Raw))
        };
        let (mut sender, worker) = session(&ctx);

        sender.write_all(b"hello").expect("write");
        wait_for(|| ctx.slot.latest().is_some());
        assert_eq!(ctx.slot.latest(), Some(Payload::Raw(Bytes::from_static(b"hello"))));

        drop(sender);
        assert!(worker.join_until(deadline()));
    }

    #[test]
    fn closing_the_active_stream_unblocks_the_reader() {
        let ctx = context(None);
        let (_sender, worker) = session(&ctx);
        wait_for(|| ctx.connected.get());

        ctx.shutdown.trigger();
        ctx.active.close();
        assert!(worker.join_until(deadline()));
    }

    #[test]
    fn install_after_close_is_refused() {
        let active = ActiveStream::default();
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);

        active.close();
        assert!(!active.install(Closer::new(move || flag.store(true, Ordering::SeqCst))));
        assert!(closed.load(Ordering::SeqCst), "refused stream is closed");

        active.reopen();
        assert!(active.install(Closer::new(|| {})));
    }

    #[test]
    fn datagram_pairs_are_reassembled() {
        let ctx = context(Some(Format::Text));
        let socket = DatagramSocket::bind(
            &Endpoint::resolve("127.0.0.1", 0).expect("endpoint"),
            SocketOptions::default(),
        )
        .expect("bind");
        let target = socket.local_addr();
        let worker = {
            let ctx = ctx.clone();
            Worker::spawn("test", "receive", move || datagram_loop(socket, Format::Text, ctx))
                .expect("worker should spawn")
        };
        wait_for(|| ctx.connected.get());

        let sender = UdpSocket::bind(("127.0.0.1", 0)).expect("bind sender");
        let payload = b"{\"x\":1}";
        sender.send_to(b"stray", target).expect("send stray");
        sender.send_to(&length_datagram(payload.len()).expect("header"), target).expect("send header");
        sender.send_to(payload, target).expect("send payload");
        wait_for(|| ctx.slot.latest().is_some());
        assert_eq!(ctx.slot.latest(), Some(Payload::Text(json!({"x": 1}))));

        ctx.shutdown.trigger();
        assert!(worker.join_until(deadline()));
        assert!(!ctx.connected.get());
    }

    #[test]
    fn empty_datagram_payloads_are_handled() {
        let bind = || {
            DatagramSocket::bind(
                &Endpoint::resolve("127.0.0.1", 0).expect("endpoint"),
                SocketOptions::default(),
            )
            .expect("bind")
        };
        let sender = UdpSocket::bind(("127.0.0.1", 0)).expect("bind sender");
        let empty_header = length_datagram(0).expect("header");

        // RAW: an empty value is a value.
        let raw = context(Some(Format::Raw));
        let socket = bind();
        let target = socket.local_addr();
        let worker = {
            let ctx = raw.clone();
            Worker::spawn("test", "receive", move || datagram_loop(socket, Format::Raw, ctx))
                .expect("worker should spawn")
        };
        wait_for(|| raw.connected.get());
        sender.send_to(&empty_header, target).expect("send header");
        sender.send_to(b"", target).expect("send empty payload");
        wait_for(|| raw.slot.latest().is_some());
        assert_eq!(raw.slot.latest(), Some(Payload::Raw(Bytes::new())));
        raw.shutdown.trigger();
        assert!(worker.join_until(deadline()));

        // TEXT: an empty document is skipped and the pair after it still lands.
        let text = context(Some(Format::Text));
        let socket = bind();
        let target = socket.local_addr();
        let worker = {
            let ctx = text.clone();
            Worker::spawn("test", "receive", move || datagram_loop(socket, Format::Text, ctx))
                .expect("worker should spawn")
        };
        wait_for(|| text.connected.get());
        sender.send_to(&empty_header, target).expect("send header");
        sender.send_to(b"", target).expect("send empty payload");
        sender.send_to(&length_datagram(1).expect("header"), target).expect("send header");
        sender.send_to(b"7", target).expect("send payload");
        wait_for(|| text.slot.latest().is_some());
        assert_eq!(text.slot.latest(), Some(Payload::Text(json!(7))));
        text.shutdown.trigger();
        assert!(worker.join_until(deadline()));
    }
}
