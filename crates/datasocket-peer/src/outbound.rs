use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use datasocket_frame::{length_datagram, FrameConfig};
use datasocket_payload::{Format, Payload, PayloadCodec};
use datasocket_transport::{connect, DatagramSocket, Endpoint, SocketOptions, TcpServer};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::manager::{ConnectionManager, Delivery, PeerConnection, Wire};
use crate::shutdown::Shutdown;
use crate::slot::LatestValue;

/// Longest a loop blocks before re-checking the stop signal.
pub(crate) const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Pause between non-blocking accept attempts.
pub(crate) const ACCEPT_POLL: Duration = Duration::from_millis(1);

/// Where the send loop delivers encoded payloads.
pub(crate) trait Outbound: Send + Sync {
    /// Wait up to `timeout` until a message could be delivered.
    fn wait_ready(&self, timeout: Duration) -> bool;

    fn deliver(&self, encoded: Bytes) -> Result<Delivery>;
}

/// Every live stream peer of a [`ConnectionManager`].
pub(crate) struct StreamOutbound {
    pub(crate) manager: Arc<ConnectionManager<TcpStream>>,
    pub(crate) framed: bool,
}

impl Outbound for StreamOutbound {
    fn wait_ready(&self, timeout: Duration) -> bool {
        self.manager.wait_for_peer(timeout)
    }

    fn deliver(&self, encoded: Bytes) -> Result<Delivery> {
        let wire = if self.framed {
            Wire::framed(&encoded)?
        } else {
            Wire::Unframed(encoded)
        };
        Ok(self.manager.broadcast(&wire))
    }
}

/// A fixed UDP destination: one length datagram, then one payload datagram.
pub(crate) struct DatagramOutbound {
    pub(crate) socket: DatagramSocket,
    pub(crate) target: SocketAddr,
}

impl Outbound for DatagramOutbound {
    fn wait_ready(&self, _timeout: Duration) -> bool {
        true
    }

    fn deliver(&self, encoded: Bytes) -> Result<Delivery> {
        let header = length_datagram(encoded.len())?;
        self.socket.send_to(&header, self.target)?;
        self.socket.send_to(&encoded, self.target)?;
        Ok(Delivery {
            delivered: 1,
            failed: 0,
        })
    }
}

pub(crate) struct SendContext {
    pub(crate) outbound: Arc<dyn Outbound>,
    pub(crate) slot: Arc<LatestValue<Payload>>,
    pub(crate) shutdown: Arc<Shutdown>,
    pub(crate) codec: &'static dyn PayloadCodec,
    pub(crate) include_timestamp: bool,
    pub(crate) max_payload_size: usize,
}

/// Wait for a peer and a pending value, encode once, deliver to all.
///
/// A value that reached no peer goes back into the slot unless a newer one
/// replaced it in the meantime.
pub(crate) fn send_loop(ctx: SendContext) {
    while !ctx.shutdown.is_triggered() {
        if !ctx.outbound.wait_ready(IDLE_WAIT) {
            continue;
        }
        let Some(payload) = ctx.slot.wait_take(IDLE_WAIT) else {
            continue;
        };

        let timestamp = ctx.include_timestamp.then(SystemTime::now);
        let encoded = match ctx.codec.encode(&payload, timestamp) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(format = %ctx.codec.format(), error = %err, "dropping value that could not be encoded");
                continue;
            }
        };
        if encoded.len() > ctx.max_payload_size {
            warn!(
                len = encoded.len(),
                max = ctx.max_payload_size,
                "dropping encoded payload above max_payload_size"
            );
            continue;
        }

        let len = encoded.len();
        match ctx.outbound.deliver(encoded) {
            Ok(delivery) if delivery.delivered == 0 => {
                debug!(failed = delivery.failed, "no peer took the value; keeping it pending");
                ctx.slot.put_back(payload);
            }
            Ok(delivery) => {
                trace!(len, delivered = delivery.delivered, failed = delivery.failed, "sent value");
            }
            Err(err) => warn!(len, error = %err, "send failed"),
        }
    }
    debug!("send loop stopped");
}

/// What the accept and connect loops need to bring a stream into service.
#[derive(Clone)]
pub(crate) struct StreamContext {
    pub(crate) manager: Arc<ConnectionManager<TcpStream>>,
    pub(crate) shutdown: Arc<Shutdown>,
    pub(crate) handshake: Option<Format>,
    pub(crate) frame_config: FrameConfig,
    pub(crate) verbose: bool,
}

impl StreamContext {
    /// Send the format tag, then make the stream visible to broadcasts.
    fn attach(&self, stream: TcpStream) -> bool {
        let peer = match PeerConnection::new(self.manager.next_id(), stream, self.frame_config.clone()) {
            Ok(peer) => peer,
            Err(err) => {
                warn!(error = %err, "could not set up connection");
                return false;
            }
        };

        if let Some(format) = self.handshake {
            if let Err(err) = peer.send_format(format) {
                crate::status!(self.verbose, peer = peer.id(), error = %err, "handshake failed");
                peer.close();
                return false;
            }
            debug!(peer = peer.id(), %format, "sent format tag");
        }

        self.manager.register(peer).is_some()
    }
}

/// Accept peers until shutdown, pruning dead ones between polls.
pub(crate) fn accept_loop(server: TcpServer, ctx: StreamContext) {
    crate::status!(ctx.verbose, addr = %server.local_addr(), "waiting for receivers");
    while !ctx.shutdown.is_triggered() {
        match server.try_accept() {
            Ok(Some(stream)) => {
                ctx.attach(stream);
            }
            Ok(None) => {
                ctx.manager.prune();
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
    debug!("accept loop stopped");
}

/// Keep one outbound connection alive, reconnecting after it dies.
pub(crate) fn connect_loop(
    endpoint: Endpoint,
    options: SocketOptions,
    retry_delay: Duration,
    ctx: StreamContext,
) {
    crate::status!(ctx.verbose, addr = %endpoint, "connecting");
    while !ctx.shutdown.is_triggered() {
        if ctx.manager.live_count() > 0 {
            ctx.manager.wait_until_empty(IDLE_WAIT);
            continue;
        }
        match connect(&endpoint, &options) {
            Ok(stream) => {
                ctx.attach(stream);
            }
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
    debug!("connect loop stopped");
}
