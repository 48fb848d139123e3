use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use datasocket_payload::{Format, Payload, PayloadCodec};
use datasocket_transport::{DatagramSocket, Endpoint, TcpServer};
use tracing::debug;

use crate::config::{Role, SocketConfig, Transport};
use crate::error::{PeerError, Result};
use crate::manager::ConnectionManager;
use crate::outbound::{
    accept_loop, connect_loop, send_loop, DatagramOutbound, Outbound, SendContext, StreamContext,
    StreamOutbound,
};
use crate::shutdown::Shutdown;
use crate::slot::LatestValue;
use crate::worker::Worker;

/// Publishes the latest value to every connected receiver.
///
/// [`send_data`](Self::send_data) only stores the value; a background loop
/// encodes it once and writes the same bytes to every live peer. Values
/// published faster than they can be sent are replaced, never queued.
///
/// ```no_run
/// use datasocket_payload::{Format, Payload};
/// use datasocket_peer::{SendSocket, SocketConfig};
///
/// let config = SocketConfig::builder().port(4001).format(Format::Text).build()?;
/// let socket = SendSocket::new(config)?;
/// socket.start()?;
/// socket.send_data(Payload::text(&[1, 2, 3])?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SendSocket {
    config: SocketConfig,
    endpoint: Endpoint,
    format: Format,
    codec: &'static dyn PayloadCodec,
    slot: Arc<LatestValue<Payload>>,
    shutdown: Arc<Shutdown>,
    manager: Arc<ConnectionManager<TcpStream>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    workers: Vec<Worker>,
    local_addr: Option<SocketAddr>,
}

impl SendSocket {
    /// Validate `config` and resolve its address. Nothing is bound yet.
    pub fn new(config: SocketConfig) -> Result<Self> {
        config.validate()?;
        let format = config
            .format
            .ok_or_else(|| PeerError::Config("a send socket needs a format".to_string()))?;
        let endpoint = config.endpoint()?;

        Ok(Self {
            endpoint,
            format,
            codec: format.codec(),
            slot: Arc::new(LatestValue::new()),
            shutdown: Arc::new(Shutdown::new()),
            manager: Arc::new(ConnectionManager::new(config.verbose)),
            running: Mutex::new(None),
            config,
        })
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind (server) or begin connecting (client) and start the send loop.
    ///
    /// Bind failures are returned here. A stopped socket can be started again.
    pub fn start(&self) -> Result<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(PeerError::AlreadyRunning);
        }

        self.shutdown.reset();
        self.slot.reopen();
        self.manager.reopen();

        let role = self.config.role.to_string();
        let mut workers = Vec::with_capacity(2);
        let mut local_addr = None;

        let outbound: Arc<dyn Outbound> = match self.config.transport {
            Transport::Tcp => {
                let ctx = StreamContext {
                    manager: Arc::clone(&self.manager),
                    shutdown: Arc::clone(&self.shutdown),
                    handshake: self.config.handshake_format(),
                    frame_config: self.config.frame_config(),
                    verbose: self.config.verbose,
                };
                match self.config.role {
                    Role::Server => {
                        let server = TcpServer::bind(&self.endpoint, self.config.socket_options)?;
                        local_addr = Some(server.local_addr());
                        workers.push(Worker::spawn(&role, "accept", move || {
                            accept_loop(server, ctx)
                        })?);
                    }
                    Role::Client => {
                        let endpoint = self.endpoint.clone();
                        let options = self.config.socket_options;
                        let retry_delay = self.config.retry_delay;
                        workers.push(Worker::spawn(&role, "connect", move || {
                            connect_loop(endpoint, options, retry_delay, ctx)
                        })?);
                    }
                }
                Arc::new(StreamOutbound {
                    manager: Arc::clone(&self.manager),
                    framed: !self.config.is_unframed_raw(),
                })
            }
            Transport::Udp => {
                let socket = DatagramSocket::for_destination(&self.endpoint, self.config.socket_options)?;
                local_addr = Some(socket.local_addr());
                crate::status!(self.config.verbose, addr = %self.endpoint, "sending datagrams");
                Arc::new(DatagramOutbound {
                    socket,
                    target: self.endpoint.addr(),
                })
            }
        };

        let ctx = SendContext {
            outbound,
            slot: Arc::clone(&self.slot),
            shutdown: Arc::clone(&self.shutdown),
            codec: self.codec,
            include_timestamp: self.config.include_timestamp,
            max_payload_size: self.config.max_payload_size,
        };
        match Worker::spawn(&role, "send", move || send_loop(ctx)) {
            Ok(worker) => workers.push(worker),
            Err(err) => {
                self.halt(workers);
                return Err(err);
            }
        }

        *running = Some(Running {
            workers,
            local_addr,
        });
        Ok(())
    }

    /// Publish a value. Never blocks on I/O; replaces any value that has
    /// not been sent yet.
    pub fn send_data(&self, payload: impl Into<Payload>) {
        if self.slot.publish(payload.into()) {
            debug!("unsent value replaced by a newer one");
        }
    }

    /// Stop all loops, close every peer and join the threads (bounded by
    /// the configured join timeout). Safe to call more than once.
    pub fn stop(&self) {
        let running = self.lock_running().take();
        if let Some(running) = running {
            self.halt(running.workers);
            crate::status!(self.config.verbose, format = %self.format, "send socket stopped");
        }
    }

    fn halt(&self, workers: Vec<Worker>) {
        self.shutdown.trigger();
        self.slot.close();
        self.manager.close_all();

        let deadline = Instant::now() + self.config.join_timeout;
        for worker in workers {
            worker.join_until(deadline);
        }
    }

    /// Number of live stream peers (always 0 for UDP).
    pub fn peer_count(&self) -> usize {
        self.manager.live_count()
    }

    /// Bound address while running: the listening address for TCP servers,
    /// the local sending port for UDP, `None` for TCP clients.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().and_then(|running| running.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl Drop for SendSocket {
    fn drop(&mut self) {
        if self.config.daemon {
            if self.is_running() {
                debug!("send socket dropped in daemon mode; leaving workers running");
            }
            return;
        }
        self.stop();
    }
}
