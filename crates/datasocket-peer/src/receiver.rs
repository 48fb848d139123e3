use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use datasocket_payload::{Format, Payload};
use datasocket_transport::{DatagramSocket, Endpoint, TcpServer};
use tracing::debug;

use crate::config::{Role, SocketConfig, Transport};
use crate::dispatch::{dispatch_loop, Handler};
use crate::error::{PeerError, Result};
use crate::handshake::FormatNegotiator;
use crate::inbound::{connect_loop, datagram_loop, serve_loop, ActiveStream, ReceiveContext};
use crate::shutdown::{Flag, Shutdown};
use crate::slot::LatestValue;
use crate::worker::Worker;

/// Keeps the latest value a sender delivered.
///
/// Reads run on a background thread. [`latest`](Self::latest) returns the
/// newest decoded value at any time; with a handler, a second thread calls
/// it once for every value that was still the newest when it woke up.
///
/// Without a configured format a TCP receiver adopts the format announced
/// by the first sender and rejects later senders that announce another.
pub struct ReceiveSocket {
    config: SocketConfig,
    endpoint: Endpoint,
    negotiator: Arc<FormatNegotiator>,
    slot: Arc<LatestValue<Payload>>,
    shutdown: Arc<Shutdown>,
    active: Arc<ActiveStream>,
    connected: Arc<Flag>,
    handler: Option<Handler>,
    running: Mutex<Option<Running>>,
}

struct Running {
    workers: Vec<Worker>,
    local_addr: Option<SocketAddr>,
}

impl ReceiveSocket {
    /// Validate `config` and resolve its address. Nothing is bound yet.
    pub fn new(config: SocketConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`new`](Self::new), calling `handler` with each received value.
    ///
    /// The handler runs on its own thread; a panic is logged and the next
    /// value is still delivered.
    pub fn with_handler<F>(config: SocketConfig, handler: F) -> Result<Self>
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        Self::build(config, Some(handler))
    }

    fn build(config: SocketConfig, handler: Option<Handler>) -> Result<Self> {
        config.validate()?;
        if config.transport == Transport::Udp && config.format.is_none() {
            return Err(PeerError::Config(
                "a UDP receive socket needs a format".to_string(),
            ));
        }
        let endpoint = config.endpoint()?;

        Ok(Self {
            endpoint,
            negotiator: Arc::new(FormatNegotiator::new(config.format)),
            slot: Arc::new(LatestValue::new()),
            shutdown: Arc::new(Shutdown::new()),
            active: Arc::new(ActiveStream::default()),
            connected: Arc::new(Flag::new(false)),
            handler,
            running: Mutex::new(None),
            config,
        })
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self) -> ReceiveContext {
        ReceiveContext {
            slot: Arc::clone(&self.slot),
            shutdown: Arc::clone(&self.shutdown),
            negotiator: Arc::clone(&self.negotiator),
            active: Arc::clone(&self.active),
            connected: Arc::clone(&self.connected),
            frame_config: self.config.frame_config(),
            handshake: self.config.format != Some(Format::Raw),
            unframed: self.config.is_unframed_raw(),
            receive_buffer_size: self.config.receive_buffer_size,
            verbose: self.config.verbose,
        }
    }

    /// Bind (server, UDP) or begin connecting (client) and start reading.
    ///
    /// Bind failures are returned here. A stopped socket can be started again.
    pub fn start(&self) -> Result<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(PeerError::AlreadyRunning);
        }

        self.shutdown.reset();
        self.slot.reopen();
        self.active.reopen();

        let role = self.config.role.to_string();
        let ctx = self.context();
        let mut workers = Vec::with_capacity(2);
        let mut local_addr = None;

        match (self.config.transport, self.config.role) {
            (Transport::Tcp, Role::Server) => {
                let server = TcpServer::bind(&self.endpoint, self.config.socket_options)?;
                local_addr = Some(server.local_addr());
                workers.push(Worker::spawn(&role, "receive", move || serve_loop(server, ctx))?);
            }
            (Transport::Tcp, Role::Client) => {
                let endpoint = self.endpoint.clone();
                let options = self.config.socket_options;
                let retry_delay = self.config.retry_delay;
                workers.push(Worker::spawn(&role, "receive", move || {
                    connect_loop(endpoint, options, retry_delay, ctx)
                })?);
            }
            (Transport::Udp, _) => {
                let format = self.config.format.ok_or_else(|| {
                    PeerError::Config("a UDP receive socket needs a format".to_string())
                })?;
                let socket = DatagramSocket::bind(&self.endpoint, self.config.socket_options)?;
                local_addr = Some(socket.local_addr());
                workers.push(Worker::spawn(&role, "receive", move || {
                    datagram_loop(socket, format, ctx)
                })?);
            }
        }

        if let Some(handler) = &self.handler {
            let handler = Arc::clone(handler);
            let slot = Arc::clone(&self.slot);
            let shutdown = Arc::clone(&self.shutdown);
            match Worker::spawn(&role, "dispatch", move || dispatch_loop(slot, handler, shutdown)) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    self.halt(workers);
                    return Err(err);
                }
            }
        }

        *running = Some(Running {
            workers,
            local_addr,
        });
        Ok(())
    }

    /// Stop reading, close the current connection and join the threads
    /// (bounded by the configured join timeout). Safe to call more than once.
    pub fn stop(&self) {
        let running = self.lock_running().take();
        if let Some(running) = running {
            self.halt(running.workers);
            crate::status!(self.config.verbose, "receive socket stopped");
        }
    }

    fn halt(&self, workers: Vec<Worker>) {
        self.shutdown.trigger();
        self.slot.close();
        self.active.close();

        let deadline = Instant::now() + self.config.join_timeout;
        for worker in workers {
            worker.join_until(deadline);
        }
        self.connected.set(false);
    }

    /// Most recent value received, if any. Reading does not consume it.
    pub fn latest(&self) -> Option<Payload> {
        self.slot.latest()
    }

    /// Format in effect: the configured one, or the one adopted from the
    /// first handshake.
    pub fn format(&self) -> Option<Format> {
        self.negotiator.current()
    }

    /// True while a sender is connected (TCP) or the socket is bound (UDP).
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Block until a sender is connected. Returns false on timeout.
    pub fn wait_until_connected(&self, timeout: Duration) -> bool {
        self.connected.wait_for(true, timeout)
    }

    /// Bound address while running; `None` for TCP clients.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().and_then(|running| running.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl Drop for ReceiveSocket {
    fn drop(&mut self) {
        if self.config.daemon {
            if self.is_running() {
                debug!("receive socket dropped in daemon mode; leaving workers running");
            }
            return;
        }
        self.stop();
    }
}
