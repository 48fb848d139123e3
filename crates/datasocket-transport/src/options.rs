use std::time::Duration;

/// Construction-time socket options.
///
/// Applied explicitly by [`TcpServer::bind`](crate::TcpServer::bind),
/// [`connect`](crate::connect) and [`DatagramSocket`](crate::DatagramSocket);
/// nothing here is process-global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm on stream sockets. Default: true.
    pub nodelay: bool,
    /// Set `SO_REUSEADDR` before binding. Default: true.
    pub reuse_address: bool,
    /// Write timeout for stream sockets. A peer that stalls longer than this
    /// is treated as dead. Default: 1 s.
    pub write_timeout: Option<Duration>,
    /// Timeout for a single outbound connect attempt. Default: 250 ms.
    pub connect_timeout: Duration,
    /// Listen backlog for stream servers. Default: 128.
    pub listen_backlog: i32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            reuse_address: true,
            write_timeout: Some(Duration::from_secs(1)),
            connect_timeout: Duration::from_millis(250),
            listen_backlog: 128,
        }
    }
}

impl SocketOptions {
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_reuse_address(mut self, reuse_address: bool) -> Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }
}
