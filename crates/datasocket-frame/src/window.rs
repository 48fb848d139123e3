use std::io::{ErrorKind, Read};
use std::net::TcpStream;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::DEFAULT_MAX_PAYLOAD;
use crate::error::{FrameError, Result};

/// Default read window for unframed streams: 64 KiB.
pub const DEFAULT_WINDOW_CAPACITY: usize = 64 * 1024;

/// Streams whose blocking mode can be switched at runtime.
pub trait SetNonblocking {
    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()>;
}

impl SetNonblocking for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }
}

/// Reads unframed messages by draining the socket.
///
/// There is no length prefix on the wire, so a message ends when a read
/// would block: the reader waits (blocking) for the first bytes, then keeps
/// reading window-sized chunks in non-blocking mode while the OS has data
/// buffered, and returns everything gathered once the socket is empty.
///
/// This only recovers the sender's boundaries when the gap between two
/// sends is longer than the time it takes to drain one message. Back-to-back
/// sends can merge into one message and a slow sender can be split into two.
pub struct WindowReader<T> {
    inner: T,
    window: Vec<u8>,
    max_message: usize,
}

impl<T: Read + SetNonblocking> WindowReader<T> {
    /// Create a reader with a `capacity`-byte read window.
    pub fn new(inner: T, capacity: usize) -> Self {
        Self::with_max_message(inner, capacity, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a reader that also cuts messages at `max_message` bytes.
    ///
    /// The window never exceeds `max_message`, so even the first read of a
    /// message stays within the limit.
    pub fn with_max_message(inner: T, capacity: usize, max_message: usize) -> Self {
        let max_message = max_message.max(1);
        Self {
            inner,
            window: vec![0u8; capacity.clamp(1, max_message)],
            max_message,
        }
    }

    /// Read the next message (blocks until at least one byte arrives).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the peer has closed
    /// and nothing is buffered.
    pub fn read_message(&mut self) -> Result<Bytes> {
        self.inner.set_nonblocking(false)?;

        let first = loop {
            match self.inner.read(&mut self.window) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        };

        let mut message = BytesMut::with_capacity(first);
        message.extend_from_slice(&self.window[..first]);

        self.inner.set_nonblocking(true)?;
        let drained = self.drain_into(&mut message);
        self.inner.set_nonblocking(false)?;
        drained?;

        trace!(len = message.len(), "raw window drained");
        Ok(message.freeze())
    }

    fn drain_into(&mut self, message: &mut BytesMut) -> Result<()> {
        while message.len() < self.max_message {
            let room = (self.max_message - message.len()).min(self.window.len());
            match self.inner.read(&mut self.window[..room]) {
                // Peer closed after sending; deliver what we have; the next
                // read reports the close.
                Ok(0) => break,
                Ok(n) => message.extend_from_slice(&self.window[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Size of the read window.
    pub fn capacity(&self) -> usize {
        self.window.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;

    /// Scripted stream: each entry is one read result; `None` means
    /// "would block" in non-blocking mode.
    struct Scripted {
        steps: VecDeque<Option<Vec<u8>>>,
        nonblocking: Cell<bool>,
    }

    impl Scripted {
        fn new(steps: Vec<Option<&[u8]>>) -> Self {
            Self {
                steps: steps.into_iter().map(|s| s.map(<[u8]>::to_vec)).collect(),
                nonblocking: Cell::new(false),
            }
        }
    }

    impl SetNonblocking for Scripted {
        fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
            self.nonblocking.set(nonblocking);
            Ok(())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(Some(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.steps.push_front(Some(bytes.split_off(n)));
                    }
                    Ok(n)
                }
                Some(None) => {
                    assert!(self.nonblocking.get(), "would-block step in blocking mode");
                    Err(std::io::Error::from(ErrorKind::WouldBlock))
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn message_ends_when_read_would_block() {
        let stream = Scripted::new(vec![
            Some(b"abc"),
            Some(b"def"),
            None,
            Some(b"next"),
            None,
        ]);
        let mut reader = WindowReader::new(stream, 16);

        assert_eq!(reader.read_message().unwrap().as_ref(), b"abcdef");
        assert_eq!(reader.read_message().unwrap().as_ref(), b"next");
        assert!(matches!(
            reader.read_message().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn small_window_accumulates_large_message() {
        let payload = vec![7u8; 100];
        let stream = Scripted::new(vec![Some(&payload), None]);
        let mut reader = WindowReader::new(stream, 8);

        assert_eq!(reader.read_message().unwrap().len(), 100);
        assert!(!reader.get_ref().nonblocking.get(), "blocking mode restored");
    }

    #[test]
    fn max_message_splits_accumulation() {
        let payload = vec![1u8; 30];
        let stream = Scripted::new(vec![Some(&payload), None]);
        let mut reader = WindowReader::with_max_message(stream, 8, 20);

        assert_eq!(reader.read_message().unwrap().len(), 20);
        assert_eq!(reader.read_message().unwrap().len(), 10);
    }

    #[test]
    fn window_larger_than_max_message_is_clamped() {
        let payload = vec![3u8; 1000];
        let stream = Scripted::new(vec![Some(&payload), None]);
        let mut reader = WindowReader::with_max_message(stream, 4096, 16);

        assert_eq!(reader.capacity(), 16);
        assert_eq!(reader.read_message().unwrap().len(), 16);
        assert_eq!(reader.read_message().unwrap().len(), 16);
    }

    #[test]
    fn first_read_over_tcp_respects_max_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let sender = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&[9u8; 1000]).unwrap();
            stream
        });

        let (stream, _) = listener.accept().unwrap();
        let _open = sender.join().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let mut reader = WindowReader::with_max_message(stream, 4096, 16);
        let mut total = 0;
        while total < 1000 {
            let message = reader.read_message().unwrap();
            assert!(message.len() <= 16, "message of {} bytes", message.len());
            total += message.len();
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn close_after_data_delivers_then_reports_closed() {
        let stream = Scripted::new(vec![Some(b"last words")]);
        let mut reader = WindowReader::new(stream, 64);

        assert_eq!(reader.read_message().unwrap().as_ref(), b"last words");
        assert!(matches!(
            reader.read_message().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn separated_sends_over_tcp_are_separate_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = std::sync::mpsc::channel::<()>();

        let sender = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&[1, 2, 3, 4]).unwrap();
            rx.recv().unwrap();
            stream.write_all(&[5, 6]).unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        let mut reader = WindowReader::new(stream, DEFAULT_WINDOW_CAPACITY);
        assert_eq!(reader.read_message().unwrap().as_ref(), &[1, 2, 3, 4]);
        tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(reader.read_message().unwrap().as_ref(), &[5, 6]);
        sender.join().unwrap();
    }
}
