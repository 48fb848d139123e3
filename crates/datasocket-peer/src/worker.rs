use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{PeerError, Result};

/// A named background thread that can be joined with a deadline.
pub(crate) struct Worker {
    name: String,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Signals completion when the thread body returns or unwinds.
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

impl Worker {
    /// Spawn `body` on a thread named `datasocket-<role>-<task>`.
    pub(crate) fn spawn<F>(role: &str, task: &str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("datasocket-{role}-{task}");
        let (done_tx, done) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = DoneGuard(done_tx);
                body();
            })
            .map_err(|source| PeerError::Spawn {
                name: name.clone(),
                source,
            })?;
        debug!(thread = %name, "spawned worker");
        Ok(Self { name, handle, done })
    }

    /// Join the thread if it finishes before `deadline`; otherwise detach it.
    ///
    /// Returns true when the thread was joined.
    pub(crate) fn join_until(self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!(thread = %self.name, "worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread = %self.name, "worker did not stop before the join timeout; detaching");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn thread_is_named() {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::spawn("send", "loop", move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        })
        .expect("worker should spawn");
        assert!(worker.join_until(Instant::now() + Duration::from_secs(5)));
        assert_eq!(
            rx.recv().expect("name should be reported").as_deref(),
            Some("datasocket-send-loop")
        );
    }

    #[test]
    fn stuck_thread_is_detached_at_deadline() {
        let release = Arc::new(AtomicBool::new(false));
        let worker = {
            let release = Arc::clone(&release);
            Worker::spawn("test", "stuck", move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("worker should spawn")
        };

        let started = Instant::now();
        assert!(!worker.join_until(Instant::now() + Duration::from_millis(30)));
        assert!(started.elapsed() < Duration::from_secs(2));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn panicking_thread_still_joins() {
        let worker = Worker::spawn("test", "panic", || panic!("boom")).expect("worker should spawn");
        assert!(worker.join_until(Instant::now() + Duration::from_secs(5)));
    }
}
