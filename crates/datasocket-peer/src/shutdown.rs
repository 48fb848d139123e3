use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A boolean guarded by a mutex, with waiters woken on every change.
#[derive(Debug, Default)]
pub struct Flag {
    state: Mutex<bool>,
    changed: Condvar,
}

impl Flag {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` and wake every waiter. Returns the previous value.
    pub fn set(&self, value: bool) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *state, value);
        self.changed.notify_all();
        previous
    }

    /// Block until the flag equals `target` or `timeout` elapses.
    ///
    /// Returns true when the flag reached `target`.
    pub fn wait_for(&self, target: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state != target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Cooperative stop signal shared by a socket and its background loops.
///
/// Loops never sleep directly: every pause goes through
/// [`Shutdown::sleep`], which returns early once the signal fires.
#[derive(Debug, Default)]
pub struct Shutdown {
    flag: Flag,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every loop to stop.
    pub fn trigger(&self) {
        self.flag.set(true);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.get()
    }

    /// Wait up to `duration`. Returns true if shutdown was triggered.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.flag.wait_for(true, duration)
    }

    /// Arm the signal again so the socket can be restarted.
    pub fn reset(&self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn sleep_runs_full_duration_when_idle() {
        let shutdown = Shutdown::new();
        let started = Instant::now();
        assert!(!shutdown.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_wakes_sleeper() {
        let shutdown = Arc::new(Shutdown::new());
        let sleeper = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                let started = Instant::now();
                let stopped = shutdown.sleep(Duration::from_secs(10));
                (stopped, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        let (stopped, elapsed) = sleeper.join().expect("sleeper should finish");
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn reset_rearms() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(shutdown.sleep(Duration::from_secs(10)));

        shutdown.reset();
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn flag_wait_for_false() {
        let flag = Flag::new(true);
        assert!(!flag.wait_for(false, Duration::from_millis(5)));
        assert!(flag.set(false));
        assert!(flag.wait_for(false, Duration::ZERO));
    }
}
