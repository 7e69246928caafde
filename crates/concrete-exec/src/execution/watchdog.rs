//! Timeout watchdog for running invocations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, warn};

/// Called when interrupted code has not unwound within the grace period
pub type UnresponsiveHook = fn();

/// Timer racing one invocation.
///
/// When the timeout elapses before [`Watchdog::disarm`], the interrupt flag
/// is raised; running code unwinds at its next instruction. If it is still
/// running after the grace period the hook runs; the worker binary installs
/// one that terminates the process.
#[derive(Debug)]
pub struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<bool>>,
}

impl Watchdog {
    /// Start the timer
    #[must_use]
    pub fn arm(
        flag: Arc<AtomicBool>,
        timeout: Duration,
        grace: Duration,
        on_unresponsive: Option<UnresponsiveHook>,
    ) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("concrete-watchdog".to_string())
            .spawn(move || {
                if !matches!(cancelled.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                    return false;
                }
                warn!(timeout_ms = timeout.as_millis() as u64, "invocation timed out, interrupting");
                flag.store(true, Ordering::Relaxed);
                if matches!(cancelled.recv_timeout(grace), Err(RecvTimeoutError::Timeout)) {
                    error!(grace_ms = grace.as_millis() as u64, "interrupted code did not unwind");
                    if let Some(hook) = on_unresponsive {
                        hook();
                    }
                }
                true
            });
        match handle {
            Ok(handle) => Self {
                cancel: Some(cancel),
                handle: Some(handle),
            },
            Err(err) => {
                error!(error = %err, "failed to start watchdog thread, running without timeout");
                Self {
                    cancel: None,
                    handle: None,
                }
            }
        }
    }

    /// Stop the timer; returns whether it fired
    pub fn disarm(mut self) -> bool {
        self.cancel.take();
        self.handle
            .take()
            .is_some_and(|handle| handle.join().unwrap_or(true))
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.take();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_disarm_before_timeout() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(Arc::clone(&flag), Duration::from_secs(5), Duration::ZERO, None);
        let started = Instant::now();
        assert!(!watchdog.disarm());
        assert!(!flag.load(Ordering::Relaxed));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_fires_after_timeout() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(
            Arc::clone(&flag),
            Duration::from_millis(20),
            Duration::from_secs(5),
            None,
        );
        while !flag.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(watchdog.disarm());
    }
}
