//! Termination-signal trapping.
//!
//! SIGINT and SIGTERM are recorded in a shared atomic instead of killing
//! the process. The supervisor polls it between service polls. The first
//! signal wins; later ones are ignored so the exit code reflects what
//! started the shutdown.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use tracing::debug;

/// Signals that request a shutdown.
pub const TRAPPED_SIGNALS: [libc::c_int; 2] = [SIGINT, SIGTERM];

fn record(slot: &AtomicUsize, value: usize) {
    // Only the first signal is kept
    let _ = slot.compare_exchange(0, value, Ordering::SeqCst, Ordering::SeqCst);
}

fn load(slot: &AtomicUsize) -> Option<i32> {
    match slot.load(Ordering::SeqCst) {
        0 => None,
        value => i32::try_from(value).ok(),
    }
}

/// Requests a shutdown from inside the process, as if a signal arrived.
#[derive(Debug, Clone)]
pub struct StopHandle {
    trapped: Arc<AtomicUsize>,
}

impl StopHandle {
    pub fn request_stop(&self, signal: i32) {
        if let Ok(value) = usize::try_from(signal) {
            if value > 0 {
                record(&self.trapped, value);
            }
        }
    }

    pub fn trapped(&self) -> Option<i32> {
        load(&self.trapped)
    }
}

/// Records the first termination signal delivered to the process.
///
/// Handlers are registered by [`SignalTrap::install`] and unregistered
/// when the trap is dropped.
pub struct SignalTrap {
    trapped: Arc<AtomicUsize>,
    registrations: Vec<SigId>,
}

impl SignalTrap {
    pub fn new() -> Self {
        Self {
            trapped: Arc::new(AtomicUsize::new(0)),
            registrations: Vec::new(),
        }
    }

    /// Registers the SIGINT and SIGTERM handlers. Idempotent.
    pub fn install(&mut self) -> io::Result<()> {
        if !self.registrations.is_empty() {
            return Ok(());
        }

        for signal in TRAPPED_SIGNALS {
            let slot = Arc::clone(&self.trapped);
            let value = usize::try_from(signal).unwrap_or(0);
            // SAFETY: the handler only performs a lock-free atomic
            // compare-exchange, which is async-signal-safe.
            let id = unsafe {
                signal_hook::low_level::register(signal, move || record(&slot, value))
            }?;
            self.registrations.push(id);
            debug!(signal, "Trapping signal");
        }
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        !self.registrations.is_empty()
    }

    /// The first signal received, if any.
    pub fn trapped(&self) -> Option<i32> {
        load(&self.trapped)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            trapped: Arc::clone(&self.trapped),
        }
    }
}

impl Default for SignalTrap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalTrap {
    fn drop(&mut self) {
        for id in self.registrations.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wins() {
        let trap = SignalTrap::new();
        assert_eq!(trap.trapped(), None);

        let handle = trap.stop_handle();
        handle.request_stop(SIGTERM);
        handle.request_stop(SIGINT);

        assert_eq!(trap.trapped(), Some(SIGTERM));
        assert_eq!(handle.trapped(), Some(SIGTERM));
    }

    #[test]
    fn test_non_positive_requests_ignored() {
        let trap = SignalTrap::new();
        let handle = trap.stop_handle();
        handle.request_stop(0);
        handle.request_stop(-1);
        assert_eq!(trap.trapped(), None);
    }

    #[test]
    fn test_install_is_idempotent() {
        let mut trap = SignalTrap::new();
        trap.install().unwrap();
        trap.install().unwrap();
        assert!(trap.is_installed());
        assert_eq!(trap.registrations.len(), TRAPPED_SIGNALS.len());
    }
}
