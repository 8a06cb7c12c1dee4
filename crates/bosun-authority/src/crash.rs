//! The crash strategy: last-resort process termination.
//!
//! Transient failures (journal hiccups, broker transport errors) surface as
//! command failures and retries; everything here is for the *terminal* tier:
//! invariant violations, journal corruption, or loss of framework
//! registration. Termination is asynchronous — a detached thread invokes the
//! platform exit after a short delay — so the shutdown path never deadlocks
//! with runtime teardown.

use std::sync::Arc;
use std::time::Duration;

/// Exit code for a graceful shutdown.
pub const EXIT_GRACEFUL: i32 = 0;

/// Exit code for invalid configuration, before any state is touched.
pub const EXIT_MISCONFIGURED: i32 = 1;

/// Exit code for a crash-strategy termination.
pub const EXIT_TERMINAL: i32 = 137;

/// Delay between deciding to die and invoking the exit primitive, giving
/// in-flight log lines a chance to flush.
const EXIT_DELAY: Duration = Duration::from_millis(250);

/// Invokes process termination for unrecoverable failures.
///
/// Cloneable so every supervised task can hold one. The exit primitive is
/// injectable for tests.
#[derive(Clone)]
pub struct CrashHandler {
    exit: Arc<dyn Fn(i32) + Send + Sync>,
}

impl std::fmt::Debug for CrashHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashHandler").finish_non_exhaustive()
    }
}

impl CrashHandler {
    /// The production handler: terminates the process with
    /// [`EXIT_TERMINAL`] from a detached thread.
    #[must_use]
    pub fn process() -> Self {
        Self {
            exit: Arc::new(|code| {
                std::thread::spawn(move || {
                    std::thread::sleep(EXIT_DELAY);
                    std::process::exit(code);
                });
            }),
        }
    }

    /// A handler invoking a custom exit primitive (tests record the code
    /// instead of dying).
    #[must_use]
    pub fn with_exit(exit: impl Fn(i32) + Send + Sync + 'static) -> Self {
        Self {
            exit: Arc::new(exit),
        }
    }

    /// Escalates an unrecoverable failure: logs it and triggers the
    /// asynchronous exit. Returns immediately; no synchronous cleanup runs
    /// on this path.
    pub fn terminal(&self, reason: &str) {
        tracing::error!(reason, "unrecoverable failure, terminating process");
        (self.exit)(EXIT_TERMINAL);
    }
}
