//! Observability infrastructure for bosun.
//!
//! One process-wide logging install plus span constructors for the
//! scheduler's two hot paths (authority reduction, offer reconciliation).

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Newline-delimited JSON with event fields flattened, for log
    /// shippers.
    Json,
    /// Compact single-line text for terminals.
    #[default]
    Text,
}

/// Logging bootstrap options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive applied to the subscriber, e.g.
    /// `info,bosun_authority=debug`.
    pub directive: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            directive: "info".to_string(),
        }
    }
}

impl LogOptions {
    /// Reads options from the process environment.
    ///
    /// `BOSUN_LOG_FORMAT=json` selects JSON output; anything else (or
    /// unset) selects text. The filter directive comes from `BOSUN_LOG`,
    /// falling back to `RUST_LOG`, falling back to `info`.
    #[must_use]
    pub fn from_env() -> Self {
        let format = match std::env::var("BOSUN_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let directive = std::env::var("BOSUN_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        Self { format, directive }
    }
}

/// Installs the global logging subscriber.
///
/// Returns `true` when this call performed the install, `false` when a
/// subscriber was already installed (the options are then ignored). A bad
/// filter directive degrades to `info` rather than failing startup.
pub fn init_logging(options: &LogOptions) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let filter = EnvFilter::try_new(&options.directive)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match options.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().flatten_event(true))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_target(false))
                .init();
        }
    }
    true
}

/// Creates a span for state-authority operations.
///
/// # Example
///
/// ```rust
/// use bosun_core::observability::authority_span;
///
/// let span = authority_span("apply_command", "put-run-spec");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn authority_span(operation: &str, subject: &str) -> Span {
    tracing::info_span!("authority", op = operation, subject = subject)
}

/// Creates a span for offer reconciliation with the offer and agent ids.
#[must_use]
pub fn reconcile_span(offer_id: &str, agent_id: &str) -> Span {
    tracing::info_span!("reconcile", offer = offer_id, agent = agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_install_wins() {
        let first = init_logging(&LogOptions::default());
        let second = init_logging(&LogOptions {
            format: LogFormat::Json,
            directive: "debug".to_string(),
        });
        // Exactly one call installs; repeat calls are rejected.
        assert!(!second || first);
        assert!(!init_logging(&LogOptions::default()));
    }

    #[test]
    fn default_options_are_text_at_info() {
        let options = LogOptions::default();
        assert_eq!(options.format, LogFormat::Text);
        assert_eq!(options.directive, "info");
    }

    #[test]
    fn spans_carry_fields() {
        let span = authority_span("apply_command", "put-run-spec");
        assert!(!span.is_disabled() || span.is_none());
    }
}
