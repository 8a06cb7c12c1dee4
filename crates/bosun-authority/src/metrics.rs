//! Observability metrics for the state authority.
//!
//! Exported via the `metrics` crate facade; wiring an exporter is the
//! embedding process's concern.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `bosun_commands_total` | Counter | `command`, `result` | Commands by outcome |
//! | `bosun_effects_total` | Counter | `effect` | Effects emitted by kind |
//! | `bosun_reduce_duration_seconds` | Histogram | - | Reducer latency |
//! | `bosun_offers_total` | Counter | `outcome` | Offers by accept/decline |
//! | `bosun_instances` | Gauge | `condition` | Instances by condition |

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: commands by outcome.
    pub const COMMANDS_TOTAL: &str = "bosun_commands_total";
    /// Counter: effects emitted by kind.
    pub const EFFECTS_TOTAL: &str = "bosun_effects_total";
    /// Histogram: reducer latency in seconds.
    pub const REDUCE_DURATION_SECONDS: &str = "bosun_reduce_duration_seconds";
    /// Counter: offers by outcome.
    pub const OFFERS_TOTAL: &str = "bosun_offers_total";
    /// Gauge: instances by condition.
    pub const INSTANCES: &str = "bosun_instances";
}

/// Label keys used across metrics.
pub mod labels {
    /// Command name (`put_run_spec`, `add_instance`, ...).
    pub const COMMAND: &str = "command";
    /// Command result (`accepted`, `rejected`).
    pub const RESULT: &str = "result";
    /// Effect kind (`launch_task`, `persist`, ...).
    pub const EFFECT: &str = "effect";
    /// Offer outcome (`accepted`, `declined`).
    pub const OUTCOME: &str = "outcome";
    /// Instance condition.
    pub const CONDITION: &str = "condition";
}

/// High-level interface for recording authority metrics.
///
/// Cheap to clone; calls are no-ops when no recorder is installed.
#[derive(Debug, Clone, Default)]
pub struct AuthorityMetrics {
    _private: (),
}

impl AuthorityMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a command outcome.
    pub fn record_command(&self, command: &str, result: &str) {
        counter!(
            names::COMMANDS_TOTAL,
            labels::COMMAND => command.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records one emitted effect.
    pub fn record_effect(&self, effect: &str) {
        counter!(
            names::EFFECTS_TOTAL,
            labels::EFFECT => effect.to_string(),
        )
        .increment(1);
    }

    /// Records the reducer latency for one event.
    pub fn observe_reduce_duration(&self, duration: Duration) {
        histogram!(names::REDUCE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records an offer outcome.
    pub fn record_offer(&self, outcome: &str) {
        counter!(
            names::OFFERS_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Sets the instance count gauge for one condition.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_instances(&self, condition: &str, count: usize) {
        gauge!(
            names::INSTANCES,
            labels::CONDITION => condition.to_string(),
        )
        .set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_does_not_panic() {
        let metrics = AuthorityMetrics::new();
        metrics.record_command("put_run_spec", "accepted");
        metrics.record_effect("persist");
        metrics.observe_reduce_duration(Duration::from_micros(120));
        metrics.record_offer("declined");
        metrics.set_instances("running", 3);
    }
}
