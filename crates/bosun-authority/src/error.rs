//! Error types for the state-authority domain.
//!
//! These are *infrastructure* errors: the journal is unreachable, the
//! configuration is invalid, a channel closed underneath us. Validation
//! failures of user commands are not errors; they travel as
//! [`Rejection`](crate::protocol::Rejection) values inside
//! `CommandFailure` effects and never unwind the pipeline.

use bosun_core::InstanceId;

/// The result type used throughout bosun-authority.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in authority operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A journal append or replay failed.
    #[error("journal error: {message}")]
    Journal {
        /// Description of the journal failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The configuration was invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A broker driver call failed.
    #[error("broker error: {message}")]
    Broker {
        /// Description of the broker failure.
        message: String,
    },

    /// The pipeline's input or output channel closed unexpectedly.
    #[error("pipeline channel closed: {context}")]
    ChannelClosed {
        /// Which channel closed and during what operation.
        context: String,
    },

    /// A reducer postcondition failed: the snapshot produced by a reduction
    /// violates a state invariant. Always escalated to the crash strategy.
    #[error("snapshot invariant violated: {message}")]
    InvariantViolated {
        /// Which invariant broke and for which entity.
        message: String,
    },

    /// A status update referenced an instance the snapshot does not hold.
    #[error("unknown instance {instance_id}")]
    UnknownInstance {
        /// The unresolvable instance ID.
        instance_id: InstanceId,
    },

    /// An error from bosun-core.
    #[error("core error: {0}")]
    Core(#[from] bosun_core::Error),
}

impl Error {
    /// Creates a new journal error.
    #[must_use]
    pub fn journal(message: impl Into<String>) -> Self {
        Self::Journal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new journal error with a source.
    #[must_use]
    pub fn journal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Journal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new broker error.
    #[must_use]
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }

    /// Returns true if this error must terminate the process via the crash
    /// strategy rather than surface as a command failure.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::InvariantViolated { .. })
    }
}
