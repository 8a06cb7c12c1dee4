//! Error types shared across bosun crates.

/// The result type used throughout bosun-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the shared types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed to parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// A task id did not encode an instance id and incarnation.
    #[error("malformed task id '{task_id}'")]
    MalformedTaskId {
        /// The offending task id string.
        task_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "not a uuid".into(),
        };
        assert!(err.to_string().contains("invalid identifier"));
    }

    #[test]
    fn malformed_task_id_display() {
        let err = Error::MalformedTaskId {
            task_id: "garbage".into(),
        };
        assert!(err.to_string().contains("garbage"));
    }
}
