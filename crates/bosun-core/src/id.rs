//! Strongly-typed identifiers for bosun entities.
//!
//! All identifiers in bosun are:
//! - **Strongly typed**: prevents mixing up different ID types at compile time
//! - **Opaque where the broker owns them**: offer, agent, and framework ids
//!   are broker-assigned strings we never interpret
//! - **Structured where we own them**: task ids embed the instance UUID and
//!   incarnation so a broker status update can always be routed back
//!
//! # Example
//!
//! ```rust
//! use bosun_core::id::{InstanceId, TaskId};
//!
//! let instance = InstanceId::generate();
//! let task = TaskId::new(instance, 1);
//!
//! let parsed: TaskId = task.to_string().parse().unwrap();
//! assert_eq!(parsed.instance_id(), instance);
//! assert_eq!(parsed.incarnation(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a task instance.
///
/// Instances are the unit of scheduling: one instance corresponds to one
/// logical long-running task slot, surviving across broker task incarnations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generates a new unique instance ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an instance ID from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid instance ID '{s}': {e}"),
        })
    }
}

/// A broker task identifier.
///
/// Encodes the instance UUID and the incarnation as `{uuid}.{incarnation}`,
/// so every broker status update can be routed back to its instance without
/// a lookup table. The incarnation disambiguates successive broker tasks for
/// the same logical instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    instance_id: InstanceId,
    incarnation: u64,
}

impl TaskId {
    /// Creates a task ID for the given instance and incarnation.
    #[must_use]
    pub const fn new(instance_id: InstanceId, incarnation: u64) -> Self {
        Self {
            instance_id,
            incarnation,
        }
    }

    /// Returns the instance this task belongs to.
    #[must_use]
    pub const fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Returns the incarnation encoded in this task ID.
    #[must_use]
    pub const fn incarnation(&self) -> u64 {
        self.incarnation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance_id, self.incarnation)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::MalformedTaskId {
            task_id: s.to_string(),
        };

        let (uuid_part, incarnation_part) = s.rsplit_once('.').ok_or_else(malformed)?;
        let instance_id = InstanceId::from_str(uuid_part).map_err(|_| malformed())?;
        let incarnation = incarnation_part.parse::<u64>().map_err(|_| malformed())?;
        if incarnation == 0 {
            return Err(malformed());
        }

        Ok(Self {
            instance_id,
            incarnation,
        })
    }
}

impl Serialize for TaskId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

macro_rules! opaque_string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

opaque_string_id! {
    /// A broker-assigned resource offer identifier.
    OfferId
}

opaque_string_id! {
    /// A broker-assigned agent (node) identifier.
    AgentId
}

opaque_string_id! {
    /// The framework identifier assigned by the broker on first registration.
    FrameworkId
}

opaque_string_id! {
    /// An opaque request identifier chosen by a command submitter.
    ///
    /// The core never interprets it; it is echoed back on the matching
    /// acceptance or failure so callers can correlate across reconnects.
    RequestId
}

impl RequestId {
    /// Generates a fresh sortable request ID for internally-originated
    /// commands (reconciler reservations, tracker transitions).
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }
}
