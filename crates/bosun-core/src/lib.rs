//! # bosun-core
//!
//! Shared foundation for the bosun workload scheduler.
//!
//! This crate holds the pieces every other bosun crate needs:
//!
//! - **Typed identifiers**: newtype wrappers that make it impossible to hand
//!   an offer id where an instance id is expected
//! - **Error type**: parse and validation failures for the shared types
//! - **Observability**: logging initialization and span constructors
//!
//! Domain logic (state model, authority pipeline, reconciliation) lives in
//! `bosun-authority`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{AgentId, FrameworkId, InstanceId, OfferId, RequestId, TaskId};
