//! Core types and error definitions for the Troupe workflow engine.
//!
//! This crate provides the foundational types shared across all Troupe crates:
//! the unified error type, agent specifications, lifecycle statuses and the
//! inter-agent message model.
//!
//! # Main types
//!
//! - [`TroupeError`]: Unified error enum for all Troupe subsystems.
//! - [`TroupeResult`]: Convenience alias for `Result<T, TroupeError>`.
//! - [`RoleId`]: Identifier of a configured agent role.
//! - [`AgentSpec`]: Immutable configuration of one agent.
//! - [`AgentStatus`] / [`OutputState`] / [`RunStatus`]: Lifecycle states.
//! - [`Message`]: A structured inter-agent message parsed from worker output.

/// Error taxonomy shared by every crate.
pub mod error;
/// Inter-agent message model.
pub mod message;
/// Agent specifications and role identifiers.
pub mod spec;
/// Agent, output and run statuses.
pub mod status;

pub use error::{TroupeError, TroupeResult};
pub use message::{FileRef, Message, MessageKind, Recipient, Severity};
pub use spec::{AgentSpec, RoleId};
pub use status::{AgentStatus, OutputState, RunStatus};
