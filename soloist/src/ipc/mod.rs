//! Local socket plumbing between challengers and the owner
//!
//! The owner serves a Unix Domain Socket named after the coordination key.
//! Challengers connect, exchange one or two newline-terminated commands, and
//! disconnect.

pub mod client;
pub mod listener;
pub mod protocol;

pub use client::{ChallengeOutcome, OwnerClient, OwnerConnection, ResolutionScheme};
pub use listener::{OwnerServer, ServerHandle};
pub use protocol::Command;
