//! Soloist - single-instance coordination for desktop applications
//!
//! Concurrently launched copies of the same application find each other
//! through a named shared-memory segment, agree on which one survives, and
//! hand off over a local socket.
//!
//! # Core Concepts
//!
//! - **Segment lock as the arbiter**: the process holding an exclusive lock on
//!   the segment named after the [`CoordinationKey`] is the owner. The kernel
//!   drops the lock when the owner dies, so there is no stale-lock cleanup.
//! - **Owner endpoint**: the owner answers `version` and `quit` on a Unix
//!   Domain Socket named after the same key.
//! - **Resolution schemes**: a challenger either always takes over
//!   ([`ResolutionScheme::ThisInstanceWins`]) or only when it is newer
//!   ([`ResolutionScheme::HighestVersionWins`]).
//! - **Safe degradation**: every coordination failure ends in
//!   [`Resolution::Unenforced`], never a crash.
//!
//! The protocol is unauthenticated. Anyone who can open the socket can evict
//! the owner, so the socket and segment are created user-private (`0600`).
//!
//! # Modules
//!
//! - [`coordinator`] - [`InstanceCoordinator`], the per-process state machine driver
//! - [`segment`] - ownership claim over the shared-memory segment
//! - [`ipc`] - owner listener, challenger client and wire protocol
//! - [`state`] - coordinator states and exit signalling
//! - [`version`] - comparable build versions
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ipc;
pub mod key;
pub mod segment;
pub mod state;
pub mod version;

pub use config::{Config, CoordinationConfig};
pub use coordinator::{InstanceCoordinator, Resolution};
pub use error::CoordinationError;
pub use ipc::{ChallengeOutcome, OwnerClient, ResolutionScheme};
pub use key::CoordinationKey;
pub use segment::{ClaimOutcome, OwnershipToken, segment_exists, try_claim_ownership};
pub use state::{CoordinatorState, ExitReason};
pub use version::{VERSION, Version};
