//! Classroom Coordinator Library
//!
//! Client-side coordination core for a live video classroom. One
//! [`coordinator::MeetingCoordinator`] runs per participant and:
//!
//! - Owns the roster of participant records for one class session
//! - Reacts to Command / Notify events on a shared in-process bus
//! - Serializes structural roster changes under a single async mutex
//! - Drives active-speaker detection and the background music mixer
//!
//! # Architecture
//!
//! ```text
//! EventBus (shared, synchronous fan-out)
//! └── MeetingCoordinator (one per participant)
//!     ├── RolePolicy (Instructor | Participant, chosen at start)
//!     ├── Roster (tokio Mutex) ──> watch<RosterSnapshot> for UI bindings
//!     ├── speaker poller task
//!     ├── layout debouncer task
//!     └── MusicMixer
//! ```
//!
//! Everything outside the core (media transport, directory, session API,
//! navigation, telemetry) is reached through the traits in [`providers`].
//!
//! # Modules
//!
//! - [`coordinator`] - The per-session state machine
//! - [`events`] - Event model and bus
//! - [`policy`] - Instructor / participant behavior
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types with error codes

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod layout;
pub mod music;
pub mod observability;
pub mod policy;
pub mod providers;
pub mod roster;
pub mod speaker;
pub mod video;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
