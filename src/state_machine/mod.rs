//! # Status State Machines
//!
//! Lifecycle states for flow starts and smart groups, and the events that move
//! them. Transitions are validated here so that every writer of a status
//! column goes through the same rules.

pub mod events;
pub mod states;

pub use events::{GroupEvent, StartEvent};
pub use states::{GroupStatus, StartStatus};
