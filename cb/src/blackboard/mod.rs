//! Run coordinator
//!
//! One [`Blackboard`] per contextualization run. It records what every member
//! requires and provides, collects injected data and exit reports, and
//! releases a member's document only once every dependency is satisfied.
//!
//! The blackboard does no locking of its own. Every call must go through the
//! [`crate::session::Session`] that owns the run's lock.

mod core;
mod member;

pub use self::core::{Blackboard, ErrorExitPolicy, IdentityQuery};
