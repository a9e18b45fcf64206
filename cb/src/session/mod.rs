//! Session facade
//!
//! A [`Session`] is the API members talk to. It owns the run's lock, the
//! injection-phase flags, and the security/lifetime attributes the host
//! manages, and delegates everything else to the run's blackboard.

mod facade;
mod lifecycle;

pub use facade::Session;
pub use lifecycle::{Bootstrap, SecurityContext};
