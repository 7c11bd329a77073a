//! Sessions and presence

pub mod presence;
pub mod registry;

pub use presence::PresenceTracker;
pub use registry::{Registration, Session, SessionRegistry};
