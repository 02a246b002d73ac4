//! Listener plumbing shared by every capture module.

pub mod listener;
pub mod port_range;

pub use listener::{ListenerState, ListenerStatus};
pub use port_range::resolve_ports;
