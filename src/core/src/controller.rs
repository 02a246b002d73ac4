//! Listener supervision.
//!
//! The [`Controller`] validates the whole configuration up front, starts one listener per
//! resolved port of every enabled protocol, and tears everything down in order once the
//! termination future resolves.

pub mod controller_handler;


pub use controller_handler::{Controller, ControllerState};
