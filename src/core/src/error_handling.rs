//! Error types shared by every subsystem of the capture engine.

pub mod types;
