//! Storage subsystem
//!
//! Destinations for captured records. Every destination implements the `OutputWriter` trait
//! and is driven by the record sink's consumer task.
//!
//! Components:
//! - `storage_trait`: the OutputWriter trait defining a uniform API.
//! - `console`: JSON lines on standard output, always registered.
//! - `file_storage`: JSON lines appended to a file.
//! - `webhook`: chat-style webhook delivery with `reqwest`.
//! - `syslog`: RFC 5424 datagrams to a remote collector.
//! - `outputs`: parsing of output targets and writer construction.

pub mod console;
pub mod file_storage;
pub mod outputs;
pub mod storage_trait;
pub mod syslog;
pub mod webhook;

pub use outputs::{build_writers, parse_outputs, OutputTarget};
pub use storage_trait::OutputWriter;
