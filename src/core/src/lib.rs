pub mod configuration;
pub use configuration::Config;

pub mod controller;
pub use controller::{Controller, ControllerState};

pub mod data_capture;
pub use data_capture::{CaptureRecord, CredentialSink, RecordSink};

pub mod error_handling;

pub mod network;

pub mod protocols;

pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
