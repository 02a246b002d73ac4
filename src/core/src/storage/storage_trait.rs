//! Output Writer Trait
//!
//! This module defines the `OutputWriter` trait, the contract every record destination
//! implements (console, JSON-lines file, webhook, syslog).
//!
//! Writers are owned by the record sink's single consumer task, which calls them one record at
//! a time in registration order. A writer error only affects the record being written.

use crate::error_handling::types::StorageError;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait OutputWriter: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Delivers one flattened record.
    async fn write(&mut self, record: &BTreeMap<String, String>) -> Result<(), StorageError>;

    /// Releases resources once the sink is drained. Called at most once.
    async fn cleanup(&mut self) {}
}
