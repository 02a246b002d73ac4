//! In-memory writers and sinks shared by the unit and integration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::data_capture::{CaptureRecord, CredentialSink};
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::OutputWriter;

#[derive(Clone)]
pub struct MemoryWriter {
    name: String,
    records: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
    cleanups: Arc<Mutex<Vec<String>>>,
}

impl MemoryWriter {
    pub fn new(name: &str) -> Self {
        Self::with_cleanup_log(name, Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_cleanup_log(name: &str, cleanups: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            records: Arc::new(Mutex::new(Vec::new())),
            cleanups,
        }
    }

    pub fn records(&self) -> Vec<BTreeMap<String, String>> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutputWriter for MemoryWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.cleanups.lock().unwrap().push(self.name.clone());
    }
}

pub struct FailingWriter;

#[async_trait]
impl OutputWriter for FailingWriter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn write(&mut self, _record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        Err(StorageError::WriteFailed("always fails".to_string()))
    }
}

/// Writer that takes one semaphore permit per record, so tests decide when it makes progress.
#[derive(Clone)]
pub struct GatedWriter {
    gate: Arc<Semaphore>,
    written: Arc<Mutex<usize>>,
}

impl GatedWriter {
    pub fn new() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: gate.clone(),
                written: Arc::new(Mutex::new(0)),
            },
            gate,
        )
    }

    pub fn written(&self) -> usize {
        *self.written.lock().unwrap()
    }
}

#[async_trait]
impl OutputWriter for GatedWriter {
    fn name(&self) -> &str {
        "gated"
    }

    async fn write(&mut self, _record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        *self.written.lock().unwrap() += 1;
        Ok(())
    }
}

/// Collects submitted records directly, bypassing the queue.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<CaptureRecord>>,
    notify: Notify,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<CaptureRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Waits until at least `count` records arrived, or panics after two seconds.
    pub async fn wait_for(&self, count: usize) -> Vec<CaptureRecord> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let notified = self.notify.notified();
            let records = self.records();
            if records.len() >= count {
                return records;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!("expected {} records, got {}", count, self.records().len());
            }
        }
    }
}

#[async_trait]
impl CredentialSink for MemorySink {
    async fn submit(&self, record: CaptureRecord) {
        self.records.lock().unwrap().push(record);
        self.notify.notify_waiters();
    }
}
