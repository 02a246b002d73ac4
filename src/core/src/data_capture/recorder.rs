//! Record fan-out from capture modules to output writers.
//!
//! This module provides [`RecordSink`], the single buffered pipeline shared by every capture
//! module. Modules only see it through the [`CredentialSink`] trait and push finished
//! [`CaptureRecord`]s into it; a single consumer task dequeues them in FIFO order and hands the
//! flattened record to each [`OutputWriter`] in registration order.
//!
//! Highlights
//! - Bounded queue: producers wait when it is full, nothing is dropped while the sink is open
//! - A failing writer is logged and skipped for that record only
//! - `close()` is idempotent and returns after everything queued before it was written
//! - `cleanup_writers()` runs each writer's cleanup once, in registration order
//!
//! Minimal usage
//! ```no_run
//! use leurre::configuration::types::Protocol;
//! use leurre::data_capture::{CaptureRecord, CredentialSink, RecordSink};
//! use leurre::storage::console::ConsoleWriter;
//!
//! # async fn run() {
//! let sink = RecordSink::new(vec![Box::new(ConsoleWriter::stdout())]);
//! sink.submit(CaptureRecord::credential(Protocol::Ftp, "10.0.0.9:40112").with("username", "bob")).await;
//! sink.close().await;
//! sink.cleanup_writers().await;
//! # }
//! ```

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use log::{debug, error};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::types::CaptureRecord;
use crate::storage::storage_trait::OutputWriter;

pub const QUEUE_CAPACITY: usize = 500;

/// The capability handed to capture modules: submit one finished record.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn submit(&self, record: CaptureRecord);
}

type Writers = Vec<Box<dyn OutputWriter>>;

pub struct RecordSink {
    sender: StdMutex<Option<mpsc::Sender<CaptureRecord>>>,
    consumer: Mutex<Option<JoinHandle<Writers>>>,
    drained: Mutex<Option<Writers>>,
}

impl RecordSink {
    /// Creates the sink and starts its consumer task. Must be called inside a tokio runtime.
    pub fn new(writers: Writers) -> Self {
        Self::with_capacity(writers, QUEUE_CAPACITY)
    }

    pub fn with_capacity(writers: Writers, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let consumer = tokio::spawn(consume(rx, writers));

        Self {
            sender: StdMutex::new(Some(tx)),
            consumer: Mutex::new(Some(consumer)),
            drained: Mutex::new(None),
        }
    }

    /// Enqueues a record, waiting for room when the queue is full. A no-op once closed.
    pub async fn submit(&self, record: CaptureRecord) {
        match self.current_sender() {
            Some(tx) => {
                if tx.send(record).await.is_err() {
                    debug!("Record sink consumer is gone, dropping record");
                }
            }
            None => debug!("Record sink is closed, dropping {} record", record.protocol),
        }
    }

    fn current_sender(&self) -> Option<mpsc::Sender<CaptureRecord>> {
        match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn stop_accepting(&self) {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// Stops accepting records and waits until every queued record reached every writer.
    ///
    /// Concurrent and repeated calls all return after the drain completed.
    pub async fn close(&self) {
        self.stop_accepting();

        let mut consumer = self.consumer.lock().await;
        if let Some(handle) = consumer.take() {
            match handle.await {
                Ok(writers) => *self.drained.lock().await = Some(writers),
                Err(e) => error!("Record sink consumer failed: {}", e),
            }
        }
    }

    /// Runs every writer's cleanup once, in registration order. Closes the sink first if needed.
    pub async fn cleanup_writers(&self) {
        self.close().await;

        let writers = self.drained.lock().await.take();
        if let Some(mut writers) = writers {
            for writer in writers.iter_mut() {
                debug!("Cleaning up output {}", writer.name());
                writer.cleanup().await;
            }
        }
    }
}

#[async_trait]
impl CredentialSink for RecordSink {
    async fn submit(&self, record: CaptureRecord) {
        RecordSink::submit(self, record).await
    }
}

async fn consume(mut rx: mpsc::Receiver<CaptureRecord>, mut writers: Writers) -> Writers {
    while let Some(record) = rx.recv().await {
        let flat = record.flatten();
        for writer in writers.iter_mut() {
            if let Err(e) = writer.write(&flat).await {
                debug!("Output {} failed to write record: {}", writer.name(), e);
            }
        }
    }
    debug!("Record sink drained");
    writers
}
