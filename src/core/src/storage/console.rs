use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::OutputWriter;

/// Prints every record as a JSON line on standard output.
pub struct ConsoleWriter {
    out: Box<dyn Write + Send>,
}

impl ConsoleWriter {
    pub fn stdout() -> Self {
        Self {
            out: Box::new(std::io::stdout()),
        }
    }

    pub fn with_output(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

#[async_trait]
impl OutputWriter for ConsoleWriter {
    fn name(&self) -> &str {
        "console"
    }

    async fn write(&mut self, record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let line = serde_json::to_string(record)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        writeln!(self.out, "{}", line).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.out
            .flush()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }
}
