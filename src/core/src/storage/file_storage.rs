use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::OutputWriter;

/// Appends one JSON object per line to a file. The file is created, or truncated, when the writer
/// is opened.
pub struct FileWriter {
    path: PathBuf,
    name: String,
    file: Option<File>,
}

impl FileWriter {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await.map_err(|e| {
            error!("Failed to create output file {}: {}", path.display(), e);
            StorageError::ConnectionFailed(format!("{}: {}", path.display(), e))
        })?;
        info!("Writing records to {}", path.display());

        Ok(Self {
            name: format!("file:{}", path.display()),
            path,
            file: Some(file),
        })
    }
}

#[async_trait]
impl OutputWriter for FileWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::WriteFailed(format!("{} is closed", self.path.display())))?;

        let mut line = serde_json::to_string(record)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    async fn cleanup(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.sync_all().await {
                debug!("Failed to sync {}: {}", self.path.display(), e);
            }
            debug!("Closed output file {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(user: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("_proto".to_string(), "ftp".to_string()),
            ("username".to_string(), user.to_string()),
        ])
    }

    #[tokio::test]
    async fn test_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");

        let mut writer = FileWriter::open(&path).await.unwrap();
        writer.write(&record("alice")).await.unwrap();
        writer.write(&record("bob")).await.unwrap();
        writer.cleanup().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: BTreeMap<String, String> = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["username"], "alice");
        assert_eq!(first["_proto"], "ftp");
    }

    #[tokio::test]
    async fn test_open_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "stale\n").unwrap();

        let mut writer = FileWriter::open(&path).await.unwrap();
        writer.cleanup().await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_write_after_cleanup_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = FileWriter::open(dir.path().join("out.json")).await.unwrap();
        writer.cleanup().await;
        writer.cleanup().await;
        assert!(matches!(
            writer.write(&record("eve")).await,
            Err(StorageError::WriteFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.json");
        assert!(matches!(
            FileWriter::open(&path).await,
            Err(StorageError::ConnectionFailed(_))
        ));
    }
}
