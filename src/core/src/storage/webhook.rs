use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::OutputWriter;

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts every record to a chat-style webhook as `{"text": "<record json>"}`.
pub struct WebhookWriter {
    url: String,
    name: String,
    client: reqwest::Client,
}

impl WebhookWriter {
    pub fn new(url: &str) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(format!("leurre/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            name: format!("webhook:{}", url),
            client,
        })
    }
}

#[async_trait]
impl OutputWriter for WebhookWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let text = serde_json::to_string(record)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        let body = serde_json::json!({ "text": text });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::BadResponse(status.as_u16()));
        }
        debug!("Webhook {} accepted record ({})", self.url, status);
        Ok(())
    }
}
