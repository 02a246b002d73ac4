//! Common data types used across the data_capture subsystem.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::configuration::types::Protocol;

/// Keys reserved for record metadata. Caller-supplied attributes with these names are dropped
/// when the record is flattened.
pub const RESERVED_KEYS: [&str; 4] = ["_etime", "_host", "_proto", "_type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Authentication material presented by a client.
    Credential,
    /// A request that carried no usable credential.
    Access,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Credential => f.write_str("credential"),
            RecordKind::Access => f.write_str("access"),
        }
    }
}

/// One captured event.
///
/// Built by a capture module with [`CaptureRecord::credential`] or [`CaptureRecord::access`] and
/// the chained [`CaptureRecord::with`] setter, then moved into the record sink. Nothing mutates a
/// record after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub protocol: Protocol,
    pub kind: RecordKind,
    pub attributes: HashMap<String, String>,
}

impl CaptureRecord {
    pub fn new(kind: RecordKind, protocol: Protocol, source: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            protocol,
            kind,
            attributes: HashMap::new(),
        }
    }

    pub fn credential(protocol: Protocol, source: impl Into<String>) -> Self {
        Self::new(RecordKind::Credential, protocol, source)
    }

    pub fn access(protocol: Protocol, source: impl Into<String>) -> Self {
        Self::new(RecordKind::Access, protocol, source)
    }

    /// Sets an attribute. The first value written for a key is kept.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Key/value view handed to output writers, with the reserved metadata keys filled from the
    /// record fields.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        flat.insert(
            "_etime".to_string(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        flat.insert("_host".to_string(), self.source.clone());
        flat.insert("_proto".to_string(), self.protocol.to_string());
        flat.insert("_type".to_string(), self.kind.to_string());

        for (key, value) in &self.attributes {
            flat.entry(key.clone()).or_insert_with(|| value.clone());
        }
        flat
    }
}
