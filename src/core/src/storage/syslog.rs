use std::collections::BTreeMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::info;
use tokio::net::UdpSocket;

use crate::error_handling::types::{ConfigError, StorageError};
use crate::storage::storage_trait::OutputWriter;

pub const DEFAULT_SYSLOG_PORT: u16 = 514;

/// local0.notice
const PRIORITY: u8 = 133;

/// Sends each record as an RFC 5424 message over UDP, with the record JSON as message body.
pub struct SyslogWriter {
    name: String,
    socket: UdpSocket,
    pid: u32,
}

/// Splits the part of a `syslog://` target after the scheme into host and port.
pub fn parse_target(target: &str) -> Result<(String, u16), ConfigError> {
    let bad = || ConfigError::BadOutput(format!("syslog://{}", target));
    let target = target.trim_end_matches('/');

    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(bad)?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(bad()),
        }
    } else {
        match target.split_once(':') {
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            Some(_) => (target, None),
            None => (target, None),
        }
    };

    if host.is_empty() {
        return Err(bad());
    }
    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| bad())?,
        None => DEFAULT_SYSLOG_PORT,
    };
    Ok((host.to_string(), port))
}

impl SyslogWriter {
    pub async fn connect(host: &str, port: u16) -> Result<Self, StorageError> {
        let remote: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("{}: {}", host, e)))?
            .next()
            .ok_or_else(|| StorageError::ConnectionFailed(format!("{}: no address", host)))?;

        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        info!("Forwarding records to syslog at {}", remote);

        Ok(Self {
            name: format!("syslog:{}", remote),
            socket,
            pid: std::process::id(),
        })
    }

    fn format_message(&self, body: &str) -> String {
        format!(
            "<{}>1 {} - leurre {} - - {}",
            PRIORITY,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.pid,
            body
        )
    }
}

#[async_trait]
impl OutputWriter for SyslogWriter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let body = serde_json::to_string(record)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        self.socket
            .send(self.format_message(&body).as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }
}
