use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error_handling::types::ConfigError;

/// Protocol tag attached to every listener and every captured record.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Http,
    Https,
    Ldap,
    Ldaps,
    Snmp,
    Dns,
    Ftp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ldap => "ldap",
            Protocol::Ldaps => "ldaps",
            Protocol::Snmp => "snmp",
            Protocol::Dns => "dns",
            Protocol::Ftp => "ftp",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Protocol::Https | Protocol::Ldaps)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol family as it is named in the `protocols` setting.
///
/// `http` covers both the plain and TLS HTTP listeners, `ldap` covers LDAP and LDAPS.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ProtocolFamily {
    Ssh,
    Snmp,
    Ldap,
    Http,
    Dns,
    Ftp,
}

impl ProtocolFamily {
    pub fn variants(&self) -> &'static [Protocol] {
        match self {
            ProtocolFamily::Ssh => &[Protocol::Ssh],
            ProtocolFamily::Snmp => &[Protocol::Snmp],
            ProtocolFamily::Ldap => &[Protocol::Ldap, Protocol::Ldaps],
            ProtocolFamily::Http => &[Protocol::Http, Protocol::Https],
            ProtocolFamily::Dns => &[Protocol::Dns],
            ProtocolFamily::Ftp => &[Protocol::Ftp],
        }
    }
}

impl FromStr for ProtocolFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(ProtocolFamily::Ssh),
            "snmp" => Ok(ProtocolFamily::Snmp),
            "ldap" => Ok(ProtocolFamily::Ldap),
            "http" => Ok(ProtocolFamily::Http),
            "dns" => Ok(ProtocolFamily::Dns),
            "ftp" => Ok(ProtocolFamily::Ftp),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HttpAuthMode {
    Basic,
    Ntlm,
}

impl FromStr for HttpAuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(HttpAuthMode::Basic),
            "ntlm" => Ok(HttpAuthMode::Ntlm),
            other => Err(ConfigError::BadAuthMode(other.to_string())),
        }
    }
}
