use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadPortsRange(String),
    UnknownProtocol(String),
    BadAuthMode(String),
    BadHostKey(String),
    BadTlsMaterial(String),
    BadIPFormatting(String),
    BadOutput(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::UnknownProtocol(e) => write!(f, "Unknown protocol: {}", e),
            ConfigError::BadAuthMode(e) => write!(f, "Invalid HTTP auth mode: {}", e),
            ConfigError::BadHostKey(e) => write!(f, "SSH host key error: {}", e),
            ConfigError::BadTlsMaterial(e) => write!(f, "TLS material error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::BadOutput(e) => write!(f, "Output configuration error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(String, std::io::Error),
    TlsError(String),
    NotPrepared(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(addr, e) => write!(f, "failed to listen on {}: {}", addr, e),
            NetworkError::TlsError(e) => write!(f, "TLS error: {}", e),
            NetworkError::NotPrepared(e) => write!(f, "listener settings missing: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Failures while decoding attacker supplied NTLMSSP blobs.
#[derive(Debug, PartialEq, Eq)]
pub enum NtlmError {
    BadEncoding(String),
    MissingSignature,
    Truncated(&'static str),
}

impl fmt::Display for NtlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtlmError::BadEncoding(e) => write!(f, "NTLM header is not valid base64: {}", e),
            NtlmError::MissingSignature => write!(f, "NTLMSSP signature not found"),
            NtlmError::Truncated(field) => write!(f, "NTLM data truncated in {}", field),
        }
    }
}

impl std::error::Error for NtlmError {}

/// Contained per-datagram decode failures for the UDP capture modules.
#[derive(Debug)]
pub enum DecodeError {
    Snmp(String),
    Dns(String),
    Fault(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Snmp(e) => write!(f, "SNMP decode error: {}", e),
            DecodeError::Dns(e) => write!(f, "DNS decode error: {}", e),
            DecodeError::Fault(e) => write!(f, "decoder fault: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    WriteFailed(String),
    BadResponse(u16),
    SerializationFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Output connection failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Output write failed: {}", e),
            StorageError::BadResponse(code) => write!(f, "bad response: {}", code),
            StorageError::SerializationFailed(e) => write!(f, "Record serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    NoListeners,
    Interrupted,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::NoListeners => write!(f, "at least one listener must be started"),
            ControllerError::Interrupted => write!(f, "interrupted during startup"),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}
