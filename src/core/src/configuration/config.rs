use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROTOCOLS: &str = "ssh,snmp,ldap,http,dns,ftp";

/// Runtime configuration of the honeypot.
///
/// The same structure is filled either from the command line (`clap`) or from a TOML file
/// (`serde` + `toml`) when `--config <FILE>` is given. Every field has the same default in both
/// sources, so a TOML file only needs to carry the settings it changes.
///
/// # Examples
///
/// ```
/// use leurre::configuration::config::Config;
///
/// let config = Config::from_args_iter(["leurre", "--protocols", "ftp", "--ftp-ports", "2121"]).unwrap();
/// assert_eq!(config.ftp_ports, "2121");
/// ```
///
/// # Fields Overview
///
/// - `strict`: treat a single listener bind failure as fatal
/// - `protocols`: comma separated protocol families to enable
/// - `*_ports`: port specifications (`22`, `80-82`, `53,5353`) per protocol variant
/// - `tls_*`: certificate material shared by the HTTPS and LDAPS listeners
/// - `outputs`: record destinations (`-`, a file path, a webhook URL or `syslog://host`)
#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(name = "leurre")]
#[command(version)]
#[command(about = "leurre captures inbound credentials")]
#[serde(default)]
pub struct Config {
    /// Read the configuration from a TOML file instead of the command line
    #[arg(long = "config", env = "LEURRE_CONFIG")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Display verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide startup banners and other extraneous output
    #[arg(short, long)]
    pub quiet: bool,

    /// Treat individual listener failures as fatal
    #[arg(long = "dont-ignore")]
    pub strict: bool,

    /// Comma-separated list of protocols to enable
    #[arg(long, default_value = DEFAULT_PROTOCOLS)]
    pub protocols: String,

    /// Address every listener binds to
    #[arg(long, default_value = "[::]")]
    pub bind_host: String,

    /// TCP ports to listen on for SSH
    #[arg(long, default_value = "22")]
    pub ssh_ports: String,

    /// Optional path to an SSH host key on disk
    #[arg(long)]
    pub ssh_host_key: Option<PathBuf>,

    /// UDP ports to listen on for SNMP
    #[arg(long, default_value = "161")]
    pub snmp_ports: String,

    /// TCP ports to listen on for LDAP
    #[arg(long, default_value = "389")]
    pub ldap_ports: String,

    /// TCP ports to listen on for LDAPS
    #[arg(long, default_value = "636")]
    pub ldaps_ports: String,

    /// UDP ports to listen on for DNS
    #[arg(long, default_value = "53,5353")]
    pub dns_ports: String,

    /// IPv4 address returned to DNS type A questions; SERVFAIL is sent when unset
    #[arg(long)]
    pub dns_resolve_to: Option<String>,

    /// TCP ports to listen on for FTP
    #[arg(long, default_value = "21")]
    pub ftp_ports: String,

    /// TCP ports to listen on for HTTP
    #[arg(long, default_value = "80")]
    pub http_ports: String,

    /// TCP ports to listen on for HTTPS
    #[arg(long, default_value = "443")]
    pub https_ports: String,

    /// HTTP basic authentication realm to present
    #[arg(long, default_value = "Administration")]
    pub http_realm: String,

    /// Authentication mode for the HTTP listeners (ntlm or basic)
    #[arg(long, default_value = "ntlm")]
    pub http_auth_mode: String,

    /// Optional PEM certificate for TLS listeners
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Optional PEM private key for TLS listeners
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Comma-separated server names used for self-signed TLS certificates
    #[arg(long, default_value = "localhost")]
    pub tls_name: String,

    /// Organization written into the subject of self-signed TLS certificates
    #[arg(long, default_value = "Leurre Feed, Inc.")]
    pub tls_org: String,

    /// Output destinations for captured records
    pub outputs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["leurre"])
    }
}

impl Config {
    /// Parses the process arguments, then replaces them with the TOML file named by
    /// `--config` when present. Outputs and verbosity flags given on the command line are kept on
    /// top of the file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::merge(Config::parse())
    }

    pub fn from_args_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Config::try_parse_from(args)
    }

    fn merge(cli: Config) -> Result<Self, ConfigError> {
        let path = match cli.config_file.as_ref() {
            Some(path) => path.clone(),
            None => return Ok(cli),
        };

        let mut config = Self::from_file(&path)?;
        config.config_file = Some(path);
        config.outputs.extend(cli.outputs);
        config.verbose |= cli.verbose;
        config.quiet |= cli.quiet;
        config.strict |= cli.strict;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Enabled protocol families, in the order they were listed and without duplicates.
    pub fn enabled_families(&self) -> Result<Vec<ProtocolFamily>, ConfigError> {
        let mut families = Vec::new();
        for name in self.protocols.split(',') {
            if name.trim().is_empty() {
                continue;
            }
            let family: ProtocolFamily = name.parse()?;
            if !families.contains(&family) {
                families.push(family);
            }
        }
        Ok(families)
    }

    pub fn ports_for(&self, protocol: Protocol) -> &str {
        match protocol {
            Protocol::Ssh => &self.ssh_ports,
            Protocol::Http => &self.http_ports,
            Protocol::Https => &self.https_ports,
            Protocol::Ldap => &self.ldap_ports,
            Protocol::Ldaps => &self.ldaps_ports,
            Protocol::Snmp => &self.snmp_ports,
            Protocol::Dns => &self.dns_ports,
            Protocol::Ftp => &self.ftp_ports,
        }
    }

    pub fn auth_mode(&self) -> Result<HttpAuthMode, ConfigError> {
        self.http_auth_mode.parse()
    }

    pub fn resolve_to(&self) -> Result<Option<Ipv4Addr>, ConfigError> {
        match self.dns_resolve_to.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(addr) => addr
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::BadIPFormatting(addr.to_string())),
        }
    }

    pub fn tls_names(&self) -> Vec<String> {
        self.tls_name
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect()
    }
}
