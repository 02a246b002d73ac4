//! TLS material shared by the HTTPS and LDAPS listeners.
//!
//! A PEM certificate chain and private key are loaded from disk when both paths are configured;
//! otherwise a self-signed certificate is generated at startup for the configured names, issued
//! to the configured organization.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::info;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error_handling::types::ConfigError;

pub type CertChain = Vec<CertificateDer<'static>>;

pub fn load_or_generate(
    cert: Option<&Path>,
    key: Option<&Path>,
    names: &[String],
    org: &str,
) -> Result<TlsAcceptor, ConfigError> {
    let (chain, key) = match (cert, key) {
        (Some(cert), Some(key)) => load_pem(cert, key)?,
        (None, None) => self_signed(names, org)?,
        _ => {
            return Err(ConfigError::BadTlsMaterial(
                "both a certificate and a key are required".to_string(),
            ))
        }
    };
    acceptor(chain, key)
}

pub fn load_pem(cert: &Path, key: &Path) -> Result<(CertChain, PrivateKeyDer<'static>), ConfigError> {
    let bad = |path: &Path, e: String| ConfigError::BadTlsMaterial(format!("{}: {}", path.display(), e));

    let mut reader = BufReader::new(File::open(cert).map_err(|e| bad(cert, e.to_string()))?);
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<CertChain, _>>()
        .map_err(|e| bad(cert, e.to_string()))?;
    if chain.is_empty() {
        return Err(bad(cert, "no certificate found".to_string()));
    }

    let mut reader = BufReader::new(File::open(key).map_err(|e| bad(key, e.to_string()))?);
    let key_der = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| bad(key, e.to_string()))?
        .ok_or_else(|| bad(key, "no private key found".to_string()))?;

    info!("Loaded TLS certificate {}", cert.display());
    Ok((chain, key_der))
}

pub fn self_signed(
    names: &[String],
    org: &str,
) -> Result<(CertChain, PrivateKeyDer<'static>), ConfigError> {
    let bad = |e: rcgen::Error| ConfigError::BadTlsMaterial(e.to_string());
    let names = if names.is_empty() {
        vec!["localhost".to_string()]
    } else {
        names.to_vec()
    };

    let mut params = CertificateParams::new(names.clone()).map_err(bad)?;
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, names[0].as_str());
    if !org.is_empty() {
        subject.push(DnType::OrganizationName, org);
    }
    params.distinguished_name = subject;

    let key_pair = KeyPair::generate().map_err(bad)?;
    let cert = params.self_signed(&key_pair).map_err(bad)?;
    info!("Generated self-signed TLS certificate for {} ({})", names.join(","), org);

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((vec![cert.der().clone()], key))
}

pub fn acceptor(chain: CertChain, key: PrivateKeyDer<'static>) -> Result<TlsAcceptor, ConfigError> {
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConfigError::BadTlsMaterial(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(chain, key)
    .map_err(|e| ConfigError::BadTlsMaterial(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, RootCertStore};
    use tokio::net::TcpStream;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;

    /// Acceptor plus the certificate a test client has to trust.
    pub(crate) fn test_acceptor() -> (TlsAcceptor, CertificateDer<'static>) {
        let (chain, key) = self_signed(&["localhost".to_string()], "Test Org").unwrap();
        let cert = chain[0].clone();
        (acceptor(chain, key).unwrap(), cert)
    }

    pub(crate) async fn connect(addr: std::net::SocketAddr, cert: CertificateDer<'static>) -> TlsStream<TcpStream> {
        let mut roots = RootCertStore::empty();
        roots.add(cert).unwrap();
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

        let stream = TcpStream::connect(addr).await.unwrap();
        TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost").unwrap(), stream)
            .await
            .unwrap()
    }

    #[test]
    fn test_generates_when_nothing_configured() {
        assert!(load_or_generate(None, None, &["honeypot.local".to_string()], "Acme").is_ok());
        assert!(load_or_generate(None, None, &[], "").is_ok());
    }

    #[test]
    fn test_self_signed_subject_carries_organization() {
        let contains = |der: &[u8], needle: &str| der.windows(needle.len()).any(|w| w == needle.as_bytes());

        let (chain, _) = self_signed(&["files.corp".to_string()], "Contoso Finance Ltd").unwrap();
        assert!(contains(&chain[0], "Contoso Finance Ltd"));
        assert!(contains(&chain[0], "files.corp"));

        let (chain, _) = self_signed(&[], "").unwrap();
        assert!(!contains(&chain[0], "Contoso Finance Ltd"));
        assert!(contains(&chain[0], "localhost"));
    }

    #[test]
    fn test_loads_pem_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

        assert!(load_or_generate(Some(&cert_path), Some(&key_path), &[], "Acme").is_ok());
    }

    #[test]
    fn test_rejects_incomplete_material() {
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("cert.pem");
        std::fs::write(&cert_path, "not a certificate").unwrap();

        assert!(matches!(
            load_or_generate(Some(&cert_path), None, &[], "Acme"),
            Err(ConfigError::BadTlsMaterial(_))
        ));
        assert!(matches!(
            load_or_generate(Some(&cert_path), Some(&dir.path().join("missing.pem")), &[], "Acme"),
            Err(ConfigError::BadTlsMaterial(_))
        ));
    }
}
