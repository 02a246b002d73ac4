use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use russh::server::{Auth, Config, Handler};
use russh::{MethodSet, SshId};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{bind_tcp, serve_tcp, SharedSink};
use crate::configuration::types::Protocol;
use crate::data_capture::CaptureRecord;
use crate::error_handling::types::{ConfigError, NetworkError};
use crate::network::listener::ListenerState;

pub const SERVER_ID: &str = "SSH-2.0-OpenSSH_7.6p1";
const MAX_IDENT: usize = 255;

/// Server configuration shared by every SSH listener.
#[derive(Clone)]
pub struct SshOptions {
    config: Arc<Config>,
}

impl SshOptions {
    pub fn new(host_key: KeyPair) -> Self {
        let config = Config {
            server_id: SshId::Standard(SERVER_ID.to_string()),
            methods: MethodSet::PASSWORD | MethodSet::PUBLICKEY,
            keys: vec![host_key],
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            inactivity_timeout: Some(Duration::from_secs(120)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

/// Reads the host key at `path`, or generates an Ed25519 key when no path is configured.
pub fn load_or_generate_host_key(path: Option<&Path>) -> Result<KeyPair, ConfigError> {
    match path {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::BadHostKey(format!("{}: {}", path.display(), e)))?;
            russh_keys::decode_secret_key(&pem, None)
                .map_err(|e| ConfigError::BadHostKey(format!("{}: {}", path.display(), e)))
        }
        None => KeyPair::generate_ed25519()
            .ok_or_else(|| ConfigError::BadHostKey("could not generate an ed25519 key".to_string())),
    }
}

pub async fn spawn(
    options: SshOptions,
    state: Arc<ListenerState>,
    sink: SharedSink,
) -> Result<(), NetworkError> {
    let listener = bind_tcp(&state).await?;
    let server = state.server();

    serve_tcp(listener, state, move |stream, peer| {
        let config = options.config.clone();
        let server = server.clone();
        let sink = sink.clone();
        async move { handle(stream, peer, config, server, sink).await }
    });
    Ok(())
}

pub async fn handle<S>(stream: S, peer: SocketAddr, config: Arc<Config>, server: String, sink: SharedSink)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ident = Arc::new(OnceLock::new());
    let trap = AuthTrap {
        peer,
        server,
        sink,
        ident: ident.clone(),
        offered: HashSet::new(),
    };

    match russh::server::run_stream(config, IdentTap::new(stream, ident), trap).await {
        Ok(session) => {
            if let Err(e) = session.await {
                debug!("ssh session with {} ended: {}", peer, e);
            }
        }
        Err(e) => debug!("ssh handshake with {} failed: {}", peer, e),
    }
}

/// Records every authentication attempt of one connection and rejects it.
struct AuthTrap {
    peer: SocketAddr,
    server: String,
    sink: SharedSink,
    ident: Arc<OnceLock<String>>,
    /// Fingerprints already recorded on this connection.
    offered: HashSet<String>,
}

impl AuthTrap {
    fn record(&self) -> CaptureRecord {
        CaptureRecord::credential(Protocol::Ssh, self.peer.to_string())
            .with("version", self.ident.get().cloned().unwrap_or_default())
            .with("_server", self.server.clone())
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
    }
}

#[async_trait]
impl Handler for AuthTrap {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let record = self
            .record()
            .with("username", user)
            .with("password", password)
            .with("method", "password");
        self.sink.submit(record).await;
        Ok(reject())
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        let fingerprint = format!("SHA256:{}", public_key.fingerprint());
        if self.offered.insert(fingerprint.clone()) {
            let record = self
                .record()
                .with("username", user)
                .with("pubkey-sha256", fingerprint)
                .with(
                    "pubkey",
                    format!("{} {}", public_key.name(), public_key.public_key_base64()),
                )
                .with("method", "pubkey");
            self.sink.submit(record).await;
        }
        Ok(reject())
    }
}

/// Transport wrapper that copies the client identification line as it goes by.
struct IdentTap<S> {
    inner: S,
    line: Vec<u8>,
    ident: Arc<OnceLock<String>>,
}

impl<S> IdentTap<S> {
    fn new(inner: S, ident: Arc<OnceLock<String>>) -> Self {
        Self {
            inner,
            line: Vec::new(),
            ident,
        }
    }

    /// Lines before the `SSH-` line are allowed by the protocol and skipped.
    fn observe(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.ident.get().is_some() {
                return;
            }
            if b == b'\n' || self.line.len() >= MAX_IDENT {
                let text = String::from_utf8_lossy(&self.line);
                let text = text.trim_end_matches('\r');
                if text.starts_with("SSH-") || self.line.len() >= MAX_IDENT {
                    let _ = self.ident.set(text.to_string());
                }
                self.line.clear();
                continue;
            }
            self.line.push(b);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdentTap<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            if this.ident.get().is_none() {
                this.observe(&buf.filled()[before..]);
            }
        }
        polled
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdentTap<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
