//! # Protocol Capture Modules
//!
//! One module per impersonated service. Each exposes an async `spawn` function that binds the
//! socket described by a [`ListenerState`], records the bound address, and starts the accept or
//! receive loop on its own task. Captured events are pushed through the [`CredentialSink`]
//! capability; no module ever grants access.
//!
//! ```text
//! ┌──────────────┐  accept   ┌──────────────────┐  submit   ┌──────────────┐
//! │ TcpListener  │──────────▶│ connection task  │──────────▶│ RecordSink   │
//! │ UdpSocket    │  recv     │ (protocol logic) │           │ (one per app)│
//! └──────────────┘           └──────────────────┘           └──────────────┘
//! ```

pub mod dns;
pub mod ftp;
pub mod http;
pub mod ldap;
pub mod ntlm;
pub mod snmp;
pub mod ssh;
pub mod tls;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::data_capture::CredentialSink;
use crate::error_handling::types::NetworkError;
use crate::network::listener::ListenerState;

pub type SharedSink = Arc<dyn CredentialSink>;

/// Pause after a failed accept, so a persistent error such as EMFILE does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) async fn bind_tcp(state: &ListenerState) -> Result<TcpListener, NetworkError> {
    let addr = state.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| NetworkError::BindError(addr.clone(), e))?;
    if let Ok(local) = listener.local_addr() {
        state.set_local_addr(local);
    }
    Ok(listener)
}

pub(crate) async fn bind_udp(state: &ListenerState) -> Result<UdpSocket, NetworkError> {
    let addr = state.bind_addr();
    let socket = UdpSocket::bind(&addr)
        .await
        .map_err(|e| NetworkError::BindError(addr.clone(), e))?;
    if let Ok(local) = socket.local_addr() {
        state.set_local_addr(local);
    }
    Ok(socket)
}

/// Runs the accept loop of a TCP listener until the listener state is shut down. Every accepted
/// connection is handled on its own task.
pub(crate) fn serve_tcp<F, Fut>(listener: TcpListener, state: Arc<ListenerState>, handler: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    state.mark_serving();
    info!("{} is listening on {}", state.protocol, state.server());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = state.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handler(stream, peer));
                    }
                    Err(e) => {
                        if state.is_shutdown() {
                            break;
                        }
                        debug!("{} accept error on {}: {}", state.protocol, state.server(), e);
                        if !back_off(&state).await {
                            break;
                        }
                    }
                },
            }
        }
        debug!("{} listener on {} stopped", state.protocol, state.server());
    });
}

/// Waits out [`ACCEPT_BACKOFF`]. Returns false when the listener was shut down meanwhile.
async fn back_off(state: &ListenerState) -> bool {
    tokio::select! {
        _ = state.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::Protocol;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_back_off_waits_between_accept_errors() {
        let state = ListenerState::new(Protocol::Ftp, "127.0.0.1", 0);
        let started = Instant::now();
        assert!(back_off(&state).await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_back_off_ends_on_shutdown() {
        let state = ListenerState::new(Protocol::Ftp, "127.0.0.1", 0);
        state.shutdown();
        let started = Instant::now();
        assert!(!back_off(&state).await);
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_serve_tcp_stops_on_shutdown() {
        let state = Arc::new(ListenerState::new(Protocol::Ftp, "127.0.0.1", 0));
        let listener = bind_tcp(&state).await.unwrap();
        let addr = state.local_addr().unwrap();
        serve_tcp(listener, state.clone(), |_stream, _peer| async {});

        assert!(TcpStream::connect(addr).await.is_ok());
        state.shutdown();
        let deadline = Instant::now() + Duration::from_secs(2);
        while TcpStream::connect(addr).await.is_ok() {
            assert!(Instant::now() < deadline, "listener still accepting");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
