//! # Listener State
//!
//! Every bound protocol instance (one protocol on one port) is described by a [`ListenerState`]
//! shared between the accept task of the capture module and the controller's shutdown list.
//!
//! ```text
//! ┌────────────┐  mark_serving()  ┌────────────┐  shutdown()  ┌────────────┐
//! │  Created   │─────────────────▶│  Serving   │─────────────▶│  Shutdown  │
//! └────────────┘                  └────────────┘              └────────────┘
//! ```
//!
//! Shutdown is cooperative: [`ListenerState::shutdown`] cancels a token the accept loop selects
//! on, the loop exits and drops its socket. Connections already accepted run to completion.

use crate::configuration::types::Protocol;
use log::debug;
use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Created,
    Serving,
    Shutdown,
}

#[derive(Debug)]
pub struct ListenerState {
    pub protocol: Protocol,
    pub bind_host: String,
    pub bind_port: u16,
    local_addr: OnceLock<SocketAddr>,
    shutdown_requested: Mutex<bool>,
    cancel: CancellationToken,
    status: Mutex<ListenerStatus>,
}

impl ListenerState {
    pub fn new(protocol: Protocol, bind_host: &str, bind_port: u16) -> Self {
        Self {
            protocol,
            bind_host: bind_host.to_string(),
            bind_port,
            local_addr: OnceLock::new(),
            shutdown_requested: Mutex::new(false),
            cancel: CancellationToken::new(),
            status: Mutex::new(ListenerStatus::Created),
        }
    }

    /// Address string handed to `bind`. Bare IPv6 literals are bracketed.
    pub fn bind_addr(&self) -> String {
        let host = self.bind_host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.bind_port)
        } else {
            format!("{}:{}", host, self.bind_port)
        }
    }

    /// Value of the `_server` attribute: the configured host and the actually bound port.
    pub fn server(&self) -> String {
        let port = self
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.bind_port);
        format!("{}:{}", self.bind_host, port)
    }

    pub fn set_local_addr(&self, addr: SocketAddr) {
        let _ = self.local_addr.set(addr);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn mark_serving(&self) {
        if let Ok(mut status) = self.status.lock() {
            if *status == ListenerStatus::Created {
                *status = ListenerStatus::Serving;
            }
        }
    }

    pub fn status(&self) -> ListenerStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(ListenerStatus::Shutdown)
    }

    /// Requests the accept loop to stop. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let mut requested = match self.shutdown_requested.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *requested {
            return;
        }
        *requested = true;

        debug!(
            "Stopping {} listener on {}",
            self.protocol,
            self.server()
        );
        self.cancel.cancel();
        if let Ok(mut status) = self.status.lock() {
            *status = ListenerStatus::Shutdown;
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_requested
            .lock()
            .map(|r| *r)
            .unwrap_or(true)
    }

    /// Resolves once shutdown was requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bind_addr_brackets_ipv6() {
        assert_eq!(ListenerState::new(Protocol::Ftp, "::1", 21).bind_addr(), "[::1]:21");
        assert_eq!(ListenerState::new(Protocol::Ftp, "[::]", 21).bind_addr(), "[::]:21");
        assert_eq!(
            ListenerState::new(Protocol::Ftp, "127.0.0.1", 21).bind_addr(),
            "127.0.0.1:21"
        );
    }

    #[test]
    fn test_server_uses_bound_port() {
        let state = ListenerState::new(Protocol::Dns, "127.0.0.1", 0);
        assert_eq!(state.server(), "127.0.0.1:0");
        state.set_local_addr("127.0.0.1:5353".parse().unwrap());
        assert_eq!(state.server(), "127.0.0.1:5353");
    }

    #[test]
    fn test_status_transitions() {
        let state = ListenerState::new(Protocol::Ssh, "127.0.0.1", 22);
        assert_eq!(state.status(), ListenerStatus::Created);
        state.mark_serving();
        assert_eq!(state.status(), ListenerStatus::Serving);
        state.shutdown();
        assert_eq!(state.status(), ListenerStatus::Shutdown);
        state.mark_serving();
        assert_eq!(state.status(), ListenerStatus::Shutdown);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_wakes_waiters() {
        let state = Arc::new(ListenerState::new(Protocol::Http, "127.0.0.1", 0));
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.cancelled().await })
        };

        let a = {
            let state = state.clone();
            tokio::spawn(async move { state.shutdown() })
        };
        state.shutdown();
        a.await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("accept loop was not woken")
            .unwrap();
        assert!(state.is_shutdown());
    }
}
