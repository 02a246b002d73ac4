use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio_rustls::TlsAcceptor;

use crate::configuration::config::Config;
use crate::configuration::types::{HttpAuthMode, Protocol};
use crate::data_capture::RecordSink;
use crate::error_handling::types::*;
use crate::network::listener::ListenerState;
use crate::network::port_range::resolve_ports;
use crate::protocols::dns::DnsOptions;
use crate::protocols::http::HttpOptions;
use crate::protocols::ldap::LdapOptions;
use crate::protocols::ssh::{self, SshOptions};
use crate::protocols::{dns, ftp, http, ldap, snmp, tls, SharedSink};
use crate::storage::outputs::{parse_outputs, OutputTarget};
use crate::storage::storage_trait::OutputWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Owns the listener handles and the record pipeline of one honeypot run.
///
/// # Fields Overview
///
/// - `plan`: every enabled protocol variant with its resolved ports, in start order
/// - `outputs`: the parsed record destinations
/// - `ssh`, `tls`, `dns`: protocol settings prepared during validation
/// - `listeners`: handles of the listeners that started, in start order
pub struct Controller {
    config: Config,
    plan: Vec<(Protocol, BTreeSet<u16>)>,
    outputs: Vec<OutputTarget>,
    auth_mode: HttpAuthMode,
    ssh: Option<SshOptions>,
    tls: Option<TlsAcceptor>,
    dns: DnsOptions,
    listeners: Mutex<Vec<Arc<ListenerState>>>,
    state: Mutex<ControllerState>,
}

impl Controller {
    /// Validates the configuration. Nothing is bound yet.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let mut plan = Vec::new();
        for family in config.enabled_families()? {
            for &protocol in family.variants() {
                let spec = config.ports_for(protocol);
                let ports = if spec.trim().is_empty() {
                    debug!("No {} ports configured", protocol);
                    BTreeSet::new()
                } else {
                    resolve_ports(spec)?
                };
                plan.push((protocol, ports));
            }
        }

        let wants = |p: Protocol| plan.iter().any(|(proto, ports)| *proto == p && !ports.is_empty());

        let auth_mode = config.auth_mode()?;
        let dns = DnsOptions {
            resolve_to: config.resolve_to()?,
        };

        let ssh = if wants(Protocol::Ssh) {
            let key = ssh::load_or_generate_host_key(config.ssh_host_key.as_deref())?;
            Some(SshOptions::new(key))
        } else {
            None
        };

        let tls = if wants(Protocol::Https) || wants(Protocol::Ldaps) {
            Some(tls::load_or_generate(
                config.tls_cert.as_deref(),
                config.tls_key.as_deref(),
                &config.tls_names(),
                &config.tls_org,
            )?)
        } else {
            None
        };

        let outputs = parse_outputs(&config.outputs)?;

        Ok(Self {
            config,
            plan,
            outputs,
            auth_mode,
            ssh,
            tls,
            dns,
            listeners: Mutex::new(Vec::new()),
            state: Mutex::new(ControllerState::Starting),
        })
    }

    pub fn outputs(&self) -> &[OutputTarget] {
        &self.outputs
    }

    pub fn state(&self) -> ControllerState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Handles of the listeners started so far.
    pub fn listeners(&self) -> Vec<Arc<ListenerState>> {
        match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, next: ControllerState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Controller state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn track(&self, listener: Arc<ListenerState>) {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Starts every listener with the given writers and serves until `shutdown` resolves.
    ///
    /// When `shutdown` resolves before startup finished, `ControllerError::Interrupted` is
    /// returned without draining the records.
    pub async fn run<F>(
        &self,
        writers: Vec<Box<dyn OutputWriter>>,
        shutdown: F,
    ) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.set_state(ControllerState::Starting);
        let sink = Arc::new(RecordSink::new(writers));

        let started = tokio::select! {
            biased;
            _ = &mut shutdown => {
                warn!("Interrupted while starting listeners");
                self.stop_listeners();
                self.set_state(ControllerState::Stopped);
                return Err(ControllerError::Interrupted);
            }
            started = self.start_listeners(sink.clone()) => started,
        };

        let started = started.and_then(|_| {
            if self.listeners().is_empty() {
                Err(ControllerError::NoListeners)
            } else {
                Ok(())
            }
        });
        if let Err(e) = started {
            error!("Unable to start the listeners: {}", e);
            self.teardown(&sink).await;
            return Err(e);
        }

        self.set_state(ControllerState::Running);
        info!("{} listeners are running", self.listeners().len());

        shutdown.await;
        info!("Shutting down");
        self.teardown(&sink).await;
        Ok(())
    }

    async fn start_listeners(&self, sink: Arc<RecordSink>) -> Result<(), ControllerError> {
        for (protocol, ports) in &self.plan {
            for &port in ports {
                let listener = Arc::new(ListenerState::new(*protocol, &self.config.bind_host, port));
                match self.spawn_listener(listener.clone(), sink.clone()).await {
                    Ok(()) => self.track(listener),
                    Err(e) if self.config.strict => return Err(e.into()),
                    Err(e) => warn!("Skipping {} listener: {}", protocol, e),
                }
            }
        }
        Ok(())
    }

    async fn spawn_listener(
        &self,
        listener: Arc<ListenerState>,
        sink: SharedSink,
    ) -> Result<(), NetworkError> {
        match listener.protocol {
            Protocol::Ssh => match &self.ssh {
                Some(options) => ssh::spawn(options.clone(), listener, sink).await,
                None => Err(NetworkError::NotPrepared("ssh host key".to_string())),
            },
            Protocol::Http | Protocol::Https => {
                let options = HttpOptions {
                    mode: self.auth_mode,
                    realm: self.config.http_realm.clone(),
                    tls: self.acceptor_for(listener.protocol)?,
                };
                http::spawn(options, listener, sink).await
            }
            Protocol::Ldap | Protocol::Ldaps => {
                let options = LdapOptions {
                    tls: self.acceptor_for(listener.protocol)?,
                };
                ldap::spawn(options, listener, sink).await
            }
            Protocol::Snmp => snmp::spawn(listener, sink).await,
            Protocol::Dns => dns::spawn(self.dns.clone(), listener, sink).await,
            Protocol::Ftp => ftp::spawn(listener, sink).await,
        }
    }

    fn acceptor_for(&self, protocol: Protocol) -> Result<Option<TlsAcceptor>, NetworkError> {
        if !protocol.is_tls() {
            return Ok(None);
        }
        self.tls
            .clone()
            .map(Some)
            .ok_or_else(|| NetworkError::TlsError(format!("no TLS material for {}", protocol)))
    }

    fn stop_listeners(&self) {
        for listener in self.listeners() {
            listener.shutdown();
        }
    }

    async fn teardown(&self, sink: &RecordSink) {
        self.set_state(ControllerState::ShuttingDown);
        self.stop_listeners();
        sink.close().await;
        sink.cleanup_writers().await;
        self.set_state(ControllerState::Stopped);
        info!("Every listener stopped and every output flushed");
    }
}
