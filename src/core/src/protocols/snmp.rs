use std::net::SocketAddr;
use std::panic;
use std::sync::Arc;

use log::{debug, info};

use super::{bind_udp, SharedSink};
use crate::configuration::types::Protocol;
use crate::data_capture::CaptureRecord;
use crate::error_handling::types::{DecodeError, NetworkError};
use crate::network::listener::ListenerState;

const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub community: String,
    pub version: &'static str,
}

pub async fn spawn(state: Arc<ListenerState>, sink: SharedSink) -> Result<(), NetworkError> {
    let socket = bind_udp(&state).await?;
    state.mark_serving();
    info!("{} is listening on {}", state.protocol, state.server());

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = state.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, peer)) => {
                        let datagram = buf[..n].to_vec();
                        let state = state.clone();
                        let sink = sink.clone();
                        tokio::spawn(async move { process(&datagram, peer, &state, &sink).await });
                    }
                    Err(e) => debug!("snmp receive error on {}: {}", state.server(), e),
                },
            }
        }
        debug!("snmp listener on {} stopped", state.server());
    });
    Ok(())
}

async fn process(datagram: &[u8], peer: SocketAddr, state: &ListenerState, sink: &SharedSink) {
    match decode_isolated(datagram) {
        Ok(Some(found)) => {
            let record = CaptureRecord::credential(Protocol::Snmp, peer.to_string())
                .with("community", found.community)
                .with("version", found.version)
                .with("_server", state.server());
            sink.submit(record).await;
        }
        Ok(None) => {}
        Err(e) => debug!("snmp datagram from {} ignored: {}", peer, e),
    }
}

/// Decodes a datagram with the decoder contained: a panic inside the parser becomes a
/// [`DecodeError::Fault`].
pub fn decode_isolated(datagram: &[u8]) -> Result<Option<Community>, DecodeError> {
    match panic::catch_unwind(|| decode(datagram)) {
        Ok(result) => result,
        Err(cause) => {
            let reason = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(DecodeError::Fault(reason))
        }
    }
}

/// Tries the v1 then the v2c decoder. `Ok(None)` when a message decoded with an empty community.
pub fn decode(datagram: &[u8]) -> Result<Option<Community>, DecodeError> {
    let (community, version) = match snmp_parser::parse_snmp_v1(datagram) {
        Ok((_, msg)) => (msg.community, "1"),
        Err(v1) => match snmp_parser::parse_snmp_v2c(datagram) {
            Ok((_, msg)) => (msg.community, "2c"),
            Err(v2) => return Err(DecodeError::Snmp(format!("v1: {:?}, v2c: {:?}", v1, v2))),
        },
    };

    if community.is_empty() {
        return Ok(None);
    }
    Ok(Some(Community {
        community: community.to_string(),
        version,
    }))
}
