use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use log::{debug, info};
use tokio::net::UdpSocket;

use super::{bind_udp, SharedSink};
use crate::configuration::types::Protocol;
use crate::data_capture::CaptureRecord;
use crate::error_handling::types::{DecodeError, NetworkError};
use crate::network::listener::ListenerState;

const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct DnsOptions {
    /// Address handed out for type A questions. Every query gets SERVFAIL when unset.
    pub resolve_to: Option<Ipv4Addr>,
}

pub async fn spawn(
    options: DnsOptions,
    state: Arc<ListenerState>,
    sink: SharedSink,
) -> Result<(), NetworkError> {
    let socket = Arc::new(bind_udp(&state).await?);
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
                        let socket = socket.clone();
                        let options = options.clone();
                        let state = state.clone();
                        let sink = sink.clone();
                        tokio::spawn(async move {
                            handle_datagram(&socket, &datagram, peer, &options, &state, &sink).await;
                        });
                    }
                    Err(e) => debug!("dns receive error on {}: {}", state.server(), e),
                },
            }
        }
        debug!("dns listener on {} stopped", state.server());
    });
    Ok(())
}

async fn handle_datagram(
    socket: &UdpSocket,
    datagram: &[u8],
    peer: SocketAddr,
    options: &DnsOptions,
    state: &ListenerState,
    sink: &SharedSink,
) {
    let request = match decode(datagram) {
        Ok(request) => request,
        Err(e) => {
            debug!("Dropping datagram from {}: {}", peer, e);
            return;
        }
    };

    match build_response(&request, options.resolve_to).to_vec() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, peer).await {
                debug!("dns reply to {} failed: {}", peer, e);
            }
        }
        Err(e) => debug!("dns reply encoding failed: {}", e),
    }

    if !request.queries().is_empty() {
        let record = CaptureRecord::access(Protocol::Dns, peer.to_string())
            .with("questions", describe_questions(&request))
            .with("_server", state.server());
        sink.submit(record).await;
    }
}

pub fn decode(datagram: &[u8]) -> Result<Message, DecodeError> {
    Message::from_vec(datagram).map_err(|e| DecodeError::Dns(e.to_string()))
}

/// Space separated `TYPE/name` list of the questions in a query.
pub fn describe_questions(request: &Message) -> String {
    request
        .queries()
        .iter()
        .map(|q| {
            let kind = match q.query_type() {
                RecordType::Unknown(code) => code.to_string(),
                other => other.to_string(),
            };
            format!("{}/{}", kind, q.name())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn build_response(request: &Message, resolve_to: Option<Ipv4Addr>) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .add_queries(request.queries().to_vec());

    let first = request.queries().first();
    match (resolve_to, first) {
        (Some(ip), Some(query)) if query.query_type() == RecordType::A => {
            response
                .set_authoritative(true)
                .set_response_code(ResponseCode::NoError)
                .add_answer(Record::from_rdata(query.name().clone(), 0, RData::A(A(ip))));
        }
        _ => {
            response.set_response_code(ResponseCode::ServFail);
        }
    }
    response
}
