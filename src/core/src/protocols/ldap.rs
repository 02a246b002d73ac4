use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use ldap3_proto::proto::{
    LdapBindResponse, LdapExtendedResponse, LdapMsg, LdapOp, LdapResult, LdapResultCode,
};
use ldap3_proto::simple::*;
use ldap3_proto::LdapCodec;
use log::debug;

const REFUSAL: &str = "Operation not supported";
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::{bind_tcp, serve_tcp, SharedSink};
use crate::configuration::types::Protocol;
use crate::data_capture::CaptureRecord;
use crate::error_handling::types::NetworkError;
use crate::network::listener::ListenerState;

#[derive(Clone, Default)]
pub struct LdapOptions {
    /// Present for the LDAPS listeners.
    pub tls: Option<TlsAcceptor>,
}

pub async fn spawn(
    options: LdapOptions,
    state: Arc<ListenerState>,
    sink: SharedSink,
) -> Result<(), NetworkError> {
    let listener = bind_tcp(&state).await?;
    let protocol = state.protocol;
    let server = state.server();

    serve_tcp(listener, state, move |stream, peer| {
        let sink = sink.clone();
        let server = server.clone();
        let tls = options.tls.clone();
        async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => handle(stream, peer, protocol, server, sink).await,
                    Err(e) => debug!("ldaps handshake with {} failed: {}", peer, e),
                },
                None => handle(stream, peer, protocol, server, sink).await,
            }
        }
    });
    Ok(())
}

pub async fn handle<S>(
    stream: S,
    peer: SocketAddr,
    protocol: Protocol,
    server: String,
    sink: SharedSink,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut requests = FramedRead::new(read_half, LdapCodec::default());
    let mut responses = FramedWrite::new(write_half, LdapCodec::default());

    while let Some(frame) = requests.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!("{} frame from {} rejected: {:?}", protocol, peer, e);
                return;
            }
        };

        if let LdapOp::AbandonRequest(_) = msg.op {
            continue;
        }
        let refusal = refusal(msg.msgid, &msg.op);
        match ServerOps::try_from(msg) {
            Ok(ServerOps::SimpleBind(bind)) => {
                let record = CaptureRecord::credential(protocol, peer.to_string())
                    .with("username", bind.dn.clone())
                    .with("password", bind.pw.clone())
                    .with("method", protocol.as_str())
                    .with("_server", server.clone());
                sink.submit(record).await;

                if !send(&mut responses, bind.gen_invalid_cred()).await {
                    return;
                }
            }
            Ok(ServerOps::Unbind(_)) => return,
            _ => match refusal {
                Some(reply) => {
                    debug!("{} operation from {} refused", protocol, peer);
                    if !send(&mut responses, reply).await {
                        return;
                    }
                }
                None => {
                    let notice = DisconnectionNotice::gen(LdapResultCode::ProtocolError, REFUSAL);
                    let _ = send(&mut responses, notice).await;
                    return;
                }
            },
        }
    }
}

/// `unwillingToPerform` answer of the response type matching a request, with the same message id.
/// `None` for messages that are not requests.
fn refusal(msgid: i32, op: &LdapOp) -> Option<LdapMsg> {
    let res = LdapResult {
        code: LdapResultCode::UnwillingToPerform,
        matcheddn: String::new(),
        message: REFUSAL.to_string(),
        referral: Vec::new(),
    };
    let op = match op {
        LdapOp::BindRequest(_) => LdapOp::BindResponse(LdapBindResponse {
            res,
            saslcreds: None,
        }),
        LdapOp::SearchRequest(_) => LdapOp::SearchResultDone(res),
        LdapOp::ModifyRequest(_) => LdapOp::ModifyResponse(res),
        LdapOp::AddRequest(_) => LdapOp::AddResponse(res),
        LdapOp::DelRequest(_) => LdapOp::DelResponse(res),
        LdapOp::ModifyDNRequest(_) => LdapOp::ModifyDNResponse(res),
        LdapOp::CompareRequest(_) => LdapOp::CompareResult(res),
        LdapOp::ExtendedRequest(_) => LdapOp::ExtendedResponse(LdapExtendedResponse {
            res,
            name: None,
            value: None,
        }),
        _ => return None,
    };
    Some(LdapMsg {
        msgid,
        op,
        ctrl: vec![],
    })
}

/// Sends one response. `futures::SinkExt::send` flushes the frame.
async fn send<W>(responses: &mut FramedWrite<W, LdapCodec>, msg: LdapMsg) -> bool
where
    W: AsyncWrite + Unpin,
{
    responses.send(msg).await.is_ok()
}
