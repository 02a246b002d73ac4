use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{bind_tcp, serve_tcp, SharedSink};
use crate::configuration::types::Protocol;
use crate::data_capture::CaptureRecord;
use crate::error_handling::types::NetworkError;
use crate::network::listener::ListenerState;

pub const BANNER: &str = "Welcome to FTP server.";
pub const MAX_LINE: u64 = 1024;
pub const LINE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn spawn(state: Arc<ListenerState>, sink: SharedSink) -> Result<(), NetworkError> {
    let listener = bind_tcp(&state).await?;
    let server = state.clone();
    serve_tcp(listener, state, move |stream, peer| {
        let sink = sink.clone();
        let server = server.server();
        async move { handle(stream, peer, server, sink).await }
    });
    Ok(())
}

fn reply(code: u16, text: &str) -> String {
    format!("{} {}\r\n", code, text)
}

/// Reads one line, bounded in size and time. `None` on EOF, timeout or I/O failure.
async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Option<String> {
    let mut raw = Vec::new();
    let mut limited = reader.take(MAX_LINE);
    match tokio::time::timeout(LINE_TIMEOUT, limited.read_until(b'\n', &mut raw)).await {
        Ok(Ok(0)) | Err(_) => None,
        Ok(Ok(_)) => Some(String::from_utf8_lossy(&raw).trim_end_matches(['\r', '\n']).to_string()),
        Ok(Err(e)) => {
            debug!("ftp read error: {}", e);
            None
        }
    }
}

pub async fn handle<S>(stream: S, peer: SocketAddr, server: String, sink: SharedSink)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    if writer.write_all(reply(220, BANNER).as_bytes()).await.is_err() {
        return;
    }

    let mut username = String::new();
    let mut password = String::new();

    while let Some(line) = read_line(&mut reader).await {
        let response = match line.split_once(' ') {
            Some(("USER", name)) => {
                username = name.to_string();
                reply(331, "Username ok, password required")
            }
            Some(("PASS", pass)) => {
                password = pass.to_string();
                reply(230, "Password ok, continue")
            }
            _ => reply(500, "Command not found"),
        };
        if writer.write_all(response.as_bytes()).await.is_err() {
            return;
        }

        if !username.is_empty() && !password.is_empty() {
            let record = CaptureRecord::credential(Protocol::Ftp, peer.to_string())
                .with("username", username)
                .with("password", password)
                .with("_server", server);
            sink.submit(record).await;
            let _ = writer.shutdown().await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemorySink;
    use tokio::net::TcpStream;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_user_pass_dialogue() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mock = Builder::new()
            .write(b"220 Welcome to FTP server.\r\n")
            .read(b"USER bob\r\n")
            .write(b"331 Username ok, password required\r\n")
            .read(b"PASS hunter2\r\n")
            .write(b"230 Password ok, continue\r\n")
            .build();

        let sink = MemorySink::new();
        handle(mock, peer(), "127.0.0.1:21".to_string(), sink.clone()).await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("username"), Some("bob"));
        assert_eq!(records[0].get("password"), Some("hunter2"));
        assert_eq!(records[0].get("_server"), Some("127.0.0.1:21"));
        assert_eq!(records[0].source, "192.0.2.10:40000");
    }

    #[tokio::test]
    async fn test_unknown_commands_get_500() {
        let mock = Builder::new()
            .write(b"220 Welcome to FTP server.\r\n")
            .read(b"SYST\r\n")
            .write(b"500 Command not found\r\n")
            .read(b"LIST /\r\n")
            .write(b"500 Command not found\r\n")
            .build();

        let sink = MemorySink::new();
        handle(mock, peer(), "127.0.0.1:21".to_string(), sink.clone()).await;
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_over_loopback() {
        let sink = MemorySink::new();
        let state = Arc::new(ListenerState::new(Protocol::Ftp, "127.0.0.1", 0));
        spawn(state.clone(), sink.clone()).await.unwrap();
        let addr = state.local_addr().unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "220 Welcome to FTP server.");
        write_half.write_all(b"USER alice\r\n").await.unwrap();
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("331"));
        write_half.write_all(b"PASS s3cret\r\n").await.unwrap();
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("230"));
        assert!(lines.next_line().await.unwrap().is_none());

        let records = sink.wait_for(1).await;
        assert_eq!(records[0].get("password"), Some("s3cret"));
        assert_eq!(records[0].get("_server"), Some(state.server().as_str()));
        state.shutdown();
    }
}
