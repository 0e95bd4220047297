//! HTTP/1.1 Upgrade exchange.
//!
//! Both sides read the head through an `AsyncBufRead` so that bytes following
//! the blank line stay buffered for the frame reader.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, WsError};

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// The only protocol version spoken.
pub const WEBSOCKET_VERSION: &str = "13";

/// Byte budget for a request head read by the server.
const MAX_REQUEST_BYTES: usize = 8 * 1024;
/// Byte budget for a response head read by the client.
const MAX_RESPONSE_BYTES: usize = 4 * 1024;

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Target of a client handshake.
#[derive(Clone, Debug)]
pub struct ClientRequest<'a> {
    /// Host name sent in the `Host` header.
    pub host: &'a str,
    /// Port sent in the `Host` header.
    pub port: u16,
    /// Request path.
    pub path: &'a str,
}

/// A validated upgrade request, as seen by the server.
#[derive(Clone, Debug)]
pub struct UpgradeRequest {
    /// Request target.
    pub path: String,
    /// Headers in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
    /// The client's `Sec-WebSocket-Key`.
    pub key: String,
}

impl UpgradeRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// `base64(SHA1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.trim().as_bytes());
    sha.update(WEBSOCKET_GUID.as_bytes());
    B64.encode(sha.finalize())
}

/// A fresh random base64-encoded 16-byte key.
pub fn generate_key() -> String {
    B64.encode(rand::random::<[u8; 16]>())
}

/// Perform the client side of the handshake.
///
/// Succeeds only on a `101` status line; when `verify_accept` is set the
/// server's `Sec-WebSocket-Accept` must also match the key that was sent.
pub async fn client_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    request: &ClientRequest<'_>,
    verify_accept: bool,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let key = generate_key();
    let head = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n\r\n",
        path = request.path,
        host = request.host,
        port = request.port,
    );
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await?;

    let lines = read_head(reader, MAX_RESPONSE_BYTES).await?;
    let (status, rest) = lines
        .split_first()
        .ok_or_else(|| WsError::HandshakeRejected("empty response".into()))?;
    debug!(status = %status, "handshake response");

    if status.split_whitespace().nth(1) != Some("101") {
        return Err(WsError::HandshakeRejected(format!("unexpected status line: {status}")));
    }

    if verify_accept {
        let headers = parse_headers(rest)?;
        let expected = accept_key(&key);
        match find_header(&headers, "sec-websocket-accept") {
            Some(got) if got == expected => {}
            Some(got) => {
                return Err(WsError::HandshakeRejected(format!(
                    "Sec-WebSocket-Accept mismatch: expected {expected}, got {got}"
                )));
            }
            None => {
                return Err(WsError::HandshakeRejected("missing Sec-WebSocket-Accept".into()));
            }
        }
    }
    Ok(())
}

/// Perform the server side of the handshake.
///
/// On rejection a plain `400 Bad Request` is written and the write side is
/// shut down; no WebSocket close frame is ever sent.
pub async fn server_handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<UpgradeRequest>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = match read_upgrade_request(reader).await {
        Ok(request) => request,
        Err(err) => {
            let _ = writer.write_all(BAD_REQUEST).await;
            let _ = writer.shutdown().await;
            return Err(err);
        }
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(&request.key)
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(request)
}

async fn read_upgrade_request<R>(reader: &mut R) -> Result<UpgradeRequest>
where
    R: AsyncBufRead + Unpin,
{
    let lines = read_head(reader, MAX_REQUEST_BYTES).await?;
    let (request_line, rest) = lines
        .split_first()
        .ok_or_else(|| WsError::HandshakeRejected("empty request".into()))?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(WsError::HandshakeRejected(format!("malformed request line: {request_line}")));
    };
    if method != "GET" {
        return Err(WsError::HandshakeRejected(format!("unsupported method {method}")));
    }
    if version != "HTTP/1.1" {
        return Err(WsError::HandshakeRejected(format!("unsupported version {version}")));
    }

    let headers = parse_headers(rest)?;

    let upgrade = find_header(&headers, "upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(WsError::HandshakeRejected("missing Upgrade: websocket".into()));
    }
    let connection = find_header(&headers, "connection").unwrap_or_default();
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(WsError::HandshakeRejected("missing Connection: Upgrade".into()));
    }
    let version = find_header(&headers, "sec-websocket-version").unwrap_or_default();
    if version != WEBSOCKET_VERSION {
        return Err(WsError::HandshakeRejected(format!(
            "unsupported Sec-WebSocket-Version {version:?}"
        )));
    }
    let key = find_header(&headers, "sec-websocket-key")
        .ok_or_else(|| WsError::HandshakeRejected("missing Sec-WebSocket-Key".into()))?
        .to_owned();
    match B64.decode(&key) {
        Ok(raw) if raw.len() == 16 => {}
        _ => return Err(WsError::HandshakeRejected(format!("invalid Sec-WebSocket-Key {key:?}"))),
    }

    Ok(UpgradeRequest {
        path: path.to_owned(),
        headers,
        key,
    })
}

/// Read CRLF-terminated lines up to the blank line, within `budget` bytes.
async fn read_head<R>(reader: &mut R, budget: usize) -> Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut consumed = 0usize;
    loop {
        let remaining = budget - consumed;
        let mut line = Vec::new();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut line)
            .await?;
        consumed += n;

        if !line.ends_with(b"\n") {
            let reason = if consumed >= budget {
                format!("head exceeds {budget} bytes")
            } else {
                "stream closed during handshake".to_owned()
            };
            return Err(WsError::HandshakeRejected(reason));
        }

        let text = String::from_utf8(line)
            .map_err(|_| WsError::HandshakeRejected("head is not valid UTF-8".into()))?;
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(lines);
        }
        lines.push(text.to_owned());
    }
}

fn parse_headers(lines: &[String]) -> Result<Vec<(String, String)>> {
    lines
        .iter()
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                .ok_or_else(|| WsError::HandshakeRejected(format!("malformed header line: {line}")))
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{BufReader, duplex};

    const VALID_REQUEST: &str = "GET / HTTP/1.1\r\n\
        Host: peeper.local:6789\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_16_bytes() {
        let key = generate_key();
        assert_eq!(B64.decode(key).unwrap().len(), 16);
    }

    async fn run_server(request: &str) -> (Result<UpgradeRequest>, String) {
        let mut reader = BufReader::new(request.as_bytes());
        let mut out = Vec::new();
        let result = server_handshake(&mut reader, &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn server_accepts_valid_request() {
        let (result, response) = run_server(VALID_REQUEST).await;
        let request = result.unwrap();
        assert_eq!(request.path, "/");
        assert_eq!(request.header("host"), Some("peeper.local:6789"));
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn server_rejects_missing_upgrade() {
        let request = VALID_REQUEST.replace("Upgrade: websocket\r\n", "");
        let (result, response) = run_server(&request).await;
        assert!(matches!(result, Err(WsError::HandshakeRejected(_))));
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn server_rejects_wrong_version() {
        let request = VALID_REQUEST.replace("Version: 13", "Version: 8");
        let (result, _) = run_server(&request).await;
        assert!(matches!(result, Err(WsError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn server_rejects_missing_key() {
        let request = VALID_REQUEST.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        let (result, _) = run_server(&request).await;
        assert!(matches!(result, Err(WsError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn server_rejects_short_key() {
        let request = VALID_REQUEST.replace("dGhlIHNhbXBsZSBub25jZQ==", "c2hvcnQ=");
        let (result, _) = run_server(&request).await;
        assert!(matches!(result, Err(WsError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn server_rejects_post() {
        let request = VALID_REQUEST.replace("GET /", "POST /");
        let (result, _) = run_server(&request).await;
        assert!(matches!(result, Err(WsError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn server_rejects_truncated_head() {
        let (result, _) = run_server("GET / HTTP/1.1\r\nHost: x\r\n").await;
        assert!(matches!(result, Err(WsError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn server_rejects_oversized_head() {
        let mut request = String::from("GET / HTTP/1.1\r\n");
        request.push_str(&format!("X-Padding: {}\r\n\r\n", "a".repeat(MAX_REQUEST_BYTES)));
        let (result, _) = run_server(&request).await;
        match result {
            Err(WsError::HandshakeRejected(reason)) => assert!(reason.contains("exceeds")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn head_leaves_trailing_bytes_buffered() {
        let data = format!("{VALID_REQUEST}tail");
        let mut reader = BufReader::new(data.as_bytes());
        let mut out = Vec::new();
        let _ = server_handshake(&mut reader, &mut out).await.unwrap();
        let mut rest = String::new();
        let _ = reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "tail");
    }

    /// Server stub that answers any request with a canned response.
    async fn client_against(response: &'static str, verify: bool) -> Result<()> {
        let (client, server) = duplex(8 * 1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let stub = tokio::spawn(async move {
            let mut server_read = BufReader::new(server_read);
            let _ = read_head(&mut server_read, MAX_REQUEST_BYTES).await;
            server_write.write_all(response.as_bytes()).await.unwrap();
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);
        let request = ClientRequest {
            host: "peeper.local",
            port: 6789,
            path: "/",
        };
        let result = client_handshake(&mut client_read, &mut client_write, &request, verify).await;
        stub.await.unwrap();
        result
    }

    #[tokio::test]
    async fn client_rejects_non_101_status() {
        let err = client_against("HTTP/1.1 403 Forbidden\r\n\r\n", false)
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn lax_client_accepts_101_without_accept_header() {
        client_against("HTTP/1.1 101 Switching Protocols\r\n\r\n", false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verifying_client_rejects_wrong_accept() {
        let err = client_against(
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: bm9wZQ==\r\n\r\n",
            true,
        )
        .await
        .unwrap_err();
        match err {
            WsError::HandshakeRejected(reason) => assert!(reason.contains("mismatch")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn verifying_client_rejects_missing_accept() {
        let err = client_against("HTTP/1.1 101 Switching Protocols\r\n\r\n", true)
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn client_and_server_agree_on_accept_key() {
        let (client, server) = duplex(8 * 1024);
        let server_task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut read = BufReader::new(read);
            server_handshake(&mut read, &mut write).await
        });

        let (read, mut write) = tokio::io::split(client);
        let mut read = BufReader::new(read);
        let request = ClientRequest {
            host: "localhost",
            port: 6789,
            path: "/signals",
        };
        client_handshake(&mut read, &mut write, &request, true)
            .await
            .unwrap();
        let upgrade = server_task.await.unwrap().unwrap();
        assert_eq!(upgrade.path, "/signals");
    }
}
