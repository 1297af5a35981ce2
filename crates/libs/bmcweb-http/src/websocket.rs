//! WebSocket upgrade.
//!
//! The handshake is answered here; framing afterwards is `tokio-tungstenite`.

use bytes::BytesMut;
use http::header;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::connection::BoxedIo;
use crate::prelude::*;
use crate::request::Request;

pub type WebSocket = WebSocketStream<BoxedIo>;

const SUPPORTED_VERSION: &str = "13";

/// Validates the upgrade request and returns the `Sec-WebSocket-Accept` value.
pub fn accept_key(req: &Request) -> Result<String> {
    if !req.is_upgrade() {
        return Err(Error::BadRequest("not a websocket upgrade"));
    }
    if req.header(header::SEC_WEBSOCKET_VERSION) != Some(SUPPORTED_VERSION) {
        return Err(Error::BadRequest("unsupported websocket version"));
    }
    let key = req
        .header(header::SEC_WEBSOCKET_KEY)
        .filter(|key| !key.is_empty())
        .ok_or(Error::BadRequest("missing Sec-WebSocket-Key"))?;
    Ok(derive_accept_key(key.as_bytes()))
}

/// Answers the handshake and wraps the stream. Bytes the client sent after
/// the handshake are handed to the frame reader.
pub(crate) async fn upgrade(
    mut io: BoxedIo,
    leftover: BytesMut,
    accept: &str,
    server_name: &str,
) -> Result<WebSocket> {
    let head = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Server: {server_name}\r\n\r\n"
    );
    io.write_all(head.as_bytes()).await?;
    io.flush().await?;
    Ok(WebSocketStream::from_partially_read(io, leftover.to_vec(), Role::Server, None).await)
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue, Method, Uri, Version};

    use super::*;

    fn upgrade_request(pairs: &[(&'static str, &'static str)]) -> Request {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        Request::new(
            Method::GET,
            Uri::from_static("/subscribe"),
            Version::HTTP_11,
            headers,
            bytes::Bytes::new(),
        )
    }

    #[test]
    fn derives_rfc_accept_key() {
        let req = upgrade_request(&[
            ("upgrade", "websocket"),
            ("connection", "keep-alive, Upgrade"),
            ("sec-websocket-version", "13"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]);
        assert_eq!(accept_key(&req).unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_bad_handshakes() {
        let no_key = upgrade_request(&[
            ("upgrade", "websocket"),
            ("connection", "upgrade"),
            ("sec-websocket-version", "13"),
        ]);
        assert!(accept_key(&no_key).is_err());

        let old = upgrade_request(&[
            ("upgrade", "websocket"),
            ("connection", "upgrade"),
            ("sec-websocket-version", "8"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]);
        assert!(accept_key(&old).is_err());
    }
}
