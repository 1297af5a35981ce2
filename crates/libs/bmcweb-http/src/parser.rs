//! HTTP/1.1 request framing on top of `httparse`.
//!
//! Parsing happens in two steps so the connection can authenticate the caller
//! between them: [`parse_head`] consumes the request line and header section,
//! then a [`BodyDecoder`] consumes the body announced by the head.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri, Version};

use crate::prelude::*;

/// Header slots preallocated for `httparse`.
pub const MAX_HEADERS: usize = 64;

/// Longest accepted chunk-size or trailer line.
pub const MAX_CHUNK_HEAD: usize = 128;

/// How the body of a request is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    Length(u64),
    Chunked,
}

/// Request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: BodyKind,
}

impl RequestHead {
    /// Declared body length, when known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self.body {
            BodyKind::None => Some(0),
            BodyKind::Length(len) => Some(len),
            BodyKind::Chunked => None,
        }
    }
}

/// Parses a complete head from the front of `buf`, consuming it.
///
/// Returns `Ok(None)` while more bytes are needed.
pub fn parse_head(buf: &mut BytesMut, header_limit: usize) -> Result<Option<RequestHead>> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut slots);

    let consumed = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > header_limit {
                return Err(Error::HeaderTooLarge(header_limit));
            }
            return Ok(None);
        }
        Err(httparse::Error::TooManyHeaders) => return Err(Error::HeaderTooLarge(header_limit)),
        Err(err) => return Err(err.into()),
    };
    if consumed > header_limit {
        return Err(Error::HeaderTooLarge(header_limit));
    }

    let method = parsed
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(Error::BadRequest("invalid method"))?;
    let uri = parsed
        .path
        .and_then(|p| Uri::try_from(p).ok())
        .ok_or(Error::BadRequest("invalid request target"))?;
    let version = match parsed.version {
        Some(1) => Version::HTTP_11,
        Some(0) => Version::HTTP_10,
        _ => return Err(Error::BadRequest("unsupported HTTP version")),
    };

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for h in parsed.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| Error::BadRequest("invalid header name"))?;
        let value =
            HeaderValue::from_bytes(h.value).map_err(|_| Error::BadRequest("invalid header value"))?;
        headers.append(name, value);
    }

    buf.advance(consumed);

    if version == Version::HTTP_11 && !headers.contains_key(header::HOST) {
        return Err(Error::BadRequest("missing Host header"));
    }

    let body = body_kind(&headers)?;
    Ok(Some(RequestHead {
        method,
        uri,
        version,
        headers,
        body,
    }))
}

fn body_kind(headers: &HeaderMap) -> Result<BodyKind> {
    let mut lengths = headers
        .get_all(header::CONTENT_LENGTH)
        .iter()
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or(Error::BadRequest("invalid Content-Length"))
        })
        .collect::<Result<Vec<u64>>>()?;
    lengths.dedup();
    if lengths.len() > 1 {
        return Err(Error::BadRequest("conflicting Content-Length"));
    }

    if let Some(encoding) = headers.get(header::TRANSFER_ENCODING) {
        let chunked = encoding
            .to_str()
            .ok()
            .and_then(|v| v.rsplit(',').next())
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
        if !chunked {
            return Err(Error::BadRequest("unsupported Transfer-Encoding"));
        }
        if !lengths.is_empty() {
            return Err(Error::BadRequest("both Content-Length and Transfer-Encoding"));
        }
        return Ok(BodyKind::Chunked);
    }

    Ok(match lengths.first() {
        Some(0) | None => BodyKind::None,
        Some(&len) => BodyKind::Length(len),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    Length(u64),
    Chunked(ChunkState),
    Done,
}

/// Incremental body decoder enforcing the body size limit.
#[derive(Debug)]
pub struct BodyDecoder {
    decoding: Decoding,
    body: BytesMut,
    limit: usize,
}

impl BodyDecoder {
    pub fn new(kind: BodyKind, limit: usize) -> Result<Self> {
        let decoding = match kind {
            BodyKind::None => Decoding::Done,
            BodyKind::Length(len) => {
                if len > limit as u64 {
                    return Err(Error::BodyTooLarge(limit));
                }
                Decoding::Length(len)
            }
            BodyKind::Chunked => Decoding::Chunked(ChunkState::Size),
        };
        Ok(Self {
            decoding,
            body: BytesMut::new(),
            limit,
        })
    }

    /// Body bytes received so far.
    pub fn received(&self) -> usize {
        self.body.len()
    }

    /// Consumes body bytes from `buf`. Returns the body once complete.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            match self.decoding {
                Decoding::Done => return Ok(Some(self.body.split().freeze())),
                Decoding::Length(remaining) => {
                    let take = remaining.min(buf.len() as u64) as usize;
                    self.body.extend_from_slice(&buf.split_to(take));
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.decoding = Decoding::Done;
                    } else {
                        self.decoding = Decoding::Length(remaining);
                        return Ok(None);
                    }
                }
                Decoding::Chunked(state) => match self.decode_chunk(state, buf)? {
                    Some(next) => self.decoding = next,
                    None => return Ok(None),
                },
            }
        }
    }

    fn decode_chunk(&mut self, state: ChunkState, buf: &mut BytesMut) -> Result<Option<Decoding>> {
        match state {
            ChunkState::Size => {
                let Some(line) = take_line(buf)? else {
                    return Ok(None);
                };
                let size = line.split(';').next().unwrap_or("").trim();
                let size = u64::from_str_radix(size, 16)
                    .map_err(|_| Error::BadRequest("invalid chunk size"))?;
                if size == 0 {
                    return Ok(Some(Decoding::Chunked(ChunkState::Trailer)));
                }
                let total = (self.body.len() as u64).checked_add(size);
                if total.is_none_or(|total| total > self.limit as u64) {
                    return Err(Error::BodyTooLarge(self.limit));
                }
                Ok(Some(Decoding::Chunked(ChunkState::Data(size))))
            }
            ChunkState::Data(remaining) => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = remaining.min(buf.len() as u64) as usize;
                if self.body.len().saturating_add(take) > self.limit {
                    return Err(Error::BodyTooLarge(self.limit));
                }
                self.body.extend_from_slice(&buf.split_to(take));
                let remaining = remaining - take as u64;
                Ok(Some(Decoding::Chunked(if remaining == 0 {
                    ChunkState::DataEnd
                } else {
                    ChunkState::Data(remaining)
                })))
            }
            ChunkState::DataEnd => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(Error::BadRequest("missing CRLF after chunk"));
                }
                buf.advance(2);
                Ok(Some(Decoding::Chunked(ChunkState::Size)))
            }
            ChunkState::Trailer => {
                let Some(line) = take_line(buf)? else {
                    return Ok(None);
                };
                if line.is_empty() {
                    Ok(Some(Decoding::Done))
                } else {
                    Ok(Some(Decoding::Chunked(ChunkState::Trailer)))
                }
            }
        }
    }
}

/// Pops one CRLF terminated line, without the terminator.
fn take_line(buf: &mut BytesMut) -> Result<Option<String>> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            if end > MAX_CHUNK_HEAD {
                return Err(Error::BadRequest("chunk line too long"));
            }
            let line = buf.split_to(end);
            buf.advance(2);
            String::from_utf8(line.to_vec())
                .map(Some)
                .map_err(|_| Error::BadRequest("invalid chunk line"))
        }
        None if buf.len() > MAX_CHUNK_HEAD => Err(Error::BadRequest("chunk line too long")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(s: &str) -> BytesMut {
        BytesMut::from(s.as_bytes())
    }

    #[test]
    fn partial_then_complete() {
        let mut b = buf("GET /redfish/v1 HTTP/1.1\r\nHost: bmc\r\n");
        assert!(parse_head(&mut b, 8192).unwrap().is_none());
        b.extend_from_slice(b"\r\nNEXT");
        let head = parse_head(&mut b, 8192).unwrap().unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.uri.path(), "/redfish/v1");
        assert_eq!(head.body, BodyKind::None);
        assert_eq!(&b[..], b"NEXT");
    }

    #[test]
    fn missing_host_on_http11() {
        let mut b = buf("GET / HTTP/1.1\r\n\r\n");
        assert!(matches!(parse_head(&mut b, 8192), Err(Error::BadRequest(_))));
        let mut b = buf("GET / HTTP/1.0\r\n\r\n");
        assert!(parse_head(&mut b, 8192).unwrap().is_some());
    }

    #[test]
    fn oversized_head() {
        let mut b = buf("GET / HTTP/1.1\r\nX-Big: ");
        b.extend_from_slice(&vec![b'a'; 9000]);
        assert!(matches!(
            parse_head(&mut b, 8192),
            Err(Error::HeaderTooLarge(8192))
        ));
    }

    #[test]
    fn content_length_body() {
        let mut b = buf("POST /x HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhel");
        let head = parse_head(&mut b, 8192).unwrap().unwrap();
        assert_eq!(head.content_length(), Some(5));
        let mut decoder = BodyDecoder::new(head.body, 1024).unwrap();
        assert!(decoder.decode(&mut b).unwrap().is_none());
        assert_eq!(decoder.received(), 3);
        b.extend_from_slice(b"loGET");
        assert_eq!(&decoder.decode(&mut b).unwrap().unwrap()[..], b"hello");
        assert_eq!(&b[..], b"GET");
    }

    #[test]
    fn chunked_body() {
        let mut b = buf(
            "POST /x HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n\
             5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n",
        );
        let head = parse_head(&mut b, 8192).unwrap().unwrap();
        assert_eq!(head.body, BodyKind::Chunked);
        let mut decoder = BodyDecoder::new(head.body, 1024).unwrap();
        assert_eq!(
            &decoder.decode(&mut b).unwrap().unwrap()[..],
            b"hello world"
        );
        assert!(b.is_empty());
    }

    #[test]
    fn body_limits() {
        assert!(matches!(
            BodyDecoder::new(BodyKind::Length(11), 10),
            Err(Error::BodyTooLarge(10))
        ));
        let mut decoder = BodyDecoder::new(BodyKind::Chunked, 4).unwrap();
        let mut b = buf("5\r\nhello\r\n0\r\n\r\n");
        assert!(matches!(decoder.decode(&mut b), Err(Error::BodyTooLarge(4))));
    }

    #[test]
    fn huge_chunk_size_after_first_chunk() {
        let mut decoder = BodyDecoder::new(BodyKind::Chunked, 4096).unwrap();
        let mut b = buf("1\r\na\r\nffffffffffffffff\r\n");
        assert!(matches!(decoder.decode(&mut b), Err(Error::BodyTooLarge(4096))));
        assert_eq!(decoder.received(), 1);
    }

    #[test]
    fn rejects_ambiguous_framing() {
        let mut b = buf(
            "POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        assert!(parse_head(&mut b, 8192).is_err());
        let mut b = buf("POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n");
        assert!(parse_head(&mut b, 8192).is_err());
    }
}
