//! Outgoing responses and the shared handle handlers complete them through.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue, IntoHeaderName};
use http::{StatusCode, Version};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::messages;

/// Response payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Json(Value),
}

impl Body {
    fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Json(value) => value.is_null(),
        }
    }
}

/// A response under construction.
#[derive(Debug, Clone, Default)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
    completed: bool,
}

/// Connection facts the serializer needs.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    pub server_name: &'a str,
    pub date: &'a str,
    pub keep_alive: bool,
    pub head_request: bool,
    pub version: Version,
}

static NULL: Value = Value::Null;

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replaces a header. Values that are not valid header text are dropped.
    pub fn add_header<K: IntoHeaderName>(&mut self, name: K, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!("Dropping invalid header value {value:?}"),
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Body::Bytes(body.into());
    }

    /// The JSON payload, or `null` when the body is not JSON.
    pub fn json(&self) -> &Value {
        match &self.body {
            Body::Json(value) => value,
            _ => &NULL,
        }
    }

    /// The JSON payload, turning the body into JSON first.
    pub fn json_mut(&mut self) -> &mut Value {
        if !matches!(self.body, Body::Json(_)) {
            self.body = Body::Json(Value::Null);
        }
        match &mut self.body {
            Body::Json(value) => value,
            _ => unreachable!("body was just made JSON"),
        }
    }

    pub fn set_json(&mut self, value: Value) {
        self.body = Body::Json(value);
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Marks the response finished; later pipeline stages leave it alone.
    pub fn end(&mut self) {
        self.completed = true;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Serializes status line, headers and body.
    ///
    /// An error status without a body gets a generic Redfish error body, a
    /// `204` never carries one and a `HEAD` response keeps only the length.
    pub fn serialize(&mut self, ctx: &WriteContext<'_>) -> BytesMut {
        if self.status.as_u16() >= 400 && self.body.is_empty() {
            self.body = Body::Json(messages::default_error_body(self.status));
        }

        let no_body = self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
            || self.status.is_informational();

        let payload = match std::mem::take(&mut self.body) {
            Body::Empty => Bytes::new(),
            Body::Bytes(bytes) => bytes,
            Body::Json(value) => {
                if !self.headers.contains_key(header::CONTENT_TYPE) {
                    self.headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                }
                match serde_json::to_vec_pretty(&value) {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(err) => {
                        warn!("Failed to serialize response body: {err}");
                        Bytes::new()
                    }
                }
            }
        };
        let payload = if no_body { Bytes::new() } else { payload };

        set_header(&mut self.headers, header::SERVER, ctx.server_name);
        set_header(&mut self.headers, header::DATE, ctx.date);
        self.headers.insert(
            header::CONNECTION,
            HeaderValue::from_static(if ctx.keep_alive { "keep-alive" } else { "close" }),
        );
        if no_body {
            self.headers.remove(header::CONTENT_LENGTH);
        } else {
            self.headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
        }

        let mut out = BytesMut::with_capacity(256 + payload.len());
        let version = match ctx.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };
        out.put_slice(version.as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.status.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        out.put_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.put_slice(canonical_name(name).as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
        if !ctx.head_request {
            out.put_slice(&payload);
        }
        out
    }
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// `content-length` becomes `Content-Length`.
fn canonical_name(name: &HeaderName) -> String {
    name.as_str()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

struct AsyncRespInner {
    res: RefCell<Response>,
    tx: RefCell<Option<oneshot::Sender<Response>>>,
}

impl Drop for AsyncRespInner {
    fn drop(&mut self) {
        let Some(tx) = self.tx.get_mut().take() else {
            return;
        };
        let res = std::mem::take(self.res.get_mut());
        if tx.send(res).is_err() {
            debug!("Connection is gone, discarding late response");
        }
    }
}

/// Shared handle on a response being built by a handler.
///
/// Handlers clone it into every callback that still has work to do. When the
/// last clone is dropped the response is handed back to the connection. If
/// the connection was torn down in the meantime the hand-off is a no-op.
///
/// ```rust
/// use bmcweb_http::response::{AsyncResp, Response};
/// use http::StatusCode;
///
/// let (resp, mut rx) = AsyncResp::new(Response::new());
/// let later = resp.clone();
/// drop(resp);
/// assert!(rx.try_recv().is_err());
///
/// later.res().set_status(StatusCode::ACCEPTED);
/// drop(later);
/// assert_eq!(rx.try_recv().unwrap().status(), StatusCode::ACCEPTED);
/// ```
#[derive(Clone)]
pub struct AsyncResp(Rc<AsyncRespInner>);

impl AsyncResp {
    pub fn new(res: Response) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let inner = AsyncRespInner {
            res: RefCell::new(res),
            tx: RefCell::new(Some(tx)),
        };
        (Self(Rc::new(inner)), rx)
    }

    /// Borrows the response. Do not hold the borrow across an `.await`.
    pub fn res(&self) -> RefMut<'_, Response> {
        self.0.res.borrow_mut()
    }

    /// False once the connection stopped waiting for this response.
    pub fn is_alive(&self) -> bool {
        self.0
            .tx
            .borrow()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}
