//! Incoming requests as seen by routing, middleware and handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use bmcweb_auth::privileges::Privileges;
use bmcweb_auth::session::UserSession;
use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::{Method, Uri, Version};
use serde::de::DeserializeOwned;

use crate::prelude::*;

/// A fully read request.
///
/// The connection fills in the caller's identity before routing; after that
/// the request is shared read-only.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
    session: Option<Arc<UserSession>>,
    privileges: Privileges,
}

impl Request {
    pub fn new(method: Method, uri: Uri, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            version,
            headers,
            body,
            peer_addr: None,
            session: None,
            privileges: Privileges::default(),
        }
    }

    /// Shorthand used by tests and internal callers.
    pub fn get(path: &str) -> Self {
        Self::new(
            Method::GET,
            Uri::try_from(path).unwrap_or_default(),
            Version::HTTP_11,
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn set_peer_addr(&mut self, addr: Option<SocketAddr>) {
        self.peer_addr = addr;
    }

    /// The authenticated session, if any.
    pub fn session(&self) -> Option<&Arc<UserSession>> {
        self.session.as_ref()
    }

    /// Binds the caller's session and the privileges it holds.
    pub fn set_session(&mut self, session: Option<Arc<UserSession>>, privileges: Privileges) {
        self.session = session;
        self.privileges = privileges;
    }

    pub fn user_privileges(&self) -> &Privileges {
        &self.privileges
    }

    /// Keep-alive decision: HTTP/1.1 defaults on, HTTP/1.0 off, `Connection`
    /// overrides either way.
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .fold(None, |acc, token| {
                if token.eq_ignore_ascii_case("close") {
                    Some(false)
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    acc.or(Some(true))
                } else {
                    acc
                }
            });
        connection.unwrap_or(self.version >= Version::HTTP_11)
    }

    /// True for a WebSocket upgrade request.
    pub fn is_upgrade(&self) -> bool {
        let upgrade = self
            .header(header::UPGRADE)
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self
            .headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        upgrade && connection
    }

    /// True when the client prefers HTML, i.e. a browser.
    pub fn is_browser(&self) -> bool {
        self.header(header::ACCEPT)
            .is_some_and(|accept| accept.contains("text/html"))
    }
}
