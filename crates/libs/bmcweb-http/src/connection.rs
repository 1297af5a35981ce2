//! One accepted stream and its request loop.
//!
//! A connection reads one request at a time: the header section, then the
//! caller's identity, then the body, then the dispatch and finally the
//! response write. A single deadline, kept in the shared timer queue, covers
//! the whole exchange; when it fires the connection is torn down whatever it
//! was doing. With keep-alive the loop starts over with fresh request state
//! and only the bytes that followed the previous request still buffered.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use bmcweb_auth::mutual_tls::PeerCertificate;
use bmcweb_auth::session::UserSession;
use bytes::{Bytes, BytesMut};
use http::{Method, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::authentication::{self, TempSession};
use crate::parser::{self, BodyDecoder, BodyKind, RequestHead};
use crate::prelude::*;
use crate::request::Request;
use crate::response::{Response, WriteContext};
use crate::routing::{Params, Routed, RuleHandler};
use crate::routing::rule::{SseFn, WebSocketFn};
use crate::server::DateCache;
use crate::sse::SseConnection;
use crate::timer_queue::{SharedTimerQueue, TimerToken};
use crate::websocket;

/// Byte stream a connection runs on: plain TCP, TLS, or an in-memory pipe.
pub trait Io: AsyncRead + AsyncWrite + Unpin {}

impl<T: AsyncRead + AsyncWrite + Unpin> Io for T {}

pub type BoxedIo = Box<dyn Io>;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    Closing,
    Closed,
}

struct DeadlineInner {
    timers: SharedTimerQueue,
    token: Cell<Option<TimerToken>>,
    /// Windows still to wait once the pending entry fires.
    remaining: Cell<u32>,
    expired: Cell<bool>,
    notify: Notify,
}

/// A connection deadline counted in timer-queue windows.
#[derive(Clone)]
pub struct Deadline(Rc<DeadlineInner>);

impl Deadline {
    pub fn new(timers: SharedTimerQueue) -> Self {
        Self(Rc::new(DeadlineInner {
            timers,
            token: Cell::new(None),
            remaining: Cell::new(0),
            expired: Cell::new(false),
            notify: Notify::new(),
        }))
    }

    /// Restarts the deadline `windows` windows from now.
    ///
    /// Returns `false` when the timer queue is full.
    pub fn arm(&self, windows: u32) -> bool {
        self.disarm();
        self.0.expired.set(false);
        self.0.remaining.set(windows.saturating_sub(1));
        Self::schedule(&self.0)
    }

    /// Grants `windows` more windows without touching the queue.
    pub fn renew(&self, windows: u32) {
        if self.0.token.get().is_some() {
            self.0.remaining.set(windows.saturating_sub(1));
        }
    }

    pub fn disarm(&self) {
        if let Some(token) = self.0.token.take() {
            self.0.timers.cancel(token);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.0.token.get().is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.0.expired.get()
    }

    /// Resolves once the deadline fires.
    pub async fn expired(&self) {
        while !self.0.expired.get() {
            self.0.notify.notified().await;
        }
    }

    fn schedule(inner: &Rc<DeadlineInner>) -> bool {
        let weak: Weak<DeadlineInner> = Rc::downgrade(inner);
        let token = inner.timers.add(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.token.set(None);
            let remaining = inner.remaining.get();
            if remaining > 0 {
                inner.remaining.set(remaining - 1);
                if Self::schedule(&inner) {
                    return;
                }
            }
            inner.expired.set(true);
            inner.notify.notify_one();
        }));
        inner.token.set(token);
        token.is_some()
    }
}

/// What the request loop does after one exchange.
enum Next {
    KeepAlive,
    Close,
    WebSocket {
        handler: WebSocketFn,
        req: Rc<Request>,
        params: Params,
        accept: String,
        temp: TempSession,
    },
    Sse {
        handler: SseFn,
        req: Rc<Request>,
        params: Params,
        temp: TempSession,
    },
}

pub struct Connection {
    io: BoxedIo,
    buf: BytesMut,
    peer: Option<SocketAddr>,
    cert: Option<PeerCertificate>,
    tls_session: Option<Arc<UserSession>>,
    app: Rc<App>,
    date: DateCache,
    deadline: Deadline,
    state: ConnState,
}

impl Connection {
    pub fn new(
        io: impl Io + 'static,
        peer: Option<SocketAddr>,
        cert: Option<PeerCertificate>,
        app: Rc<App>,
        timers: SharedTimerQueue,
        date: DateCache,
    ) -> Self {
        Self {
            io: Box::new(io),
            buf: BytesMut::with_capacity(READ_CHUNK),
            peer,
            cert,
            tls_session: None,
            app,
            date,
            deadline: Deadline::new(timers),
            state: ConnState::Idle,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn set_state(&mut self, next: ConnState) {
        if self.state != next {
            debug!("{:?}: {:?} -> {:?}", self.peer, self.state, next);
            self.state = next;
        }
    }

    /// Serves requests until the peer leaves, an error occurs or the
    /// deadline fires.
    pub async fn run(mut self) {
        if let Some(cert) = &self.cert {
            self.tls_session =
                authentication::mtls_session(cert, &self.app, self.peer.map(|peer| peer.ip()));
        }

        let deadline = self.deadline.clone();
        let next = loop {
            let step = tokio::select! {
                biased;
                _ = deadline.expired() => {
                    info!("Connection from {:?} timed out in {:?}", self.peer, self.state);
                    break Next::Close;
                }
                step = self.serve_one() => step,
            };
            match step {
                Ok(Next::KeepAlive) => continue,
                Ok(next) => break next,
                Err(err) => {
                    self.fail(err).await;
                    break Next::Close;
                }
            }
        };
        self.deadline.disarm();

        match next {
            Next::WebSocket {
                handler,
                req,
                params,
                accept,
                temp,
            } => {
                let server_name = self.app.config().server.server_name.clone();
                let Connection {
                    io,
                    buf,
                    app,
                    tls_session,
                    ..
                } = self;
                match websocket::upgrade(io, buf, &accept, &server_name).await {
                    Ok(ws) => handler(req, ws, params).await,
                    Err(err) => warn!("WebSocket upgrade failed: {err}"),
                }
                drop(temp);
                remove_tls_session(&app, tls_session);
            }
            Next::Sse {
                handler,
                req,
                params,
                temp,
            } => {
                let server_name = self.app.config().server.server_name.clone();
                let date = self.date.get();
                let Connection {
                    io,
                    app,
                    tls_session,
                    ..
                } = self;
                match SseConnection::start(io, &server_name, &date).await {
                    Ok(stream) => handler(req, stream, params).await,
                    Err(err) => warn!("Event stream setup failed: {err}"),
                }
                drop(temp);
                remove_tls_session(&app, tls_session);
            }
            Next::KeepAlive | Next::Close => self.close().await,
        }
    }

    async fn serve_one(&mut self) -> Result<Next> {
        let timeouts = &self.app.config().timeouts;
        let (logged_out, logged_in) = (timeouts.logged_out_windows(), timeouts.logged_in_windows());

        self.set_state(ConnState::ReadingHeaders);
        if !self.deadline.arm(logged_out) {
            warn!("Timer queue full, closing connection from {:?}", self.peer);
            return Ok(Next::Close);
        }
        let Some(head) = self.read_head().await? else {
            return Ok(Next::Close);
        };

        let RequestHead {
            method,
            uri,
            version,
            headers,
            body,
        } = head;
        let declared = head_length(body);
        let mut req = Request::new(method, uri, version, headers, Bytes::new());
        req.set_peer_addr(self.peer);

        let session = authentication::authenticate(&req, &self.app, self.tls_session.as_ref()).await;
        let privileges = session
            .as_ref()
            .map(|session| session.role.privileges(self.app.registry().table()))
            .unwrap_or_default();
        let authenticated = session.is_some();
        let temp = TempSession::new(session.as_ref(), self.app.sessions_arc());
        req.set_session(session, privileges);

        if authenticated {
            self.deadline.renew(logged_in);
        } else if declared.is_some_and(|len| len > self.app.config().limits.anonymous_body_limit as u64) {
            info!(
                "Anonymous request from {:?} declares a {} byte body, dropping connection",
                self.peer,
                declared.unwrap_or_default()
            );
            return Ok(Next::Close);
        }

        self.set_state(ConnState::ReadingBody);
        let body = match self.read_body(body, authenticated, logged_in).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(Next::Close),
            Err(Error::BodyTooLarge(_)) if !authenticated => {
                info!("Anonymous body from {:?} too large, dropping connection", self.peer);
                return Ok(Next::Close);
            }
            Err(err) => return Err(err),
        };
        req.set_body(body);

        let keep_alive = req.keep_alive();
        let head_request = *req.method() == Method::HEAD;
        let req = Rc::new(req);

        self.set_state(ConnState::Dispatching);
        let routed = self.app.resolve(&req);
        if let Routed::Handler { rule, params } = &routed {
            match &rule.handler {
                RuleHandler::WebSocket(handler) if req.is_upgrade() => {
                    match websocket::accept_key(&req) {
                        Ok(accept) => {
                            return Ok(Next::WebSocket {
                                handler: handler.clone(),
                                req,
                                params: params.clone(),
                                accept,
                                temp,
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
                RuleHandler::Sse(handler) => {
                    return Ok(Next::Sse {
                        handler: handler.clone(),
                        req,
                        params: params.clone(),
                        temp,
                    });
                }
                _ => {}
            }
        }

        let mut res = self.app.handle(req.clone(), routed).await;
        drop(temp);

        self.set_state(ConnState::WritingResponse);
        self.write_response(&mut res, keep_alive, head_request, req.version())
            .await?;

        if keep_alive {
            self.set_state(ConnState::Idle);
            Ok(Next::KeepAlive)
        } else {
            Ok(Next::Close)
        }
    }

    /// Reads until a full head is buffered. `None` when the peer left.
    async fn read_head(&mut self) -> Result<Option<RequestHead>> {
        let header_limit = self.app.config().limits.header_limit;
        loop {
            if let Some(head) = parser::parse_head(&mut self.buf, header_limit)? {
                return Ok(Some(head));
            }
            if self.read_more().await? == 0 {
                if !self.buf.is_empty() {
                    debug!("Peer {:?} left mid-request", self.peer);
                }
                return Ok(None);
            }
        }
    }

    /// Reads the body. `None` when the peer left before sending all of it.
    async fn read_body(
        &mut self,
        kind: BodyKind,
        authenticated: bool,
        logged_in_windows: u32,
    ) -> Result<Option<Bytes>> {
        let limits = &self.app.config().limits;
        let limit = if authenticated {
            limits.body_limit
        } else {
            limits.anonymous_body_limit
        };
        let mut decoder = BodyDecoder::new(kind, limit)?;
        loop {
            if let Some(body) = decoder.decode(&mut self.buf)? {
                return Ok(Some(body));
            }
            if self.read_more().await? == 0 {
                return Ok(None);
            }
            if authenticated {
                self.deadline.renew(logged_in_windows);
            }
        }
    }

    async fn read_more(&mut self) -> Result<usize> {
        self.buf.reserve(READ_CHUNK);
        Ok(self.io.read_buf(&mut self.buf).await?)
    }

    async fn write_response(
        &mut self,
        res: &mut Response,
        keep_alive: bool,
        head_request: bool,
        version: Version,
    ) -> Result<()> {
        let date = self.date.get();
        let bytes = res.serialize(&WriteContext {
            server_name: &self.app.config().server.server_name,
            date: &date,
            keep_alive,
            head_request,
            version,
        });
        self.io.write_all(&bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Answers a protocol error if the peer can still hear it.
    async fn fail(&mut self, err: Error) {
        match err {
            Error::IO(err) => debug!("Connection from {:?} failed: {err}", self.peer),
            err => {
                warn!("Closing connection from {:?}: {err}", self.peer);
                self.set_state(ConnState::WritingResponse);
                let mut res = err.into_response();
                if let Err(err) = self
                    .write_response(&mut res, false, false, Version::HTTP_11)
                    .await
                {
                    debug!("Failed to send error response: {err}");
                }
            }
        }
    }

    async fn close(mut self) {
        self.set_state(ConnState::Closing);
        if let Err(err) = self.io.shutdown().await {
            debug!("Shutdown of {:?} failed: {err}", self.peer);
        }
        remove_tls_session(&self.app, self.tls_session.take());
        self.set_state(ConnState::Closed);
    }
}

fn head_length(kind: BodyKind) -> Option<u64> {
    match kind {
        BodyKind::None => Some(0),
        BodyKind::Length(len) => Some(len),
        BodyKind::Chunked => None,
    }
}

fn remove_tls_session(app: &App, session: Option<Arc<UserSession>>) {
    if let Some(session) = session {
        debug!("Removing TLS session {}", session.unique_id);
        app.sessions().remove_session(&session);
    }
}
