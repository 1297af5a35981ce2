#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use bmcweb_auth::registry::EntityPrivileges;
use bmcweb_auth::role::Role;
use bmcweb_auth::session::{PersistenceType, UserSession};
use bmcweb_config::BmcwebConfig;
use bmcweb_http::app::App;
use bmcweb_http::connection::Connection;
use bmcweb_http::response::AsyncResp;
use bmcweb_http::server::DateCache;
use bmcweb_http::timer_queue::SharedTimerQueue;
use futures_util::{SinkExt, StreamExt};
use http::{Method, StatusCode};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub struct TestContext {
    pub app: Rc<App>,
    pub timers: SharedTimerQueue,
    pub date: DateCache,
    /// Times `/whoami` ran.
    pub hits: Rc<Cell<u32>>,
    /// Responses `/slow` never completed.
    pub stalled: Rc<RefCell<Vec<AsyncResp>>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::build(BmcwebConfig::default(), EntityPrivileges::redfish_default())
    }

    pub fn with_config(configure: impl FnOnce(&mut BmcwebConfig)) -> Self {
        let mut config = BmcwebConfig::default();
        configure(&mut config);
        Self::build(config, EntityPrivileges::redfish_default())
    }

    pub fn with_registry(registry: EntityPrivileges) -> Self {
        Self::build(BmcwebConfig::default(), registry)
    }

    fn build(config: BmcwebConfig, registry: EntityPrivileges) -> Self {
        let window = config.timeouts.window_ticks;
        let mut app = App::new(Arc::new(config), Arc::new(registry));
        let hits = Rc::new(Cell::new(0));
        let stalled = Rc::new(RefCell::new(Vec::new()));
        install_routes(&mut app, hits.clone(), stalled.clone());
        Self {
            app: Rc::new(app),
            timers: SharedTimerQueue::new(window),
            date: DateCache::new(Duration::from_secs(10)),
            hits,
            stalled,
        }
    }

    /// Starts a connection task and returns the client end.
    ///
    /// Must be called from inside a `LocalSet`.
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let connection = Connection::new(
            server,
            Some(([127, 0, 0, 1], 50000).into()),
            None,
            self.app.clone(),
            self.timers.clone(),
            self.date.clone(),
        );
        tokio::task::spawn_local(connection.run());
        client
    }

    pub fn login(&self, role: Role) -> Arc<UserSession> {
        self.app.sessions().generate_user_session(
            role.redfish_id(),
            role,
            None,
            PersistenceType::Timeout,
            false,
        )
    }

    /// Advances the logical clock, firing expired deadlines.
    pub fn tick(&self, ticks: u64) {
        for _ in 0..ticks {
            self.timers.advance();
            self.timers.process();
        }
    }
}

fn install_routes(app: &mut App, hits: Rc<Cell<u32>>, stalled: Rc<RefCell<Vec<AsyncResp>>>) {
    let router = app.router_mut();
    router
        .route("/redfish/v1/")
        .entity("ServiceRoot")
        .handler(|_req, resp, _params| {
            resp.res().set_json(json!({ "Id": "RootService" }));
        })
        .unwrap();
    router
        .route("/redfish/v1/Managers/<str>")
        .methods([Method::GET, Method::PATCH])
        .entity("Manager")
        .handler(|req, resp, params| {
            let id = params[0].clone();
            let method = req.method().to_string();
            tokio::task::spawn_local(async move {
                resp.res()
                    .set_json(json!({ "Id": id, "Method": method }));
            });
        })
        .unwrap();
    router
        .route("/redfish/v1/Managers/<str>/Actions/Manager.Reset")
        .methods([Method::POST])
        .privileges(&[&["ConfigureManager"]])
        .handler(|_req, resp, _params| {
            resp.res().set_status(StatusCode::NO_CONTENT);
        })
        .unwrap();
    router
        .route("/upload")
        .methods([Method::POST])
        .handler(|req, resp, _params| {
            let length = req.body().len();
            resp.res().set_json(json!({ "Length": length }));
        })
        .unwrap();
    router
        .route("/whoami")
        .handler(move |req, resp, _params| {
            hits.set(hits.get() + 1);
            let user = req.session().map(|session| session.username.clone());
            resp.res().set_json(json!({ "User": user }));
        })
        .unwrap();
    router
        .route("/slow")
        .handler(move |_req, resp, _params| {
            stalled.borrow_mut().push(resp);
        })
        .unwrap();
    router
        .route("/subscribe")
        .websocket(|_req, mut ws, _params| async move {
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() || ws.send(message).await.is_err() {
                    break;
                }
            }
        })
        .unwrap();
    router
        .route("/events")
        .sse(|_req, mut stream, _params| async move {
            let _ = stream.send_event("1", "first").await;
            let _ = stream.send_event("2", "second").await;
        })
        .unwrap();
}

/// A parsed response as the client saw it.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(stream: &mut DuplexStream, raw: &str) {
    stream.write_all(raw.as_bytes()).await.unwrap();
}

/// Reads one response. `None` when the server closed without answering.
pub async fn read_response(stream: &mut DuplexStream, buf: &mut Vec<u8>) -> Option<RawResponse> {
    loop {
        let mut slots = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Response::new(&mut slots);
        if let httparse::Status::Complete(head_len) = parsed.parse(buf).unwrap() {
            let status = parsed.code.unwrap();
            let headers: Vec<(String, String)> = parsed
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect();
            let length: usize = headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
                .map(|(_, v)| v.parse().unwrap())
                .unwrap_or(0);
            while buf.len() < head_len + length {
                read_some(stream, buf).await?;
            }
            let body = buf[head_len..head_len + length].to_vec();
            buf.drain(..head_len + length);
            return Some(RawResponse {
                status,
                headers,
                body,
            });
        }
        read_some(stream, buf).await?;
    }
}

/// Sends a request and reads its response on a fresh buffer.
pub async fn roundtrip(stream: &mut DuplexStream, raw: &str) -> Option<RawResponse> {
    send(stream, raw).await;
    read_response(stream, &mut Vec::new()).await
}

async fn read_some(stream: &mut DuplexStream, buf: &mut Vec<u8>) -> Option<()> {
    let mut chunk = [0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
        .await
        .expect("server did not answer in time")
        .ok()?;
    if n == 0 {
        return None;
    }
    buf.extend_from_slice(&chunk[..n]);
    Some(())
}

/// True once the server closed its end.
pub async fn is_closed(stream: &mut DuplexStream) -> bool {
    let mut chunk = [0u8; 64];
    matches!(
        tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

pub fn get(path: &str, extra: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: bmc\r\n{extra}\r\n")
}

pub fn token_header(session: &UserSession) -> String {
    format!("X-Auth-Token: {}\r\n", session.session_token)
}
