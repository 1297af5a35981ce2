//! HTTP/1.1 connection, routing and authorization core of bmcweb.
//!
//! Everything in this crate runs on a single-threaded tokio runtime inside a
//! `LocalSet`: connections, timers and handlers are local tasks sharing `Rc`
//! state.
//!
//! - [`timer_queue`]: bounded deadline queue driven by the server tick
//! - [`parser`]: request head and body framing on top of `httparse`
//! - [`request`] / [`response`]: the request view and the response builder
//! - [`routing`]: route trie, rule registration and the authorization decision
//! - [`middleware`]: the before/after chain around handlers
//! - [`authentication`]: resolving the caller's session
//! - [`connection`]: the per-stream state machine
//! - [`server`]: listeners, acceptors and the timer tick
//! - [`dbus`]: the backend RPC contract and an in-memory bus
//! - [`websocket`] / [`sse`]: streaming continuations of a request
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! use bmcweb_auth::registry::EntityPrivileges;
//! use bmcweb_config::BmcwebConfig;
//! use bmcweb_http::app::App;
//! use bmcweb_http::server::{PlainAcceptor, Server};
//!
//! # async fn run() -> bmcweb_http::prelude::Result<()> {
//! let config = Arc::new(BmcwebConfig::default());
//! let registry = Arc::new(EntityPrivileges::redfish_default());
//! let mut app = App::new(config, registry);
//! app.router_mut()
//!     .route("/redfish/v1/")
//!     .entity("ServiceRoot")
//!     .handler(|_req, resp, _params| {
//!         resp.res().set_json(serde_json::json!({ "Id": "RootService" }));
//!     })?;
//!
//! let server = Server::bind(Rc::new(app), PlainAcceptor).await?;
//! server.run(std::future::pending()).await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod authentication;
pub mod connection;
pub mod dbus;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod parser;
pub mod prelude;
pub mod request;
pub mod response;
pub mod routing;
pub mod server;
pub mod sse;
pub mod timer_queue;
pub mod websocket;
