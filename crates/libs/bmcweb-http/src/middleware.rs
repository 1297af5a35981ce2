//! Middleware chain wrapped around every routed request.
//!
//! Middleware is an explicit, ordered list. Each one may stash per-request
//! state in the [`Context`], keyed by type. `before` hooks run in order; when
//! one of them completes the response, the remaining `before` hooks and the
//! handler are skipped. `after` hooks then run in reverse order for every
//! middleware whose `before` ran.
//!
//! # Examples
//!
//! ```rust
//! use bmcweb_http::middleware::{Context, Middleware};
//! use bmcweb_http::request::Request;
//! use bmcweb_http::response::Response;
//!
//! struct Counter;
//!
//! impl Middleware for Counter {
//!     fn before(&self, _req: &Request, _res: &mut Response, ctx: &mut Context) {
//!         ctx.insert(1u32);
//!     }
//!
//!     fn after(&self, _req: &Request, res: &mut Response, ctx: &mut Context) {
//!         let count = ctx.get::<u32>().copied().unwrap_or_default();
//!         res.add_header("x-count", &count.to_string());
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Instant;

use http::header::{self, HeaderName};
use tracing::info;

use crate::request::Request;
use crate::response::Response;

/// Per-request state shared between middleware hooks.
#[derive(Default)]
pub struct Context {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut())
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast().ok())
            .map(|value| *value)
    }
}

pub trait Middleware {
    fn before(&self, req: &Request, res: &mut Response, ctx: &mut Context);
    fn after(&self, req: &Request, res: &mut Response, ctx: &mut Context);
}

/// Runs the `before` hooks. Returns how many ran.
pub fn run_before(
    middlewares: &[Box<dyn Middleware>],
    req: &Request,
    res: &mut Response,
    ctx: &mut Context,
) -> usize {
    let mut ran = 0;
    for middleware in middlewares {
        middleware.before(req, res, ctx);
        ran += 1;
        if res.is_completed() {
            break;
        }
    }
    ran
}

/// Runs the `after` hooks of the first `ran` middlewares, last first.
pub fn run_after(
    middlewares: &[Box<dyn Middleware>],
    ran: usize,
    req: &Request,
    res: &mut Response,
    ctx: &mut Context,
) {
    for middleware in middlewares[..ran.min(middlewares.len())].iter().rev() {
        middleware.after(req, res, ctx);
    }
}

struct RequestStart(Instant);

/// Logs one line per request with its latency.
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn before(&self, _req: &Request, _res: &mut Response, ctx: &mut Context) {
        ctx.insert(RequestStart(Instant::now()));
    }

    fn after(&self, req: &Request, res: &mut Response, ctx: &mut Context) {
        let elapsed = ctx
            .remove::<RequestStart>()
            .map(|start| start.0.elapsed())
            .unwrap_or_default();
        let user = req
            .session()
            .map(|session| session.username.as_str())
            .unwrap_or("-");
        info!(
            "{} {} {} user={} {}us",
            req.method(),
            req.path(),
            res.status().as_u16(),
            user,
            elapsed.as_micros()
        );
    }
}

/// Adds the security headers every response carries.
pub struct SecurityHeaders;

impl Middleware for SecurityHeaders {
    fn before(&self, _req: &Request, _res: &mut Response, _ctx: &mut Context) {}

    fn after(&self, _req: &Request, res: &mut Response, _ctx: &mut Context) {
        res.add_header(
            header::STRICT_TRANSPORT_SECURITY,
            "max-age=31536000; includeSubdomains",
        );
        res.add_header(header::X_FRAME_OPTIONS, "DENY");
        res.add_header(header::PRAGMA, "no-cache");
        res.add_header(header::CACHE_CONTROL, "no-store, max-age=0");
        res.add_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
        res.add_header(header::REFERRER_POLICY, "no-referrer");
        res.add_header(
            HeaderName::from_static("x-permitted-cross-domain-policies"),
            "none",
        );
        res.add_header(
            HeaderName::from_static("cross-origin-opener-policy"),
            "same-origin",
        );
        res.add_header(
            HeaderName::from_static("cross-origin-resource-policy"),
            "same-origin",
        );
        res.add_header(
            header::CONTENT_SECURITY_POLICY,
            "default-src 'none'; img-src 'self' data:; font-src 'self'; style-src 'self'; script-src 'self'; connect-src 'self' wss:; form-action 'none'; frame-ancestors 'none'; object-src 'none'; base-uri 'none'",
        );
    }
}
