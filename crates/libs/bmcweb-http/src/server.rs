//! Listeners, transport acceptors and the timer tick.
//!
//! The server must run inside a `tokio::task::LocalSet`: every accepted
//! stream becomes a local task sharing the app, the timer queue and the date
//! cache with its siblings.

use std::cell::RefCell;
use std::future::Future;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bmcweb_auth::mutual_tls::PeerCertificate;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::connection::{Connection, Io};
use crate::prelude::*;
use crate::timer_queue::SharedTimerQueue;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// `Date` header value for `now`.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

struct CachedDate {
    value: String,
    refreshed: Instant,
}

/// `Date` header value, recomputed at most once per refresh interval.
#[derive(Clone)]
pub struct DateCache {
    cached: Rc<RefCell<CachedDate>>,
    every: Duration,
}

impl DateCache {
    pub fn new(every: Duration) -> Self {
        Self {
            cached: Rc::new(RefCell::new(CachedDate {
                value: http_date(Utc::now()),
                refreshed: Instant::now(),
            })),
            every,
        }
    }

    pub fn get(&self) -> String {
        let mut cached = self.cached.borrow_mut();
        if cached.refreshed.elapsed() >= self.every {
            cached.value = http_date(Utc::now());
            cached.refreshed = Instant::now();
        }
        cached.value.clone()
    }
}

/// Turns an accepted TCP stream into the stream a connection runs on.
///
/// TLS implementations perform their handshake here and report what they
/// learned about the client certificate.
pub trait TransportAcceptor {
    type Stream: Io + 'static;

    fn accept(
        &self,
        stream: TcpStream,
    ) -> LocalBoxFuture<'_, Result<(Self::Stream, Option<PeerCertificate>)>>;
}

/// Plain TCP, no client certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAcceptor;

impl TransportAcceptor for PlainAcceptor {
    type Stream = TcpStream;

    fn accept(
        &self,
        stream: TcpStream,
    ) -> LocalBoxFuture<'_, Result<(Self::Stream, Option<PeerCertificate>)>> {
        async move { Ok((stream, None)) }.boxed_local()
    }
}

pub struct Server<A> {
    app: Rc<App>,
    acceptor: Rc<A>,
    listeners: Vec<TcpListener>,
    timers: SharedTimerQueue,
    date: DateCache,
}

impl<A: TransportAcceptor + 'static> Server<A> {
    /// Binds every configured address.
    pub async fn bind(app: Rc<App>, acceptor: A) -> Result<Self> {
        let mut listeners = Vec::new();
        for addr in &app.config().server.bind {
            let listener = TcpListener::bind(addr).await?;
            info!("Listening on {}", listener.local_addr()?);
            listeners.push(listener);
        }
        Ok(Self::from_listeners(app, acceptor, listeners))
    }

    pub fn from_listeners(app: Rc<App>, acceptor: A, listeners: Vec<TcpListener>) -> Self {
        let timeouts = &app.config().timeouts;
        let timers = SharedTimerQueue::new(timeouts.window_ticks);
        let date = DateCache::new(Duration::from_secs(timeouts.date_refresh_secs));
        Self {
            app,
            acceptor: Rc::new(acceptor),
            listeners,
            timers,
            date,
        }
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }

    pub fn timers(&self) -> SharedTimerQueue {
        self.timers.clone()
    }

    /// Accepts until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let ticker = tick(self.timers.clone(), self.app.config().timeouts.tick());
        let accepting = join_all(
            self.listeners
                .into_iter()
                .map(|listener| {
                    accept_loop(
                        listener,
                        self.acceptor.clone(),
                        self.app.clone(),
                        self.timers.clone(),
                        self.date.clone(),
                    )
                })
                .collect::<Vec<_>>(),
        );

        tokio::select! {
            _ = shutdown => info!("Shutdown requested, no longer accepting connections"),
            _ = ticker => error!("Timer tick stopped"),
            _ = accepting => error!("All listeners stopped"),
        }
    }
}

async fn tick(timers: SharedTimerQueue, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;
    loop {
        interval.tick().await;
        timers.advance();
        let fired = timers.process();
        if fired > 0 {
            debug!("{fired} connection deadlines fired");
        }
    }
}

async fn accept_loop<A: TransportAcceptor + 'static>(
    listener: TcpListener,
    acceptor: Rc<A>,
    app: Rc<App>,
    timers: SharedTimerQueue,
    date: DateCache,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("Accept failed: {err}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {peer}: {err}");
        }
        debug!("Accepted connection from {peer}");

        let acceptor = acceptor.clone();
        let app = app.clone();
        let timers = timers.clone();
        let date = date.clone();
        tokio::task::spawn_local(async move {
            match acceptor.accept(stream).await {
                Ok((io, cert)) => {
                    Connection::new(io, Some(peer), cert, app, timers, date)
                        .run()
                        .await
                }
                Err(err) => info!("Handshake with {peer} failed: {err}"),
            }
        });
    }
}
