//! bmcweb daemon (bmcwebd)
//!
//! Serves the Redfish API of a BMC over HTTP/1.1:
//!
//! - **Service root and account service**: open discovery document and the
//!   privilege map in force
//! - **Session service**: login with a configured account, session listing
//!   and logout
//! - **Managers**: the BMC itself, read from and reset through the bus
//! - **Event service**: session events relayed over SSE and WebSocket
//!
//! Everything runs on a single thread; the process stops accepting
//! connections on SIGINT or SIGTERM.
//!
//! # Examples
//!
//! ```bash
//! bmcwebd /etc/bmcweb/bmcweb.toml
//! BMCWEB_CONFIG=/etc/bmcweb/bmcweb.toml RUST_LOG=debug bmcwebd
//! bmcwebd hash-password 0penBmc
//! ```

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use bmcweb_auth::registry::EntityPrivileges;
use bmcweb_auth::secret_hash::generate_secret_hash;
use bmcweb_config::BmcwebConfig;
use bmcweb_http::server::{PlainAcceptor, Server};
use tokio::task::LocalSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{Services, build_app};
use crate::prelude::*;

mod api;
mod error;
mod events;
mod managers;
mod prelude;
mod sessions;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut args = std::env::args_os().skip(1);
    let first = args.next();
    if first.as_deref().is_some_and(|arg| arg == "hash-password") {
        let Some(password) = args.next() else {
            eprintln!("usage: bmcwebd hash-password <password>");
            std::process::exit(2);
        };
        println!("{}", generate_secret_hash(&password.to_string_lossy())?);
        return Ok(());
    }

    let config = BmcwebConfig::load(first.map(PathBuf::from).as_deref())?;
    init_logging(&config)?;

    LocalSet::new().run_until(run(config)).await
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(config: &BmcwebConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log.filter)?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

async fn run(config: BmcwebConfig) -> Result<()> {
    let registry = match &config.privilege_registry {
        Some(path) => {
            info!("Loading privilege registry from {}", path.display());
            EntityPrivileges::from_file(path)
        }
        None => EntityPrivileges::redfish_default(),
    };
    if let Some(reason) = registry.lock_reason() {
        error!("Privilege registry locked, authorized requests will answer 503: {reason}");
    }
    if config.users.is_empty() {
        warn!("No accounts configured, nobody will be able to log in");
    }

    let services = Services::new(Arc::new(config));
    let app = build_app(Arc::new(registry), &services)?;
    let server = Server::bind(Rc::new(app), PlainAcceptor).await?;
    info!("bmcweb serving on {:?}", server.local_addrs());

    server.run(shutdown_signal()).await;
    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
