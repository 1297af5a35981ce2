//! Error types for the bmcweb daemon.

/// Errors that stop the daemon from starting or serving.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] bmcweb_config::error::Error),

    /// Privilege setup or password hashing failed.
    #[error(transparent)]
    Auth(#[from] bmcweb_auth::error::Error),

    /// Route registration or serving failed.
    #[error(transparent)]
    Http(#[from] bmcweb_http::error::Error),

    /// `log.filter` is not a valid tracing directive.
    #[error("Invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
}
