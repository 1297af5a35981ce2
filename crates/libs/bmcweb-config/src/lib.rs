//! Configuration of the bmcweb service.
//!
//! Everything the daemon needs to know at startup lives in one TOML file.
//! Every section is optional and falls back to the defaults a BMC ships with.
//!
//! # Usage
//!
//! ```rust
//! use bmcweb_config::BmcwebConfig;
//!
//! let config = BmcwebConfig::from_toml(
//!     r#"
//!     [server]
//!     bind = ["127.0.0.1:8080"]
//!
//!     [auth]
//!     basic = false
//!     "#,
//! )
//! .unwrap();
//!
//! assert!(!config.auth.basic);
//! assert!(config.auth.xtoken);
//! assert_eq!(config.limits.header_limit, 8192);
//! assert_eq!(config.timeouts.logged_in_windows(), 12);
//! ```

pub mod bmcweb_config;
pub mod error;
pub mod prelude;

pub use bmcweb_config::{
    AuthConfig, BmcwebConfig, BusObjectConfig, LimitsConfig, LogConfig, ServerConfig,
    TimeoutConfig, UserConfig,
};
