//! Core configuration types.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bmcweb_auth::mutual_tls::CommonNameParseMode;
use bmcweb_auth::role::Role;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prelude::*;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BMCWEB_CONFIG";

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Addresses to accept connections on.
    pub bind: Vec<SocketAddr>,
    /// Value of the `Server` response header.
    pub server_name: String,
    /// Hostname matched against certificate UPN domains.
    pub hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: vec![SocketAddr::from(([0, 0, 0, 0], 18080))],
            server_name: "iBMC".to_string(),
            hostname: "bmc".to_string(),
        }
    }
}

/// Request size limits, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of the request line plus header section.
    pub header_limit: usize,
    /// Maximum body size of an authenticated request.
    pub body_limit: usize,
    /// Maximum declared body size of an anonymous request.
    pub anonymous_body_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            header_limit: 8192,
            body_limit: 30 * 1024 * 1024,
            anonymous_body_limit: 4096,
        }
    }
}

/// Deadline settings.
///
/// Deadlines are enforced by the timer queue: a connection survives a number
/// of whole windows, each `window_ticks` long, where one tick is `tick_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub tick_ms: u64,
    pub window_ticks: u64,
    pub logged_in_secs: u64,
    pub logged_out_secs: u64,
    /// How often the cached `Date` header is refreshed.
    pub date_refresh_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            window_ticks: 5,
            logged_in_secs: 60,
            logged_out_secs: 15,
            date_refresh_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    fn windows(&self, secs: u64) -> u32 {
        let window_ms = (self.window_ticks * self.tick_ms).max(1);
        let windows = (secs * 1000).div_ceil(window_ms).max(1);
        u32::try_from(windows).unwrap_or(u32::MAX)
    }

    /// Windows granted to an authenticated connection.
    pub fn logged_in_windows(&self) -> u32 {
        self.windows(self.logged_in_secs)
    }

    /// Windows granted to an anonymous connection.
    pub fn logged_out_windows(&self) -> u32 {
        self.windows(self.logged_out_secs)
    }
}

/// Authentication methods and session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub basic: bool,
    pub xtoken: bool,
    pub cookie: bool,
    pub session_token: bool,
    pub tls: bool,
    pub tls_common_name_mode: CommonNameParseMode,
    pub session_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            basic: true,
            xtoken: true,
            cookie: true,
            session_token: true,
            tls: false,
            tls_common_name_mode: CommonNameParseMode::CommonName,
            session_timeout_secs: 3600,
        }
    }
}

impl AuthConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    /// argon2 PHC string.
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "bmcwebd=info,bmcweb_http=info,bmcweb_auth=info".to_string(),
        }
    }
}

/// An object published on the in-process bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusObjectConfig {
    pub service: String,
    pub path: String,
    pub interface: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Whole service configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BmcwebConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub auth: AuthConfig,
    pub users: Vec<UserConfig>,
    pub log: LogConfig,
    /// Privilege registry file; the built-in registry is used when unset.
    pub privilege_registry: Option<PathBuf>,
    pub bus_objects: Vec<BusObjectConfig>,
}

impl BmcwebConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(file_path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(value: &str) -> Result<Self> {
        let config: Self = toml::from_str(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads `path`, else the file named by [`CONFIG_ENV`], else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Looks up a local account.
    pub fn user(&self, name: &str) -> Option<&UserConfig> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind.is_empty() {
            return Err(Error::Invalid("server.bind is empty".to_string()));
        }
        if self.timeouts.tick_ms == 0 || self.timeouts.window_ticks == 0 {
            return Err(Error::Invalid(
                "timeouts.tick_ms and timeouts.window_ticks must be positive".to_string(),
            ));
        }
        if self.limits.header_limit == 0 {
            return Err(Error::Invalid("limits.header_limit must be positive".to_string()));
        }
        for (i, user) in self.users.iter().enumerate() {
            if self.users[..i].iter().any(|other| other.name == user.name) {
                return Err(Error::Invalid(format!("duplicate user {}", user.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn deserialize() -> Result<()> {
        let content = r#"
            # bmcweb configuration

            [server]
            bind = ["0.0.0.0:443", "[::]:8080"]
            server_name = "bmcweb"
            hostname = "bmc.example.com"

            [limits]
            body_limit = 1048576

            [timeouts]
            logged_in_secs = 30

            [auth]
            tls = true
            tls_common_name_mode = "user_principal_name"
            session_timeout_secs = 600

            [[users]]
            name = "root"
            password_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA"
            role = "priv-admin"

            [[users]]
            name = "operator"
            password_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA"
            role = "Operator"

            [log]
            filter = "debug"

            [[bus_objects]]
            service = "xyz.openbmc_project.State.BMC"
            path = "/xyz/openbmc_project/state/bmc0"
            interface = "xyz.openbmc_project.State.BMC"
            properties = { CurrentBMCState = "Ready", LastRebootTime = 1700000000 }
        "#;
        let config = BmcwebConfig::from_toml(content)?;

        assert_eq!(config.server.bind.len(), 2);
        assert_eq!(config.limits.body_limit, 1048576);
        assert_eq!(config.limits.header_limit, 8192);
        assert_eq!(config.timeouts.logged_in_windows(), 6);
        assert_eq!(config.timeouts.logged_out_windows(), 3);
        assert_eq!(
            config.auth.tls_common_name_mode,
            CommonNameParseMode::UserPrincipalName
        );
        assert_eq!(config.user("operator").map(|u| u.role), Some(Role::Operator));
        assert_eq!(
            config.bus_objects[0].properties["LastRebootTime"],
            serde_json::json!(1700000000)
        );
        Ok(())
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = BmcwebConfig::from_toml("").unwrap();
        assert_eq!(config, BmcwebConfig::default());
        assert_eq!(config.timeouts.logged_in_windows(), 12);
        assert_eq!(config.timeouts.logged_out_windows(), 3);
        assert!(config.privilege_registry.is_none());
    }

    #[test]
    fn rejects_unknown_role_and_duplicates() {
        let unknown = r#"
            [[users]]
            name = "x"
            password_hash = "h"
            role = "priv-god"
        "#;
        assert!(matches!(
            BmcwebConfig::from_toml(unknown),
            Err(Error::Deserialization(_))
        ));

        let dup = r#"
            [[users]]
            name = "x"
            password_hash = "h"
            role = "priv-user"
            [[users]]
            name = "x"
            password_hash = "h"
            role = "priv-user"
        "#;
        assert!(matches!(BmcwebConfig::from_toml(dup), Err(Error::Invalid(_))));
    }

    #[test]
    fn explicit_path_wins() {
        let err = BmcwebConfig::load(Some(Path::new("/nonexistent/bmcweb.toml")));
        assert!(matches!(err, Err(Error::IO(_))));
    }
}
