//! Authorization primitives for bmcweb.
//!
//! This crate holds everything that decides *who* may do *what*:
//!
//! - [`privileges`]: bitset representation of Redfish privileges
//! - [`operation`]: OR-of-AND operation requirements and the method check
//! - [`registry`]: the JSON privilege registry mapping entities to requirements
//! - [`role`]: user roles and the privileges they grant
//! - [`session`]: the process-wide session store
//! - [`secret_hash`]: argon2 password hashing
//! - [`mutual_tls`]: user extraction from verified client certificates
//!
//! # Usage
//!
//! ```rust
//! use bmcweb_auth::operation::{OperationRequirement, Verb};
//! use bmcweb_auth::privileges::Privileges;
//! use bmcweb_auth::registry::EntityPrivileges;
//!
//! let registry = EntityPrivileges::redfish_default();
//! let table = registry.table();
//! let user = table.privileges(["Login"]).unwrap();
//!
//! assert!(registry.is_allowed("Manager", Verb::Get, &user).unwrap());
//! assert!(!registry.is_allowed("Manager", Verb::Patch, &user).unwrap());
//!
//! let open = OperationRequirement::open();
//! assert!(open.is_satisfied_by(&Privileges::default()));
//! ```

pub mod error;
pub mod mutual_tls;
pub mod operation;
pub mod prelude;
pub mod privileges;
pub mod registry;
pub mod role;
pub mod secret_hash;
pub mod session;

/// Header carrying a session token.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
/// Cookie carrying a session token for browser clients.
pub const SESSION_COOKIE: &str = "SESSION";
/// Header a browser must echo from the `XSRF-TOKEN` cookie on mutating requests.
pub const XSRF_HEADER: &str = "X-XSRF-TOKEN";
