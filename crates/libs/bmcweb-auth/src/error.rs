//! Authorization error types.

use crate::privileges::PrivilegeType;

/// Errors of the privilege engine, the registry and secret hashing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A privilege name missing from the table.
    #[error("Unknown privilege '{0}'")]
    UnknownPrivilege(String),

    /// The same name listed twice when building a table.
    #[error("Duplicate privilege '{0}'")]
    DuplicatePrivilege(String),

    /// More names than a 64-bit set can hold.
    #[error("Too many {kind:?} privileges ({count}), at most {max} are supported")]
    TooManyPrivileges {
        kind: PrivilegeType,
        count: usize,
        max: usize,
    },

    /// An operation map key that is not a Redfish verb.
    #[error("Unknown HTTP verb '{0}'")]
    UnknownVerb(String),

    /// A role id that maps to no Redfish role.
    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    /// No mapping for the entity in the registry.
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    /// The registry failed to load; nothing is authorized.
    #[error("Privilege registry is locked")]
    RegistryLocked,

    /// Reading the registry file failed.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// The registry document is not valid JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Argon2 hashing or PHC string parsing failed.
    #[error("Error hashing password {0}")]
    PasswordHash(argon2::password_hash::Error),
}
