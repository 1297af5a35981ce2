//! Redfish privileges represented as bitsets.
//!
//! Every incoming request compares the privileges held by the caller with the
//! privileges required by the target entity. Both sides are [`Privileges`]
//! values: two fixed-width bitsets (base and OEM) whose bit positions come from
//! an immutable [`PrivilegeTable`]. Names are only looked up when a set is
//! built, never during a check.
//!
//! # Examples
//!
//! ```rust
//! use bmcweb_auth::privileges::{PrivilegeTable, PrivilegeType};
//!
//! let table = PrivilegeTable::redfish();
//! let admin = table.privileges(["Login", "ConfigureManager"]).unwrap();
//! let login = table.privileges(["Login"]).unwrap();
//!
//! assert!(admin.is_superset_of(&login));
//! assert!(!login.is_superset_of(&admin));
//! assert_eq!(
//!     admin.active_names(&table, PrivilegeType::Base),
//!     vec!["Login", "ConfigureManager"]
//! );
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Base privileges defined by the Redfish specification, in bit order.
pub const BASE_PRIVILEGES: [&str; 5] = [
    "Login",
    "ConfigureManager",
    "ConfigureComponents",
    "ConfigureSelf",
    "ConfigureUsers",
];

/// Registry name standing for "no privilege required".
pub const NO_AUTH: &str = "NoAuth";

/// Width of each bitset.
pub const MAX_PRIVILEGE_COUNT: usize = u64::BITS as usize;

/// Which bitset a privilege lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivilegeType {
    Base,
    Oem,
}

/// Immutable mapping from privilege names to bit indexes.
///
/// Built once at startup, either from [`BASE_PRIVILEGES`] or from the
/// `PrivilegesUsed` / `OEMPrivilegesUsed` lists of a privilege registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeTable {
    base: Vec<String>,
    oem: Vec<String>,
    index: HashMap<String, (PrivilegeType, usize)>,
}

impl PrivilegeTable {
    /// Creates a table from explicit base and OEM name lists.
    ///
    /// Fails if a name appears twice or if a list does not fit in a bitset.
    pub fn new(base: Vec<String>, oem: Vec<String>) -> Result<Self> {
        for (kind, names) in [(PrivilegeType::Base, &base), (PrivilegeType::Oem, &oem)] {
            if names.len() > MAX_PRIVILEGE_COUNT {
                return Err(Error::TooManyPrivileges {
                    kind,
                    count: names.len(),
                    max: MAX_PRIVILEGE_COUNT,
                });
            }
        }

        let mut index = HashMap::with_capacity(base.len() + oem.len());
        let entries = base
            .iter()
            .enumerate()
            .map(|(i, name)| (name, (PrivilegeType::Base, i)))
            .chain(
                oem.iter()
                    .enumerate()
                    .map(|(i, name)| (name, (PrivilegeType::Oem, i))),
            );
        for (name, slot) in entries {
            if name == NO_AUTH || index.insert(name.clone(), slot).is_some() {
                return Err(Error::DuplicatePrivilege(name.clone()));
            }
        }

        Ok(Self { base, oem, index })
    }

    /// The table of the five standard Redfish base privileges.
    pub fn redfish() -> Self {
        let base = BASE_PRIVILEGES.iter().map(|p| p.to_string()).collect();
        Self::new(base, Vec::new()).expect("standard privilege table is valid")
    }

    /// Looks up the bitset and bit index of a privilege name.
    pub fn lookup(&self, name: &str) -> Option<(PrivilegeType, usize)> {
        self.index.get(name).copied()
    }

    /// Names of the given type, in bit order.
    pub fn names(&self, kind: PrivilegeType) -> &[String] {
        match kind {
            PrivilegeType::Base => &self.base,
            PrivilegeType::Oem => &self.oem,
        }
    }

    /// Builds a privilege set from names.
    ///
    /// [`NO_AUTH`] contributes nothing; any other unknown name is an error.
    pub fn privileges<I, S>(&self, names: I) -> Result<Privileges>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut privileges = Privileges::default();
        for name in names {
            let name = name.as_ref();
            if name == NO_AUTH {
                continue;
            }
            if !privileges.set_single_privilege(self, name) {
                return Err(Error::UnknownPrivilege(name.to_string()));
            }
        }
        Ok(privileges)
    }
}

impl Default for PrivilegeTable {
    fn default() -> Self {
        Self::redfish()
    }
}

/// A set of privileges, either required by an entity or held by a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Privileges {
    base: u64,
    oem: u64,
}

impl Privileges {
    /// Creates a set directly from raw bitsets.
    pub const fn from_bits(base: u64, oem: u64) -> Self {
        Self { base, oem }
    }

    /// Raw base bitset.
    pub const fn base_bits(&self) -> u64 {
        self.base
    }

    /// Raw OEM bitset.
    pub const fn oem_bits(&self) -> u64 {
        self.oem
    }

    pub const fn is_empty(&self) -> bool {
        self.base == 0 && self.oem == 0
    }

    /// Sets a privilege by name. Returns `false` if the table does not know it.
    pub fn set_single_privilege(&mut self, table: &PrivilegeTable, name: &str) -> bool {
        match table.lookup(name) {
            Some((kind, bit)) => {
                *self.bits_mut(kind) |= 1 << bit;
                true
            }
            None => false,
        }
    }

    /// Clears a privilege by name. Returns `false` if the table does not know it.
    pub fn reset_single_privilege(&mut self, table: &PrivilegeTable, name: &str) -> bool {
        match table.lookup(name) {
            Some((kind, bit)) => {
                *self.bits_mut(kind) &= !(1 << bit);
                true
            }
            None => false,
        }
    }

    /// Names of the active privileges of one type, in table order.
    pub fn active_names(&self, table: &PrivilegeTable, kind: PrivilegeType) -> Vec<String> {
        let bits = match kind {
            PrivilegeType::Base => self.base,
            PrivilegeType::Oem => self.oem,
        };
        table
            .names(kind)
            .iter()
            .enumerate()
            .filter(|(bit, _)| bits & (1 << bit) != 0)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Active base privileges followed by active OEM privileges.
    pub fn all_active_names(&self, table: &PrivilegeTable) -> Vec<String> {
        let mut names = self.active_names(table, PrivilegeType::Base);
        names.extend(self.active_names(table, PrivilegeType::Oem));
        names
    }

    /// True when every privilege of `other` is also held by `self`.
    pub const fn is_superset_of(&self, other: &Privileges) -> bool {
        (self.base & other.base) == other.base && (self.oem & other.oem) == other.oem
    }

    pub const fn intersection(&self, other: &Privileges) -> Privileges {
        Privileges {
            base: self.base & other.base,
            oem: self.oem & other.oem,
        }
    }

    pub const fn union(&self, other: &Privileges) -> Privileges {
        Privileges {
            base: self.base | other.base,
            oem: self.oem | other.oem,
        }
    }

    fn bits_mut(&mut self, kind: PrivilegeType) -> &mut u64 {
        match kind {
            PrivilegeType::Base => &mut self.base,
            PrivilegeType::Oem => &mut self.oem,
        }
    }
}
