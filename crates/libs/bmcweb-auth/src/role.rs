//! User roles and the privileges they grant.
//!
//! Roles are stored by the account backend with their `priv-*` identifiers and
//! exposed over Redfish with the standard role names. Both spellings parse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::privileges::{PrivilegeTable, Privileges};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Administrator,
    Operator,
    ReadOnly,
    NoAccess,
}

impl Role {
    /// Identifier used by the account backend.
    pub const fn backend_id(&self) -> &'static str {
        match self {
            Role::Administrator => "priv-admin",
            Role::Operator => "priv-operator",
            Role::ReadOnly => "priv-user",
            Role::NoAccess => "priv-noaccess",
        }
    }

    /// Redfish `Role` resource id.
    pub const fn redfish_id(&self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::Operator => "Operator",
            Role::ReadOnly => "ReadOnly",
            Role::NoAccess => "NoAccess",
        }
    }

    /// Privilege names assigned to the role.
    pub const fn privilege_names(&self) -> &'static [&'static str] {
        match self {
            Role::Administrator => &[
                "Login",
                "ConfigureManager",
                "ConfigureUsers",
                "ConfigureSelf",
                "ConfigureComponents",
            ],
            Role::Operator => &["Login", "ConfigureSelf", "ConfigureComponents"],
            Role::ReadOnly => &["Login", "ConfigureSelf"],
            Role::NoAccess => &[],
        }
    }

    /// Privileges of the role in `table`.
    ///
    /// Names the table does not know are skipped, so a registry with a reduced
    /// `PrivilegesUsed` list simply grants less.
    pub fn privileges(&self, table: &PrivilegeTable) -> Privileges {
        let mut privileges = Privileges::default();
        for name in self.privilege_names() {
            privileges.set_single_privilege(table, name);
        }
        privileges
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.redfish_id())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Role::Administrator,
            Role::Operator,
            Role::ReadOnly,
            Role::NoAccess,
        ]
        .into_iter()
        .find(|role| role.backend_id() == s || role.redfish_id() == s)
        .ok_or_else(|| Error::UnknownRole(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.backend_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_spellings() {
        assert_eq!("priv-admin".parse::<Role>().unwrap(), Role::Administrator);
        assert_eq!("Operator".parse::<Role>().unwrap(), Role::Operator);
        assert_eq!("priv-user".parse::<Role>().unwrap(), Role::ReadOnly);
        assert!(matches!(
            "priv-root".parse::<Role>(),
            Err(Error::UnknownRole(_))
        ));
    }

    #[test]
    fn roles_are_ordered_by_privilege() {
        let table = PrivilegeTable::redfish();
        let admin = Role::Administrator.privileges(&table);
        let operator = Role::Operator.privileges(&table);
        let readonly = Role::ReadOnly.privileges(&table);

        assert!(admin.is_superset_of(&operator));
        assert!(operator.is_superset_of(&readonly));
        assert!(!readonly.is_superset_of(&operator));
        assert!(Role::NoAccess.privileges(&table).is_empty());
    }

    #[test]
    fn reduced_table_grants_less() {
        let table = PrivilegeTable::new(vec!["Login".into()], Vec::new()).unwrap();
        let admin = Role::Administrator.privileges(&table);
        assert_eq!(admin.all_active_names(&table), vec!["Login"]);
    }

    #[test]
    fn serde_uses_backend_id() {
        let json = serde_json::to_string(&Role::Operator).unwrap();
        assert_eq!(json, "\"priv-operator\"");
        let role: Role = serde_json::from_str("\"ReadOnly\"").unwrap();
        assert_eq!(role, Role::ReadOnly);
    }
}
