//! Operation requirements: the Redfish "privilege AND and OR syntax".
//!
//! An [`OperationRequirement`] is an ordered list of privilege sets. A caller
//! passes when it holds *every* privilege of *any one* set. An
//! [`OperationMap`] attaches one requirement to each HTTP verb of an entity.
//!
//! Property overrides, subordinate overrides and resource URI overrides of the
//! registry are not modelled.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prelude::*;
use crate::privileges::{PrivilegeTable, Privileges};

/// HTTP verbs that carry privilege requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verb {
    Get,
    Head,
    Patch,
    Put,
    Delete,
    Post,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::Get,
        Verb::Head,
        Verb::Patch,
        Verb::Put,
        Verb::Delete,
        Verb::Post,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Patch => "PATCH",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Post => "POST",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownVerb(s.to_string()))
    }
}

/// OR-list of AND-sets of privileges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationRequirement(Vec<Privileges>);

impl OperationRequirement {
    pub fn new(sets: Vec<Privileges>) -> Self {
        Self(sets)
    }

    /// A requirement nobody satisfies.
    pub fn denied() -> Self {
        Self(Vec::new())
    }

    /// A requirement everybody satisfies.
    pub fn open() -> Self {
        Self(vec![Privileges::default()])
    }

    /// Builds a requirement from nested name lists.
    ///
    /// ```rust
    /// use bmcweb_auth::operation::OperationRequirement;
    /// use bmcweb_auth::privileges::PrivilegeTable;
    ///
    /// let table = PrivilegeTable::redfish();
    /// let requirement = OperationRequirement::from_names(
    ///     &table,
    ///     &[&["ConfigureManager"], &["ConfigureComponents", "Login"]],
    /// )
    /// .unwrap();
    /// let operator = table.privileges(["Login", "ConfigureComponents"]).unwrap();
    /// assert!(requirement.is_satisfied_by(&operator));
    /// ```
    pub fn from_names(table: &PrivilegeTable, sets: &[&[&str]]) -> Result<Self> {
        let sets = sets
            .iter()
            .map(|set| table.privileges(set.iter().copied()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(sets))
    }

    pub fn sets(&self) -> &[Privileges] {
        &self.0
    }

    pub fn is_denied(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.0.iter().any(Privileges::is_empty)
    }

    /// True when `user` covers at least one of the sets.
    pub fn is_satisfied_by(&self, user: &Privileges) -> bool {
        for required in &self.0 {
            debug!("Checking operation privileges...");
            if user.is_superset_of(required) {
                debug!("...success");
                return true;
            }
        }
        false
    }
}

/// Requirements of one entity, per verb.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationMap(BTreeMap<Verb, OperationRequirement>);

impl OperationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same requirement for every verb.
    pub fn uniform(requirement: OperationRequirement) -> Self {
        Self(
            Verb::ALL
                .into_iter()
                .map(|verb| (verb, requirement.clone()))
                .collect(),
        )
    }

    pub fn insert(&mut self, verb: Verb, requirement: OperationRequirement) {
        self.0.insert(verb, requirement);
    }

    pub fn get(&self, verb: Verb) -> Option<&OperationRequirement> {
        self.0.get(&verb)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Verb, &OperationRequirement)> {
        self.0.iter()
    }
}

/// Checks whether `user` may perform `verb` on an entity described by `map`.
///
/// A verb without an entry, or with an empty requirement list, is refused.
pub fn is_method_allowed_with_privileges(
    verb: Verb,
    map: &OperationMap,
    user: &Privileges,
) -> bool {
    match map.get(verb) {
        Some(requirement) => requirement.is_satisfied_by(user),
        None => {
            debug!("No privilege mapping for {verb}, refusing");
            false
        }
    }
}
