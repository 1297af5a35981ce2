//! Privilege registry: maps Redfish entities to operation requirements.
//!
//! The registry is a JSON document in the DMTF `PrivilegeRegistry` format. It
//! is loaded exactly once at startup. A document that cannot be trusted
//! (unreadable, missing a required key, naming an unknown privilege) does not
//! fall back to anything permissive: the provider is built in the *locked*
//! state and every lookup answers [`Error::RegistryLocked`].
//!
//! # Document format
//!
//! ```json
//! {
//!   "@Redfish.Copyright": "...",
//!   "@odata.type": "#PrivilegeRegistry.v1_1_4.PrivilegeRegistry",
//!   "Id": "Redfish_1.3.0_PrivilegeRegistry",
//!   "Name": "Redfish Privilege Registry",
//!   "PrivilegesUsed": ["Login", "ConfigureManager"],
//!   "OEMPrivilegesUsed": [],
//!   "Mappings": [
//!     {
//!       "Entity": "Manager",
//!       "OperationMap": {
//!         "GET": [{ "Privilege": ["Login"] }],
//!         "PATCH": [{ "Privilege": ["ConfigureManager"] }]
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use bmcweb_auth::operation::Verb;
//! use bmcweb_auth::registry::EntityPrivileges;
//!
//! let registry = EntityPrivileges::from_json("{ \"Id\": \"broken\" }");
//! assert!(registry.is_locked());
//!
//! let anyone = registry.table().privileges(["Login"]).unwrap();
//! assert!(registry.is_allowed("ServiceRoot", Verb::Get, &anyone).is_err());
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::operation::{OperationMap, OperationRequirement, Verb};
use crate::prelude::*;
use crate::privileges::{NO_AUTH, PrivilegeTable, Privileges};

const DEFAULT_REGISTRY: &str = include_str!("../registry/privilege_registry.json");

/// The registry document as found on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeRegistryDocument {
    #[serde(rename = "@Redfish.Copyright")]
    pub copyright: String,
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mappings")]
    pub mappings: Vec<MappingDocument>,
    #[serde(rename = "PrivilegesUsed")]
    pub privileges_used: Vec<String>,
    #[serde(rename = "OEMPrivilegesUsed")]
    pub oem_privileges_used: Vec<String>,
}

/// One `Mappings` entry. Override sections are accepted and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(rename = "Entity")]
    pub entity: String,
    #[serde(rename = "OperationMap")]
    pub operation_map: BTreeMap<String, Vec<PrivilegeGroup>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeGroup {
    #[serde(rename = "Privilege")]
    pub privilege: Vec<String>,
}

#[derive(Debug)]
struct LoadedRegistry {
    odata_type: String,
    id: String,
    name: String,
    entities: BTreeMap<String, OperationMap>,
}

#[derive(Debug)]
enum RegistryState {
    Loaded(LoadedRegistry),
    Locked { reason: String },
}

/// Entity → operation requirement provider.
#[derive(Debug)]
pub struct EntityPrivileges {
    table: PrivilegeTable,
    state: RegistryState,
}

impl EntityPrivileges {
    /// The registry shipped with the service.
    pub fn redfish_default() -> Self {
        Self::from_json(DEFAULT_REGISTRY)
    }

    /// Loads a registry file. Any failure yields a locked provider.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                info!("Loading privilege registry from {}", path.display());
                Self::from_json(&text)
            }
            Err(err) => {
                error!("Unable to read privilege registry {}: {err}", path.display());
                Self::locked(err.to_string())
            }
        }
    }

    /// Parses a registry document. Any failure yields a locked provider.
    pub fn from_json(text: &str) -> Self {
        match Self::build(text) {
            Ok(provider) => provider,
            Err(err) => {
                error!("Privilege registry rejected, locking every route: {err}");
                Self::locked(err.to_string())
            }
        }
    }

    fn locked(reason: String) -> Self {
        Self {
            table: PrivilegeTable::redfish(),
            state: RegistryState::Locked { reason },
        }
    }

    fn build(text: &str) -> Result<Self> {
        let document: PrivilegeRegistryDocument = serde_json::from_str(text)?;
        let table = PrivilegeTable::new(
            document.privileges_used.clone(),
            document.oem_privileges_used.clone(),
        )?;

        let mut entities = BTreeMap::new();
        for mapping in &document.mappings {
            let mut map = OperationMap::new();
            for (verb, groups) in &mapping.operation_map {
                let verb = match verb.parse::<Verb>() {
                    Ok(verb) => verb,
                    Err(_) => {
                        warn!("Ignoring verb {verb} in mapping of {}", mapping.entity);
                        continue;
                    }
                };
                let sets = groups
                    .iter()
                    .map(|group| table.privileges(&group.privilege))
                    .collect::<Result<Vec<Privileges>>>()?;
                map.insert(verb, OperationRequirement::new(sets));
            }
            entities.insert(mapping.entity.clone(), map);
        }

        info!(
            "Privilege registry {} loaded with {} entities",
            document.id,
            entities.len()
        );

        Ok(Self {
            table,
            state: RegistryState::Loaded(LoadedRegistry {
                odata_type: document.odata_type,
                id: document.id,
                name: document.name,
                entities,
            }),
        })
    }

    /// Privilege names known to this registry.
    pub fn table(&self) -> &PrivilegeTable {
        &self.table
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, RegistryState::Locked { .. })
    }

    /// Why the registry is locked, if it is.
    pub fn lock_reason(&self) -> Option<&str> {
        match &self.state {
            RegistryState::Locked { reason } => Some(reason),
            RegistryState::Loaded(_) => None,
        }
    }

    /// The operation map of an entity.
    pub fn operation_map(&self, entity: &str) -> Result<&OperationMap> {
        match &self.state {
            RegistryState::Locked { .. } => Err(Error::RegistryLocked),
            RegistryState::Loaded(registry) => registry
                .entities
                .get(entity)
                .ok_or_else(|| Error::UnknownEntity(entity.to_string())),
        }
    }

    /// The requirement of one verb on an entity. A missing verb is denied.
    pub fn requirement(&self, entity: &str, verb: Verb) -> Result<OperationRequirement> {
        Ok(self
            .operation_map(entity)?
            .get(verb)
            .cloned()
            .unwrap_or_else(OperationRequirement::denied))
    }

    /// Checks a user against an entity's requirement for `verb`.
    pub fn is_allowed(&self, entity: &str, verb: Verb, user: &Privileges) -> Result<bool> {
        let map = self.operation_map(entity)?;
        Ok(crate::operation::is_method_allowed_with_privileges(
            verb, map, user,
        ))
    }

    /// Renders the registry as a Redfish `PrivilegeRegistry` resource.
    ///
    /// Empty privilege sets are rendered as `NoAuth`. A locked registry
    /// renders as `None`.
    pub fn to_json(&self) -> Option<Value> {
        let RegistryState::Loaded(registry) = &self.state else {
            return None;
        };

        let mappings: Vec<Value> = registry
            .entities
            .iter()
            .map(|(entity, map)| {
                let operation_map: serde_json::Map<String, Value> = map
                    .iter()
                    .map(|(verb, requirement)| {
                        let groups: Vec<Value> = requirement
                            .sets()
                            .iter()
                            .map(|set| {
                                let mut names = set.all_active_names(&self.table);
                                if names.is_empty() {
                                    names.push(NO_AUTH.to_string());
                                }
                                json!({ "Privilege": names })
                            })
                            .collect();
                        (verb.as_str().to_string(), Value::Array(groups))
                    })
                    .collect();
                json!({ "Entity": entity, "OperationMap": operation_map })
            })
            .collect();

        Some(json!({
            "@odata.id": "/redfish/v1/AccountService/PrivilegeMap",
            "@odata.type": registry.odata_type,
            "Id": registry.id,
            "Name": registry.name,
            "PrivilegesUsed": self.table.names(crate::privileges::PrivilegeType::Base),
            "OEMPrivilegesUsed": self.table.names(crate::privileges::PrivilegeType::Oem),
            "Mappings": mappings,
        }))
    }
}
