//! Backend RPC contract.
//!
//! Handlers reach system state through method calls on a message bus. The
//! bus itself lives outside this crate: [`DbusClient`] is the seam, and
//! [`MemoryBus`] is an in-process implementation serving the standard
//! `Properties` and `ObjectManager` interfaces over a configured object set.
//!
//! Completions always arrive on a later turn of the event loop, never inline
//! from `async_method_call`.

use std::cell::RefCell;
use std::collections::BTreeMap;

use bmcweb_config::BusObjectConfig;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

/// Backend failure. Only ever logged; clients see a generic Redfish error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbusError {
    #[error("The name {0} was not provided by any service")]
    ServiceUnknown(String),

    #[error("Unknown object '{0}'")]
    UnknownObject(String),

    #[error("Unknown interface '{0}'")]
    UnknownInterface(String),

    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Bus connection closed before the reply arrived")]
    Disconnected,
}

impl DbusError {
    /// The call addressed something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DbusError::ServiceUnknown(_)
                | DbusError::UnknownObject(_)
                | DbusError::UnknownInterface(_)
                | DbusError::UnknownProperty(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub service: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(service: &str, path: &str, interface: &str, member: &str) -> Self {
        Self {
            service: service.to_string(),
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// `Properties.GetAll(interface)` on `path`.
    pub fn get_all(service: &str, path: &str, interface: &str) -> Self {
        Self::new(service, path, PROPERTIES_INTERFACE, "GetAll").arg(interface)
    }

    /// `Properties.Get(interface, property)` on `path`.
    pub fn get_property(service: &str, path: &str, interface: &str, property: &str) -> Self {
        Self::new(service, path, PROPERTIES_INTERFACE, "Get")
            .arg(interface)
            .arg(property)
    }

    /// `Properties.Set(interface, property, value)` on `path`.
    pub fn set_property(
        service: &str,
        path: &str,
        interface: &str,
        property: &str,
        value: Value,
    ) -> Self {
        Self::new(service, path, PROPERTIES_INTERFACE, "Set")
            .arg(interface)
            .arg(property)
            .arg(value)
    }

    /// `ObjectManager.GetManagedObjects()` rooted at `path`.
    pub fn managed_objects(service: &str, path: &str) -> Self {
        Self::new(service, path, OBJECT_MANAGER_INTERFACE, "GetManagedObjects")
    }
}

pub type DbusResult = Result<Value, DbusError>;
pub type DbusCallback = Box<dyn FnOnce(DbusResult)>;

/// Asynchronous method call client.
pub trait DbusClient {
    /// Issues `call`; `callback` runs exactly once, on a later loop turn.
    fn async_method_call(&self, call: MethodCall, callback: DbusCallback);
}

/// Awaits the reply of `call`.
pub async fn call(client: &dyn DbusClient, call: MethodCall) -> DbusResult {
    let (tx, rx) = oneshot::channel();
    client.async_method_call(
        call,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    rx.await.unwrap_or(Err(DbusError::Disconnected))
}

type Interfaces = BTreeMap<String, Map<String, Value>>;

/// In-process bus: services own objects, objects carry interfaces with
/// properties.
#[derive(Debug, Default)]
pub struct MemoryBus {
    objects: RefCell<BTreeMap<String, BTreeMap<String, Interfaces>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(objects: &[BusObjectConfig]) -> Self {
        let bus = Self::new();
        for object in objects {
            bus.insert(
                &object.service,
                &object.path,
                &object.interface,
                object
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }
        bus
    }

    /// Publishes (or extends) an interface on an object.
    pub fn insert(&self, service: &str, path: &str, interface: &str, properties: Map<String, Value>) {
        self.objects
            .borrow_mut()
            .entry(service.to_string())
            .or_default()
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default()
            .extend(properties);
    }

    /// Answers `call` synchronously.
    pub fn dispatch(&self, call: &MethodCall) -> DbusResult {
        debug!(
            "{} {} {}.{}",
            call.service, call.path, call.interface, call.member
        );
        match (call.interface.as_str(), call.member.as_str()) {
            (PROPERTIES_INTERFACE, "Get") => {
                let (interface, property) = two_strings(&call.args)?;
                self.with_interface(call, interface, |props| {
                    props
                        .get(property)
                        .cloned()
                        .ok_or_else(|| DbusError::UnknownProperty(property.to_string()))
                })
            }
            (PROPERTIES_INTERFACE, "GetAll") => {
                let interface = string_arg(&call.args, 0)?;
                self.with_interface(call, interface, |props| Ok(Value::Object(props.clone())))
            }
            (PROPERTIES_INTERFACE, "Set") => {
                let (interface, property) = two_strings(&call.args)?;
                let value = call
                    .args
                    .get(2)
                    .cloned()
                    .ok_or_else(|| DbusError::InvalidArgs("missing value".to_string()))?;
                self.with_interface_mut(call, interface, |props| {
                    let slot = props
                        .get_mut(property)
                        .ok_or_else(|| DbusError::UnknownProperty(property.to_string()))?;
                    *slot = value;
                    Ok(Value::Null)
                })
            }
            (OBJECT_MANAGER_INTERFACE, "GetManagedObjects") => {
                let objects = self.objects.borrow();
                let service = objects
                    .get(&call.service)
                    .ok_or_else(|| DbusError::ServiceUnknown(call.service.clone()))?;
                let prefix = call.path.trim_end_matches('/');
                let managed: Map<String, Value> = service
                    .iter()
                    .filter(|(path, _)| {
                        path.strip_prefix(prefix)
                            .is_some_and(|rest| rest.starts_with('/'))
                    })
                    .map(|(path, interfaces)| (path.clone(), json!(interfaces)))
                    .collect();
                Ok(Value::Object(managed))
            }
            _ => Err(DbusError::UnknownMethod(format!(
                "{}.{}",
                call.interface, call.member
            ))),
        }
    }

    fn with_interface<T>(
        &self,
        call: &MethodCall,
        interface: &str,
        f: impl FnOnce(&Map<String, Value>) -> Result<T, DbusError>,
    ) -> Result<T, DbusError> {
        let objects = self.objects.borrow();
        let props = lookup(&objects, call, interface)?;
        f(props)
    }

    fn with_interface_mut<T>(
        &self,
        call: &MethodCall,
        interface: &str,
        f: impl FnOnce(&mut Map<String, Value>) -> Result<T, DbusError>,
    ) -> Result<T, DbusError> {
        let mut objects = self.objects.borrow_mut();
        let props = objects
            .get_mut(&call.service)
            .ok_or_else(|| DbusError::ServiceUnknown(call.service.clone()))?
            .get_mut(&call.path)
            .ok_or_else(|| DbusError::UnknownObject(call.path.clone()))?
            .get_mut(interface)
            .ok_or_else(|| DbusError::UnknownInterface(interface.to_string()))?;
        f(props)
    }
}

impl DbusClient for MemoryBus {
    fn async_method_call(&self, call: MethodCall, callback: DbusCallback) {
        let result = self.dispatch(&call);
        if let Err(err) = &result {
            warn!("Bus call {}.{} on {} failed: {err}", call.interface, call.member, call.path);
        }
        tokio::task::spawn_local(async move { callback(result) });
    }
}

fn lookup<'a>(
    objects: &'a BTreeMap<String, BTreeMap<String, Interfaces>>,
    call: &MethodCall,
    interface: &str,
) -> Result<&'a Map<String, Value>, DbusError> {
    objects
        .get(&call.service)
        .ok_or_else(|| DbusError::ServiceUnknown(call.service.clone()))?
        .get(&call.path)
        .ok_or_else(|| DbusError::UnknownObject(call.path.clone()))?
        .get(interface)
        .ok_or_else(|| DbusError::UnknownInterface(interface.to_string()))
}

fn string_arg(args: &[Value], index: usize) -> Result<&str, DbusError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| DbusError::InvalidArgs(format!("argument {index} must be a string")))
}

fn two_strings(args: &[Value]) -> Result<(&str, &str), DbusError> {
    Ok((string_arg(args, 0)?, string_arg(args, 1)?))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use tokio::task::LocalSet;

    use super::*;

    const SERVICE: &str = "xyz.openbmc_project.State.BMC";
    const BMC: &str = "xyz.openbmc_project.State.BMC";

    fn bus() -> MemoryBus {
        let bus = MemoryBus::new();
        let mut props = Map::new();
        props.insert("CurrentBMCState".to_string(), json!("Ready"));
        bus.insert(SERVICE, "/xyz/openbmc_project/state/bmc0", BMC, props);
        bus
    }

    #[test]
    fn get_and_set_property() {
        let bus = bus();
        let path = "/xyz/openbmc_project/state/bmc0";
        let get = MethodCall::get_property(SERVICE, path, BMC, "CurrentBMCState");
        assert_eq!(bus.dispatch(&get), Ok(json!("Ready")));

        let set = MethodCall::set_property(SERVICE, path, BMC, "CurrentBMCState", json!("Quiesced"));
        assert_eq!(bus.dispatch(&set), Ok(Value::Null));
        assert_eq!(bus.dispatch(&get), Ok(json!("Quiesced")));

        let unknown = MethodCall::set_property(SERVICE, path, BMC, "Nope", json!(1));
        assert_eq!(
            bus.dispatch(&unknown),
            Err(DbusError::UnknownProperty("Nope".to_string()))
        );
    }

    #[test]
    fn errors_classify() {
        let bus = bus();
        let err = bus
            .dispatch(&MethodCall::get_all(SERVICE, "/nope", BMC))
            .unwrap_err();
        assert!(err.is_not_found());

        let err = bus
            .dispatch(&MethodCall::new(SERVICE, "/", "a.b", "Reboot"))
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[test]
    fn managed_objects_are_scoped_to_path() {
        let bus = bus();
        bus.insert(SERVICE, "/other/thing", BMC, Map::new());
        let objects = bus
            .dispatch(&MethodCall::managed_objects(SERVICE, "/xyz/openbmc_project/state"))
            .unwrap();
        let objects = objects.as_object().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(
            objects["/xyz/openbmc_project/state/bmc0"][BMC]["CurrentBMCState"],
            "Ready"
        );
    }

    #[tokio::test]
    async fn callback_runs_on_a_later_turn() {
        LocalSet::new()
            .run_until(async {
                let bus = Rc::new(bus());
                let fired = Rc::new(RefCell::new(None));
                let slot = fired.clone();
                bus.async_method_call(
                    MethodCall::get_all(SERVICE, "/xyz/openbmc_project/state/bmc0", BMC),
                    Box::new(move |result| *slot.borrow_mut() = Some(result)),
                );
                assert!(fired.borrow().is_none());

                let reply = call(bus.as_ref(), MethodCall::get_all(SERVICE, "/nope", BMC)).await;
                assert_eq!(reply, Err(DbusError::UnknownObject("/nope".to_string())));
                assert!(fired.borrow().as_ref().is_some_and(Result::is_ok));
            })
            .await;
    }
}
