//! The BMC manager resource, backed by the BMC state object on the bus.

use std::rc::Rc;

use bmcweb_http::app::App;
use bmcweb_http::dbus::{self, DbusClient, MemoryBus, MethodCall};
use bmcweb_http::messages;
use bmcweb_http::request::Request;
use bmcweb_http::response::AsyncResp;
use chrono::{DateTime, SecondsFormat};
use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{error, info};
use uuid::Uuid;

use crate::prelude::*;

pub const MANAGERS_URI: &str = "/redfish/v1/Managers";
pub const BMC_ID: &str = "bmc";

pub const BMC_STATE_SERVICE: &str = "xyz.openbmc_project.State.BMC";
pub const BMC_STATE_PATH: &str = "/xyz/openbmc_project/state/bmc0";
pub const BMC_STATE_INTERFACE: &str = "xyz.openbmc_project.State.BMC";

const REBOOT_TRANSITION: &str = "xyz.openbmc_project.State.BMC.Transition.Reboot";
const RESET_TYPES: [&str; 2] = ["GracefulRestart", "ForceRestart"];

#[derive(Debug, Deserialize)]
struct ResetRequest {
    #[serde(rename = "ResetType")]
    reset_type: Option<String>,
}

/// Publishes the BMC state properties the manager routes rely on, keeping
/// any value already configured.
pub fn seed_bmc_state(bus: &MemoryBus) {
    let existing = bus
        .dispatch(&MethodCall::get_all(
            BMC_STATE_SERVICE,
            BMC_STATE_PATH,
            BMC_STATE_INTERFACE,
        ))
        .unwrap_or_default();
    let defaults: Map<String, Value> = [
        ("CurrentBMCState", json!("xyz.openbmc_project.State.BMC.BMCState.Ready")),
        ("RequestedBMCTransition", json!("xyz.openbmc_project.State.BMC.Transition.None")),
        ("LastRebootTime", json!(0)),
    ]
    .into_iter()
    .filter(|(name, _)| existing.get(name).is_none())
    .map(|(name, value)| (name.to_string(), value))
    .collect();
    bus.insert(BMC_STATE_SERVICE, BMC_STATE_PATH, BMC_STATE_INTERFACE, defaults);
}

fn manager_uri(id: &str) -> String {
    format!("{MANAGERS_URI}/{id}")
}

fn health_state(current: Option<&str>) -> &'static str {
    match current.and_then(|state| state.rsplit('.').next()) {
        Some("Ready") => "Enabled",
        Some("Quiesced") => "Quiesced",
        _ => "Starting",
    }
}

fn manager_json(uuid: &Uuid, properties: &Value) -> Value {
    let uri = manager_uri(BMC_ID);
    let mut manager = json!({
        "@odata.id": uri,
        "@odata.type": "#Manager.v1_14_0.Manager",
        "Id": BMC_ID,
        "Name": "OpenBmc Manager",
        "Description": "Baseboard Management Controller",
        "ManagerType": "BMC",
        "UUID": uuid.to_string(),
        "Status": {
            "State": health_state(properties["CurrentBMCState"].as_str()),
            "Health": "OK",
        },
        "Actions": {
            "#Manager.Reset": {
                "target": format!("{uri}/Actions/Manager.Reset"),
                "ResetType@Redfish.AllowableValues": RESET_TYPES,
            },
        },
    });
    let last_reset = properties["LastRebootTime"]
        .as_i64()
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    if let Some(last_reset) = last_reset {
        manager["LastResetTime"] = json!(last_reset.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    manager
}

pub fn setup_managers(app: &mut App, bus: Rc<dyn DbusClient>, uuid: Uuid) -> Result<()> {
    let router = app.router_mut();
    router
        .route("/redfish/v1/Managers/")
        .entity("ManagerCollection")
        .handler(|_req, resp, _params| {
            resp.res().set_json(json!({
                "@odata.id": MANAGERS_URI,
                "@odata.type": "#ManagerCollection.ManagerCollection",
                "Name": "Manager Collection",
                "Members@odata.count": 1,
                "Members": [{ "@odata.id": manager_uri(BMC_ID) }],
            }));
        })?;

    let get_bus = bus.clone();
    router
        .route("/redfish/v1/Managers/<str>/")
        .entity("Manager")
        .handler(move |_req, resp, params| {
            get_manager(resp, &params[0], get_bus.clone(), uuid);
        })?;

    router
        .route("/redfish/v1/Managers/<str>/Actions/Manager.Reset/")
        .methods([Method::POST])
        .entity("Manager")
        .handler(move |req, resp, params| {
            reset_manager(&req, resp, &params[0], bus.clone());
        })?;
    Ok(())
}

fn get_manager(resp: AsyncResp, id: &str, bus: Rc<dyn DbusClient>, uuid: Uuid) {
    if id != BMC_ID {
        messages::resource_not_found(&mut resp.res(), "Manager", id);
        return;
    }
    tokio::task::spawn_local(async move {
        let call = MethodCall::get_all(BMC_STATE_SERVICE, BMC_STATE_PATH, BMC_STATE_INTERFACE);
        match dbus::call(bus.as_ref(), call).await {
            Ok(properties) => resp.res().set_json(manager_json(&uuid, &properties)),
            Err(err) if err.is_not_found() => {
                error!("BMC state object missing: {err}");
                messages::resource_not_found(&mut resp.res(), "Manager", BMC_ID);
            }
            Err(err) => {
                error!("Reading BMC state failed: {err}");
                messages::internal_error(&mut resp.res());
            }
        }
    });
}

fn reset_manager(req: &Request, resp: AsyncResp, id: &str, bus: Rc<dyn DbusClient>) {
    if id != BMC_ID {
        messages::resource_not_found(&mut resp.res(), "Manager", id);
        return;
    }
    let reset: ResetRequest = match req.json() {
        Ok(reset) => reset,
        Err(_) => {
            messages::malformed_json(&mut resp.res());
            return;
        }
    };
    let Some(reset_type) = reset.reset_type else {
        messages::property_missing(&mut resp.res(), "ResetType");
        return;
    };
    if !RESET_TYPES.contains(&reset_type.as_str()) {
        messages::action_parameter_value_not_in_list(
            &mut resp.res(),
            &reset_type,
            "ResetType",
            "Manager.Reset",
        );
        return;
    }

    tokio::task::spawn_local(async move {
        let call = MethodCall::set_property(
            BMC_STATE_SERVICE,
            BMC_STATE_PATH,
            BMC_STATE_INTERFACE,
            "RequestedBMCTransition",
            json!(REBOOT_TRANSITION),
        );
        match dbus::call(bus.as_ref(), call).await {
            Ok(_) => {
                info!("BMC {reset_type} requested");
                resp.res().set_status(StatusCode::NO_CONTENT);
            }
            Err(err) => {
                error!("Requesting BMC reboot failed: {err}");
                messages::internal_error(&mut resp.res());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use bmcweb_auth::role::Role;

    use super::*;
    use crate::api::tests::{TestService, request};

    #[test]
    fn seeding_keeps_configured_values() {
        let bus = MemoryBus::new();
        bus.insert(
            BMC_STATE_SERVICE,
            BMC_STATE_PATH,
            BMC_STATE_INTERFACE,
            [("LastRebootTime".to_string(), json!(1700000000))].into_iter().collect(),
        );
        seed_bmc_state(&bus);

        let props = bus
            .dispatch(&MethodCall::get_all(
                BMC_STATE_SERVICE,
                BMC_STATE_PATH,
                BMC_STATE_INTERFACE,
            ))
            .unwrap();
        assert_eq!(props["LastRebootTime"], 1700000000);
        assert_eq!(
            props["CurrentBMCState"],
            "xyz.openbmc_project.State.BMC.BMCState.Ready"
        );
    }

    #[test]
    fn manager_document() {
        let uuid = Uuid::nil();
        let doc = manager_json(
            &uuid,
            &json!({
                "CurrentBMCState": "xyz.openbmc_project.State.BMC.BMCState.NotReady",
                "LastRebootTime": 1700000000,
            }),
        );
        assert_eq!(doc["Status"]["State"], "Starting");
        assert_eq!(doc["LastResetTime"], "2023-11-14T22:13:20Z");
        assert_eq!(doc["UUID"], "00000000-0000-0000-0000-000000000000");
    }

    #[tokio::test]
    async fn manager_reads_the_bus() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let service = TestService::new();
                let user = service.login("reader", Role::ReadOnly);

                let res = service
                    .call(request(Method::GET, "/redfish/v1/Managers/bmc", Some(&user), ""))
                    .await;
                assert_eq!(res.status(), StatusCode::OK);
                assert_eq!(res.json()["Status"]["State"], "Enabled");

                let res = service
                    .call(request(Method::GET, "/redfish/v1/Managers/nope", Some(&user), ""))
                    .await;
                assert_eq!(res.status(), StatusCode::NOT_FOUND);

                let res = service
                    .call(request(Method::GET, MANAGERS_URI, Some(&user), ""))
                    .await;
                assert_eq!(res.json()["Members@odata.count"], 1);
            })
            .await;
    }

    #[tokio::test]
    async fn reset_requests_a_reboot() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let service = TestService::new();
                let admin = service.login("admin", Role::Administrator);
                let reader = service.login("reader", Role::ReadOnly);
                let uri = "/redfish/v1/Managers/bmc/Actions/Manager.Reset";

                let res = service
                    .call(request(Method::POST, uri, Some(&reader), r#"{"ResetType": "ForceRestart"}"#))
                    .await;
                assert_eq!(res.status(), StatusCode::FORBIDDEN);

                let res = service
                    .call(request(Method::POST, uri, Some(&admin), r#"{"ResetType": "PowerCycle"}"#))
                    .await;
                assert_eq!(res.status(), StatusCode::BAD_REQUEST);
                assert_eq!(
                    res.json()["error"]["code"],
                    "Base.1.13.0.ActionParameterValueNotInList"
                );

                let res = service
                    .call(request(Method::POST, uri, Some(&admin), r#"{"ResetType": "GracefulRestart"}"#))
                    .await;
                assert_eq!(res.status(), StatusCode::NO_CONTENT);
                let transition = service
                    .bus
                    .dispatch(&MethodCall::get_property(
                        BMC_STATE_SERVICE,
                        BMC_STATE_PATH,
                        BMC_STATE_INTERFACE,
                        "RequestedBMCTransition",
                    ))
                    .unwrap();
                assert_eq!(transition, REBOOT_TRANSITION);
            })
            .await;
    }
}
