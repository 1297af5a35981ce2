//! Route table of the daemon.

use std::rc::Rc;
use std::sync::Arc;

use bmcweb_auth::privileges::NO_AUTH;
use bmcweb_auth::registry::EntityPrivileges;
use bmcweb_config::BmcwebConfig;
use bmcweb_http::app::App;
use bmcweb_http::dbus::MemoryBus;
use bmcweb_http::messages;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::events::{self, EVENT_SERVICE_URI, EventHub};
use crate::managers::{self, MANAGERS_URI};
use crate::prelude::*;
use crate::sessions::{self, SESSION_SERVICE_URI, SESSIONS_URI};

const SERVICE_ROOT_URI: &str = "/redfish/v1";
const ACCOUNT_SERVICE_URI: &str = "/redfish/v1/AccountService";
const PRIVILEGE_MAP_URI: &str = "/redfish/v1/AccountService/PrivilegeMap";

/// Everything the handlers share.
pub struct Services {
    pub config: Arc<BmcwebConfig>,
    pub bus: Rc<MemoryBus>,
    pub hub: Rc<EventHub>,
    /// Service root UUID, fixed for the life of the process.
    pub uuid: Uuid,
}

impl Services {
    pub fn new(config: Arc<BmcwebConfig>) -> Self {
        let bus = Rc::new(MemoryBus::from_config(&config.bus_objects));
        managers::seed_bmc_state(&bus);
        Self {
            config,
            bus,
            hub: Rc::new(EventHub::new()),
            uuid: Uuid::new_v4(),
        }
    }
}

fn service_root(uuid: &Uuid) -> Value {
    json!({
        "@odata.id": SERVICE_ROOT_URI,
        "@odata.type": "#ServiceRoot.v1_15_0.ServiceRoot",
        "Id": "RootService",
        "Name": "Root Service",
        "RedfishVersion": "1.17.0",
        "UUID": uuid.to_string(),
        "Links": {
            "Sessions": { "@odata.id": SESSIONS_URI },
        },
        "AccountService": { "@odata.id": ACCOUNT_SERVICE_URI },
        "EventService": { "@odata.id": EVENT_SERVICE_URI },
        "Managers": { "@odata.id": MANAGERS_URI },
        "SessionService": { "@odata.id": SESSION_SERVICE_URI },
    })
}

fn account_service(config: &BmcwebConfig) -> Value {
    let auth = &config.auth;
    json!({
        "@odata.id": ACCOUNT_SERVICE_URI,
        "@odata.type": "#AccountService.v1_10_0.AccountService",
        "Id": "AccountService",
        "Name": "Account Service",
        "Description": "Account Service",
        "ServiceEnabled": true,
        "LocalAccountAuth": "Enabled",
        "PrivilegeMap": { "@odata.id": PRIVILEGE_MAP_URI },
        "Oem": {
            "OpenBMC": {
                "AuthMethods": {
                    "BasicAuth": auth.basic,
                    "Cookie": auth.cookie,
                    "SessionToken": auth.session_token,
                    "XToken": auth.xtoken,
                    "TLS": auth.tls,
                },
            },
        },
    })
}

/// Builds the app with every route installed.
pub fn build_app(registry: Arc<EntityPrivileges>, services: &Services) -> Result<App> {
    let mut app = App::new(services.config.clone(), registry);
    setup_api(&mut app, services)?;
    Ok(app)
}

pub fn setup_api(app: &mut App, services: &Services) -> Result<()> {
    let uuid = services.uuid;
    let config = services.config.clone();
    let privilege_map = app.registry().to_json();
    let router = app.router_mut();

    router
        .route("/redfish/")
        .privileges(&[&[NO_AUTH]])
        .handler(|_req, resp, _params| {
            resp.res().set_json(json!({ "v1": "/redfish/v1/" }));
        })?;
    router
        .route("/redfish/v1/")
        .entity("ServiceRoot")
        .handler(move |_req, resp, _params| {
            resp.res().set_json(service_root(&uuid));
        })?;
    router
        .route("/redfish/v1/AccountService/")
        .entity("AccountService")
        .handler(move |_req, resp, _params| {
            resp.res().set_json(account_service(&config));
        })?;
    router
        .route("/redfish/v1/AccountService/PrivilegeMap/")
        .entity("PrivilegeRegistry")
        .handler(move |_req, resp, _params| match &privilege_map {
            Some(map) => resp.res().set_json(map.clone()),
            None => messages::service_temporarily_unavailable(&mut resp.res(), "30"),
        })?;

    sessions::setup_sessions(app, services.config.clone(), services.hub.clone())?;
    managers::setup_managers(app, services.bus.clone(), uuid)?;
    events::setup_events(app, services.hub.clone())?;
    Ok(())
}
