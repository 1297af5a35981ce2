//! SessionService: login, logout and session listing.
//!
//! `POST /redfish/v1/SessionService/Sessions` is the only route anonymous
//! callers may use to get in. A successful login answers `201 Created` with
//! the new token in `X-Auth-Token` and the session resource in the body.

use std::rc::Rc;
use std::sync::Arc;

use bmcweb_auth::privileges::Privileges;
use bmcweb_auth::secret_hash::is_secret_valid;
use bmcweb_auth::session::{PersistenceType, SessionStore, UserSession};
use bmcweb_auth::AUTH_TOKEN_HEADER;
use bmcweb_config::BmcwebConfig;
use bmcweb_http::app::App;
use bmcweb_http::messages;
use bmcweb_http::request::Request;
use bmcweb_http::response::AsyncResp;
use http::{Method, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::events::{EventHub, EventKind};
use crate::prelude::*;

pub const SESSION_SERVICE_URI: &str = "/redfish/v1/SessionService";
pub const SESSIONS_URI: &str = "/redfish/v1/SessionService/Sessions";

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(rename = "UserName")]
    user_name: Option<String>,
    #[serde(rename = "Password")]
    password: Option<String>,
}

pub fn session_uri(session: &UserSession) -> String {
    format!("{SESSIONS_URI}/{}", session.unique_id)
}

pub fn session_json(session: &UserSession) -> Value {
    json!({
        "@odata.id": session_uri(session),
        "@odata.type": "#Session.v1_5_0.Session",
        "Id": session.unique_id,
        "Name": "User Session",
        "Description": "Manager User Session",
        "UserName": session.username,
        "ClientOriginIPAddress": session.client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
    })
}

fn session_service(sessions: &SessionStore) -> Value {
    json!({
        "@odata.id": SESSION_SERVICE_URI,
        "@odata.type": "#SessionService.v1_0_2.SessionService",
        "Id": "SessionService",
        "Name": "Session Service",
        "Description": "Session Service",
        "ServiceEnabled": true,
        "SessionTimeout": sessions.timeout().as_secs(),
        "Sessions": { "@odata.id": SESSIONS_URI },
    })
}

fn session_collection(sessions: &SessionStore) -> Value {
    let members: Vec<Value> = sessions
        .unique_ids()
        .into_iter()
        .map(|id| json!({ "@odata.id": format!("{SESSIONS_URI}/{id}") }))
        .collect();
    json!({
        "@odata.id": SESSIONS_URI,
        "@odata.type": "#SessionCollection.SessionCollection",
        "Name": "Session Collection",
        "Description": "Session Collection",
        "Members@odata.count": members.len(),
        "Members": members,
    })
}

pub fn setup_sessions(app: &mut App, config: Arc<BmcwebConfig>, hub: Rc<EventHub>) -> Result<()> {
    let sessions = app.sessions_arc();
    let configure_manager = app.registry().table().privileges(["ConfigureManager"])?;
    let router = app.router_mut();

    let store = sessions.clone();
    router
        .route("/redfish/v1/SessionService/")
        .entity("SessionService")
        .handler(move |_req, resp, _params| {
            resp.res().set_json(session_service(&store));
        })?;

    let store = sessions.clone();
    let login_hub = hub.clone();
    router
        .route("/redfish/v1/SessionService/Sessions/")
        .methods([Method::GET, Method::POST])
        .entity("SessionCollection")
        .handler(move |req, resp, _params| {
            if *req.method() == Method::POST {
                create_session(&req, resp, config.clone(), store.clone(), login_hub.clone());
            } else {
                resp.res().set_json(session_collection(&store));
            }
        })?;

    router
        .route("/redfish/v1/SessionService/Sessions/<str>/")
        .methods([Method::GET, Method::DELETE])
        .entity("Session")
        .handler(move |req, resp, params| {
            session_by_id(&req, &resp, &params[0], &sessions, &configure_manager, &hub);
        })?;
    Ok(())
}

fn create_session(
    req: &Request,
    resp: AsyncResp,
    config: Arc<BmcwebConfig>,
    sessions: Arc<SessionStore>,
    hub: Rc<EventHub>,
) {
    let login: LoginRequest = match req.json() {
        Ok(login) => login,
        Err(err) => {
            debug!("Unreadable login request: {err}");
            messages::malformed_json(&mut resp.res());
            return;
        }
    };
    let Some(username) = login.user_name else {
        messages::property_missing(&mut resp.res(), "UserName");
        return;
    };
    let Some(password) = login.password else {
        messages::property_missing(&mut resp.res(), "Password");
        return;
    };

    let uri = req.path().to_string();
    let Some(user) = config.user(&username) else {
        info!("Login attempt for unknown user {username}");
        messages::resource_at_uri_unauthorized(&mut resp.res(), &uri, "Invalid username or password");
        return;
    };
    let role = user.role;
    let hash = user.password_hash.clone();
    let client_ip = req.peer_addr().map(|addr| addr.ip());

    tokio::task::spawn_local(async move {
        let verified = tokio::task::spawn_blocking(move || is_secret_valid(&password, &hash)).await;
        match verified {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                info!("Login failed for {username}");
                messages::resource_at_uri_unauthorized(&mut resp.res(), &uri, "Invalid username or password");
                return;
            }
            Ok(Err(err)) => {
                warn!("Password check for {username} failed: {err}");
                messages::internal_error(&mut resp.res());
                return;
            }
            Err(err) => {
                warn!("Password check task failed: {err}");
                messages::internal_error(&mut resp.res());
                return;
            }
        }

        let session = sessions.generate_user_session(
            &username,
            role,
            client_ip,
            PersistenceType::Timeout,
            false,
        );
        let location = session_uri(&session);
        hub.publish(EventKind::ResourceCreated, &location);

        let mut res = resp.res();
        res.set_status(StatusCode::CREATED);
        res.add_header(AUTH_TOKEN_HEADER, &session.session_token);
        res.add_header(header::LOCATION, &location);
        res.set_json(session_json(&session));
    });
}

/// Callers may read or delete their own sessions; anyone else's needs
/// `ConfigureManager`.
fn session_by_id(
    req: &Request,
    resp: &AsyncResp,
    id: &str,
    sessions: &SessionStore,
    configure_manager: &Privileges,
    hub: &EventHub,
) {
    let Some(session) = sessions.get_session_by_uid(id) else {
        messages::resource_not_found(&mut resp.res(), "Session", id);
        return;
    };
    let own = req
        .session()
        .is_some_and(|caller| caller.username == session.username);
    if !own && !req.user_privileges().is_superset_of(configure_manager) {
        debug!("Session {id} does not belong to the caller");
        messages::insufficient_privilege(&mut resp.res());
        return;
    }

    if *req.method() == Method::DELETE {
        sessions.remove_session(&session);
        info!("Session {id} of {} deleted", session.username);
        hub.publish(EventKind::ResourceRemoved, &session_uri(&session));
        resp.res().set_status(StatusCode::NO_CONTENT);
    } else {
        resp.res().set_json(session_json(&session));
    }
}
