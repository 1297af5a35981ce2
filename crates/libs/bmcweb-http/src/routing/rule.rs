//! Registered routes and how they are authorized.

use std::rc::Rc;
use std::str::FromStr;

use bmcweb_auth::operation::{OperationRequirement, Verb};
use bmcweb_auth::registry::EntityPrivileges;
use futures::future::LocalBoxFuture;
use http::Method;

use crate::request::Request;
use crate::response::AsyncResp;
use crate::sse::SseConnection;
use crate::websocket::WebSocket;

/// Values captured by `<str>` and `<path>` segments, in pattern order.
pub type Params = Vec<String>;

pub type HandlerFn = Rc<dyn Fn(Rc<Request>, AsyncResp, Params)>;
pub type WebSocketFn = Rc<dyn Fn(Rc<Request>, WebSocket, Params) -> LocalBoxFuture<'static, ()>>;
pub type SseFn = Rc<dyn Fn(Rc<Request>, SseConnection, Params) -> LocalBoxFuture<'static, ()>>;

/// What runs once a rule is matched and authorized.
#[derive(Clone)]
pub enum RuleHandler {
    Http(HandlerFn),
    WebSocket(WebSocketFn),
    Sse(SseFn),
}

impl std::fmt::Debug for RuleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RuleHandler::Http(_) => "Http",
            RuleHandler::WebSocket(_) => "WebSocket",
            RuleHandler::Sse(_) => "Sse",
        })
    }
}

/// Where a rule takes its privilege requirement from.
#[derive(Debug, Clone)]
pub enum RuleAccess {
    /// The same requirement for every method of the rule.
    Requirement(OperationRequirement),
    /// The privilege registry entry of a Redfish entity.
    Entity(String),
}

#[derive(Debug)]
pub struct Rule {
    pub pattern: String,
    pub methods: Vec<Method>,
    pub access: RuleAccess,
    pub handler: RuleHandler,
}

impl Rule {
    /// The requirement for `method`.
    ///
    /// A locked registry locks every rule. Methods outside the Redfish verbs
    /// get a requirement nobody meets on entity rules.
    pub fn requirement(
        &self,
        method: &Method,
        registry: &EntityPrivileges,
    ) -> bmcweb_auth::prelude::Result<OperationRequirement> {
        if registry.is_locked() {
            return Err(bmcweb_auth::error::Error::RegistryLocked);
        }
        match &self.access {
            RuleAccess::Requirement(requirement) => Ok(requirement.clone()),
            RuleAccess::Entity(entity) => match Verb::from_str(method.as_str()) {
                Ok(verb) => registry.requirement(entity, verb),
                Err(_) => Ok(OperationRequirement::denied()),
            },
        }
    }
}
