//! Route registration, lookup and authorization.
//!
//! Rules are registered once at startup through [`Router::route`]. At request
//! time [`Router::resolve`] decides, in this order:
//!
//! 1. which rule matches the path, collecting every method the path accepts;
//! 2. anonymous callers only get through to a matched rule that is open for
//!    the method, everything else answers `401`;
//! 3. no path answers `404`, a path without the method answers `405` with
//!    `Allow`;
//! 4. a locked privilege registry answers `503`;
//! 5. a caller without the required privileges gets `403`;
//! 6. otherwise the rule's handler is returned, to be run exactly once.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use bmcweb_auth::registry::EntityPrivileges;
//! use bmcweb_http::request::Request;
//! use bmcweb_http::routing::{Routed, Router};
//! use http::{Method, StatusCode};
//!
//! let mut router = Router::new(Arc::new(EntityPrivileges::redfish_default()));
//! router
//!     .route("/redfish/v1/")
//!     .methods([Method::GET])
//!     .entity("ServiceRoot")
//!     .handler(|_req, resp, _params| {
//!         resp.res().set_json(serde_json::json!({ "Id": "RootService" }));
//!     })
//!     .unwrap();
//!
//! // Open to anonymous callers, with or without the trailing slash.
//! assert!(matches!(router.resolve(&Request::get("/redfish/v1")), Routed::Handler { .. }));
//!
//! // Unknown paths are not revealed to anonymous callers.
//! match router.resolve(&Request::get("/redfish/v1/Nope")) {
//!     Routed::Reject(res) => assert_eq!(res.status(), StatusCode::UNAUTHORIZED),
//!     _ => unreachable!(),
//! }
//! ```

pub mod rule;
pub mod trie;

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use bmcweb_auth::error::Error as AuthError;
use bmcweb_auth::operation::OperationRequirement;
use bmcweb_auth::registry::EntityPrivileges;
use futures::FutureExt;
use http::{Method, StatusCode, header};
use tracing::{debug, error};

use crate::messages;
use crate::prelude::*;
use crate::request::Request;
use crate::response::{AsyncResp, Response};
use crate::sse::SseConnection;
use crate::websocket::WebSocket;

pub use rule::{Params, Rule, RuleAccess, RuleHandler};
use trie::Trie;

/// Result of matching a method and path.
#[derive(Debug)]
pub enum RouteMatch {
    NotFound,
    MethodNotAllowed { allow: String },
    Found { rule: Rc<Rule>, params: Params, allow: String },
}

/// Result of matching and authorizing a request.
#[derive(Debug)]
pub enum Routed {
    Handler { rule: Rc<Rule>, params: Params },
    Reject(Response),
}

/// The route table.
pub struct Router {
    trie: Trie,
    rules: Vec<Rc<Rule>>,
    registry: Arc<EntityPrivileges>,
}

impl Router {
    pub fn new(registry: Arc<EntityPrivileges>) -> Self {
        Self {
            trie: Trie::new(),
            rules: Vec::new(),
            registry,
        }
    }

    pub fn registry(&self) -> &EntityPrivileges {
        &self.registry
    }

    /// Starts registering a rule. Finish with `handler`, `websocket` or `sse`.
    pub fn route(&mut self, pattern: &str) -> RuleBuilder<'_> {
        RuleBuilder {
            router: self,
            pattern: pattern.to_string(),
            methods: Vec::new(),
            privileges: None,
            entity: None,
        }
    }

    fn add_rule(&mut self, rule: Rule) -> Result<()> {
        let index = self.rules.len();
        for method in &rule.methods {
            self.trie.add(&rule.pattern, method.clone(), index)?;
        }
        debug!("Registered {:?} {} ({:?})", rule.methods, rule.pattern, rule.handler);
        self.rules.push(Rc::new(rule));
        Ok(())
    }

    /// Looks up the rule for a method and path.
    pub fn find_route(&self, method: &Method, path: &str) -> RouteMatch {
        let Some(found) = self.trie.find(path) else {
            return RouteMatch::NotFound;
        };
        let allow = found
            .methods
            .iter()
            .map(|(m, _)| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match found.methods.iter().find(|(m, _)| m == method) {
            Some((_, index)) => RouteMatch::Found {
                rule: self.rules[*index].clone(),
                params: found.params,
                allow,
            },
            None => RouteMatch::MethodNotAllowed { allow },
        }
    }

    /// Matches and authorizes a request.
    pub fn resolve(&self, req: &Request) -> Routed {
        let method = req.method();
        let found = self.find_route(method, req.path());

        if req.session().is_none() {
            if let RouteMatch::Found { rule, params, .. } = found {
                let open = rule
                    .requirement(method, &self.registry)
                    .is_ok_and(|requirement| requirement.is_open());
                if open {
                    return Routed::Handler { rule, params };
                }
            }
            debug!("Anonymous {} {} refused", method, req.path());
            let mut res = Response::new();
            messages::no_valid_session(&mut res);
            return Routed::Reject(res);
        }

        let (rule, params) = match found {
            RouteMatch::NotFound => {
                let mut res = Response::new();
                messages::resource_missing_at_uri(&mut res, req.path());
                return Routed::Reject(res);
            }
            RouteMatch::MethodNotAllowed { allow } => {
                let mut res = Response::new();
                messages::operation_not_allowed(&mut res);
                res.add_header(header::ALLOW, &allow);
                return Routed::Reject(res);
            }
            RouteMatch::Found { rule, params, .. } => (rule, params),
        };

        let requirement = match rule.requirement(method, &self.registry) {
            Ok(requirement) => requirement,
            Err(AuthError::RegistryLocked) => {
                let mut res = Response::new();
                messages::service_temporarily_unavailable(&mut res, "30");
                return Routed::Reject(res);
            }
            Err(err) => {
                error!("No privilege requirement for {}: {err}", rule.pattern);
                let mut res = Response::new();
                messages::internal_error(&mut res);
                return Routed::Reject(res);
            }
        };

        if !requirement.is_satisfied_by(req.user_privileges()) {
            debug!("Insufficient privileges for {} {}", method, req.path());
            let mut res = Response::new();
            messages::insufficient_privilege(&mut res);
            return Routed::Reject(res);
        }

        Routed::Handler { rule, params }
    }
}

/// Builder returned by [`Router::route`].
pub struct RuleBuilder<'a> {
    router: &'a mut Router,
    pattern: String,
    methods: Vec<Method>,
    privileges: Option<Vec<Vec<String>>>,
    entity: Option<String>,
}

impl RuleBuilder<'_> {
    /// Methods the rule answers. Defaults to `GET`.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.extend(methods);
        self
    }

    /// Explicit OR-of-AND privilege sets, applied to every method.
    ///
    /// `&[&["NoAuth"]]` opens the rule to anonymous callers.
    pub fn privileges(mut self, sets: &[&[&str]]) -> Self {
        self.privileges = Some(
            sets.iter()
                .map(|set| set.iter().map(|name| name.to_string()).collect())
                .collect(),
        );
        self
    }

    /// Takes per-method requirements from a privilege registry entity.
    pub fn entity(mut self, entity: &str) -> Self {
        self.entity = Some(entity.to_string());
        self
    }

    pub fn handler<F>(self, f: F) -> Result<()>
    where
        F: Fn(Rc<Request>, AsyncResp, Params) + 'static,
    {
        self.finish(RuleHandler::Http(Rc::new(f)))
    }

    pub fn websocket<F, Fut>(self, f: F) -> Result<()>
    where
        F: Fn(Rc<Request>, WebSocket, Params) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.finish(RuleHandler::WebSocket(Rc::new(move |req, ws, params| {
            f(req, ws, params).boxed_local()
        })))
    }

    pub fn sse<F, Fut>(self, f: F) -> Result<()>
    where
        F: Fn(Rc<Request>, SseConnection, Params) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.finish(RuleHandler::Sse(Rc::new(move |req, conn, params| {
            f(req, conn, params).boxed_local()
        })))
    }

    fn finish(self, handler: RuleHandler) -> Result<()> {
        let registry = &self.router.registry;
        let access = match (self.entity, self.privileges) {
            (Some(entity), _) => {
                if !registry.is_locked() {
                    registry.operation_map(&entity)?;
                }
                RuleAccess::Entity(entity)
            }
            (None, Some(sets)) => {
                let sets = sets
                    .iter()
                    .map(|set| registry.table().privileges(set))
                    .collect::<bmcweb_auth::prelude::Result<Vec<_>>>()?;
                RuleAccess::Requirement(OperationRequirement::new(sets))
            }
            (None, None) => RuleAccess::Requirement(OperationRequirement::new(vec![
                registry.table().privileges(["Login"])?,
            ])),
        };

        let methods = if self.methods.is_empty() {
            vec![Method::GET]
        } else {
            self.methods
        };

        self.router.add_rule(Rule {
            pattern: self.pattern,
            methods,
            access,
            handler,
        })
    }
}

/// Status of a rejection, for logging.
pub fn rejection_status(routed: &Routed) -> Option<StatusCode> {
    match routed {
        Routed::Reject(res) => Some(res.status()),
        Routed::Handler { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use bmcweb_auth::privileges::PrivilegeTable;
    use bmcweb_auth::role::Role;
    use bmcweb_auth::session::{PersistenceType, SessionStore};

    use super::*;

    fn router(registry: EntityPrivileges) -> Router {
        let mut router = Router::new(Arc::new(registry));
        router
            .route("/redfish/v1/")
            .entity("ServiceRoot")
            .handler(|_, _, _| {})
            .unwrap();
        router
            .route("/redfish/v1/Managers/<str>")
            .methods([Method::GET, Method::PATCH])
            .entity("Manager")
            .handler(|_, _, _| {})
            .unwrap();
        router
            .route("/redfish/v1/Managers/<str>/Actions/Manager.Reset")
            .methods([Method::POST])
            .privileges(&[&["ConfigureManager"]])
            .handler(|_, _, _| {})
            .unwrap();
        router
    }

    fn as_user(path: &str, method: Method, role: Role) -> Request {
        let store = SessionStore::default();
        let session = store.generate_user_session("u", role, None, PersistenceType::Timeout, false);
        let mut req = Request::new(
            method,
            http::Uri::try_from(path).unwrap(),
            http::Version::HTTP_11,
            http::HeaderMap::new(),
            bytes::Bytes::new(),
        );
        req.set_session(Some(session), role.privileges(&PrivilegeTable::redfish()));
        req
    }

    fn status(routed: Routed) -> Option<StatusCode> {
        rejection_status(&routed)
    }

    #[test]
    fn anonymous_never_learns_about_paths() {
        let r = router(EntityPrivileges::redfish_default());
        assert_eq!(
            status(r.resolve(&Request::get("/nope"))),
            Some(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            status(r.resolve(&Request::get("/redfish/v1/Managers/bmc"))),
            Some(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(status(r.resolve(&Request::get("/redfish/v1"))), None);
    }

    #[test]
    fn not_found_and_method_not_allowed_skip_privileges() {
        let r = router(EntityPrivileges::redfish_default());
        let req = as_user("/redfish/v1/Nope", Method::GET, Role::NoAccess);
        assert_eq!(status(r.resolve(&req)), Some(StatusCode::NOT_FOUND));

        let req = as_user("/redfish/v1/Managers/bmc", Method::DELETE, Role::NoAccess);
        match r.resolve(&req) {
            Routed::Reject(res) => {
                assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
                assert_eq!(res.header(header::ALLOW), Some("GET, PATCH"));
            }
            Routed::Handler { .. } => panic!("DELETE should not route"),
        }
    }

    #[test]
    fn privilege_check_per_method() {
        let r = router(EntityPrivileges::redfish_default());
        let get = as_user("/redfish/v1/Managers/bmc", Method::GET, Role::ReadOnly);
        let patch = as_user("/redfish/v1/Managers/bmc", Method::PATCH, Role::ReadOnly);
        let admin = as_user("/redfish/v1/Managers/bmc", Method::PATCH, Role::Administrator);

        match r.resolve(&get) {
            Routed::Handler { params, .. } => assert_eq!(params, vec!["bmc".to_string()]),
            Routed::Reject(res) => panic!("unexpected {}", res.status()),
        }
        assert_eq!(status(r.resolve(&patch)), Some(StatusCode::FORBIDDEN));
        assert_eq!(status(r.resolve(&admin)), None);

        let reset = as_user(
            "/redfish/v1/Managers/bmc/Actions/Manager.Reset",
            Method::POST,
            Role::Operator,
        );
        assert_eq!(status(r.resolve(&reset)), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn locked_registry_answers_unavailable() {
        let r = router(EntityPrivileges::from_json("not json"));
        let req = as_user("/redfish/v1/Managers/bmc", Method::GET, Role::Administrator);
        assert_eq!(status(r.resolve(&req)), Some(StatusCode::SERVICE_UNAVAILABLE));
        // Even the service root is closed to anonymous callers.
        assert_eq!(
            status(r.resolve(&Request::get("/redfish/v1"))),
            Some(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn default_rule_requires_login() {
        let mut r = Router::new(Arc::new(EntityPrivileges::redfish_default()));
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        r.route("/login-only")
            .handler(move |_, _, _| counter.set(counter.get() + 1))
            .unwrap();

        let req = as_user("/login-only", Method::GET, Role::NoAccess);
        assert_eq!(status(r.resolve(&req)), Some(StatusCode::FORBIDDEN));
        let req = as_user("/login-only", Method::GET, Role::ReadOnly);
        assert_eq!(status(r.resolve(&req)), None);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn registration_errors() {
        let mut r = Router::new(Arc::new(EntityPrivileges::redfish_default()));
        assert!(matches!(
            r.route("/x").entity("NoSuchEntity").handler(|_, _, _| {}),
            Err(Error::Auth(AuthError::UnknownEntity(_)))
        ));
        assert!(matches!(
            r.route("/x").privileges(&[&["Root"]]).handler(|_, _, _| {}),
            Err(Error::Auth(AuthError::UnknownPrivilege(_)))
        ));
        r.route("/x").handler(|_, _, _| {}).unwrap();
        assert!(matches!(
            r.route("/x").handler(|_, _, _| {}),
            Err(Error::DuplicateRoute { .. })
        ));
    }
}
