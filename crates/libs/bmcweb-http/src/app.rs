//! The application: route table, middleware chain and shared services.

use std::rc::Rc;
use std::sync::Arc;

use bmcweb_auth::registry::EntityPrivileges;
use bmcweb_auth::session::SessionStore;
use bmcweb_config::BmcwebConfig;
use http::{StatusCode, header};
use tracing::{debug, error};

use crate::messages;
use crate::middleware::{Context, Middleware, RequestLogger, SecurityHeaders, run_after, run_before};
use crate::request::Request;
use crate::response::{AsyncResp, Response};
use crate::routing::{Params, Routed, Router, Rule, RuleHandler};

pub struct App {
    router: Router,
    middlewares: Vec<Box<dyn Middleware>>,
    config: Arc<BmcwebConfig>,
    sessions: Arc<SessionStore>,
}

impl App {
    /// An app with request logging and security headers installed.
    pub fn new(config: Arc<BmcwebConfig>, registry: Arc<EntityPrivileges>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.auth.session_timeout()));
        Self {
            router: Router::new(registry),
            middlewares: vec![Box::new(RequestLogger), Box::new(SecurityHeaders)],
            config,
            sessions,
        }
    }

    /// Shares an existing session store.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Appends a middleware; it runs after the ones already installed.
    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) {
        self.middlewares.push(Box::new(middleware));
    }

    pub fn config(&self) -> &BmcwebConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn sessions_arc(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    pub fn registry(&self) -> &EntityPrivileges {
        self.router.registry()
    }

    pub fn resolve(&self, req: &Request) -> Routed {
        self.router.resolve(req)
    }

    /// Runs the middleware chain around a routed request.
    ///
    /// The handler runs at most once. Streaming rules are taken over by the
    /// connection before this point; reaching one here means the request was
    /// not an upgrade.
    pub async fn handle(&self, req: Rc<Request>, routed: Routed) -> Response {
        let mut ctx = Context::new();
        let mut res = Response::new();
        let ran = run_before(&self.middlewares, &req, &mut res, &mut ctx);

        if !res.is_completed() {
            res = match routed {
                Routed::Reject(rejection) => {
                    let rejection = self.forward_unauthorized(&req, rejection);
                    merge_headers(rejection, res)
                }
                Routed::Handler { rule, params } => self.invoke(&req, &rule, params, res).await,
            };
        }

        run_after(&self.middlewares, ran, &req, &mut res, &mut ctx);
        res
    }

    async fn invoke(&self, req: &Rc<Request>, rule: &Rule, params: Params, res: Response) -> Response {
        match &rule.handler {
            RuleHandler::Http(handler) => {
                let (resp, rx) = AsyncResp::new(res);
                handler(req.clone(), resp, params);
                match rx.await {
                    Ok(res) => res,
                    Err(_) => {
                        error!("Handler for {} never completed", rule.pattern);
                        let mut res = Response::new();
                        messages::internal_error(&mut res);
                        res
                    }
                }
            }
            RuleHandler::WebSocket(_) | RuleHandler::Sse(_) => {
                debug!("Streaming rule {} hit without upgrade", rule.pattern);
                let mut res = res;
                messages::resource_missing_at_uri(&mut res, req.path());
                res
            }
        }
    }

    /// Browsers are sent to the login page; scripts get a Basic challenge.
    ///
    /// The login page belongs to the web UI, which this server does not
    /// serve. Deployments that want the redirect to land mount the static UI
    /// at `/` in front of it.
    fn forward_unauthorized(&self, req: &Request, mut res: Response) -> Response {
        if res.status() != StatusCode::UNAUTHORIZED {
            return res;
        }
        if req.is_browser() && !req.path().starts_with("/redfish") {
            let mut redirect = Response::with_status(StatusCode::TEMPORARY_REDIRECT);
            redirect.add_header(
                header::LOCATION,
                &format!("/#/login?next={}", urlencoding::encode(req.path())),
            );
            return redirect;
        }
        if self.config.auth.basic && req.header(header::USER_AGENT).is_none_or(str::is_empty) {
            res.add_header(header::WWW_AUTHENTICATE, "Basic");
        }
        res
    }
}

/// `base` wins; headers set earlier by middleware fill the gaps.
fn merge_headers(mut base: Response, earlier: Response) -> Response {
    for (name, value) in earlier.headers() {
        if !base.headers().contains_key(name) {
            base.headers_mut().insert(name.clone(), value.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use bmcweb_auth::privileges::PrivilegeTable;
    use bmcweb_auth::role::Role;
    use bmcweb_auth::session::PersistenceType;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method, Uri, Version};
    use serde_json::json;
    use tokio::task::LocalSet;

    use super::*;

    fn app() -> App {
        let mut app = App::new(
            Arc::new(BmcwebConfig::default()),
            Arc::new(EntityPrivileges::redfish_default()),
        );
        app.router_mut()
            .route("/redfish/v1/")
            .entity("ServiceRoot")
            .handler(|_req, resp, _params| {
                tokio::task::spawn_local(async move {
                    resp.res().set_json(json!({ "Id": "RootService" }));
                });
            })
            .unwrap();
        app
    }

    fn anonymous(path: &'static str, headers: &[(&'static str, &'static str)]) -> Rc<Request> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(*value));
        }
        Rc::new(Request::new(
            Method::GET,
            Uri::from_static(path),
            Version::HTTP_11,
            map,
            Bytes::new(),
        ))
    }

    #[tokio::test]
    async fn handler_completes_through_async_resp() {
        LocalSet::new()
            .run_until(async {
                let app = app();
                let req = anonymous("/redfish/v1", &[]);
                let routed = app.resolve(&req);
                let res = app.handle(req, routed).await;
                assert_eq!(res.status(), StatusCode::OK);
                assert_eq!(res.json()["Id"], "RootService");
                assert_eq!(res.header(header::X_FRAME_OPTIONS), Some("DENY"));
            })
            .await;
    }

    #[tokio::test]
    async fn unauthorized_scripts_get_a_challenge() {
        let app = app();
        let req = anonymous("/redfish/v1/Managers", &[]);
        let routed = app.resolve(&req);
        let res = app.handle(req, routed).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.header(header::WWW_AUTHENTICATE), Some("Basic"));

        let req = anonymous("/redfish/v1/Managers", &[("user-agent", "curl/8")]);
        let routed = app.resolve(&req);
        let res = app.handle(req, routed).await;
        assert_eq!(res.header(header::WWW_AUTHENTICATE), None);
    }

    #[tokio::test]
    async fn unauthorized_browsers_are_redirected() {
        let app = app();
        let req = anonymous("/dashboard", &[("accept", "text/html")]);
        let routed = app.resolve(&req);
        let res = app.handle(req, routed).await;
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.header(header::LOCATION), Some("/#/login?next=%2Fdashboard"));

        let req = anonymous("/ui/a.b~c-d_e", &[("accept", "text/html,application/xhtml+xml")]);
        let routed = app.resolve(&req);
        let res = app.handle(req, routed).await;
        assert_eq!(
            res.header(header::LOCATION),
            Some("/#/login?next=%2Fui%2Fa.b~c-d_e")
        );
    }

    struct Gate;

    impl Middleware for Gate {
        fn before(&self, _req: &Request, res: &mut Response, _ctx: &mut Context) {
            res.set_status(StatusCode::TOO_MANY_REQUESTS);
            res.end();
        }

        fn after(&self, _req: &Request, _res: &mut Response, _ctx: &mut Context) {}
    }

    #[tokio::test]
    async fn completing_middleware_skips_handler() {
        let mut app = app();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        app.router_mut()
            .route("/count")
            .privileges(&[&["NoAuth"]])
            .handler(move |_, _, _| counter.set(counter.get() + 1))
            .unwrap();
        app.add_middleware(Gate);

        let req = anonymous("/count", &[]);
        let routed = app.resolve(&req);
        let res = app.handle(req, routed).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.get(), 0);
        // Installed before the gate, so its after hook still ran.
        assert_eq!(res.header(header::X_CONTENT_TYPE_OPTIONS), Some("nosniff"));
    }

    #[tokio::test]
    async fn streaming_rule_without_upgrade_is_not_found() {
        let mut app = app();
        app.router_mut()
            .route("/subscribe")
            .websocket(|_req, _ws, _params| async {})
            .unwrap();

        let mut req = Request::get("/subscribe");
        let session = app.sessions().generate_user_session(
            "admin",
            Role::Administrator,
            None,
            PersistenceType::Timeout,
            false,
        );
        req.set_session(
            Some(session),
            Role::Administrator.privileges(&PrivilegeTable::redfish()),
        );
        let req = Rc::new(req);
        let routed = app.resolve(&req);
        let res = app.handle(req, routed).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
