//! The app context: defaults, registered routes and collaborators.
//!
//! # Design
//! An `AppContext` is built once, configured, has its routes registered
//! through `&mut self`, and is then shared immutably by every request
//! builder. It owns the transport, the artifact store and the clock, so two
//! apps in one process share nothing.

use std::fmt;
use std::sync::Arc;

use crate::artifact::ArtifactStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, DEFAULT_DOMAIN};
use crate::error::ApiError;
use crate::http::{BasicAuth, HttpMethod};
use crate::request::RequestBuilder;
use crate::route::{RouteBuilder, RouteDefinition};
use crate::template::{RequestTemplate, Setting};
use crate::transport::Transport;

pub struct AppContext {
    config: AppConfig,
    defaults: RequestTemplate,
    routes: Vec<Arc<RouteDefinition>>,
    transport: Arc<dyn Transport>,
    artifacts: ArtifactStore,
    clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, transport: impl Transport + 'static) -> Self {
        Self::from_config(AppConfig::new(name).with_domain(domain), transport)
    }

    pub fn from_config(config: AppConfig, transport: impl Transport + 'static) -> Self {
        Self {
            defaults: config.template(),
            artifacts: ArtifactStore::new(config.artifact_root()),
            routes: Vec::new(),
            transport: Arc::new(transport),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn domain(&self) -> &str {
        self.defaults.domain().unwrap_or(DEFAULT_DOMAIN)
    }

    pub fn defaults(&self) -> &RequestTemplate {
        &self.defaults
    }

    pub fn defaults_mut(&mut self) -> &mut RequestTemplate {
        &mut self.defaults
    }

    /// Soft-updates the default template.
    pub fn configure(&mut self, settings: impl IntoIterator<Item = Setting>) -> &mut Self {
        self.defaults.update(settings);
        self
    }

    /// Runs on every request after validation, just before it is rendered.
    pub fn set_authenticator<F>(&mut self, authenticator: F) -> &mut Self
    where
        F: Fn(&mut RequestBuilder<'_>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.defaults.set_authenticator(Some(Arc::new(authenticator)));
        self
    }

    pub fn set_basic_auth(&mut self, username: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.defaults.set_auth(BasicAuth::new(username, password));
        self
    }

    pub fn set_validation(&mut self, enabled: bool) -> &mut Self {
        self.config.disable_validation = !enabled;
        self
    }

    pub fn validation_enabled(&self) -> bool {
        !self.config.disable_validation
    }

    /// Starts a route declaration that registers with this app when its
    /// response handler is bound.
    pub fn route(&mut self, path: impl Into<String>, methods: impl IntoIterator<Item = HttpMethod>) -> RouteBuilder<'_> {
        RouteBuilder::new(Some(self), path.into(), methods.into_iter().collect())
    }

    /// Adds a route, replacing any registered under the same path.
    pub fn register(&mut self, route: Arc<RouteDefinition>) -> Arc<RouteDefinition> {
        match self.routes.iter_mut().find(|r| r.path() == route.path()) {
            Some(slot) => *slot = Arc::clone(&route),
            None => self.routes.push(Arc::clone(&route)),
        }
        route
    }

    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.routes
    }

    pub fn find_route(&self, path: &str) -> Option<&Arc<RouteDefinition>> {
        self.routes.iter().find(|r| r.path() == path)
    }

    pub fn request(&self, route: &Arc<RouteDefinition>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Arc::clone(route))
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("defaults", &self.defaults)
            .field("routes", &self.routes.iter().map(|r| r.path()).collect::<Vec<_>>())
            .field("artifacts", &self.artifacts.root())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use serde_json::json;

    #[test]
    fn registering_a_path_twice_replaces_the_route() {
        let mut app = AppContext::new("t", "http://d", MockTransport::new());
        app.route("/a", [HttpMethod::Get]).json();
        app.route("/b", [HttpMethod::Get]).json();
        app.route("/a", [HttpMethod::Post]).json();
        assert_eq!(app.routes().len(), 2);
        assert_eq!(app.find_route("/a").unwrap().methods(), [HttpMethod::Post]);
        assert!(app.find_route("/c").is_none());
    }

    #[test]
    fn from_config_seeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::new("tickets")
            .with_domain("http://api.example.com/")
            .with_url_arg("version", "v1")
            .with_artifact_dir(dir.path())
            .without_validation();
        let app = AppContext::from_config(config, MockTransport::new());
        assert_eq!(app.name(), "tickets");
        assert_eq!(app.domain(), "http://api.example.com/");
        assert_eq!(app.defaults().headers()["User-Agent"], "tickets");
        assert_eq!(app.defaults().url_args()["version"], json!("v1"));
        assert!(!app.validation_enabled());
        assert_eq!(app.artifacts().root(), dir.path());
    }

    #[test]
    fn configure_merges_and_basic_auth_reaches_requests() {
        let transport = MockTransport::new();
        transport.respond(200, "{}");
        let mut app = AppContext::new("t", "http://d", transport.clone());
        app.configure([Setting::headers([("Accept", "application/json")])])
            .configure([Setting::headers([("X-Trace", "1")])])
            .set_basic_auth("ray", "sunshine");
        let route = app.route("/me", [HttpMethod::Get]).json();
        app.request(&route).get().unwrap();

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.header("accept"), Some("application/json"));
        assert_eq!(sent.header("x-trace"), Some("1"));
        assert_eq!(sent.auth, Some(BasicAuth::new("ray", "sunshine")));
    }

    #[test]
    fn apps_keep_separate_artifact_caches() {
        let dir = tempfile::tempdir().unwrap();
        let first = AppContext::from_config(
            AppConfig::new("one").with_artifact_dir(dir.path()),
            MockTransport::new(),
        );
        let second = AppContext::from_config(
            AppConfig::new("two").with_artifact_dir(dir.path()),
            MockTransport::new(),
        );
        first.artifacts().write("token", "first").unwrap();
        assert_eq!(second.artifacts().read("token").unwrap(), b"first");
        first.artifacts().write("token", "second").unwrap();
        assert_eq!(second.artifacts().read("token").unwrap(), b"first");
        assert_eq!(first.artifacts().read("token").unwrap(), b"second");
    }
}
