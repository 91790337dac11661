//! Per-call request builder.
//!
//! # Design
//! A `RequestBuilder` starts from a deep copy of the app's default
//! template with the route's static headers merged in. Callers chain
//! overrides, then invoke a verb. A verb sets the method, validates
//! url-args and query params against the route's rules, hands the builder
//! to the authenticator for last-chance mutation, renders an
//! [`HttpRequest`], and only then touches the transport. Nothing is sent
//! when validation fails.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::app::AppContext;
use crate::error::ApiError;
use crate::http::{BasicAuth, Body, FilePart, HttpMethod, HttpRequest};
use crate::model::{map_response, Mapped, Model, ModelSchema};
use crate::route::{join_url, ResponseShape, RouteDefinition};
use crate::template::{render, RequestTemplate, Setting};

/// One in-flight request configuration derived from a route and app defaults.
pub struct RequestBuilder<'a> {
    app: &'a AppContext,
    route: Arc<RouteDefinition>,
    template: RequestTemplate,
    model: Option<Arc<ModelSchema>>,
    shape: ResponseShape,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(app: &'a AppContext, route: Arc<RouteDefinition>) -> Self {
        let mut template = app.defaults().clone();
        template.set_headers(route.headers().clone());
        template.set_path(route.path());
        let shape = route.shape();
        Self {
            app,
            route,
            template,
            model: None,
            shape,
        }
    }

    /// Routes through the model's identity and maps the response to its schema.
    pub fn with_model(mut self, model: &Model) -> Self {
        self.template.set_url_args(model.to_map());
        self.model = Some(Arc::clone(model.schema()));
        self
    }

    /// Maps the response to `schema` without seeding url-args.
    pub fn map_to(mut self, schema: &Arc<ModelSchema>) -> Self {
        self.model = Some(Arc::clone(schema));
        self
    }

    /// Overrides the route's declared response shape for this request.
    pub fn expect(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn update(mut self, settings: impl IntoIterator<Item = Setting>) -> Self {
        self.template.update(settings);
        self
    }

    pub fn override_with(mut self, settings: impl IntoIterator<Item = Setting>) -> Self {
        self.template.override_with(settings);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.template.header(name, value);
        self
    }

    pub fn headers<K: Into<String>, V: Into<String>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.template.set_headers(pairs);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template.param(name, value);
        self
    }

    pub fn params<K: Into<String>, V: Into<Value>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.template.set_params(pairs);
        self
    }

    pub fn url_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template.url_arg(name, value);
        self
    }

    pub fn url_args<K: Into<String>, V: Into<Value>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.template.set_url_args(pairs);
        self
    }

    pub fn extra<K: Into<String>, V: Into<Value>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.template.set_extra(pairs);
        self
    }

    pub fn json_body(mut self, json: Value) -> Self {
        self.template.set_json(json);
        self
    }

    /// Form data (object) or raw text (string) body.
    pub fn data(mut self, data: Value) -> Self {
        self.template.set_data(data);
        self
    }

    pub fn files(mut self, files: Vec<FilePart>) -> Self {
        self.template.set_files(files);
        self
    }

    pub fn auth(mut self, auth: BasicAuth) -> Self {
        self.template.set_auth(auth);
        self
    }

    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut RequestTemplate {
        &mut self.template
    }

    pub fn route(&self) -> &Arc<RouteDefinition> {
        &self.route
    }

    pub fn app(&self) -> &'a AppContext {
        self.app
    }

    pub fn is_request_for(&self, routes: &[&RouteDefinition]) -> bool {
        routes.iter().any(|r| **r == *self.route)
    }

    /// URL for the current url-args, without validation or query string.
    pub fn url(&self) -> String {
        let path = self.template.path().unwrap_or_else(|| self.route.path());
        join_url(self.template.domain().unwrap_or_default(), path, &self.template.url_args())
    }

    /// Checks the method (if set) and resolves every url-arg and query-param
    /// rule, writing the resolved values back into the template.
    ///
    /// Url-arg rules run first, then query-param rules, each in declaration
    /// order; the first failure stops validation.
    pub fn validate(&mut self) -> Result<(), ApiError> {
        if !self.app.validation_enabled() {
            return Ok(());
        }
        if let Some(method) = self.template.method() {
            if !self.route.allows(method) {
                return Err(ApiError::UnsupportedMethod {
                    method,
                    path: self.route.path().to_string(),
                });
            }
        }

        let route = Arc::clone(&self.route);
        for rule in route.url_arg_rules() {
            let provided = self.template.url_args().remove(rule.name()).unwrap_or(Value::Null);
            let value = rule.validate(&provided, self)?;
            self.template.url_arg(rule.name(), value);
        }
        for rule in route.query_rules() {
            let provided = self.template.params().remove(rule.name()).unwrap_or(Value::Null);
            let value = rule.validate(&provided, self)?;
            self.template.param(rule.name(), value);
        }
        Ok(())
    }

    /// Sets the method, validates, authenticates and renders the request.
    pub fn prepare(&mut self, method: HttpMethod) -> Result<HttpRequest, ApiError> {
        self.template.set_method(method);
        self.validate()?;
        if let Some(authenticate) = self.template.authenticator().cloned() {
            authenticate(self)?;
        }
        Ok(self.render(method))
    }

    fn render(&self, method: HttpMethod) -> HttpRequest {
        let t = &self.template;
        let body = match (t.json(), t.data()) {
            (Some(json), _) => Body::Json(json.clone()),
            (None, Some(Value::Object(form))) => {
                Body::Form(form.iter().map(|(k, v)| (k.clone(), render(v))).collect())
            }
            (None, Some(text)) => Body::Text(render(text)),
            (None, None) if !t.files().is_empty() => Body::Files(t.files().to_vec()),
            (None, None) => Body::Empty,
        };
        HttpRequest {
            method,
            url: self.url(),
            headers: t.headers().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            query: t.params().iter().map(|(k, v)| (k.clone(), render(v))).collect(),
            body,
            auth: t.auth().cloned(),
            extra: t.extra().clone(),
        }
    }

    /// Performs the request and maps the response.
    pub fn send(mut self, method: HttpMethod) -> Result<Mapped, ApiError> {
        let request = self.prepare(method)?;
        debug!(
            method = %request.method,
            url = %request.url,
            query = request.query.len(),
            "dispatching request"
        );

        let response = self.app.transport().perform(&request)?;
        if !response.is_success() {
            error!(
                status = response.status,
                url = %request.url,
                body = %response.body,
                "request failed"
            );
            return Err(ApiError::TransportFailure {
                status: response.status,
                body: response.body,
            });
        }

        let value = self.route.handle_response(&response)?;
        map_response(value, self.model.as_ref(), self.shape)
    }

    pub fn get(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Get)
    }

    pub fn post(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Post)
    }

    pub fn put(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Put)
    }

    pub fn patch(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Patch)
    }

    pub fn delete(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Delete)
    }

    pub fn head(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Head)
    }

    pub fn options(self) -> Result<Mapped, ApiError> {
        self.send(HttpMethod::Options)
    }
}

impl std::fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("route", &self.route.path())
            .field("template", &self.template)
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .field("shape", &self.shape)
            .finish()
    }
}
