//! Route definitions and registration.
//!
//! # Design
//! A `RouteDefinition` is immutable once registered: path template,
//! allowed methods, url-arg and query-param rules, static headers, the
//! response handler and the declared response shape. The app context owns
//! routes behind `Arc`; every request builder holds a clone of that `Arc`.
//!
//! Registration mirrors a decorator: [`AppContext::route`] returns a
//! [`RouteBuilder`] that collects the declaration, and binding the response
//! handler with [`RouteBuilder::handle`] registers the finished route.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use strum::Display;

use crate::app::AppContext;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpResponse};
use crate::param::ParamRule;
use crate::request::RequestBuilder;
use crate::template::{render, Params};

/// Decodes a successful response into a value.
pub type ResponseHandler = Arc<dyn Fn(&HttpResponse) -> Result<Value, ApiError> + Send + Sync>;

/// Whether a route's payload maps to one record or to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ResponseShape {
    #[default]
    #[strum(serialize = "single-record")]
    One,
    #[strum(serialize = "collection")]
    Many,
}

/// One registered API endpoint.
pub struct RouteDefinition {
    path: String,
    methods: Vec<HttpMethod>,
    query_rules: Vec<ParamRule>,
    url_arg_rules: Vec<ParamRule>,
    headers: BTreeMap<String, String>,
    shape: ResponseShape,
    handler: ResponseHandler,
}

impl RouteDefinition {
    /// Starts a declaration that is not registered with any app.
    pub fn builder(path: impl Into<String>, methods: impl IntoIterator<Item = HttpMethod>) -> RouteBuilder<'static> {
        RouteBuilder::new(None, path.into(), methods.into_iter().collect())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> &[HttpMethod] {
        &self.methods
    }

    pub fn allows(&self, method: HttpMethod) -> bool {
        self.methods.contains(&method)
    }

    pub fn query_rules(&self) -> &[ParamRule] {
        &self.query_rules
    }

    pub fn url_arg_rules(&self) -> &[ParamRule] {
        &self.url_arg_rules
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub fn handle_response(&self, response: &HttpResponse) -> Result<Value, ApiError> {
        (self.handler)(response)
    }

    /// Joins `domain` and the substituted path.
    ///
    /// Placeholders without a url-arg render as empty segments and a
    /// trailing `/` is dropped, so partially specified paths still resolve.
    pub fn url(&self, domain: &str, url_args: &Params) -> String {
        join_url(domain, &self.path, url_args)
    }

    /// Starts a request through this route, seeded from the app defaults.
    pub fn request<'a>(self: &Arc<Self>, app: &'a AppContext) -> RequestBuilder<'a> {
        RequestBuilder::new(app, Arc::clone(self))
    }
}

impl PartialEq for RouteDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for RouteDefinition {}

impl PartialEq<str> for RouteDefinition {
    fn eq(&self, other: &str) -> bool {
        self.path == other
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("query_rules", &self.query_rules)
            .field("url_arg_rules", &self.url_arg_rules)
            .field("headers", &self.headers)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Joins `domain` with the substituted `path`, dropping a trailing `/`.
pub fn join_url(domain: &str, path: &str, url_args: &Params) -> String {
    let path = substitute(path.trim_start_matches('/'), url_args);
    format!("{}/{}", domain.trim_end_matches('/'), path)
        .trim_end_matches('/')
        .to_string()
}

/// Substitutes `{name}` placeholders from `args`.
///
/// Missing names render as the empty string. `{{` and `}}` are literal
/// braces.
pub fn substitute(template: &str, args: &Params) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }
        match tail.find('}') {
            Some(end) => {
                let name = &tail[1..end];
                if let Some(value) = args.get(name) {
                    out.push_str(&render(value));
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn json_handler() -> ResponseHandler {
    Arc::new(|response: &HttpResponse| response.json())
}

/// Collects a route declaration; binding a handler finishes it.
pub struct RouteBuilder<'a> {
    app: Option<&'a mut AppContext>,
    path: String,
    methods: Vec<HttpMethod>,
    query_rules: Vec<ParamRule>,
    url_arg_rules: Vec<ParamRule>,
    headers: BTreeMap<String, String>,
    shape: ResponseShape,
}

impl<'a> RouteBuilder<'a> {
    pub(crate) fn new(app: Option<&'a mut AppContext>, path: String, methods: Vec<HttpMethod>) -> Self {
        Self {
            app,
            path,
            methods,
            query_rules: Vec::new(),
            url_arg_rules: Vec::new(),
            headers: BTreeMap::new(),
            shape: ResponseShape::One,
        }
    }

    /// Query-param rules, validated in declaration order.
    pub fn params(mut self, rules: impl IntoIterator<Item = ParamRule>) -> Self {
        self.query_rules.extend(rules);
        self
    }

    /// Url-arg rules, validated in declaration order before query params.
    pub fn url_args(mut self, rules: impl IntoIterator<Item = ParamRule>) -> Self {
        self.url_arg_rules.extend(rules);
        self
    }

    /// Static headers merged over the app defaults.
    pub fn headers<K: Into<String>, V: Into<String>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.headers
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn returns(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn returns_many(self) -> Self {
        self.returns(ResponseShape::Many)
    }

    /// Binds the response handler and registers the route.
    pub fn handle<F>(self, handler: F) -> Arc<RouteDefinition>
    where
        F: Fn(&HttpResponse) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        self.finish(Arc::new(handler))
    }

    /// Registers the route with a handler that decodes the body as JSON.
    pub fn json(self) -> Arc<RouteDefinition> {
        self.finish(json_handler())
    }

    fn finish(self, handler: ResponseHandler) -> Arc<RouteDefinition> {
        let route = Arc::new(RouteDefinition {
            path: self.path,
            methods: self.methods,
            query_rules: self.query_rules,
            url_arg_rules: self.url_arg_rules,
            headers: self.headers,
            shape: self.shape,
            handler,
        });
        match self.app {
            Some(app) => app.register(route),
            None => route,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitute_fills_placeholders() {
        let out = substitute(
            "v1/{version}/res/{id}",
            &args(&[("version", json!("v1")), ("id", json!(42))]),
        );
        assert_eq!(out, "v1/v1/res/42");
    }

    #[test]
    fn missing_placeholder_renders_empty() {
        assert_eq!(substitute("/x/{missing}/y", &Params::new()), "/x//y");
    }

    #[test]
    fn doubled_braces_are_literal() {
        assert_eq!(substitute("/a/{{b}}/{c}", &args(&[("c", json!("z"))])), "/a/{b}/z");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        assert_eq!(substitute("/a/{b", &Params::new()), "/a/{b");
    }

    #[test]
    fn url_joins_domain_and_strips_trailing_slash() {
        let route = RouteDefinition::builder("/{version}/things/{id}", [HttpMethod::Get]).json();
        let url = route.url("http://sunshine.com/", &args(&[("version", json!("v1"))]));
        assert_eq!(url, "http://sunshine.com/v1/things");
    }

    #[test]
    fn url_keeps_inner_empty_segments() {
        let route = RouteDefinition::builder("/x/{missing}/y", [HttpMethod::Get]).json();
        assert_eq!(route.url("http://d", &Params::new()), "http://d/x//y");
    }

    #[test]
    fn routes_compare_by_path() {
        let a = RouteDefinition::builder("/a", [HttpMethod::Get]).json();
        let b = RouteDefinition::builder("/a", [HttpMethod::Post]).returns_many().json();
        let c = RouteDefinition::builder("/c", [HttpMethod::Get]).json();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
        assert!(&*c == "/c");
    }

    #[test]
    fn custom_handler_is_used() {
        let route = RouteDefinition::builder("/a", [HttpMethod::Get]).handle(|resp| Ok(json!(resp.status)));
        assert_eq!(route.handle_response(&HttpResponse::new(201, "")).unwrap(), json!(201));
        assert!(route.allows(HttpMethod::Get));
        assert!(!route.allows(HttpMethod::Delete));
    }
}
