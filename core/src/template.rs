//! Mutable bag of request-shaping attributes.
//!
//! # Design
//! A `RequestTemplate` holds everything that shapes one outgoing request.
//! Map attributes (`headers`, `params`, `url_args`, `extra`) merge on
//! [`update`](RequestTemplate::update): new keys win, old keys survive.
//! Every other attribute is replaced. [`override_with`](RequestTemplate::override_with)
//! walks the same settings but replaces map attributes wholesale too.
//!
//! The app context owns one template holding the defaults; every request
//! builder starts from a deep copy of it, so templates are never shared
//! between two in-flight requests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::http::{BasicAuth, FilePart, HttpMethod};
use crate::request::RequestBuilder;

/// Named parameter values (url-args, query params, extra options).
pub type Params = BTreeMap<String, Value>;

/// Last-chance hook run on every request right before it is sent.
pub type Authenticator = Arc<dyn Fn(&mut RequestBuilder<'_>) -> Result<(), ApiError> + Send + Sync>;

/// `null` and `""` both mean "no value".
pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn present(map: &Params) -> Params {
    map.iter()
        .filter(|(_, v)| !is_absent(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// One attribute assignment, applied by [`RequestTemplate::update`] or
/// [`RequestTemplate::override_with`].
#[derive(Clone)]
pub enum Setting {
    Headers(BTreeMap<String, String>),
    Params(Params),
    UrlArgs(Params),
    Extra(Params),
    Json(Option<Value>),
    Data(Option<Value>),
    Files(Vec<FilePart>),
    Auth(Option<BasicAuth>),
    Domain(Option<String>),
    Path(Option<String>),
    Method(Option<HttpMethod>),
    Authenticator(Option<Authenticator>),
    /// Anything the template has no slot for; collected into `extra`.
    Other(String, Value),
}

impl Setting {
    pub fn headers<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Headers(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn params<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Params(collect_params(pairs))
    }

    pub fn url_args<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::UrlArgs(collect_params(pairs))
    }

    pub fn extra<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Extra(collect_params(pairs))
    }

    /// Interpret a JSON value under an attribute name.
    ///
    /// Unknown names become [`Setting::Other`]. A `null` clears scalar
    /// attributes.
    pub fn from_json(name: &str, value: &Value) -> Result<Self, ApiError> {
        let setting = match name {
            "headers" => Self::Headers(
                object(name, value)?
                    .iter()
                    .map(|(k, v)| (k.clone(), render(v)))
                    .collect(),
            ),
            "params" => Self::Params(object(name, value)?),
            "url_args" | "urlargs" => Self::UrlArgs(object(name, value)?),
            "extra" => Self::Extra(object(name, value)?),
            "json" => Self::Json(non_null(value)),
            "data" => Self::Data(non_null(value)),
            "auth" => Self::Auth(match value {
                Value::Null => None,
                Value::Array(pair) if pair.len() == 2 => Some(BasicAuth::new(render(&pair[0]), render(&pair[1]))),
                other => Some(
                    serde_json::from_value(other.clone())
                        .map_err(|e| ApiError::Config(format!("auth: {e}")))?,
                ),
            }),
            "domain" => Self::Domain(string(name, value)?),
            "path" => Self::Path(string(name, value)?),
            "method" => Self::Method(match string(name, value)? {
                Some(m) => Some(
                    m.parse()
                        .map_err(|_| ApiError::Config(format!("method: unknown verb {m:?}")))?,
                ),
                None => None,
            }),
            other => Self::Other(other.to_string(), value.clone()),
        };
        Ok(setting)
    }
}

fn collect_params<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Params {
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

fn object(name: &str, value: &Value) -> Result<Params, ApiError> {
    match value {
        Value::Object(map) => Ok(map.clone().into_iter().collect()),
        Value::Null => Ok(Params::new()),
        _ => Err(ApiError::Config(format!("{name}: expected an object"))),
    }
}

fn string(name: &str, value: &Value) -> Result<Option<String>, ApiError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(ApiError::Config(format!("{name}: expected a string"))),
    }
}

fn non_null(value: &Value) -> Option<Value> {
    (!value.is_null()).then(|| value.clone())
}

/// Render a parameter value the way it appears in a URL or header.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Merge,
    Replace,
}

fn assign<V>(target: &mut BTreeMap<String, V>, incoming: BTreeMap<String, V>, mode: Mode) {
    match mode {
        Mode::Merge => target.extend(incoming),
        Mode::Replace => *target = incoming,
    }
}

/// Request-shaping attributes with merge/override update semantics.
#[derive(Clone, Default)]
pub struct RequestTemplate {
    headers: BTreeMap<String, String>,
    params: Params,
    url_args: Params,
    extra: Params,
    json: Option<Value>,
    data: Option<Value>,
    files: Vec<FilePart>,
    auth: Option<BasicAuth>,
    domain: Option<String>,
    path: Option<String>,
    method: Option<HttpMethod>,
    authenticator: Option<Authenticator>,
}

impl RequestTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft update: map attributes merge, everything else is replaced.
    pub fn update(&mut self, settings: impl IntoIterator<Item = Setting>) -> &mut Self {
        for setting in settings {
            self.apply(setting, Mode::Merge);
        }
        self
    }

    /// Hard update: every attribute named is replaced wholesale.
    pub fn override_with(&mut self, settings: impl IntoIterator<Item = Setting>) -> &mut Self {
        for setting in settings {
            self.apply(setting, Mode::Replace);
        }
        self
    }

    /// Soft update keyed by attribute name, e.g. from a configuration file.
    pub fn update_from_json(&mut self, map: &Map<String, Value>) -> Result<&mut Self, ApiError> {
        let settings = map
            .iter()
            .map(|(k, v)| Setting::from_json(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.update(settings))
    }

    fn apply(&mut self, setting: Setting, mode: Mode) {
        match setting {
            Setting::Headers(h) => assign(&mut self.headers, h, mode),
            Setting::Params(p) => assign(&mut self.params, p, mode),
            Setting::UrlArgs(a) => assign(&mut self.url_args, a, mode),
            Setting::Extra(e) => assign(&mut self.extra, e, mode),
            Setting::Json(j) => self.json = j,
            Setting::Data(d) => self.data = d,
            Setting::Files(f) => self.files = f,
            Setting::Auth(a) => self.auth = a,
            Setting::Domain(d) => self.domain = d,
            Setting::Path(p) => self.path = p,
            Setting::Method(m) => self.method = m,
            Setting::Authenticator(a) => self.authenticator = a,
            Setting::Other(name, value) => {
                self.extra.insert(name, value);
            }
        }
    }

    // -- fluent setters ------------------------------------------------------

    pub fn set_headers<K: Into<String>, V: Into<String>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.update([Setting::headers(pairs)])
    }

    pub fn replace_headers<K: Into<String>, V: Into<String>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.override_with([Setting::headers(pairs)])
    }

    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn set_params<K: Into<String>, V: Into<Value>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.update([Setting::params(pairs)])
    }

    pub fn replace_params<K: Into<String>, V: Into<Value>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.override_with([Setting::params(pairs)])
    }

    pub fn param(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn set_url_args<K: Into<String>, V: Into<Value>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.update([Setting::url_args(pairs)])
    }

    pub fn replace_url_args<K: Into<String>, V: Into<Value>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.override_with([Setting::url_args(pairs)])
    }

    pub fn url_arg(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.url_args.insert(name.into(), value.into());
        self
    }

    pub fn set_extra<K: Into<String>, V: Into<Value>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.update([Setting::extra(pairs)])
    }

    pub fn replace_extra<K: Into<String>, V: Into<Value>>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> &mut Self {
        self.override_with([Setting::extra(pairs)])
    }

    pub fn set_json(&mut self, json: impl Into<Option<Value>>) -> &mut Self {
        self.json = json.into();
        self
    }

    /// Merge object keys into the current JSON body instead of replacing it.
    ///
    /// Falls back to replacement when either side is not an object.
    pub fn merge_json(&mut self, json: Value) -> &mut Self {
        match (self.json.as_mut(), json) {
            (Some(Value::Object(current)), Value::Object(incoming)) => current.extend(incoming),
            (_, incoming) => self.json = non_null(&incoming),
        }
        self
    }

    pub fn set_data(&mut self, data: impl Into<Option<Value>>) -> &mut Self {
        self.data = data.into();
        self
    }

    pub fn set_files(&mut self, files: Vec<FilePart>) -> &mut Self {
        self.files = files;
        self
    }

    pub fn set_auth(&mut self, auth: impl Into<Option<BasicAuth>>) -> &mut Self {
        self.auth = auth.into();
        self
    }

    pub fn set_domain(&mut self, domain: impl Into<String>) -> &mut Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some(path.into());
        self
    }

    pub fn set_method(&mut self, method: HttpMethod) -> &mut Self {
        self.method = Some(method);
        self
    }

    pub fn set_authenticator(&mut self, authenticator: Option<Authenticator>) -> &mut Self {
        self.authenticator = authenticator;
        self
    }

    // -- readers -------------------------------------------------------------

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Query params with absent (`null` / `""`) entries filtered out.
    pub fn params(&self) -> Params {
        present(&self.params)
    }

    /// Url-args with absent (`null` / `""`) entries filtered out.
    pub fn url_args(&self) -> Params {
        present(&self.url_args)
    }

    pub fn extra(&self) -> &Params {
        &self.extra
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn files(&self) -> &[FilePart] {
        &self.files
    }

    pub fn auth(&self) -> Option<&BasicAuth> {
        self.auth.as_ref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn method(&self) -> Option<HttpMethod> {
        self.method
    }

    pub fn authenticator(&self) -> Option<&Authenticator> {
        self.authenticator.as_ref()
    }
}

impl fmt::Debug for RequestTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTemplate")
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("url_args", &self.url_args)
            .field("extra", &self.extra)
            .field("json", &self.json)
            .field("data", &self.data)
            .field("files", &self.files.len())
            .field("auth", &self.auth.as_ref().map(|a| &a.username))
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("authenticator", &self.authenticator.is_some())
            .finish()
    }
}
