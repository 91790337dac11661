//! The I/O boundary.
//!
//! # Design
//! Everything above this module produces and consumes plain
//! [`HttpRequest`]/[`HttpResponse`] values. A [`Transport`] performs the
//! round-trip and reports only network-level failures; status codes are
//! interpreted by the request builder.

use std::time::Duration;

use tracing::debug;
use ureq::typestate::WithBody;

use crate::error::ApiError;
use crate::http::{Body, HttpMethod, HttpRequest, HttpResponse};

pub trait Transport: Send + Sync {
    /// Sends `request` and returns whatever the server answered, 4xx and
    /// 5xx included. `Err` means no response was obtained.
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// Blocking transport over a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Caps the whole round-trip of every request.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn decorate<B>(mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(auth) = &request.auth {
        builder = builder.header("Authorization", auth.header_value());
    }
    for (name, value) in &request.query {
        builder = builder.query(name, value);
    }
    match request_timeout(request) {
        Some(timeout) => builder.config().timeout_global(Some(timeout)).build(),
        None => builder,
    }
}

/// Reads the per-request `timeout` option, in seconds. Other extra options
/// have no meaning for this transport and are only logged.
fn request_timeout(request: &HttpRequest) -> Option<Duration> {
    let mut timeout = None;
    for (key, value) in &request.extra {
        match (key.as_str(), value.as_f64()) {
            ("timeout", Some(secs)) => match Duration::try_from_secs_f64(secs) {
                Ok(d) => timeout = Some(d),
                Err(_) => debug!(%value, "ignoring invalid timeout option"),
            },
            _ => debug!(option = %key, %value, "ignoring unsupported transport option"),
        }
    }
    timeout
}

fn send_body(
    builder: ureq::RequestBuilder<WithBody>,
    body: &Body,
) -> Result<ureq::http::Response<ureq::Body>, ApiError> {
    let result = match body {
        Body::Empty => builder.send_empty(),
        Body::Json(value) => {
            let bytes = serde_json::to_vec(value).map_err(|e| ApiError::SerializationError(e.to_string()))?;
            builder.content_type("application/json").send(&bytes[..])
        }
        Body::Form(pairs) => builder.send_form(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        Body::Text(text) => builder.content_type("text/plain; charset=utf-8").send(text.as_bytes()),
        Body::Files(_) => {
            return Err(ApiError::Network(
                "multipart file uploads are not supported by this transport".to_string(),
            ))
        }
    };
    result.map_err(|e| ApiError::Network(e.to_string()))
}

impl Transport for UreqTransport {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let url = request.url.as_str();
        let agent = &self.agent;
        let bodyless = |builder: ureq::RequestBuilder<ureq::typestate::WithoutBody>| {
            if !request.body.is_empty() {
                debug!(method = %request.method, "dropping body on a bodyless method");
            }
            decorate(builder, request)
                .call()
                .map_err(|e| ApiError::Network(e.to_string()))
        };

        let mut response = match request.method {
            HttpMethod::Get => bodyless(agent.get(url))?,
            HttpMethod::Delete => bodyless(agent.delete(url))?,
            HttpMethod::Head => bodyless(agent.head(url))?,
            HttpMethod::Options => bodyless(agent.options(url))?,
            HttpMethod::Post => send_body(decorate(agent.post(url), request), &request.body)?,
            HttpMethod::Put => send_body(decorate(agent.put(url), request), &request.body)?,
            HttpMethod::Patch => send_body(decorate(agent.patch(url), request), &request.body)?,
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = if request.method == HttpMethod::Head {
            String::new()
        } else {
            response
                .body_mut()
                .read_to_string()
                .map_err(|e| ApiError::Network(e.to_string()))?
        };

        Ok(HttpResponse { status, headers, body })
    }
}
