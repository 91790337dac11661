//! Error types for the declarative API client.
//!
//! # Design
//! Pre-flight failures (`UnsupportedMethod`, `MissingParameter`,
//! `InvalidParameter`) are raised before anything reaches the transport, so
//! a request that fails validation is never partially sent. All non-2xx
//! responses land in `TransportFailure` with the raw status and body, since
//! the body usually carries the server's structured error.

use serde_json::Value;
use thiserror::Error;

use crate::http::HttpMethod;
use crate::route::ResponseShape;

/// Errors returned by routes, request builders, models and the app context.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The verb is not in the route's allowed-methods set.
    #[error("method {method} is not supported by route {path:?}")]
    UnsupportedMethod { method: HttpMethod, path: String },

    /// A required url-arg or query-param has no value and no default.
    #[error("required parameter {name:?} not provided")]
    MissingParameter { name: String },

    /// A value is outside the rule's option set or was rejected by its validator.
    #[error("invalid value for parameter {name:?}: {value}")]
    InvalidParameter { name: String, value: Value },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    TransportFailure { status: u16, body: String },

    /// The transport could not complete the round-trip at all.
    #[error("network failure: {0}")]
    Network(String),

    /// The request payload could not be serialized.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The response body could not be decoded.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The decoded payload does not have the shape the route declared.
    #[error("expected {expected} response, got {found}")]
    ShapeMismatch {
        expected: ResponseShape,
        found: &'static str,
    },

    /// A field name that the model schema does not declare.
    #[error("model {model} has no field {field:?}")]
    UnknownField { model: String, field: String },

    /// A model verb was invoked on a schema without a bound route.
    #[error("model {model} has no bound route")]
    NoRoute { model: String },

    /// A related attribute name that the model schema does not declare.
    #[error("model {model} has no related attribute {name:?}")]
    UnknownRelated { model: String, name: String },

    /// A related write was attempted before the attribute held a record.
    #[error("related attribute {name:?} is not resolved to a single record")]
    RelatedNotResolved { name: String },

    /// Reading or writing an artifact file failed.
    #[error("artifact I/O failed: {0}")]
    Artifact(#[from] std::io::Error),

    /// The application configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Returns `true` for the errors raised before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMethod { .. } | Self::MissingParameter { .. } | Self::InvalidParameter { .. }
        )
    }

    /// Returns `true` if the server reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Returns the HTTP status code if this is a transport failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::TransportFailure { status, .. } => Some(*status),
            _ => None,
        }
    }
}
