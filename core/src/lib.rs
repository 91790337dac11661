//! Declarative, typed HTTP API client framework.
//!
//! # Overview
//! Applications declare routes (path template, allowed methods, parameter
//! rules, response handler) on an [`AppContext`], records as
//! [`ModelSchema`]s, and cross-references between records as
//! [`RelatedDecl`]s. Each call goes through a [`RequestBuilder`] that starts
//! from the app defaults, validates, authenticates and renders a plain
//! [`HttpRequest`]. A [`Transport`] performs the round-trip (host-does-IO
//! pattern), so everything up to the wire is deterministic and testable
//! with [`MockTransport`].
//!
//! # Design
//! - Templates have two update modes: merge (maps are merged, scalars
//!   replaced) and override (everything named is replaced).
//! - Validation runs url-arg rules, then query-param rules, before the
//!   transport is touched.
//! - Routes declare whether a response maps to one record or a collection.
//! - Related values are cached per record and expire against the app's
//!   [`Clock`].
//!
//! ```
//! use apikit_core::{AppContext, HttpMethod, MockTransport, ParamRule};
//!
//! let transport = MockTransport::new();
//! transport.respond(200, r#"{"id": 42}"#);
//!
//! let mut app = AppContext::new("demo", "http://api.example.com", transport.clone());
//! let route = app
//!     .route("/v1/{version}/res/{id}", [HttpMethod::Get])
//!     .url_args([ParamRule::new("version").required()])
//!     .json();
//!
//! let value = app
//!     .request(&route)
//!     .url_arg("version", "v1")
//!     .url_arg("id", 42)
//!     .get()
//!     .unwrap()
//!     .into_value();
//! assert_eq!(value["id"], 42);
//! assert_eq!(
//!     transport.last_request().unwrap().url,
//!     "http://api.example.com/v1/v1/res/42"
//! );
//! ```

pub mod app;
pub mod artifact;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod model;
pub mod param;
pub mod related;
pub mod request;
pub mod route;
pub mod template;
pub mod transport;

pub use app::AppContext;
pub use artifact::ArtifactStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::ApiError;
pub use http::{BasicAuth, Body, FilePart, HttpMethod, HttpRequest, HttpResponse};
pub use mock::MockTransport;
pub use model::{Mapped, Model, ModelSchema, UpdatePayload};
pub use param::ParamRule;
pub use related::{ArgSource, RelatedDecl, RelatedState};
pub use request::RequestBuilder;
pub use route::{ResponseShape, RouteDefinition};
pub use template::{Params, RequestTemplate, Setting};
pub use transport::{Transport, UreqTransport};
