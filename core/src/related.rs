//! Lazily fetched, optionally expiring cross-references between records.
//!
//! # Design
//! A [`RelatedDecl`] lives on a [`ModelSchema`]; the cached value lives on
//! each [`Model`], one slot per declared attribute. A slot is either empty
//! (unresolved) or holds the mapped value and the instant it was fetched.
//! Expiry is checked lazily on every access against the app's [`Clock`]:
//! an expired slot is dropped and, unless the declaration is lazy,
//! fetched again.
//!
//! Slots are not synchronized. Two resolutions of the same slot both hit
//! the network and the later one wins.
//!
//! [`Clock`]: crate::clock::Clock

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::app::AppContext;
use crate::error::ApiError;
use crate::model::{Mapped, Model, ModelSchema};
use crate::route::{ResponseShape, RouteDefinition};
use crate::template::Params;

/// Where a url-arg or query value for the related request comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSource {
    Literal(Value),
    /// A field on the owning record.
    Field(String),
}

/// What a related attribute fetches.
#[derive(Clone)]
pub enum RelatedTarget {
    /// Fetched through the target schema's bound route and mapped to it.
    Model(Arc<ModelSchema>),
    /// Fetched through a route; the handler's value is kept as is.
    Route(Arc<RouteDefinition>),
}

/// Replaces the default behaviour of a related get/create/update/delete.
///
/// Receives the app and the owning record.
pub type RelatedHook = Arc<dyn Fn(&AppContext, &Model) -> Result<Mapped, ApiError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedState {
    Unresolved,
    Resolved,
    Expired,
}

#[derive(Debug, Clone)]
pub(crate) struct RelatedSlot {
    value: Mapped,
    fetched_at: Instant,
}

/// Declaration of one related attribute on a schema.
#[derive(Clone)]
pub struct RelatedDecl {
    name: String,
    target: RelatedTarget,
    url_args: Vec<(String, ArgSource)>,
    query: Vec<(String, ArgSource)>,
    many: bool,
    ttl: Option<Duration>,
    lazy: bool,
    on_get: Option<RelatedHook>,
    on_create: Option<RelatedHook>,
    on_update: Option<RelatedHook>,
    on_delete: Option<RelatedHook>,
}

impl RelatedDecl {
    fn new(name: impl Into<String>, target: RelatedTarget) -> Self {
        Self {
            name: name.into(),
            target,
            url_args: Vec::new(),
            query: Vec::new(),
            many: false,
            ttl: None,
            lazy: false,
            on_get: None,
            on_create: None,
            on_update: None,
            on_delete: None,
        }
    }

    pub fn model(name: impl Into<String>, schema: &Arc<ModelSchema>) -> Self {
        Self::new(name, RelatedTarget::Model(Arc::clone(schema)))
    }

    pub fn route(name: impl Into<String>, route: &Arc<RouteDefinition>) -> Self {
        Self::new(name, RelatedTarget::Route(Arc::clone(route)))
    }

    pub fn url_arg(mut self, name: impl Into<String>, source: ArgSource) -> Self {
        self.url_args.push((name.into(), source));
        self
    }

    /// Url-arg taken from a field of the owning record.
    pub fn url_arg_from(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.url_arg(name, ArgSource::Field(field.into()))
    }

    pub fn query(mut self, name: impl Into<String>, source: ArgSource) -> Self {
        self.query.push((name.into(), source));
        self
    }

    pub fn query_from(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.query(name, ArgSource::Field(field.into()))
    }

    /// The target is a collection.
    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Plain access never fetches; only an explicit get does.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn on_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&AppContext, &Model) -> Result<Mapped, ApiError> + Send + Sync + 'static,
    {
        self.on_get = Some(Arc::new(f));
        self
    }

    pub fn on_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&AppContext, &Model) -> Result<Mapped, ApiError> + Send + Sync + 'static,
    {
        self.on_create = Some(Arc::new(f));
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&AppContext, &Model) -> Result<Mapped, ApiError> + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn on_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&AppContext, &Model) -> Result<Mapped, ApiError> + Send + Sync + 'static,
    {
        self.on_delete = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &RelatedTarget {
        &self.target
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.ttl
    }

    fn expired(&self, slot: &RelatedSlot, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(slot.fetched_at) > ttl)
    }
}

impl fmt::Debug for RelatedDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            RelatedTarget::Model(schema) => format!("model {}", schema.name()),
            RelatedTarget::Route(route) => format!("route {}", route.path()),
        };
        f.debug_struct("RelatedDecl")
            .field("name", &self.name)
            .field("target", &target)
            .field("url_args", &self.url_args)
            .field("query", &self.query)
            .field("many", &self.many)
            .field("ttl", &self.ttl)
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}

fn lookup<'s>(schema: &'s ModelSchema, name: &str) -> Result<&'s RelatedDecl, ApiError> {
    schema.related_decl(name).ok_or_else(|| ApiError::UnknownRelated {
        model: schema.name().to_string(),
        name: name.to_string(),
    })
}

impl Model {
    pub fn related_state(&self, app: &AppContext, name: &str) -> Result<RelatedState, ApiError> {
        let decl = lookup(self.schema(), name)?;
        Ok(self.state_of(decl, app))
    }

    fn state_of(&self, decl: &RelatedDecl, app: &AppContext) -> RelatedState {
        match self.related.get(&decl.name) {
            None => RelatedState::Unresolved,
            Some(slot) if decl.expired(slot, app.clock().now()) => RelatedState::Expired,
            Some(_) => RelatedState::Resolved,
        }
    }

    fn cached(&self, name: &str) -> Option<&Mapped> {
        self.related.get(name).map(|slot| &slot.value)
    }

    /// Accesses a related attribute.
    ///
    /// A resolved, unexpired value is returned from the cache. Otherwise the
    /// attribute is fetched, unless it is declared lazy, in which case
    /// `None` is returned until [`Model::related_get`] runs.
    pub fn related(&mut self, app: &AppContext, name: &str) -> Result<Option<&Mapped>, ApiError> {
        let schema = Arc::clone(self.schema());
        let decl = lookup(&schema, name)?;
        match self.state_of(decl, app) {
            RelatedState::Resolved => {
                debug!(model = %schema.name(), related = name, "related cache hit");
                return Ok(self.cached(name));
            }
            RelatedState::Expired => {
                debug!(model = %schema.name(), related = name, "related cache expired");
                self.related.remove(name);
            }
            RelatedState::Unresolved => {}
        }
        if decl.lazy {
            return Ok(None);
        }
        self.resolve(app, decl)?;
        Ok(self.cached(name))
    }

    /// Returns the related value, fetching it if it is unresolved or expired.
    pub fn related_get(&mut self, app: &AppContext, name: &str) -> Result<&Mapped, ApiError> {
        let schema = Arc::clone(self.schema());
        let decl = lookup(&schema, name)?;
        if self.state_of(decl, app) != RelatedState::Resolved {
            self.related.remove(name);
            self.resolve(app, decl)?;
        }
        self.cached(name).ok_or_else(|| ApiError::RelatedNotResolved { name: name.to_string() })
    }

    /// Fetches the related value regardless of the cache.
    pub fn related_refresh(&mut self, app: &AppContext, name: &str) -> Result<&Mapped, ApiError> {
        let schema = Arc::clone(self.schema());
        let decl = lookup(&schema, name)?;
        self.resolve(app, decl)?;
        self.cached(name).ok_or_else(|| ApiError::RelatedNotResolved { name: name.to_string() })
    }

    /// The cached value if resolved and unexpired. Never fetches.
    pub fn related_peek(&self, app: &AppContext, name: &str) -> Option<&Mapped> {
        let decl = self.schema().related_decl(name)?;
        match self.state_of(decl, app) {
            RelatedState::Resolved => self.cached(name),
            _ => None,
        }
    }

    pub fn invalidate_related(&mut self, name: &str) {
        self.related.remove(name);
    }

    /// Creates the related record through its own verb or the declared hook.
    /// Invalidates the cache on success.
    pub fn related_create(&mut self, app: &AppContext, name: &str) -> Result<Mapped, ApiError> {
        let schema = Arc::clone(self.schema());
        let decl = lookup(&schema, name)?;
        let result = match &decl.on_create {
            Some(hook) => hook(app, &*self),
            None => self.with_cached_record(name, |record| record.create(app)),
        };
        if result.is_ok() {
            self.invalidate_related(name);
        }
        result
    }

    /// Updates the related record. Invalidates the cache on success.
    pub fn related_update(&mut self, app: &AppContext, name: &str) -> Result<Mapped, ApiError> {
        let schema = Arc::clone(self.schema());
        let decl = lookup(&schema, name)?;
        let result = match &decl.on_update {
            Some(hook) => hook(app, &*self),
            None => self.with_cached_record(name, |record| record.update(app)),
        };
        if result.is_ok() {
            self.invalidate_related(name);
        }
        result
    }

    /// Deletes the related record. Always invalidates the cache.
    pub fn related_delete(&mut self, app: &AppContext, name: &str) -> Result<Mapped, ApiError> {
        let schema = Arc::clone(self.schema());
        let decl = lookup(&schema, name)?;
        let result = match &decl.on_delete {
            Some(hook) => hook(app, &*self),
            None => self.with_cached_record(name, |record| record.delete(app)),
        };
        self.invalidate_related(name);
        result
    }

    /// Mutable access to the cached related record for in-place edits
    /// before [`Model::related_update`].
    pub fn related_record_mut(&mut self, name: &str) -> Option<&mut Model> {
        match self.related.get_mut(name).map(|slot| &mut slot.value) {
            Some(Mapped::One(record)) => Some(record),
            _ => None,
        }
    }

    fn with_cached_record<F>(&mut self, name: &str, f: F) -> Result<Mapped, ApiError>
    where
        F: FnOnce(&mut Model) -> Result<Mapped, ApiError>,
    {
        match self.related_record_mut(name) {
            Some(record) => f(record),
            None => Err(ApiError::RelatedNotResolved { name: name.to_string() }),
        }
    }

    fn resolve(&mut self, app: &AppContext, decl: &RelatedDecl) -> Result<(), ApiError> {
        let value = match &decl.on_get {
            Some(hook) => hook(app, &*self)?,
            None => {
                let url_args = self.evaluate(&decl.url_args)?;
                let query = self.evaluate(&decl.query)?;
                let shape = if decl.many { ResponseShape::Many } else { ResponseShape::One };
                let builder = match &decl.target {
                    RelatedTarget::Model(schema) => {
                        let route = schema.route().ok_or_else(|| ApiError::NoRoute {
                            model: schema.name().to_string(),
                        })?;
                        app.request(route).map_to(schema)
                    }
                    RelatedTarget::Route(route) => app.request(route),
                };
                builder.url_args(url_args).params(query).expect(shape).get()?
            }
        };
        debug!(model = %self.name(), related = %decl.name, "related attribute resolved");
        self.related.insert(
            decl.name.clone(),
            RelatedSlot {
                value,
                fetched_at: app.clock().now(),
            },
        );
        Ok(())
    }

    fn evaluate(&self, mapping: &[(String, ArgSource)]) -> Result<Params, ApiError> {
        mapping
            .iter()
            .map(|(name, source)| {
                let value = match source {
                    ArgSource::Literal(v) => v.clone(),
                    ArgSource::Field(field) => self.get(field).cloned().ok_or_else(|| ApiError::UnknownField {
                        model: self.name().to_string(),
                        field: field.clone(),
                    })?,
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::{Body, HttpMethod};
    use crate::mock::MockTransport;
    use serde_json::json;

    struct Fixture {
        transport: MockTransport,
        clock: ManualClock,
        app: AppContext,
        user: Arc<ModelSchema>,
        users_route: Arc<RouteDefinition>,
        comments_route: Arc<RouteDefinition>,
    }

    fn fixture() -> Fixture {
        let transport = MockTransport::new();
        let clock = ManualClock::new();
        let mut app = AppContext::new("related-tests", "http://d", transport.clone()).with_clock(clock.clone());
        let users_route = app
            .route("/users/{id}", [HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete])
            .json();
        let comments_route = app.route("/tickets/{ticket}/comments", [HttpMethod::Get]).returns_many().json();
        let user = ModelSchema::builder("User")
            .fields(["id", "name"])
            .route(Arc::clone(&users_route))
            .build();
        Fixture {
            transport,
            clock,
            app,
            user,
            users_route,
            comments_route,
        }
    }

    fn ticket(decl: RelatedDecl) -> Model {
        let schema = ModelSchema::builder("Ticket")
            .fields(["id", "assignee_id"])
            .related(decl)
            .build();
        let mut t = Model::new(&schema);
        t.set("id", 1).unwrap().set("assignee_id", "u7").unwrap();
        t.clear_changes();
        t
    }

    #[test]
    fn access_resolves_once_then_serves_from_cache() {
        let fx = fixture();
        fx.transport.respond(200, r#"{"id": "u7", "name": "Ada"}"#);
        let mut t = ticket(RelatedDecl::model("assignee", &fx.user).url_arg_from("id", "assignee_id"));

        let user = t.related(&fx.app, "assignee").unwrap().unwrap().as_one().unwrap().clone();
        assert_eq!(user.get("name"), Some(&json!("Ada")));
        assert_eq!(fx.transport.last_request().unwrap().url, "http://d/users/u7");

        t.related(&fx.app, "assignee").unwrap();
        assert_eq!(fx.transport.call_count(), 1);
        assert_eq!(t.related_state(&fx.app, "assignee").unwrap(), RelatedState::Resolved);
    }

    #[test]
    fn ttl_expiry_triggers_exactly_one_new_fetch() {
        let fx = fixture();
        fx.transport.with_fallback(200, r#"{"id": "u7", "name": "Ada"}"#);
        let mut t = ticket(
            RelatedDecl::model("assignee", &fx.user)
                .url_arg_from("id", "assignee_id")
                .ttl(Duration::from_secs(5)),
        );

        t.related(&fx.app, "assignee").unwrap();
        assert_eq!(fx.transport.call_count(), 1);

        fx.clock.advance(Duration::from_secs(4));
        t.related(&fx.app, "assignee").unwrap();
        assert_eq!(fx.transport.call_count(), 1);

        fx.clock.advance(Duration::from_secs(2));
        assert_eq!(t.related_state(&fx.app, "assignee").unwrap(), RelatedState::Expired);
        assert!(t.related_peek(&fx.app, "assignee").is_none());
        t.related(&fx.app, "assignee").unwrap();
        t.related(&fx.app, "assignee").unwrap();
        assert_eq!(fx.transport.call_count(), 2);
    }

    #[test]
    fn lazy_attribute_waits_for_explicit_get() {
        let fx = fixture();
        fx.transport.respond(200, r#"{"id": "u7", "name": "Ada"}"#);
        let mut t = ticket(
            RelatedDecl::model("assignee", &fx.user)
                .url_arg_from("id", "assignee_id")
                .lazy(),
        );

        assert!(t.related(&fx.app, "assignee").unwrap().is_none());
        assert_eq!(fx.transport.call_count(), 0);

        t.related_get(&fx.app, "assignee").unwrap();
        assert_eq!(fx.transport.call_count(), 1);
        assert!(t.related(&fx.app, "assignee").unwrap().is_some());
        assert_eq!(fx.transport.call_count(), 1);
    }

    #[test]
    fn collection_target_through_route_with_literal_query() {
        let fx = fixture();
        fx.transport.respond(200, r#"[{"body": "first"}, {"body": "second"}]"#);
        let mut t = ticket(
            RelatedDecl::route("comments", &fx.comments_route)
                .url_arg_from("ticket", "id")
                .query("order", ArgSource::Literal(json!("desc")))
                .many(),
        );

        let comments = t.related(&fx.app, "comments").unwrap().unwrap().clone();
        assert_eq!(comments.into_value().as_array().map(Vec::len), Some(2));
        let sent = fx.transport.last_request().unwrap();
        assert_eq!(sent.full_url(), "http://d/tickets/1/comments?order=desc");
    }

    #[test]
    fn collection_of_models_maps_each_element() {
        let fx = fixture();
        fx.transport.respond(200, r#"[{"id": "u1"}, {"id": "u2"}]"#);
        let team_route = Arc::clone(&fx.users_route);
        let team = ModelSchema::builder("User").fields(["id", "name"]).route(team_route).build();
        let mut t = ticket(RelatedDecl::model("watchers", &team).many());
        let watchers = t.related_get(&fx.app, "watchers").unwrap();
        assert_eq!(watchers.as_many().unwrap().len(), 2);
    }

    #[test]
    fn update_delegates_to_cached_record_and_invalidates() {
        let fx = fixture();
        fx.transport.respond(200, r#"{"id": "u7", "name": "Ada"}"#);
        fx.transport.respond(200, r#"{"id": "u7", "name": "Grace"}"#);
        let mut t = ticket(RelatedDecl::model("assignee", &fx.user).url_arg_from("id", "assignee_id"));

        t.related(&fx.app, "assignee").unwrap();
        t.related_record_mut("assignee").unwrap().set("name", "Grace").unwrap();
        t.related_update(&fx.app, "assignee").unwrap();

        let sent = fx.transport.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Put);
        assert_eq!(sent.url, "http://d/users/u7");
        assert_eq!(sent.body, Body::Json(json!({"id": "u7", "name": "Grace"})));
        assert_eq!(t.related_state(&fx.app, "assignee").unwrap(), RelatedState::Unresolved);
    }

    #[test]
    fn delete_invalidates_even_on_failure() {
        let fx = fixture();
        fx.transport.respond(200, r#"{"id": "u7", "name": "Ada"}"#);
        fx.transport.respond(500, "boom");
        let mut t = ticket(RelatedDecl::model("assignee", &fx.user).url_arg_from("id", "assignee_id"));

        t.related(&fx.app, "assignee").unwrap();
        assert!(t.related_delete(&fx.app, "assignee").is_err());
        assert_eq!(t.related_state(&fx.app, "assignee").unwrap(), RelatedState::Unresolved);
    }

    #[test]
    fn create_without_cached_record_is_an_error() {
        let fx = fixture();
        let mut t = ticket(RelatedDecl::model("assignee", &fx.user));
        assert!(matches!(
            t.related_create(&fx.app, "assignee"),
            Err(ApiError::RelatedNotResolved { .. })
        ));
        assert_eq!(fx.transport.call_count(), 0);
    }

    #[test]
    fn hooks_replace_default_behaviour() {
        let fx = fixture();
        let mut t = ticket(
            RelatedDecl::model("assignee", &fx.user)
                .on_get(|_, owner| Ok(Mapped::Value(json!({"from": owner.get("assignee_id")}))))
                .on_create(|_, _| Ok(Mapped::Value(json!("created")))),
        );
        let value = t.related(&fx.app, "assignee").unwrap().unwrap().clone();
        assert_eq!(value, Mapped::Value(json!({"from": "u7"})));
        assert_eq!(
            t.related_create(&fx.app, "assignee").unwrap(),
            Mapped::Value(json!("created"))
        );
        assert_eq!(t.related_state(&fx.app, "assignee").unwrap(), RelatedState::Unresolved);
        assert_eq!(fx.transport.call_count(), 0);
    }

    #[test]
    fn owner_update_clears_related_caches() {
        let fx = fixture();
        fx.transport.respond(200, r#"{"id": "u7", "name": "Ada"}"#);
        fx.transport.respond(200, r#"{"id": 1, "assignee_id": "u8"}"#);
        let tickets_route = Arc::clone(&fx.users_route);
        let schema = ModelSchema::builder("Ticket")
            .fields(["id", "assignee_id"])
            .route(tickets_route)
            .related(RelatedDecl::model("assignee", &fx.user).url_arg_from("id", "assignee_id"))
            .build();
        let mut t = Model::new(&schema);
        t.set("id", 1).unwrap().set("assignee_id", "u7").unwrap();

        t.related(&fx.app, "assignee").unwrap();
        t.set("assignee_id", "u8").unwrap();
        t.update(&fx.app).unwrap();
        assert_eq!(t.related_state(&fx.app, "assignee").unwrap(), RelatedState::Unresolved);
    }

    #[test]
    fn unknown_related_name_is_reported() {
        let fx = fixture();
        let mut t = ticket(RelatedDecl::model("assignee", &fx.user));
        assert!(matches!(
            t.related(&fx.app, "reporter"),
            Err(ApiError::UnknownRelated { ref name, .. }) if name == "reporter"
        ));
    }
}
