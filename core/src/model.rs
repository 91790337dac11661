//! Declarative records mapped to request payloads and responses.
//!
//! # Design
//! A [`ModelSchema`] declares an ordered field set, keys to ignore, an
//! optional bound route and related-attribute declarations. A [`Model`] is
//! one record of that schema. Field writes go through [`Model::set`],
//! which appends to the record's change log; the log decides what an
//! update sends when the schema (or app) asks for changed fields only.
//!
//! Responses map to records along two explicit paths selected by the
//! route's declared [`ResponseShape`]: one object becomes one `Model`, an
//! array becomes a `Vec<Model>`. A payload of the other shape is an error,
//! never a guess.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::app::AppContext;
use crate::error::ApiError;
use crate::related::{RelatedDecl, RelatedSlot};
use crate::request::RequestBuilder;
use crate::route::{ResponseShape, RouteDefinition};

/// What [`Model::update`] sends as its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePayload {
    /// Every declared field.
    #[default]
    Full,
    /// Only fields written since the last clear-changes point.
    Changed,
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: String,
    default: Value,
}

/// Declared shape of a record type.
pub struct ModelSchema {
    name: String,
    fields: Vec<FieldDef>,
    ignore: Vec<String>,
    route: Option<Arc<RouteDefinition>>,
    related: Vec<RelatedDecl>,
    update_payload: Option<UpdatePayload>,
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            schema: ModelSchema {
                name: name.into(),
                fields: Vec::new(),
                ignore: Vec::new(),
                route: None,
                related: Vec::new(),
                update_payload: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn route(&self) -> Option<&Arc<RouteDefinition>> {
        self.route.as_ref()
    }

    pub fn related(&self) -> &[RelatedDecl] {
        &self.related
    }

    pub fn related_decl(&self, name: &str) -> Option<&RelatedDecl> {
        self.related.iter().find(|r| r.name() == name)
    }

    /// The schema's own choice, if it made one.
    pub fn update_payload(&self) -> Option<UpdatePayload> {
        self.update_payload
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|d| &d.name).collect::<Vec<_>>())
            .field("ignore", &self.ignore)
            .field("route", &self.route.as_ref().map(|r| r.path()))
            .field("related", &self.related.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("update_payload", &self.update_payload)
            .finish()
    }
}

pub struct ModelSchemaBuilder {
    schema: ModelSchema,
}

impl ModelSchemaBuilder {
    pub fn field(self, name: impl Into<String>) -> Self {
        self.field_with_default(name, Value::Null)
    }

    pub fn field_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.schema.fields.push(FieldDef {
            name: name.into(),
            default: default.into(),
        });
        self
    }

    pub fn fields<S: Into<String>>(self, names: impl IntoIterator<Item = S>) -> Self {
        names.into_iter().fold(self, |b, n| b.field(n))
    }

    /// Keys dropped silently on construction.
    pub fn ignore<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.schema.ignore.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn route(mut self, route: Arc<RouteDefinition>) -> Self {
        self.schema.route = Some(route);
        self
    }

    pub fn related(mut self, decl: RelatedDecl) -> Self {
        self.schema.related.push(decl);
        self
    }

    pub fn update_payload(mut self, mode: UpdatePayload) -> Self {
        self.schema.update_payload = Some(mode);
        self
    }

    pub fn build(self) -> Arc<ModelSchema> {
        Arc::new(self.schema)
    }
}

/// Outcome of a request after response mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped {
    /// No schema was bound, or the payload was `null`.
    Value(Value),
    One(Model),
    Many(Vec<Model>),
}

impl Mapped {
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(v) => v,
            Self::One(m) => m.to_value(),
            Self::Many(ms) => Value::Array(ms.iter().map(Model::to_value).collect()),
        }
    }

    pub fn into_one(self) -> Result<Model, ApiError> {
        match self {
            Self::One(m) => Ok(m),
            other => Err(other.mismatch(ResponseShape::One)),
        }
    }

    pub fn into_many(self) -> Result<Vec<Model>, ApiError> {
        match self {
            Self::Many(ms) => Ok(ms),
            other => Err(other.mismatch(ResponseShape::Many)),
        }
    }

    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Self::One(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Model]> {
        match self {
            Self::Many(ms) => Some(ms),
            _ => None,
        }
    }

    fn mismatch(&self, expected: ResponseShape) -> ApiError {
        let found = match self {
            Self::Value(v) => kind(v),
            Self::One(_) => "single record",
            Self::Many(_) => "collection",
        };
        ApiError::ShapeMismatch { expected, found }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Maps a decoded payload along the declared shape.
pub fn map_response(
    value: Value,
    schema: Option<&Arc<ModelSchema>>,
    shape: ResponseShape,
) -> Result<Mapped, ApiError> {
    let Some(schema) = schema else {
        return Ok(Mapped::Value(value));
    };
    match (shape, value) {
        (_, Value::Null) => Ok(Mapped::Value(Value::Null)),
        (ResponseShape::One, value) => Model::from_value(schema, value).map(Mapped::One),
        (ResponseShape::Many, Value::Array(items)) => items
            .into_iter()
            .map(|item| Model::from_value(schema, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Mapped::Many),
        (ResponseShape::Many, other) => Err(ApiError::ShapeMismatch {
            expected: ResponseShape::Many,
            found: kind(&other),
        }),
    }
}

/// One record of a [`ModelSchema`].
#[derive(Clone)]
pub struct Model {
    schema: Arc<ModelSchema>,
    values: Vec<Value>,
    changes: Vec<String>,
    pub(crate) related: HashMap<String, RelatedSlot>,
}

impl Model {
    /// A record holding every field's default.
    pub fn new(schema: &Arc<ModelSchema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values: schema.fields.iter().map(|f| f.default.clone()).collect(),
            changes: Vec::new(),
            related: HashMap::new(),
        }
    }

    /// Builds a record from a key-value map.
    ///
    /// Missing fields take their default. Unknown keys are logged as a
    /// warning and discarded; keys on the schema's ignore list are dropped
    /// silently. The change log starts empty.
    pub fn from_map(schema: &Arc<ModelSchema>, mut map: Map<String, Value>) -> Self {
        let mut model = Self::new(schema);
        for (slot, field) in model.values.iter_mut().zip(&schema.fields) {
            if let Some(value) = map.remove(&field.name) {
                *slot = value;
            }
        }
        for key in &schema.ignore {
            map.remove(key);
        }
        if !map.is_empty() {
            let extra: Vec<&String> = map.keys().collect();
            warn!(model = %schema.name, ?extra, "model got extra fields");
        }
        model
    }

    pub fn from_value(schema: &Arc<ModelSchema>, value: Value) -> Result<Self, ApiError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(schema, map)),
            other => Err(ApiError::ShapeMismatch {
                expected: ResponseShape::One,
                found: kind(&other),
            }),
        }
    }

    pub fn from_serialize<T: Serialize>(schema: &Arc<ModelSchema>, data: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(data).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Self::from_value(schema, value)
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.position(field).map(|i| &self.values[i])
    }

    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<T, ApiError> {
        let value = self.get(field).ok_or_else(|| self.unknown(field))?;
        serde_json::from_value(value.clone()).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    /// Writes a field and records it in the change log.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<&mut Self, ApiError> {
        let i = self.schema.position(field).ok_or_else(|| self.unknown(field))?;
        self.values[i] = value.into();
        if !self.changes.iter().any(|c| c == field) {
            self.changes.push(field.to_string());
        }
        Ok(self)
    }

    /// Writes every declared key of `map`; extra keys are reported and skipped.
    pub fn apply_map(&mut self, map: Map<String, Value>) -> &mut Self {
        let mut extra = Vec::new();
        for (key, value) in map {
            if let Some(i) = self.schema.position(&key) {
                self.values[i] = value;
                if !self.changes.contains(&key) {
                    self.changes.push(key);
                }
            } else if !self.schema.ignore.contains(&key) {
                extra.push(key);
            }
        }
        if !extra.is_empty() {
            warn!(model = %self.schema.name, ?extra, "model got extra fields");
        }
        self
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.schema
            .fields
            .iter()
            .zip(&self.values)
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.to_value()).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    pub fn changed_fields(&self) -> &[String] {
        &self.changes
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// `true` when every field is `null`.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Value::is_null)
    }

    pub fn payload_for_create(&self) -> Value {
        self.to_value()
    }

    pub fn payload_for_update(&self, mode: UpdatePayload) -> Value {
        match mode {
            UpdatePayload::Full => self.to_value(),
            UpdatePayload::Changed => Value::Object(
                self.changes
                    .iter()
                    .filter_map(|f| self.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
            ),
        }
    }

    /// A request through the bound route, routed by this record's fields
    /// and mapped back to this schema.
    pub fn request<'a>(&self, app: &'a AppContext) -> Result<RequestBuilder<'a>, ApiError> {
        let route = self.schema.route.as_ref().ok_or_else(|| ApiError::NoRoute {
            model: self.schema.name.clone(),
        })?;
        Ok(app.request(route).with_model(self).expect(ResponseShape::One))
    }

    pub fn fetch(&self, app: &AppContext) -> Result<Mapped, ApiError> {
        self.request(app)?.get()
    }

    /// POSTs the full record. Clears the change log and related caches on success.
    pub fn create(&mut self, app: &AppContext) -> Result<Mapped, ApiError> {
        let mapped = self.request(app)?.json_body(self.payload_for_create()).post()?;
        self.settle();
        Ok(mapped)
    }

    /// PUTs the record as the update-payload mode dictates. Clears the
    /// change log and related caches on success.
    pub fn update(&mut self, app: &AppContext) -> Result<Mapped, ApiError> {
        let mode = self
            .schema
            .update_payload
            .unwrap_or(app.config().update_payload);
        let mapped = self.request(app)?.json_body(self.payload_for_update(mode)).put()?;
        self.settle();
        Ok(mapped)
    }

    pub fn delete(&self, app: &AppContext) -> Result<Mapped, ApiError> {
        self.request(app)?.delete()
    }

    fn settle(&mut self) {
        self.clear_changes();
        self.related.clear();
    }

    fn unknown(&self, field: &str) -> ApiError {
        ApiError::UnknownField {
            model: self.schema.name.clone(),
            field: field.to_string(),
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.to_map() == other.to_map()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self
            .schema
            .fields
            .iter()
            .zip(&self.values)
            .map(|(d, v)| format!("{}={}", d.name, v))
            .collect::<Vec<_>>()
            .join(", ");
        let pending = if self.has_pending_changes() {
            " has pending updates"
        } else {
            ""
        };
        write!(f, "<{}({fields}){pending}>", self.schema.name)
    }
}
