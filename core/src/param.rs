//! Declarative validation rules for url-args and query params.
//!
//! A [`ParamRule`] is built once when a route is declared and shared by
//! every request made through that route.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ApiError;
use crate::request::RequestBuilder;
use crate::template::is_absent;

/// Computes a parameter value from the provided one and the in-flight request.
///
/// The provided value is `null` when the caller set nothing.
pub type DefaultFn = Arc<dyn Fn(&Value, &RequestBuilder<'_>) -> Value + Send + Sync>;

/// Custom acceptance check run after the option set.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub enum ParamDefault {
    #[default]
    None,
    Static(Value),
    Computed(DefaultFn),
}

/// Default, required-ness, allowed values and custom check for one parameter.
///
/// ## Examples
///
/// ```
/// use apikit_core::ParamRule;
/// use serde_json::{json, Value};
///
/// let status = ParamRule::new("status").options(["open", "closed"]);
/// let filter = ParamRule::new("filter").options([json!("open"), Value::Null]);
/// let page = ParamRule::new("page").default(1);
/// let version = ParamRule::new("version").required();
/// assert!(version.is_required());
/// ```
#[derive(Clone)]
pub struct ParamRule {
    name: String,
    default: ParamDefault,
    required: bool,
    options: Option<Vec<Value>>,
    validator: Option<ValidatorFn>,
}

impl ParamRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: ParamDefault::None,
            required: false,
            options: None,
            validator: None,
        }
    }

    /// Static value used when none is provided.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = ParamDefault::Static(value.into());
        self
    }

    /// Value computed on every validation, whether or not one was provided.
    pub fn computed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &RequestBuilder<'_>) -> Value + Send + Sync + 'static,
    {
        self.default = ParamDefault::Computed(Arc::new(f));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn options<V: Into<Value>>(mut self, options: impl IntoIterator<Item = V>) -> Self {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn allowed(&self) -> Option<&[Value]> {
        self.options.as_deref()
    }

    /// Resolve the value to send for this parameter.
    ///
    /// An absent result (`null`) means the parameter is left out of the
    /// request.
    pub fn validate(&self, provided: &Value, context: &RequestBuilder<'_>) -> Result<Value, ApiError> {
        let candidate = match &self.default {
            ParamDefault::Computed(f) => f(provided, context),
            ParamDefault::Static(default) if is_absent(provided) => default.clone(),
            _ => provided.clone(),
        };

        if is_absent(&candidate) {
            if self.required {
                return Err(ApiError::MissingParameter { name: self.name.clone() });
            }
            // an option set only admits absence when it lists null itself
            if let Some(options) = &self.options {
                if !options.iter().any(is_absent) {
                    return Err(self.invalid(Value::Null));
                }
            }
            return Ok(Value::Null);
        }

        if let Some(options) = &self.options {
            if !options.contains(&candidate) {
                return Err(self.invalid(candidate));
            }
        }
        if let Some(check) = &self.validator {
            if !check(&candidate) {
                return Err(self.invalid(candidate));
            }
        }
        Ok(candidate)
    }

    fn invalid(&self, value: Value) -> ApiError {
        ApiError::InvalidParameter {
            name: self.name.clone(),
            value,
        }
    }
}

impl fmt::Debug for ParamRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let default = match &self.default {
            ParamDefault::None => None,
            ParamDefault::Static(v) => Some(v.to_string()),
            ParamDefault::Computed(_) => Some("<computed>".to_string()),
        };
        f.debug_struct("ParamRule")
            .field("name", &self.name)
            .field("default", &default)
            .field("required", &self.required)
            .field("options", &self.options)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
