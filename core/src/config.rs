//! App-level configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::model::UpdatePayload;
use crate::template::{Params, RequestTemplate};

pub const DEFAULT_DOMAIN: &str = "http://localhost:8080";

/// Everything an [`AppContext`](crate::app::AppContext) is built from.
///
/// Every field has a default, so a config file only names what it changes:
///
/// ```
/// let config = apikit_core::AppConfig::from_json_str(
///     r#"{"name": "tickets", "headers": {"Accept": "application/json"}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.domain, "http://localhost:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub domain: String,
    pub headers: BTreeMap<String, String>,
    pub params: Params,
    pub url_args: Params,
    pub disable_validation: bool,
    pub update_payload: UpdatePayload,
    /// Root of the artifact store. Defaults to `$HOME/.apikit/<name>`.
    pub artifact_dir: Option<PathBuf>,
    /// Free-form transport options.
    pub extra: Params,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new("apikit")
    }
}

impl AppConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: DEFAULT_DOMAIN.to_string(),
            headers: BTreeMap::new(),
            params: Params::new(),
            url_args: Params::new(),
            disable_validation: false,
            update_payload: UpdatePayload::Full,
            artifact_dir: None,
            extra: Params::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_url_arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.url_args.insert(name.into(), value.into());
        self
    }

    pub fn with_update_payload(mut self, mode: UpdatePayload) -> Self {
        self.update_payload = mode;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.disable_validation = true;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, ApiError> {
        serde_json::from_str(text).map_err(|e| ApiError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// The app-level default template: `User-Agent: <name>`, then the
    /// configured headers, params, url-args, extras and domain.
    pub fn template(&self) -> RequestTemplate {
        let mut template = RequestTemplate::new();
        template
            .header("User-Agent", self.name.clone())
            .set_headers(self.headers.clone())
            .set_params(self.params.clone())
            .set_url_args(self.url_args.clone())
            .set_extra(self.extra.clone())
            .set_domain(self.domain.clone());
        template
    }

    pub fn artifact_root(&self) -> PathBuf {
        match &self.artifact_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir)
                .join(".apikit")
                .join(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json_str(
            r#"{
                "name": "tickets",
                "domain": "http://api.example.com",
                "url_args": {"version": "v1"},
                "update_payload": "changed"
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "tickets");
        assert_eq!(config.url_args["version"], json!("v1"));
        assert_eq!(config.update_payload, UpdatePayload::Changed);
        assert!(!config.disable_validation);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let err = AppConfig::from_json_str(r#"{"update_payload": "partial"}"#).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "from-file", "disable_validation": true}}"#).unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "from-file");
        assert!(config.disable_validation);
        assert_eq!(config.domain, DEFAULT_DOMAIN);
    }

    #[test]
    fn template_carries_user_agent_and_defaults() {
        let config = AppConfig::new("sunshine")
            .with_domain("http://sunshine.com")
            .with_header("Accept", "application/json")
            .with_param("limit", 10)
            .with_url_arg("version", "v2");
        let template = config.template();
        assert_eq!(template.headers()["User-Agent"], "sunshine");
        assert_eq!(template.headers()["Accept"], "application/json");
        assert_eq!(template.params()["limit"], json!(10));
        assert_eq!(template.url_args()["version"], json!("v2"));
        assert_eq!(template.domain(), Some("http://sunshine.com"));
    }

    #[test]
    fn configured_headers_can_replace_user_agent() {
        let template = AppConfig::new("a").with_header("User-Agent", "custom").template();
        assert_eq!(template.headers()["User-Agent"], "custom");
    }

    #[test]
    fn artifact_root_prefers_explicit_dir() {
        let config = AppConfig::new("x").with_artifact_dir("/tmp/apikit-x");
        assert_eq!(config.artifact_root(), PathBuf::from("/tmp/apikit-x"));
        assert!(AppConfig::new("y").artifact_root().ends_with(".apikit/y"));
    }
}
