//! Chain definitions and chain file loading
//!
//! A chain file is YAML, JSON or TOML:
//!
//! ```yaml
//! name: users
//! variables:
//!   base: https://api.example.com
//! steps:
//!   - id: create
//!     method: POST
//!     url: "{{base}}/users"
//!     body: { name: Ada }
//!     extractors:
//!       - source: response_body
//!         path: id
//!         target_variable: user_id
//!   - id: fetch
//!     url: "{{base}}/users/{{user_id}}"
//!     condition: { type: status_code, value: 201 }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use super::template;
use crate::errors::{PulsechainError, Result};
use crate::http::{self, Headers};
use crate::scripting::VariableMap;

/// Largest chain file accepted
pub const MAX_CHAIN_FILE_SIZE: u64 = 1024 * 1024;

/// One request in a chain. Never modified while the chain runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// URL template
    pub url: String,
    /// Header value templates
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: Headers,
    /// Body template. Structured bodies in chain files are stored as JSON text.
    #[serde(default, deserialize_with = "body_template", skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extractors: Vec<DataExtractor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_request_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_request_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_script: Option<String>,
}

impl ChainStep {
    pub fn new(id: impl Into<String>, method: &str, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_extractor(mut self, extractor: DataExtractor) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Name for logs and reports, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

fn default_method() -> String {
    http::GET.to_string()
}

fn body_template<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Where an extractor reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractSource {
    ResponseBody,
    ResponseHeader,
    ResponseStatus,
}

/// Copies one value out of a response into the variable pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExtractor {
    pub source: ExtractSource,
    /// Dotted path for bodies (`data.items[0].id`), header name for headers
    #[serde(default)]
    pub path: String,
    #[serde(alias = "targetVariable")]
    pub target_variable: String,
}

impl DataExtractor {
    pub fn body(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: ExtractSource::ResponseBody,
            path: path.into(),
            target_variable: target.into(),
        }
    }

    pub fn header(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: ExtractSource::ResponseHeader,
            path: name.into(),
            target_variable: target.into(),
        }
    }

    pub fn status(target: impl Into<String>) -> Self {
        Self {
            source: ExtractSource::ResponseStatus,
            path: String::new(),
            target_variable: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Always,
    StatusCode,
    ResponseContains,
}

/// Gate evaluated against the previous step's response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl Condition {
    pub fn always() -> Self {
        Self {
            kind: ConditionKind::Always,
            value: None,
        }
    }

    pub fn status_code(value: impl Into<JsonValue>) -> Self {
        Self {
            kind: ConditionKind::StatusCode,
            value: Some(value.into()),
        }
    }

    pub fn response_contains(text: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::ResponseContains,
            value: Some(JsonValue::String(text.into())),
        }
    }
}

/// Contents of a chain file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: VariableMap,
    pub steps: Vec<ChainStep>,
}

impl ChainDefinition {
    /// Check the definition before running it.
    ///
    /// Returns warnings on success and every error found otherwise. Unknown
    /// template variables are warnings: a script may still define them.
    pub fn validate(&self) -> std::result::Result<Vec<String>, Vec<String>> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("Chain has no steps defined".to_string());
        }

        let mut seen_ids = HashSet::new();
        let mut known: HashSet<&str> = self.variables.keys().map(String::as_str).collect();

        for (i, step) in self.steps.iter().enumerate() {
            let prefix = format!("Step {} ({})", i + 1, step.display_name());

            if step.id.is_empty() {
                errors.push(format!("{}: missing id", prefix));
            } else if !seen_ids.insert(step.id.as_str()) {
                errors.push(format!("{}: duplicate step id '{}'", prefix, step.id));
            }

            if !http::is_valid_token(&http::normalize(&step.method)) {
                errors.push(format!("{}: Invalid HTTP method '{}'", prefix, step.method));
            }

            if step.url.trim().is_empty() {
                errors.push(format!("{}: missing URL", prefix));
            }

            let templates = std::iter::once(step.url.as_str())
                .chain(step.headers.values().map(String::as_str))
                .chain(step.body.as_deref());
            let mut reported = HashSet::new();
            for name in templates.flat_map(template::referenced_variables) {
                if !known.contains(name.as_str()) && reported.insert(name.clone()) {
                    warnings.push(format!(
                        "{}: references variable '{}' before any step extracts it",
                        prefix, name
                    ));
                }
            }

            known.extend(step.extractors.iter().map(|e| e.target_variable.as_str()));
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors)
        }
    }
}

/// Load a chain file, picking the format from the extension
pub fn load_chain(path: &Path) -> Result<ChainDefinition> {
    let size = fs::metadata(path)?.len();
    if size > MAX_CHAIN_FILE_SIZE {
        return Err(PulsechainError::Validation(format!(
            "Chain file too large: {} bytes (max {} bytes)",
            size, MAX_CHAIN_FILE_SIZE
        )));
    }

    let content = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let chain: ChainDefinition = match extension.as_str() {
        "json" => serde_json::from_str(&content)?,
        "toml" => toml::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };

    tracing::debug!(path = %path.display(), steps = chain.steps.len(), "loaded chain");
    Ok(chain)
}
