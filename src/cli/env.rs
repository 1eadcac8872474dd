//! Environment variables from the command line and `.env`-style files

use std::path::Path;

use serde_json::Value as JsonValue;

use crate::errors::{PulsechainError, Result};
use crate::scripting::VariableMap;

/// Parse `NAME=VALUE`. The value is taken as JSON when it parses, else as a string.
pub fn parse_env_pair(pair: &str) -> Result<(String, JsonValue)> {
    let (key, value) = pair
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| PulsechainError::Validation(format!("Invalid variable format: {}. Use NAME=VALUE", pair)))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

/// Parse the lines of an env file into string values.
///
/// Blank lines and `#` comments are skipped, `export ` prefixes are allowed and
/// quoted values keep their content verbatim.
pub fn parse_env_file(content: &str) -> Result<VariableMap> {
    let mut vars = VariableMap::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let (key, value) = line
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| PulsechainError::Validation(format!("Invalid env line {}: {}", number + 1, line)))?;

        let value = value.trim();
        let value = match unquote(value) {
            Some(inner) => inner.to_string(),
            None => match value.find(" #") {
                Some(comment) => value[..comment].trim_end().to_string(),
                None => value.to_string(),
            },
        };
        vars.insert(key.trim().to_string(), JsonValue::String(value));
    }

    Ok(vars)
}

fn unquote(value: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|quote| {
        value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })
}

/// Merge the env file and then the `--env` pairs into one map
pub fn collect_environment(env_file: Option<&Path>, pairs: &[String]) -> Result<VariableMap> {
    let mut vars = match env_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| PulsechainError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
            parse_env_file(&content)?
        }
        None => VariableMap::new(),
    };

    for pair in pairs {
        let (key, value) = parse_env_pair(pair)?;
        vars.insert(key, value);
    }

    Ok(vars)
}
