//! `{{name}}` substitution from the variable pool

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use crate::scripting::VariableMap;

static TEMPLATE_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([\w.\-]+)\s*\}\}").unwrap()
});

/// String form used when a value lands in a template
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{name}}` with its pool value. Unknown names stay as written.
pub fn render(template: &str, variables: &VariableMap) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    TEMPLATE_VAR_RE
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Variable names a template refers to, in order of appearance
pub fn referenced_variables(template: &str) -> Vec<String> {
    TEMPLATE_VAR_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool() -> VariableMap {
        VariableMap::from([
            ("name".to_string(), json!("test")),
            ("id".to_string(), json!(42)),
            ("user".to_string(), json!({"roles": ["a"]})),
        ])
    }

    #[test]
    fn test_render_template() {
        assert_eq!(render("Hello {{name}}, ID={{ id }}", &pool()), "Hello test, ID=42");
        assert_eq!(render("{{user}}", &pool()), r#"{"roles":["a"]}"#);
    }

    #[test]
    fn test_unknown_names_stay_literal() {
        assert_eq!(render("/users/{{missing}}/{{id}}", &pool()), "/users/{{missing}}/42");
        assert_eq!(render("no templates", &pool()), "no templates");
    }

    #[test]
    fn test_referenced_variables() {
        assert_eq!(
            referenced_variables("{{base}}/x/{{ id }}?q={{base}}"),
            vec!["base", "id", "base"]
        );
    }
}
