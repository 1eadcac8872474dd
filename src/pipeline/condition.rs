//! Step conditions

use serde_json::Value as JsonValue;

use super::chain::{Condition, ConditionKind};
use super::template::stringify;
use crate::http::HttpResponse;

/// Evaluate a condition against the previous step's response
pub fn evaluate(condition: &Condition, previous: &HttpResponse) -> bool {
    match condition.kind {
        ConditionKind::Always => true,
        ConditionKind::StatusCode => match &condition.value {
            Some(JsonValue::Number(n)) => n.as_u64() == Some(u64::from(previous.status)),
            Some(JsonValue::String(pattern)) => status_matches(previous.status, pattern),
            _ => false,
        },
        ConditionKind::ResponseContains => match &condition.value {
            Some(value) => previous.body.contains(&stringify(value)),
            None => true,
        },
    }
}

/// Match a status against `"200"`, `"200-299"` or `"2xx"`
pub fn status_matches(status: u16, pattern: &str) -> bool {
    let pattern = pattern.trim();

    if let Ok(expected) = pattern.parse::<u16>() {
        return status == expected;
    }

    if let Some((start, end)) = pattern.split_once('-') {
        if let (Ok(start), Ok(end)) = (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
            return (start..=end).contains(&status);
        }
    }

    let lower = pattern.to_ascii_lowercase();
    if lower.len() == 3 && lower.ends_with("xx") {
        if let Ok(class) = lower[0..1].parse::<u16>() {
            return status / 100 == class;
        }
    }

    false
}
