//! Value extraction from responses

use serde_json::Value as JsonValue;

use super::chain::{DataExtractor, ExtractSource};
use crate::http::HttpResponse;

/// Project one value out of a response. Missing values are `null`.
pub fn extract(extractor: &DataExtractor, response: &HttpResponse) -> JsonValue {
    match extractor.source {
        ExtractSource::ResponseBody => {
            // Bodies that are not JSON are walked as a plain string value
            let body = response
                .json()
                .unwrap_or_else(|| JsonValue::String(response.body.clone()));
            walk_path(&body, &extractor.path)
        }
        ExtractSource::ResponseHeader => response
            .headers
            .get(&extractor.path)
            .or_else(|| {
                response
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&extractor.path))
                    .map(|(_, v)| v)
            })
            .map(|v| JsonValue::String(v.clone()))
            .unwrap_or(JsonValue::Null),
        ExtractSource::ResponseStatus => JsonValue::from(response.status),
    }
}

/// Walk a dotted path such as `data.items[0].id`. An empty path returns the
/// whole value.
pub fn walk_path(value: &JsonValue, path: &str) -> JsonValue {
    let path = path.trim().trim_start_matches("$.").trim_start_matches('$');
    if path.is_empty() {
        return value.clone();
    }

    let mut current = value;
    for segment in path.split('.') {
        let (key, indices) = split_segment(segment);
        if !key.is_empty() {
            match current.get(key) {
                Some(next) => current = next,
                None => return JsonValue::Null,
            }
        }
        for index in indices {
            match index.and_then(|i| current.get(i)) {
                Some(next) => current = next,
                None => return JsonValue::Null,
            }
        }
        if current.is_null() {
            return JsonValue::Null;
        }
    }
    current.clone()
}

/// `items[0][1]` becomes `("items", [Some(0), Some(1)])`. Unparseable
/// indexes are `None`.
fn split_segment(segment: &str) -> (&str, Vec<Option<usize>>) {
    let Some(open) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let key = &segment[..open];
    let indices = segment[open..]
        .split('[')
        .filter(|part| !part.is_empty())
        .map(|part| part.trim_end_matches(']').trim().parse::<usize>().ok())
        .collect();
    (key, indices)
}
