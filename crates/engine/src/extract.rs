//! Value visitors for the free-form JSON the remote side returns: remote
//! id scanning, status extraction, and download-URL harvesting. All pure,
//! all independent of any network I/O.

use serde_json::Value;

/// Key names that may carry the remote id, highest priority first.
const ID_KEYS: [&str; 7] = [
    "request_id",
    "requestId",
    "session_id",
    "sessionId",
    "id",
    "job_id",
    "jobId",
];

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scan_id_keys(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    ID_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(id_from_value))
}

/// Pull the remote id out of a submit response: the priority key list at
/// the top level first, then every `content[*].text` that parses as JSON.
pub(crate) fn extract_remote_id(result: &Value) -> Option<String> {
    if let Some(id) = scan_id_keys(result) {
        return Some(id);
    }
    for parsed in content_json_parts(result) {
        if let Some(id) = scan_id_keys(&parsed) {
            return Some(id);
        }
    }
    None
}

fn content_json_parts(result: &Value) -> Vec<Value> {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };
    content
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .filter_map(|text| serde_json::from_str(text).ok())
        .collect()
}

fn status_field(value: &Value) -> Option<String> {
    value
        .get("status")
        .or_else(|| value.get("state"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Extract a (lowercased) status string and the payload it came from.
///
/// A JSON-parsed `content[*].text` wins over the top-level fields, and
/// its parsed form is returned so downstream URL harvesting sees the
/// real payload rather than an escaped string.
pub(crate) fn parse_status(result: &Value) -> (String, Value) {
    let mut status = status_field(result).unwrap_or_else(|| "unknown".to_string());

    for parsed in content_json_parts(result) {
        if parsed.is_object() {
            if let Some(inner) = status_field(&parsed) {
                status = inner;
            }
            return (status.to_lowercase(), parsed);
        }
    }

    (status.to_lowercase(), result.clone())
}

/// Recursively collect every `http://`/`https://` string in `result`,
/// in discovery order, deduplicated. Strings that look like embedded
/// JSON (`{`/`[` prefix) are parsed and walked too.
pub(crate) fn extract_download_urls(result: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    walk_urls(result, &mut urls);
    urls
}

fn walk_urls(value: &Value, urls: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if s.starts_with("http://") || s.starts_with("https://") {
                if !urls.iter().any(|u| u == s) {
                    urls.push(s.clone());
                }
            } else if s.starts_with('{') || s.starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                    walk_urls(&parsed, urls);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_urls(item, urls);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk_urls(item, urls);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_id_prefers_the_key_priority_order() {
        let result = json!({"id": "low", "request_id": "high"});
        assert_eq!(extract_remote_id(&result).as_deref(), Some("high"));

        for key in ["request_id", "session_id", "id", "job_id"] {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), json!("abc-123"));
            assert_eq!(
                extract_remote_id(&Value::Object(map)).as_deref(),
                Some("abc-123")
            );
        }
    }

    #[test]
    fn remote_id_found_inside_content_text() {
        let inner = json!({"request_id": "nested-1"}).to_string();
        let result = json!({"content": [{"type": "text", "text": "plain words"},
                                        {"type": "text", "text": inner}]});
        assert_eq!(extract_remote_id(&result).as_deref(), Some("nested-1"));
    }

    #[test]
    fn numeric_ids_are_accepted_and_empty_strings_skipped() {
        assert_eq!(
            extract_remote_id(&json!({"id": 42})).as_deref(),
            Some("42")
        );
        assert_eq!(
            extract_remote_id(&json!({"request_id": "", "job_id": "j9"})).as_deref(),
            Some("j9")
        );
        assert!(extract_remote_id(&json!({"nothing": "here"})).is_none());
    }

    #[test]
    fn status_reads_status_or_state_case_insensitively() {
        assert_eq!(parse_status(&json!({"status": "IN_PROGRESS"})).0, "in_progress");
        assert_eq!(parse_status(&json!({"state": "Ready"})).0, "ready");
        assert_eq!(parse_status(&json!({"other": 1})).0, "unknown");
    }

    #[test]
    fn status_from_content_text_wins_and_payload_is_parsed() {
        let inner = json!({"status": "COMPLETED", "video": {"url": "https://cdn/x.mp4"}});
        let result = json!({"status": "queued", "content": [{"text": inner.to_string()}]});
        let (status, payload) = parse_status(&result);
        assert_eq!(status, "completed");
        assert_eq!(payload["video"]["url"], "https://cdn/x.mp4");
    }

    #[test]
    fn urls_come_out_in_discovery_order_without_duplicates() {
        let result = json!({
            "images": [
                {"url": "https://cdn/a.png"},
                {"url": "https://cdn/b.png"},
            ],
            "first": "https://cdn/a.png",
            "detail": {"thumb": "http://cdn/c.jpg"},
            "caption": "not a url",
        });
        assert_eq!(
            extract_download_urls(&result),
            vec![
                "https://cdn/a.png",
                "https://cdn/b.png",
                "http://cdn/c.jpg"
            ]
        );
    }

    #[test]
    fn urls_inside_json_encoded_strings_are_found() {
        let nested = json!({"output": {"url": "https://cdn/deep.mp4"}}).to_string();
        let result = json!({"content": [{"text": nested}]});
        assert_eq!(extract_download_urls(&result), vec!["https://cdn/deep.mp4"]);
    }
}
