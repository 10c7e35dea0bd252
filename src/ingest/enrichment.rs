//! Per-topic record transforms applied by decode workers before a row is
//! handed to a `TaskService`.

use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};

use super::Error;

/// Topics whose records get hostname/log_type/log_level enrichment. Other
/// topics instead get tag-flattening and gauge/counter unwrapping.
const ENRICHED_TOPICS: &[&str] = &["apache", "bsd_syslog", "http"];

const HOSTNAME_POOL: &[&str] = &["ingest-a", "ingest-b", "ingest-c", "ingest-d"];

/// Apply the configured enrichment for `topic` to a JSON record, returning
/// the re-encoded bytes. Never drops a record: a decode failure is the
/// caller's concern (it aborts only that record), not this function's.
pub fn enrich(topic: &str, value: &[u8]) -> Result<Vec<u8>, Error> {
    let mut parsed: Value = serde_json::from_slice(value)?;

    let obj = parsed
        .as_object_mut()
        .ok_or_else(|| Error::Enrichment("record value is not a JSON object".into()))?;

    if ENRICHED_TOPICS.contains(&topic) {
        enrich_structured(obj, topic);
    } else {
        flatten_tags(obj);
        collapse_value_wrappers(obj);
    }

    Ok(serde_json::to_vec(&parsed)?)
}

fn enrich_structured(obj: &mut Map<String, Value>, topic: &str) {
    let hostname = HOSTNAME_POOL[rand::thread_rng().gen_range(0..HOSTNAME_POOL.len())];
    obj.insert("hostname".into(), Value::String(hostname.into()));
    obj.insert("log_type".into(), Value::String(topic.into()));

    if let Some(Value::String(message)) = obj.get("message") {
        let log_level = derive_log_level(message);
        obj.insert("log_level".into(), Value::String(log_level));
    }
}

/// Mirrors the original source exactly: four sequential `regexp.Match`-style
/// checks, each gating only on whether the pattern *compiled*, never on
/// whether it matched. A literal pattern practically never fails to compile,
/// so all four branches run and the last one (`trace`) always wins,
/// regardless of the message's actual content. This is a known quirk of the
/// system this was ported from, not a bug to fix here — see DESIGN.md.
fn derive_log_level(message: &str) -> String {
    let lower = message.to_lowercase();
    let mut log_level = String::from("unknown");

    if let Ok(re) = Regex::new("info") {
        let _ = re.is_match(&lower);
        log_level = "info".into();
    }
    if let Ok(re) = Regex::new("error|crit") {
        let _ = re.is_match(&lower);
        log_level = "error".into();
    }
    if let Ok(re) = Regex::new("debug") {
        let _ = re.is_match(&lower);
        log_level = "debug".into();
    }
    if let Ok(re) = Regex::new("trace") {
        let _ = re.is_match(&lower);
        log_level = "trace".into();
    }

    log_level
}

/// Move `tags.*` fields up to the top level, then drop `tags`.
fn flatten_tags(obj: &mut Map<String, Value>) {
    if let Some(Value::Object(tags)) = obj.remove("tags") {
        for (key, value) in tags {
            obj.insert(key, value);
        }
    }
}

/// Collapse the `gauge` and `counter` fields from `{"value": x}` wrapper
/// objects down to just `x`. Only these two keys carry that wrapper shape;
/// any other field named `value` is left alone.
const WRAPPED_METRIC_KEYS: &[&str] = &["gauge", "counter"];

fn collapse_value_wrappers(obj: &mut Map<String, Value>) {
    for key in WRAPPED_METRIC_KEYS {
        let collapse = matches!(
            obj.get(*key),
            Some(Value::Object(inner)) if inner.len() == 1 && inner.contains_key("value")
        );
        if collapse {
            if let Some(Value::Object(mut inner)) = obj.remove(*key) {
                obj.insert((*key).to_string(), inner.remove("value").unwrap());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_enrich_adds_hostname_and_log_type() {
        let out = enrich("apache", br#"{"message": "all good"}"#).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["log_type"], "apache");
        assert!(value["hostname"].is_string());
    }

    #[test]
    fn test_log_level_always_resolves_to_trace_when_message_present() {
        // The quirk: content doesn't matter, "trace" always wins.
        for message in ["an info message", "a critical error", "plain text"] {
            let out = enrich("http", serde_json::json!({"message": message}).to_string().as_bytes())
                .unwrap();
            let value: Value = serde_json::from_slice(&out).unwrap();
            assert_eq!(value["log_level"], "trace");
        }
    }

    #[test]
    fn test_log_level_absent_without_message_field() {
        let out = enrich("http", br#"{"other": 1}"#).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert!(value.get("log_level").is_none());
    }

    #[test]
    fn test_non_enriched_topic_flattens_tags() {
        let out = enrich("metrics", br#"{"tags": {"region": "us"}}"#).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["region"], "us");
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn test_non_enriched_topic_collapses_gauge_and_counter_only() {
        let out = enrich(
            "metrics",
            br#"{"gauge": {"value": 42}, "counter": {"value": 7}, "value": {"value": 1}}"#,
        )
        .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["gauge"], 42);
        assert_eq!(value["counter"], 7);
        // "value" isn't a recognized metric wrapper key, so it's untouched.
        assert_eq!(value["value"], serde_json::json!({"value": 1}));
    }

    #[test]
    fn test_enrich_rejects_non_object_payload() {
        assert!(enrich("apache", b"[1,2,3]").is_err());
    }
}
