// src/ingest/classify.rs
use serde_json::{Map, Value};

use crate::ingest::types::{
    AcceptedMarket, ClassifiedRecord, MarketMetadata, QuarantineError, QuarantineReason, RawItem,
    SkipReason,
};

pub const UNKNOWN_STATUS: &str = "Unknown";
const SLUG_PREFIX: &str = "market_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyPolicy {
    pub skip_archived: bool,
}

/// Decide what happens to one raw listing item. Pure: no I/O, no clock, and
/// never fails; missing optional fields fall back to defaults.
pub fn classify(item: &RawItem, policy: &ClassifyPolicy) -> ClassifiedRecord {
    let Some(obj) = item.as_object() else {
        return ClassifiedRecord::Quarantined {
            raw: item.clone(),
            error: QuarantineError {
                reason: QuarantineReason::InvalidItemShape,
                identifier: None,
                detail: format!("expected an object, got {}", shape_name(item)),
            },
        };
    };

    let slug = non_blank_str(obj, "market_slug");
    let Some(condition_id) = non_blank_str(obj, "condition_id") else {
        let detail = match obj.get("condition_id") {
            None | Some(Value::Null) => "condition_id is absent".to_string(),
            Some(Value::String(_)) => "condition_id is blank".to_string(),
            Some(other) => format!("condition_id is {}, not a string", shape_name(other)),
        };
        return ClassifiedRecord::Quarantined {
            raw: item.clone(),
            error: QuarantineError {
                reason: QuarantineReason::MissingConditionId,
                identifier: slug.map(str::to_string),
                detail,
            },
        };
    };

    let identifier = match slug {
        Some(s) => s.to_string(),
        None => format!("{SLUG_PREFIX}{condition_id}"),
    };

    if policy.skip_archived && obj.get("archived").and_then(Value::as_bool) == Some(true) {
        return ClassifiedRecord::Skipped {
            identifier: Some(identifier),
            reason: SkipReason::Archived,
        };
    }

    ClassifiedRecord::Accepted(AcceptedMarket {
        identifier,
        condition_id: condition_id.to_string(),
        metadata: project_metadata(obj),
    })
}

fn project_metadata(obj: &Map<String, Value>) -> MarketMetadata {
    MarketMetadata {
        question: string_or_empty(obj, "question"),
        description: string_or_empty(obj, "description"),
        status: status_of(obj),
        tags: string_list(obj.get("tags")),
        details: None,
    }
}

/// Explicit `status` wins; otherwise derive from the CLOB `closed`/`active` flags.
fn status_of(obj: &Map<String, Value>) -> String {
    if let Some(s) = non_blank_str(obj, "status") {
        return s.to_string();
    }
    let flag = |k: &str| obj.get(k).and_then(Value::as_bool);
    match (flag("closed"), flag("active")) {
        (Some(true), _) => "closed".to_string(),
        (_, Some(true)) => "active".to_string(),
        (_, Some(false)) => "inactive".to_string(),
        _ => UNKNOWN_STATUS.to_string(),
    }
}

fn non_blank_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn string_or_empty(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn shape_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accept(v: Value) -> AcceptedMarket {
        match classify(&v, &ClassifyPolicy::default()) {
            ClassifiedRecord::Accepted(m) => m,
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn full_item_is_projected() {
        let m = accept(json!({
            "condition_id": "0xabc",
            "market_slug": "will-it-rain",
            "question": "Will it rain?",
            "description": "Resolves YES if...",
            "status": "open",
            "tags": ["Weather", 7, "Climate"],
            "volume": 123
        }));
        assert_eq!(m.identifier, "will-it-rain");
        assert_eq!(m.condition_id, "0xabc");
        assert_eq!(m.metadata.status, "open");
        assert_eq!(m.metadata.tags, vec!["Weather", "Climate"]);
    }

    #[test]
    fn missing_slug_is_synthesized() {
        let m = accept(json!({"condition_id": "0xabc"}));
        assert_eq!(m.identifier, "market_0xabc");
        assert_eq!(m.metadata.question, "");
        assert_eq!(m.metadata.description, "");
        assert!(m.metadata.tags.is_empty());
        assert_eq!(m.metadata.status, UNKNOWN_STATUS);
    }

    #[test]
    fn status_derived_from_flags() {
        assert_eq!(accept(json!({"condition_id": "a", "active": true, "closed": true})).metadata.status, "closed");
        assert_eq!(accept(json!({"condition_id": "a", "active": true, "closed": false})).metadata.status, "active");
        assert_eq!(accept(json!({"condition_id": "a", "active": false})).metadata.status, "inactive");
    }

    #[test]
    fn wrong_types_fall_back_to_defaults() {
        let m = accept(json!({"condition_id": "0x1", "question": 5, "tags": "x", "market_slug": 9}));
        assert_eq!(m.metadata.question, "");
        assert!(m.metadata.tags.is_empty());
        assert_eq!(m.identifier, "market_0x1");
    }

    #[test]
    fn missing_condition_id_is_quarantined() {
        for v in [
            json!({"market_slug": "s"}),
            json!({"condition_id": null}),
            json!({"condition_id": "   "}),
            json!({"condition_id": 42}),
            json!({}),
        ] {
            match classify(&v, &ClassifyPolicy::default()) {
                ClassifiedRecord::Quarantined { raw, error } => {
                    assert_eq!(error.reason, QuarantineReason::MissingConditionId);
                    assert_eq!(raw, v);
                }
                other => panic!("expected quarantine for {v}, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_objects_are_invalid_shape() {
        for v in [json!("str"), json!(1), json!(null), json!([1, 2])] {
            let rec = classify(&v, &ClassifyPolicy::default());
            assert!(matches!(
                rec,
                ClassifiedRecord::Quarantined { ref error, .. }
                    if error.reason == QuarantineReason::InvalidItemShape
            ));
        }
    }

    #[test]
    fn archived_skipped_only_when_asked() {
        let v = json!({"condition_id": "0x1", "market_slug": "old", "archived": true});
        assert!(matches!(
            classify(&v, &ClassifyPolicy::default()),
            ClassifiedRecord::Accepted(_)
        ));
        let rec = classify(&v, &ClassifyPolicy { skip_archived: true });
        assert_eq!(
            rec,
            ClassifiedRecord::Skipped {
                identifier: Some("old".into()),
                reason: SkipReason::Archived
            }
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let v = json!({"condition_id": "0x9", "tags": ["a"], "question": "q"});
        let p = ClassifyPolicy::default();
        assert_eq!(classify(&v, &p), classify(&v, &p));
    }
}
