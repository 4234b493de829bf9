// src/ingest/enrich.rs
use metrics::counter;
use serde_json::{Map, Value};

use crate::ingest::classify::string_list;
use crate::ingest::executor::{RequestExecutor, RetryPolicy};
use crate::ingest::providers::clob::ClobProvider;
use crate::ingest::types::{AcceptedMarket, MarketDetail};

/// Best-effort per-market detail lookup. A failed lookup leaves the record
/// as it was; it never turns into a quarantine entry.
pub struct DetailEnricher<'a> {
    provider: &'a ClobProvider,
    executor: RequestExecutor,
}

impl<'a> DetailEnricher<'a> {
    /// Shares the listing transport but always makes a single attempt.
    pub fn new(provider: &'a ClobProvider, executor: &RequestExecutor) -> Self {
        Self {
            provider,
            executor: executor.with_policy(RetryPolicy::single()),
        }
    }

    pub async fn enrich(&self, mut market: AcceptedMarket) -> AcceptedMarket {
        let req = self.provider.detail_request(&market.condition_id);
        let reply = match self.executor.execute(&req).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    market = %market.identifier,
                    condition_id = %market.condition_id,
                    error = %e,
                    "detail lookup failed, keeping listing metadata"
                );
                counter!("ingest_enrich_failures_total").increment(1);
                return market;
            }
        };

        let Some(detail) = parse_detail(&reply.body, &market.condition_id) else {
            tracing::warn!(
                market = %market.identifier,
                "detail response carries no market detail, keeping listing metadata"
            );
            counter!("ingest_enrich_failures_total").increment(1);
            return market;
        };

        let meta = &mut market.metadata;
        if meta.question.is_empty() {
            if let Some(q) = detail.question {
                meta.question = q;
            }
        }
        if meta.description.is_empty() {
            if let Some(d) = detail.description {
                meta.description = d;
            }
        }
        meta.details = Some(detail.detail);
        market
    }
}

const DETAIL_FIELDS: [&str; 6] = [
    "end_date_iso",
    "accepting_orders",
    "tokens",
    "outcomes",
    "question",
    "description",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedDetail {
    pub detail: MarketDetail,
    pub question: Option<String>,
    pub description: Option<String>,
}

/// `None` for anything that is not a detail record of `condition_id`: non-objects,
/// error envelopes, objects with none of the known fields, or a record for a
/// different market.
pub(crate) fn parse_detail(body: &str, condition_id: &str) -> Option<ParsedDetail> {
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                map.insert("data".to_string(), other);
                map
            }
            None => map,
        },
        _ => return None,
    };
    if obj.contains_key("error") {
        return None;
    }
    if !DETAIL_FIELDS.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }
    if let Some(id) = obj.get("condition_id").and_then(Value::as_str) {
        if id.trim() != condition_id {
            return None;
        }
    }

    let text = |k: &str| {
        obj.get(k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(ParsedDetail {
        detail: MarketDetail {
            end_date_iso: text("end_date_iso"),
            accepting_orders: obj.get("accepting_orders").and_then(Value::as_bool),
            outcomes: outcomes_of(&obj),
        },
        question: text("question"),
        description: text("description"),
    })
}

/// CLOB: `tokens[].outcome`. Gamma-style: `outcomes` as an array or as a
/// JSON-encoded array string.
fn outcomes_of(obj: &Map<String, Value>) -> Vec<String> {
    if let Some(Value::Array(tokens)) = obj.get("tokens") {
        let out: Vec<String> = tokens
            .iter()
            .filter_map(|t| t.get("outcome").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if !out.is_empty() {
            return out;
        }
    }
    match obj.get("outcomes") {
        Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded)
            .ok()
            .map(|v| string_list(Some(&v)))
            .unwrap_or_default(),
        other => string_list(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_clob_detail() {
        let body = json!({
            "condition_id": "0xabc",
            "question": "Will it rain?",
            "end_date_iso": "2025-01-01T00:00:00Z",
            "accepting_orders": true,
            "tokens": [{"outcome": "Yes"}, {"outcome": "No"}]
        })
        .to_string();
        let d = parse_detail(&body, "0xabc").unwrap();
        assert_eq!(d.detail.outcomes, vec!["Yes", "No"]);
        assert_eq!(d.detail.accepting_orders, Some(true));
        assert_eq!(d.question.as_deref(), Some("Will it rain?"));
        assert_eq!(d.description, None);
    }

    #[test]
    fn parses_wrapped_and_encoded_outcomes() {
        let body = json!({"data": {"outcomes": "[\"Up\",\"Down\"]"}}).to_string();
        let d = parse_detail(&body, "0xabc").unwrap();
        assert_eq!(d.detail.outcomes, vec!["Up", "Down"]);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(parse_detail("[]", "0xabc").is_none());
        assert!(parse_detail("not json", "0xabc").is_none());
    }

    #[test]
    fn rejects_error_and_foreign_bodies() {
        let err = json!({"error": "market not found"}).to_string();
        assert!(parse_detail(&err, "0xabc").is_none());
        let empty = json!({"data": {}}).to_string();
        assert!(parse_detail(&empty, "0xabc").is_none());
        let other = json!({"condition_id": "0xdef", "question": "Other?"}).to_string();
        assert!(parse_detail(&other, "0xabc").is_none());
    }
}
