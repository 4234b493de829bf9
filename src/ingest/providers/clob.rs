// src/ingest/providers/clob.rs
//! Polymarket CLOB endpoints: request construction and envelope parsing.

use serde_json::Value;

use crate::config::{EnvelopeSettings, ProviderConfig};
use crate::ingest::transport::RequestSpec;
use crate::ingest::types::{Cursor, RawItem};

/// Container key used by older listing responses.
const LEGACY_ITEMS_FIELD: &str = "markets";

/// One decoded listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<RawItem>,
    pub next: Cursor,
}

pub struct ClobProvider {
    config: ProviderConfig,
    envelope: EnvelopeSettings,
}

impl ClobProvider {
    pub fn new(config: ProviderConfig, envelope: EnvelopeSettings) -> Self {
        Self { config, envelope }
    }

    pub fn name(&self) -> &'static str {
        "clob"
    }

    fn authed(&self, req: RequestSpec) -> RequestSpec {
        let creds = &self.config.credentials;
        req.header("Content-Type", "application/json")
            .header("X-API-KEY", creds.api_key.as_str())
            .header("X-API-SECRET", creds.secret.as_str())
            .header("X-API-PASSPHRASE", creds.passphrase.as_str())
    }

    /// `GET /markets`, with the cursor parameter from the second page on.
    /// `limit` is a page-size hint; the provider may return fewer or more.
    pub fn listing_request(&self, cursor: &Cursor, limit: usize) -> RequestSpec {
        let mut req = self
            .authed(RequestSpec::get(self.config.endpoint(&["markets"])))
            .query("limit", limit.to_string());
        if let Some(token) = cursor.as_param() {
            req = req.query(self.envelope.cursor_field.as_str(), token);
        }
        req
    }

    /// `GET /markets/{condition_id}`.
    pub fn detail_request(&self, condition_id: &str) -> RequestSpec {
        self.authed(RequestSpec::get(
            self.config.endpoint(&["markets", condition_id]),
        ))
    }

    /// Decode a listing body. `Err` carries a description of the schema drift.
    ///
    /// Accepted shapes:
    /// - `{<items_field>: [...], <cursor_field>: "..."}`
    /// - `{"markets": [...]}` (no cursor, single page)
    /// - a bare array (single page)
    /// - any of the above double-encoded as a JSON string
    pub fn parse_page(&self, body: &str) -> Result<Page, String> {
        let mut value: Value =
            serde_json::from_str(body).map_err(|e| format!("body is not JSON: {e}"))?;
        if let Value::String(inner) = &value {
            value = serde_json::from_str(inner)
                .map_err(|e| format!("string body is not JSON: {e}"))?;
        }

        match value {
            Value::Array(items) => Ok(Page {
                items,
                next: Cursor::End,
            }),
            Value::Object(mut map) => {
                let field = self.envelope.items_field.as_str();
                let container = match map.remove(field) {
                    Some(v) => v,
                    None => map
                        .remove(LEGACY_ITEMS_FIELD)
                        .ok_or_else(|| format!("response has no {field:?} field"))?,
                };
                let items = match container {
                    Value::Array(items) => items,
                    other => {
                        return Err(format!("{field:?} is {}, not an array", kind(&other)))
                    }
                };
                let next = Cursor::from_token(
                    map.get(&self.envelope.cursor_field).and_then(Value::as_str),
                    &self.envelope.terminal_cursor,
                );
                Ok(Page { items, next })
            }
            other => Err(format!("unexpected top-level {}", kind(&other))),
        }
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiCredentials;
    use serde_json::json;

    fn provider() -> ClobProvider {
        let cfg = ProviderConfig::new(
            "https://clob.example.test",
            ApiCredentials {
                api_key: "key".into(),
                secret: "sec".into(),
                passphrase: "pass".into(),
            },
        )
        .unwrap();
        ClobProvider::new(cfg, EnvelopeSettings::default())
    }

    #[test]
    fn listing_request_carries_auth_and_cursor() {
        let p = provider();
        let first = p.listing_request(&Cursor::Initial, 500);
        assert_eq!(first.url.as_str(), "https://clob.example.test/markets");
        assert_eq!(first.query_value("limit"), Some("500"));
        assert_eq!(first.query_value("next_cursor"), None);
        assert!(first
            .headers
            .iter()
            .any(|(k, v)| k == "X-API-KEY" && v == "key"));

        let next = p.listing_request(&Cursor::Next("MTAw".into()), 20);
        assert_eq!(next.query_value("next_cursor"), Some("MTAw"));
    }

    #[test]
    fn parses_envelope_and_terminal_cursor() {
        let p = provider();
        let body = json!({"data": [{"a": 1}], "next_cursor": "LTE=", "count": 1}).to_string();
        let page = p.parse_page(&body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next.is_end());
    }

    #[test]
    fn tolerates_legacy_and_bare_shapes() {
        let p = provider();
        let legacy = p.parse_page(r#"{"markets": [{}, {}]}"#).unwrap();
        assert_eq!(legacy.items.len(), 2);
        assert!(legacy.next.is_end());

        let bare = p.parse_page("[1, 2, 3]").unwrap();
        assert_eq!(bare.items.len(), 3);

        let doubled = serde_json::to_string(r#"{"data": [], "next_cursor": ""}"#).unwrap();
        assert!(p.parse_page(&doubled).unwrap().items.is_empty());
    }

    #[test]
    fn drift_is_reported_not_panicked() {
        let p = provider();
        assert!(p.parse_page(r#"{"error": "maintenance"}"#).is_err());
        assert!(p.parse_page(r#"{"data": {"x": 1}}"#).is_err());
        assert!(p.parse_page("<html>").is_err());
        assert!(p.parse_page("42").is_err());
    }
}
