// src/ingest/types.rs
use serde::{Deserialize, Serialize};

/// One listing as returned by the provider. No schema is assumed.
pub type RawItem = serde_json::Value;

/// Canonical projection of a market kept in the accepted output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub question: String,
    pub description: String,
    pub status: String,
    pub tags: Vec<String>,
    /// Present only when the detail lookup succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<MarketDetail>,
}

/// Fields merged in from the per-market detail endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date_iso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepting_orders: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMarket {
    /// Display identifier (slug, possibly synthesized). Keys the outputs.
    pub identifier: String,
    /// Provider key used for detail lookups.
    pub condition_id: String,
    pub metadata: MarketMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Archived,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    MissingConditionId,
    InvalidItemShape,
}

impl QuarantineReason {
    pub fn code(&self) -> &'static str {
        match self {
            QuarantineReason::MissingConditionId => "missing_condition_id",
            QuarantineReason::InvalidItemShape => "invalid_item_shape",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineError {
    pub reason: QuarantineReason,
    /// Best-effort identifier (slug) recovered from the item, if any.
    pub identifier: Option<String>,
    pub detail: String,
}

/// Outcome of classifying one raw item.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedRecord {
    Accepted(AcceptedMarket),
    Skipped {
        identifier: Option<String>,
        reason: SkipReason,
    },
    Quarantined {
        raw: RawItem,
        error: QuarantineError,
    },
}

/// Position in the provider's listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Initial,
    Next(String),
    End,
}

impl Cursor {
    /// Interpret a `next_cursor` value; absent, empty and `terminal` all end
    /// the listing.
    pub fn from_token(token: Option<&str>, terminal: &str) -> Self {
        match token.map(str::trim) {
            None | Some("") => Cursor::End,
            Some(t) if !terminal.is_empty() && t == terminal => Cursor::End,
            Some(t) => Cursor::Next(t.to_string()),
        }
    }

    /// Query value for the next request; `None` on the first page.
    pub fn as_param(&self) -> Option<&str> {
        match self {
            Cursor::Next(t) => Some(t.as_str()),
            Cursor::Initial | Cursor::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Cursor::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_terminal_forms() {
        assert_eq!(Cursor::from_token(None, "LTE="), Cursor::End);
        assert_eq!(Cursor::from_token(Some(""), "LTE="), Cursor::End);
        assert_eq!(Cursor::from_token(Some("LTE="), "LTE="), Cursor::End);
        assert_eq!(
            Cursor::from_token(Some("MTAw"), "LTE="),
            Cursor::Next("MTAw".into())
        );
        assert_eq!(Cursor::Initial.as_param(), None);
    }

    #[test]
    fn metadata_omits_missing_details() {
        let m = MarketMetadata {
            question: "Q?".into(),
            description: String::new(),
            status: "active".into(),
            tags: vec![],
            details: None,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert!(v.get("details").is_none());
        assert_eq!(v["tags"], serde_json::json!([]));
    }
}
