// src/config/provider.rs
use std::env;
use std::fmt;

use reqwest::Url;

use crate::error::IngestError;

pub const DEFAULT_API_URL: &str = "https://clob.polymarket.com";

/// API credentials for the CLOB provider.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Where the provider lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: Url,
    pub credentials: ApiCredentials,
}

impl ProviderConfig {
    pub fn new(api_url: &str, credentials: ApiCredentials) -> Result<Self, IngestError> {
        let trimmed = api_url.trim().trim_end_matches('/');
        let api_url = Url::parse(trimmed)
            .map_err(|e| IngestError::Config(format!("invalid CLOB_API_URL {trimmed:?}: {e}")))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(IngestError::Config(format!(
                "CLOB_API_URL must be http(s), got {}",
                api_url.scheme()
            )));
        }
        for (name, value) in [
            ("CLOB_API_KEY", &credentials.api_key),
            ("CLOB_SECRET", &credentials.secret),
            ("CLOB_PASS_PHRASE", &credentials.passphrase),
        ] {
            if value.trim().is_empty() {
                return Err(IngestError::Config(format!("{name} is empty")));
            }
        }
        Ok(Self {
            api_url,
            credentials,
        })
    }

    /// Read `CLOB_API_URL` (optional), `CLOB_API_KEY`, `CLOB_SECRET` and
    /// `CLOB_PASS_PHRASE` from the environment.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut missing = Vec::new();
        let mut required = |key: &'static str| match env::var(key) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                missing.push(key);
                String::new()
            }
        };
        let credentials = ApiCredentials {
            api_key: required("CLOB_API_KEY"),
            secret: required("CLOB_SECRET"),
            passphrase: required("CLOB_PASS_PHRASE"),
        };
        if !missing.is_empty() {
            return Err(IngestError::Config(format!(
                "API credentials not fully set, missing: {}",
                missing.join(", ")
            )));
        }
        let api_url = env::var("CLOB_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Self::new(&api_url, credentials)
    }

    /// `{api_url}/{segments...}` with each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials {
            api_key: "k".into(),
            secret: "s".into(),
            passphrase: "p".into(),
        }
    }

    #[test]
    fn endpoint_joins_segments() {
        let cfg = ProviderConfig::new("https://clob.example.test/", creds()).unwrap();
        assert_eq!(
            cfg.endpoint(&["markets", "0xabc"]).as_str(),
            "https://clob.example.test/markets/0xabc"
        );
    }

    #[test]
    fn rejects_bad_url_and_blank_secret() {
        assert!(matches!(
            ProviderConfig::new("not a url", creds()),
            Err(IngestError::Config(_))
        ));
        let mut c = creds();
        c.secret = "  ".into();
        assert!(matches!(
            ProviderConfig::new("https://x.test", c),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let out = format!("{:?}", creds());
        assert!(!out.contains("\"k\""));
        assert!(out.contains("redacted"));
    }
}
