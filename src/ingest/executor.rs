//! Bounded retry with exponential backoff around a [`Transport`].
//!
//! Every outbound call goes through [`RequestExecutor::execute`]. Transport
//! failures and 5xx responses are retried; 429 honours `Retry-After` but
//! still spends an attempt, so a misbehaving provider cannot block a run
//! forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::config::RetrySettings;
use crate::error::FetchError;
use crate::ingest::transport::{Reply, RequestSpec, Transport};

const ERROR_BODY_PREVIEW: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// One attempt, no retry.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`:
    /// `base_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_retry_after: Duration::from_secs(s.max_retry_after_secs),
        }
    }
}

#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Same transport, different retry policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn execute(&self, req: &RequestSpec) -> Result<Reply, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.transport.send(req).await {
                Ok(reply) if reply.is_success() => return Ok(reply),
                Ok(reply) => reply_error(reply),
                Err(e) => e,
            };
            attempt += 1;

            if !err.is_transient() {
                tracing::warn!(url = %req.url, error = %err, "request failed (not retried)");
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                tracing::warn!(url = %req.url, attempts = attempt, error = %err, "retries exhausted");
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = match &err {
                FetchError::RateLimited {
                    retry_after: Some(d),
                } => (*d).min(self.policy.max_retry_after),
                _ => self.policy.backoff(attempt - 1),
            };
            counter!("ingest_fetch_retries_total").increment(1);
            tracing::warn!(
                url = %req.url,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn reply_error(reply: Reply) -> FetchError {
    if reply.status == 429 {
        return FetchError::RateLimited {
            retry_after: reply
                .retry_after
                .as_deref()
                .and_then(|v| parse_retry_after(v, Utc::now())),
        };
    }
    FetchError::Http {
        status: reply.status,
        body: reply.body.chars().take(ERROR_BODY_PREVIEW).collect(),
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let v = value.trim();
    if let Ok(secs) = v.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(v).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::transport::ScriptedTransport;
    use chrono::TimeZone;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_retry_after: Duration::from_millis(5),
        }
    }

    fn req() -> RequestSpec {
        RequestSpec::get("https://clob.example.test/markets".parse().unwrap())
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(0), Duration::from_secs(2));
        assert_eq!(p.backoff(1), Duration::from_secs(4));
        assert_eq!(p.backoff(2), Duration::from_secs(8));
        // no overflow panic on absurd attempt numbers
        let _ = p.backoff(64);
    }

    #[test]
    fn retry_after_seconds_and_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 50).unwrap();
        assert_eq!(parse_retry_after(" 7 ", now), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test]
    async fn recovers_after_server_errors() {
        let t = Arc::new(ScriptedTransport::sequence(vec![
            Ok(Reply::status(503)),
            Err(FetchError::Network("reset".into())),
            Ok(Reply::json(200, &serde_json::json!({"ok": true}))),
        ]));
        let ex = RequestExecutor::new(t.clone(), fast());
        let reply = ex.execute(&req()).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(t.request_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_cause() {
        let t = Arc::new(ScriptedTransport::from_fn(|_| Ok(Reply::status(502))));
        let ex = RequestExecutor::new(t.clone(), fast());
        let err = ex.execute(&req()).await.unwrap_err();
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Http { status: 502, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.request_count(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let t = Arc::new(ScriptedTransport::from_fn(|_| Ok(Reply::status(404))));
        let ex = RequestExecutor::new(t.clone(), fast());
        let err = ex.execute(&req()).await.unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));
        assert_eq!(t.request_count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_uses_the_same_budget() {
        let t = Arc::new(ScriptedTransport::from_fn(|_| {
            Ok(Reply::rate_limited(Some("3600")))
        }));
        let ex = RequestExecutor::new(t.clone(), fast());
        let started = std::time::Instant::now();
        let err = ex.execute(&req()).await.unwrap_err();
        assert!(matches!(err.root(), FetchError::RateLimited { .. }));
        assert_eq!(t.request_count(), 3);
        // Retry-After of an hour is capped by max_retry_after
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retry_after_header_replaces_backoff() {
        let t = Arc::new(ScriptedTransport::sequence(vec![
            Ok(Reply::rate_limited(Some("0"))),
            Ok(Reply::rate_limited(Some("0"))),
            Ok(Reply::json(200, &serde_json::json!({"ok": true}))),
        ]));
        // the backoff schedule alone would wait 30s + 60s
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(60),
        };
        let ex = RequestExecutor::new(t.clone(), policy);
        let started = std::time::Instant::now();
        let reply = ex.execute(&req()).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(t.request_count(), 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn rate_limit_without_header_follows_backoff() {
        let t = Arc::new(ScriptedTransport::sequence(vec![
            Ok(Reply::rate_limited(None)),
            Ok(Reply::rate_limited(None)),
            Ok(Reply::json(200, &serde_json::json!({"ok": true}))),
        ]));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(40),
            max_retry_after: Duration::from_millis(1),
        };
        let ex = RequestExecutor::new(t.clone(), policy);
        let started = std::time::Instant::now();
        ex.execute(&req()).await.unwrap();
        // 40ms then 80ms; the Retry-After cap does not apply
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(t.request_count(), 3);
    }

    #[tokio::test]
    async fn single_policy_makes_one_attempt() {
        let t = Arc::new(ScriptedTransport::from_fn(|_| Ok(Reply::status(500))));
        let ex = RequestExecutor::new(t.clone(), fast()).with_policy(RetryPolicy::single());
        let err = ex.execute(&req()).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 1, .. }));
        assert_eq!(t.request_count(), 1);
    }
}
