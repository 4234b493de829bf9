// src/ingest/transport.rs
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};

use crate::error::{FetchError, IngestError};

/// Fully formed outbound request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RequestSpec {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response; status interpretation is left to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    /// Raw `Retry-After` header value.
    pub retry_after: Option<String>,
    pub body: String,
}

impl Reply {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }

    pub fn rate_limited(retry_after: Option<&str>) -> Self {
        Self {
            status: 429,
            retry_after: retry_after.map(str::to_string),
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP round-trip. Implementations only report transport failures as
/// errors; every received status comes back as a [`Reply`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: &RequestSpec) -> Result<Reply, FetchError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .user_agent(concat!("market-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: &RequestSpec) -> Result<Reply, FetchError> {
        let mut builder = self.client.request(req.method.clone(), req.url.clone());
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let rsp = builder
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = rsp.status().as_u16();
        let retry_after = rsp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = rsp
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("reading body: {e}")))?;
        Ok(Reply {
            status,
            retry_after,
            body,
        })
    }
}

// --- Test helper ---

type Handler = Box<dyn Fn(&RequestSpec) -> Result<Reply, FetchError> + Send + Sync>;

/// Transport answering from a closure or a fixed queue, recording every
/// request it sees.
pub struct ScriptedTransport {
    handler: Handler,
    pub requests: Mutex<Vec<RequestSpec>>,
}

impl ScriptedTransport {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&RequestSpec) -> Result<Reply, FetchError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(f),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies in order; once exhausted every call fails with a network error.
    pub fn sequence(replies: Vec<Result<Reply, FetchError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::from_fn(move |_| {
            queue
                .lock()
                .expect("scripted queue poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("request log poisoned").len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: &RequestSpec) -> Result<Reply, FetchError> {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(req.clone());
        (self.handler)(req)
    }
}
