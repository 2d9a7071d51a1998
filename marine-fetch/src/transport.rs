use crate::error::FetchError;
use ::utils::surf_logging::SurfLogging;
use async_trait::async_trait;
use getset::Getters;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use surf::Client;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl From<Method> for surf::http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => surf::http::Method::Get,
            Method::Post => surf::http::Method::Post,
            Method::Put => surf::http::Method::Put,
            Method::Patch => surf::http::Method::Patch,
            Method::Delete => surf::http::Method::Delete,
            Method::Head => surf::http::Method::Head,
        }
    }
}

/// Everything needed to issue one HTTP request.
#[derive(Debug, Clone, PartialEq, Default, Getters)]
#[get = "pub"]
pub struct FetchRequest {
    url: String,
    method: Method,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The request URL with the extra query parameters appended.
    pub fn full_url(&self) -> Result<surf::Url, FetchError> {
        let mut url = surf::Url::parse(&self.url)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", self.url, e)))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Getters)]
pub struct RawResponse {
    status: u16,
    #[get = "pub"]
    headers: Vec<(String, String)>,
    #[get = "pub"]
    body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns a non-2xx response into [`FetchError::Http`], keeping the body.
    pub fn error_for_status(self, url: &str) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Http {
                status: self.status,
                url: url.to_string(),
                body: Arc::new(self.body),
            })
        }
    }
}

/// One attempt at one HTTP request. Non-2xx statuses are returned as
/// responses, only transport-level failures are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, FetchError>;
}

/// Runs a single attempt under a hard deadline.
///
/// When the deadline elapses the in-flight transport future is dropped,
/// which cancels the underlying connection, and [`FetchError::Timeout`] is
/// returned. The timer is released as soon as either side settles.
pub async fn send_with_timeout(
    transport: &dyn Transport,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<RawResponse, FetchError> {
    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => {
            log::debug!("Request to {} exceeded {:?}", request.url(), timeout);
            Err(FetchError::Timeout {
                url: request.url().clone(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

/// [`Transport`] backed by a surf client.
#[derive(Clone)]
pub struct SurfTransport {
    http: Client,
}

impl Default for SurfTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfTransport {
    pub fn new() -> Self {
        Self {
            http: Client::new().with(SurfLogging),
        }
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for SurfTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        let url = request.full_url()?;
        let mut builder = surf::RequestBuilder::new((*request.method()).into(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder
                .body_json(body)
                .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        }

        let mut response = self
            .http
            .send(builder)
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = u16::from(response.status());
        let headers = response
            .iter()
            .map(|(name, values)| (name.to_string(), values.last().as_str().to_string()))
            .collect();
        let body = response
            .body_bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(RawResponse::new(status, headers, body))
    }
}
