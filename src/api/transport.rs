use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::error::{strip_status_prefix, ApiError};

/// Response body handed out lazily, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// Which backend a path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Api,
    Jobs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub service: Service,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            service: Service::Api,
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn on_jobs(mut self) -> Self {
        self.service = Service::Jobs;
        self
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the parsed JSON body.
    async fn request(&self, token: &str, request: ApiRequest) -> Result<Value, ApiError>;

    /// Send a request and return the body as a byte stream.
    async fn request_stream(&self, token: &str, request: ApiRequest)
        -> Result<ByteStream, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// `reqwest` backed transport for the API and jobs services.
pub struct HttpTransport {
    client: Client,
    api_base: String,
    jobs_base: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(api_base: &str, jobs_base: &str, timeout: Duration) -> Result<Self, ApiError> {
        // No client-wide timeout: it would also cap how long a body may stream.
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: normalize_base(api_base)?,
            jobs_base: normalize_base(jobs_base)?,
            timeout,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let base = match request.service {
            Service::Api => &self.api_base,
            Service::Jobs => &self.jobs_base,
        };
        let mut url = Url::parse(&format!("{}{}", base, request.path))
            .map_err(|e| ApiError::InvalidRequest(format!("Bad path {}: {}", request.path, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    /// `total` bounds the whole exchange, body included. Streams pass `None`.
    async fn send(
        &self,
        token: &str,
        request: &ApiRequest,
        total: Option<Duration>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url_for(request)?;
        tracing::debug!("{} {}", request.method.as_str(), url);

        let mut req = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        req = req.header("Authorization", format!("Bearer {}", token));
        if let Some(total) = total {
            req = req.timeout(total);
        }
        if let Some(body) = &request.body {
            req = req.header("content-type", "application/json").json(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(server_error(status, &body));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, token: &str, request: ApiRequest) -> Result<Value, ApiError> {
        let response = self.send(token, &request, Some(self.timeout)).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn request_stream(
        &self,
        token: &str,
        request: ApiRequest,
    ) -> Result<ByteStream, ApiError> {
        let response = self.send(token, &request, None).await?;
        Ok(idle_limited(response.bytes_stream(), self.timeout))
    }
}

/// Fail a body stream once no chunk has arrived for `idle`. A body that keeps
/// producing chunks may take as long as it needs.
fn idle_limited<S>(body: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let stream = futures::stream::unfold(Some(Box::pin(body)), move |state| async move {
        let mut body = match state {
            Some(body) => body,
            None => return None,
        };
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(ApiError::StreamRead(e.to_string())), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(ApiError::StreamRead(format!(
                    "no data received for {} ms",
                    idle.as_millis()
                ))),
                None,
            )),
        }
    });
    Box::pin(stream)
}

fn normalize_base(base: &str) -> Result<String, ApiError> {
    let parsed = Url::parse(base)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid endpoint {}: {}", base, e)))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn server_error(status: reqwest::StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .map(|m| strip_status_prefix(&m).to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });

    ApiError::Server {
        status: status.as_u16(),
        message,
    }
}
