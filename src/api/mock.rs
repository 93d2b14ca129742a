//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use super::error::ApiError;
use super::transport::{ApiRequest, ByteStream, Method, Transport};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub token: String,
    pub request: ApiRequest,
}

enum Scripted {
    Json(Result<Value, ApiError>),
    Stream(Result<Vec<Result<Bytes, ApiError>>, ApiError>),
}

#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: Method, path: &str, scripted: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(scripted);
    }

    pub fn respond(&self, method: Method, path: &str, body: Value) {
        self.push(method, path, Scripted::Json(Ok(body)));
    }

    pub fn fail(&self, method: Method, path: &str, error: ApiError) {
        self.push(method, path, Scripted::Json(Err(error)));
    }

    pub fn stream(&self, method: Method, path: &str, chunks: Vec<Result<Vec<u8>, ApiError>>) {
        let chunks = chunks
            .into_iter()
            .map(|c| c.map(Bytes::from))
            .collect();
        self.push(method, path, Scripted::Stream(Ok(chunks)));
    }

    pub fn fail_stream(&self, method: Method, path: &str, error: ApiError) {
        self.push(method, path, Scripted::Stream(Err(error)));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(method, path)` of every call, in order.
    pub fn call_paths(&self) -> Vec<(Method, String)> {
        self.calls()
            .into_iter()
            .map(|c| (c.request.method, c.request.path))
            .collect()
    }

    fn next(&self, token: &str, request: ApiRequest) -> Option<Scripted> {
        let key = (request.method, request.path.clone());
        self.calls.lock().unwrap().push(RecordedCall {
            token: token.to_string(),
            request,
        });
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
    }
}

fn unscripted(request: &ApiRequest) -> ApiError {
    ApiError::Network(format!(
        "no scripted response for {} {}",
        request.method.as_str(),
        request.path
    ))
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, token: &str, request: ApiRequest) -> Result<Value, ApiError> {
        let missing = unscripted(&request);
        match self.next(token, request) {
            Some(Scripted::Json(result)) => result,
            _ => Err(missing),
        }
    }

    async fn request_stream(
        &self,
        token: &str,
        request: ApiRequest,
    ) -> Result<ByteStream, ApiError> {
        let missing = unscripted(&request);
        match self.next(token, request) {
            Some(Scripted::Stream(Ok(chunks))) => Ok(Box::pin(futures::stream::iter(chunks))),
            Some(Scripted::Stream(Err(e))) => Err(e),
            _ => Err(missing),
        }
    }
}
