// ABOUTME: In-process HTTP helpers for exercising the Axum router in tests
// ABOUTME: Builds requests with bearer tokens and decodes JSON and SSE turn event bodies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;

/// Request builder executed against a router with `oneshot`
pub struct AxumTestRequest {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl AxumTestRequest {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    #[allow(dead_code)]
    pub fn put(uri: &str) -> Self {
        Self::new(Method::PUT, uri)
    }

    #[allow(dead_code)]
    pub fn delete(uri: &str) -> Self {
        Self::new(Method::DELETE, uri)
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Attach `Authorization: Bearer {token}`
    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {token}");
        self.header(header::AUTHORIZATION.as_str(), &value)
    }

    pub fn json<T: Serialize>(mut self, data: &T) -> Self {
        self.body = Some(serde_json::to_string(data).expect("Failed to serialize JSON"));
        self.headers.push((
            header::CONTENT_TYPE.as_str().to_owned(),
            "application/json".to_owned(),
        ));
        self
    }

    /// Execute the request and read the whole body
    ///
    /// Turn event streams end once the turn is finished, so SSE bodies are
    /// read to completion as well.
    pub async fn send(self, app: Router) -> AxumTestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (key, value) in self.headers {
            builder = builder.header(key, value);
        }
        let request = builder
            .body(Body::from(self.body.unwrap_or_default()))
            .expect("Failed to build request");

        let response = app
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        AxumTestResponse::from_response(response).await
    }
}

/// Status, headers of interest and body of a finished response
pub struct AxumTestResponse {
    status: StatusCode,
    content_type: Option<String>,
    request_id: Option<String>,
    body: Vec<u8>,
}

impl AxumTestResponse {
    async fn from_response(response: Response<Body>) -> Self {
        let status = response.status();
        let header_value = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let content_type = header_value(header::CONTENT_TYPE.as_str());
        let request_id = header_value("x-request-id");
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body")
            .to_vec();
        Self {
            status,
            content_type,
            request_id,
            body,
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        self.status
    }

    #[allow(dead_code)]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[allow(dead_code)]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to deserialize JSON response")
    }

    #[allow(dead_code)]
    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("Failed to decode response as UTF-8")
    }

    /// Decode every `data:` line of an event stream body as JSON
    #[allow(dead_code)]
    pub fn sse_events(&self) -> Vec<Value> {
        self.text()
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).expect("SSE data is not JSON"))
            .collect()
    }

    #[allow(dead_code)]
    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {expected}, got {}: {}",
            self.status,
            String::from_utf8_lossy(&self.body)
        );
        self
    }
}
