//! HTTP client abstraction.
//!
//! All outbound traffic goes through the [`HttpClient`] trait so the
//! authentication flows can be exercised in tests without a network.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

/// Simple HTTP response structure for standardized response handling
#[derive(Debug, Clone)]
pub struct SimpleHttpResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body as text
    pub body: String,
}

impl SimpleHttpResponse {
    /// Parse the response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Check if the response is successful (status code 200-299)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response is a client error (status code 400-499)
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response is a server error (status code 500-599)
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }
}

/// HTTP client trait for abstracting HTTP requests
#[async_trait]
pub trait HttpClient: Send + Sync + Debug {
    /// Send an HTTP request with the specified method, URL, headers, and body
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
    ) -> Result<SimpleHttpResponse>;

    /// Send a GET request
    async fn get(
        &self,
        url: &str,
        headers: Option<HashMap<String, String>>,
    ) -> Result<SimpleHttpResponse> {
        self.request("GET", url, headers, None).await
    }

    /// Send a POST request
    async fn post(
        &self,
        url: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
    ) -> Result<SimpleHttpResponse> {
        self.request("POST", url, headers, body).await
    }
}

/// Implementation of HttpClient using reqwest
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new ReqwestHttpClient
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
    ) -> Result<SimpleHttpResponse> {
        let method = Method::from_str(method.to_uppercase().as_str())?;
        let mut request_builder = self.client.request(method, url);

        if let Some(headers) = headers {
            let mut header_map = HeaderMap::new();
            for (key, value) in headers {
                let header_name = HeaderName::from_str(&key)?;
                let header_value = HeaderValue::from_str(&value)?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        if let Some(body) = body {
            request_builder = request_builder.body(body);
        }

        let response = request_builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(SimpleHttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// A request captured by [`MockHttpClient`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Mock HTTP client for testing.
///
/// Responses are queued per URL and consumed in order; the last queued
/// response for a URL sticks for subsequent requests. Every request is
/// recorded so tests can assert on headers and call counts.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, VecDeque<SimpleHttpResponse>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    latency: Option<Duration>,
}

impl MockHttpClient {
    /// Create a new MockHttpClient
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by the given duration. Useful for holding a call
    /// in flight while concurrent callers pile up behind it.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a response for a URL
    pub async fn add_response(&self, url: &str, response: SimpleHttpResponse) {
        self.responses
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a JSON response for a URL
    pub async fn add_json_response<T: serde::Serialize>(
        &self,
        url: &str,
        status: StatusCode,
        data: &T,
    ) -> Result<()> {
        let body = serde_json::to_string(data)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        );
        self.add_response(
            url,
            SimpleHttpResponse {
                status,
                headers,
                body,
            },
        )
        .await;
        Ok(())
    }

    /// Number of requests made to a URL
    pub async fn calls(&self, url: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    /// All recorded requests, in order
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// Clear queued responses and the request log
    pub async fn clear(&self) {
        self.responses.lock().await.clear();
        self.requests.lock().await.clear();
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
    ) -> Result<SimpleHttpResponse> {
        self.requests.lock().await.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.unwrap_or_default(),
            body,
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut responses = self.responses.lock().await;
        match responses.get_mut(url) {
            Some(queue) if !queue.is_empty() => {
                if queue.len() > 1 {
                    Ok(queue.pop_front().unwrap())
                } else {
                    // Last response sticks
                    Ok(queue.front().unwrap().clone())
                }
            }
            _ => Err(anyhow::anyhow!("No mock response for URL: {}", url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_client_returns_queued_response() {
        let client = MockHttpClient::new();
        client
            .add_response(
                "https://example.com/api",
                SimpleHttpResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: r#"{"name":"test"}"#.to_string(),
                },
            )
            .await;

        let response = client.get("https://example.com/api", None).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let data: serde_json::Value = response.json().unwrap();
        assert_eq!(data["name"], "test");
        assert_eq!(client.calls("https://example.com/api").await, 1);
    }

    #[tokio::test]
    async fn mock_client_consumes_queue_in_order_and_last_sticks() {
        let client = MockHttpClient::new();
        let url = "https://example.com/seq";
        client
            .add_json_response(url, StatusCode::UNAUTHORIZED, &json!({"message": "no"}))
            .await
            .unwrap();
        client
            .add_json_response(url, StatusCode::OK, &json!({"ok": true}))
            .await
            .unwrap();

        assert_eq!(
            client.get(url, None).await.unwrap().status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(client.get(url, None).await.unwrap().status, StatusCode::OK);
        // Last response repeats
        assert_eq!(client.get(url, None).await.unwrap().status, StatusCode::OK);
        assert_eq!(client.calls(url).await, 3);
    }

    #[tokio::test]
    async fn reqwest_client_talks_to_a_real_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body(r#"{"pong":true}"#)
            .create_async()
            .await;

        let client = ReqwestHttpClient::new();
        let url = format!("{}/ping", server.url());
        let response = client.get(&url, None).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let data: serde_json::Value = response.json().unwrap();
        assert_eq!(data["pong"], true);
        mock.assert_async().await;
    }
}
