//! HTTP transport for the Azure DevOps REST API.
//!
//! This module executes single request/response cycles. It knows nothing
//! about work items: callers hand it a fully built `HttpRequest` and get the
//! raw status and body back. Idempotent requests are retried on transient
//! failures; writes never are.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, ServiceError};

/// REST API version sent with every call.
pub const API_VERSION: &str = "7.1";

/// Content type of work item write bodies.
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Content type of plain JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for idempotent requests.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// A request ready to be sent.
#[derive(Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Body content type.
    pub content_type: Option<&'static str>,
    /// Serialized body.
    pub body: Option<String>,
    /// `Authorization` header value.
    pub authorization: Option<String>,
    /// Whether the transport may retry this request.
    pub idempotent: bool,
}

impl HttpRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        let idempotent = method == Method::GET;
        Self {
            method,
            url: url.into(),
            content_type: None,
            body: None,
            authorization: None,
            idempotent,
        }
    }

    /// A GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// A POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// A PATCH request.
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// A DELETE request.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Attach a JSON Patch body.
    pub fn with_json_patch<T: Serialize + ?Sized>(self, operations: &T) -> Result<Self> {
        self.with_body(JSON_PATCH_CONTENT_TYPE, operations)
    }

    /// Attach a JSON body.
    pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        self.with_body(JSON_CONTENT_TYPE, body)
    }

    fn with_body<T: Serialize + ?Sized>(
        mut self,
        content_type: &'static str,
        body: &T,
    ) -> Result<Self> {
        let text = serde_json::to_string(body).map_err(|e| {
            ServiceError::validation(format!("cannot serialize request body: {}", e))
        })?;
        self.content_type = Some(content_type);
        self.body = Some(text);
        Ok(self)
    }

    /// Set the `Authorization` header value.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Mark a non-GET request as safe to retry (e.g. a WIQL query).
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("body", &self.body)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("idempotent", &self.idempotent)
            .finish()
    }
}

/// A raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes one HTTP request/response cycle.
///
/// Any HTTP status is an `Ok` response; only network failures are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and read the full body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// URL builder for one connection's project.
#[derive(Debug, Clone)]
pub struct Endpoints {
    project_url: String,
}

impl Endpoints {
    /// Endpoints for the connection's organization and project.
    pub fn new(connection: &ConnectionConfig) -> Self {
        Self {
            project_url: connection.project_url(),
        }
    }

    /// `POST` target for creating an item of `work_item_type`.
    pub fn create(&self, work_item_type: &str) -> String {
        format!(
            "{}/_apis/wit/workitems/${}?api-version={}",
            self.project_url,
            urlencoding::encode(work_item_type),
            API_VERSION
        )
    }

    /// `PATCH`/`DELETE` target for one item.
    pub fn item(&self, id: i64) -> String {
        format!(
            "{}/_apis/wit/workitems/{}?api-version={}",
            self.project_url, id, API_VERSION
        )
    }

    /// WIQL query target returning at most `top` ids.
    pub fn wiql(&self, top: u32) -> String {
        format!(
            "{}/_apis/wit/wiql?$top={}&api-version={}",
            self.project_url, top, API_VERSION
        )
    }

    /// Batch fetch target for the given ids.
    pub fn batch(&self, ids: &[i64]) -> String {
        let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
        format!(
            "{}/_apis/wit/workitems?ids={}&api-version={}",
            self.project_url,
            ids.join(","),
            API_VERSION
        )
    }
}

/// `Transport` backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a hard per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("workbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Transport(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn execute_once(
        &self,
        request: &HttpRequest,
    ) -> std::result::Result<HttpResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(header::ACCEPT, JSON_CONTENT_TYPE);

        if let Some(auth) = &request.authorization {
            builder = builder.header(header::AUTHORIZATION, auth.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, request.content_type.unwrap_or(JSON_CONTENT_TYPE))
                .body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            debug!("Error response body: {}", body);
        }
        Ok(HttpResponse { status, body })
    }

    /// Whether a response status is worth retrying.
    fn is_retryable_status(status: u16) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(&status)
    }

    /// Whether a network error is worth retrying. Timeouts never are.
    fn is_retryable_error(error: &reqwest::Error) -> bool {
        !error.is_timeout() && (error.is_connect() || error.is_request())
    }

    /// Calculate retry delay with exponential backoff.
    fn calculate_retry_delay(attempt: u32) -> u64 {
        RETRY_DELAY_MS * 2u64.pow(attempt - 1)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let max_attempts = if request.idempotent { MAX_RETRIES } else { 1 };
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!("Request attempt {}/{}", attempts, max_attempts);

            match self.execute_once(&request).await {
                Ok(response)
                    if Self::is_retryable_status(response.status) && attempts < max_attempts =>
                {
                    let delay = Self::calculate_retry_delay(attempts);
                    warn!(
                        "HTTP {} (attempt {}), retrying in {}ms",
                        response.status, attempts, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Ok(response) => return Ok(response),
                Err(e) if Self::is_retryable_error(&e) && attempts < max_attempts => {
                    let delay = Self::calculate_retry_delay(attempts);
                    warn!(
                        "Request failed (attempt {}), retrying in {}ms: {}",
                        attempts, delay, e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
