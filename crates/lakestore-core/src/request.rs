//! The request engine: one uniform invocation pipeline for every REST
//! operation.
//!
//! Each call composes token acquisition, URL building, header assembly
//! (including drained latency telemetry), HTTP execution with a per-attempt
//! timeout, response-header capture, error-envelope parsing, and retry-policy
//! consultation. The policy sleeps its own backoff, so the loop here has no
//! sleep of its own. Retried attempts reuse the same client-request-id with
//! an incrementing `.n` suffix.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header;
use reqwest::Method;
use tracing::{debug, trace};
use uuid::Uuid;

use lakestore_auth::AccessTokenProvider;

use crate::error::{surface_error, RemoteCallError, RemoteException, Result, StoreError};
use crate::latency::{LatencyTracker, CLIENT_LATENCY_HEADER};
use crate::models::RemoteExceptionEnvelope;
use crate::operation::Operation;
use crate::query::{encode_path, QueryParams};
use crate::retry::RetryPolicy;

/// Client-generated request id header; unique per attempt.
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";
/// Server-generated request id header.
pub const SERVER_REQUEST_ID_HEADER: &str = "x-ms-request-id";
/// Server-acknowledged byte position after a successful append.
pub const COMMITTED_BLOCK_OFFSET_HEADER: &str = "x-ms-committed-block-offset";

/// Everything the engine needs to address and authenticate one account.
///
/// Shared by all streams and operations of one client; fields are fixed at
/// construction by the facade.
#[derive(Debug)]
pub struct RequestContext {
    /// Fully qualified domain name of the account.
    pub account_fqdn: String,
    /// `https`, or `http` when insecure transport is enabled for test use.
    pub scheme: String,
    pub user_agent: String,
    /// URL-encoded absolute prefix prepended to every path, if any.
    pub path_prefix: Option<String>,
    pub default_timeout: Duration,
    /// Surface remote exception class names as typed I/O errors.
    pub throw_remote_exceptions: bool,
    /// Unique number per client instance in this process, reported in
    /// latency telemetry.
    pub client_instance_id: u64,
    /// Parameters for exponential-backoff policies minted for this client.
    pub backoff: crate::retry::BackoffConfig,
    pub token_provider: Arc<AccessTokenProvider>,
    pub http: reqwest::Client,
}

impl RequestContext {
    pub fn new(account_fqdn: impl Into<String>, token_provider: Arc<AccessTokenProvider>) -> Self {
        Self {
            account_fqdn: account_fqdn.into(),
            scheme: "https".to_string(),
            user_agent: default_user_agent(),
            path_prefix: None,
            default_timeout: Duration::from_secs(60),
            throw_remote_exceptions: false,
            client_instance_id: 0,
            backoff: crate::retry::BackoffConfig::default(),
            token_provider,
            http: reqwest::Client::new(),
        }
    }

    /// An exponential-backoff policy with this client's parameters.
    pub fn make_exponential_policy(&self) -> crate::retry::ExponentialBackoffPolicy {
        self.backoff.make_policy()
    }
}

pub fn default_user_agent() -> String {
    format!(
        "lakestore-rs/{}/{}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Per-request knobs: timeout override, retry policy, and the
/// client-request-id (generated when absent, written back for correlation).
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub client_request_id: Option<String>,
    pub retry_policy: Box<dyn RetryPolicy>,
}

impl RequestOptions {
    pub fn new(retry_policy: impl RetryPolicy + 'static) -> Self {
        Self {
            timeout: None,
            client_request_id: None,
            retry_policy: Box::new(retry_policy),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a successful call.
#[derive(Debug)]
pub struct Response {
    pub http_status: u16,
    pub server_request_id: Option<String>,
    /// Present on append responses.
    pub committed_block_offset: Option<u64>,
    /// Retries performed before this attempt succeeded.
    pub num_retries: u32,
    /// Latency of the successful attempt, in milliseconds.
    pub last_call_latency_ms: u64,
    /// Time spent acquiring the bearer token, in milliseconds.
    pub token_acquisition_latency_ms: u64,
    /// Content-Length of the response, 0 when chunked or absent.
    pub content_length: u64,
    /// Whether the response used chunked transfer encoding.
    pub chunked: bool,
    /// Parsed for operations that return a JSON body.
    pub body: Option<Bytes>,
    /// The open HTTP response, unconsumed, for the read path.
    pub body_stream: Option<reqwest::Response>,
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(StoreError::InvalidInput(format!(
            "path must be absolute: {path:?}"
        )));
    }
    if path.contains("//") {
        return Err(StoreError::InvalidInput(format!(
            "path must not contain empty segments: {path:?}"
        )));
    }
    Ok(())
}

fn build_url(ctx: &RequestContext, op: Operation, path: &str, query: &QueryParams) -> String {
    let mut url = String::with_capacity(128);
    url.push_str(&ctx.scheme);
    url.push_str("://");
    url.push_str(&ctx.account_fqdn);
    url.push_str(op.namespace());
    if let Some(prefix) = &ctx.path_prefix {
        url.push_str(prefix);
    }
    url.push_str(&encode_path(path));
    url.push('?');
    url.push_str(&query.serialize());
    url
}

fn method_for(name: &'static str) -> Method {
    match name {
        "GET" => Method::GET,
        "PUT" => Method::PUT,
        "POST" => Method::POST,
        _ => Method::DELETE,
    }
}

fn header_string(headers: &header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

struct HttpFailure {
    http_status: u16,
    http_message: Option<String>,
    server_request_id: Option<String>,
    remote_exception: Option<RemoteException>,
    content_length: u64,
}

enum AttemptOutcome {
    Success(Box<Response>),
    Http(HttpFailure),
    Transport(String),
}

fn push_history(history: &mut Option<String>, entry: String) {
    match history {
        Some(h) => {
            h.push(',');
            h.push_str(&entry);
        }
        None => *history = Some(entry),
    }
}

/// Invokes one operation, retrying per the options' policy, and returns the
/// successful response or the error of the final attempt.
pub async fn execute(
    ctx: &RequestContext,
    op: Operation,
    path: &str,
    query: &QueryParams,
    body: Option<Bytes>,
    opts: &mut RequestOptions,
) -> Result<Response> {
    let spec = op.spec();
    validate_path(path)?;

    let base_request_id = opts
        .client_request_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();
    let url = build_url(ctx, op, path, query);
    let timeout = opts.timeout.unwrap_or(ctx.default_timeout);
    let body_len = body.as_ref().map(|b| b.len() as u64).unwrap_or(0);

    let mut attempt: u32 = 0;
    let mut history: Option<String> = None;
    let mut last_server_request_id: Option<String> = None;

    loop {
        let attempt_id = if attempt == 0 {
            base_request_id.clone()
        } else {
            format!("{base_request_id}.{attempt}")
        };

        let token_start = Instant::now();
        let token = ctx.token_provider.get_token().await?;
        let token_latency_ms = token_start.elapsed().as_millis() as u64;

        trace!(op = spec.name, %url, attempt, "sending request");
        let mut req = ctx
            .http
            .request(method_for(spec.method), &url)
            .timeout(timeout)
            .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
            .header(header::USER_AGENT, &ctx.user_agent)
            .header(CLIENT_REQUEST_ID_HEADER, &attempt_id);
        if let Some(entries) = LatencyTracker::global().drain() {
            req = req.header(CLIENT_LATENCY_HEADER, entries);
        }
        if spec.requires_body {
            req = req.body(body.clone().unwrap_or_default());
        }

        let start = Instant::now();
        let outcome = run_attempt(op, spec.returns_body, req).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            AttemptOutcome::Success(mut resp) => {
                resp.num_retries = attempt;
                resp.last_call_latency_ms = latency_ms;
                resp.token_acquisition_latency_ms = token_latency_ms;
                LatencyTracker::global().record_success(
                    &base_request_id,
                    attempt,
                    latency_ms,
                    spec.name,
                    body_len + resp.content_length,
                    ctx.client_instance_id,
                );
                return Ok(*resp);
            }
            AttemptOutcome::Http(failure) => {
                let exception_name = failure
                    .remote_exception
                    .as_ref()
                    .map(|e| e.name.as_str())
                    .unwrap_or("");
                push_history(
                    &mut history,
                    format!("HTTP{}({exception_name})", failure.http_status),
                );
                LatencyTracker::global().record_error(
                    &base_request_id,
                    attempt,
                    latency_ms,
                    &format!("HTTP{}", failure.http_status),
                    spec.name,
                    body_len,
                    ctx.client_instance_id,
                );
                if failure.server_request_id.is_some() {
                    last_server_request_id = failure.server_request_id.clone();
                }
                if opts.retry_policy.should_retry(failure.http_status, false).await {
                    debug!(op = spec.name, status = failure.http_status, attempt, "retrying");
                    attempt += 1;
                    continue;
                }
                return Err(surface_error(
                    RemoteCallError {
                        operation: spec.name,
                        path: path.to_string(),
                        http_status: failure.http_status,
                        http_message: failure.http_message,
                        server_request_id: last_server_request_id,
                        remote_exception: failure.remote_exception,
                        transport_error: None,
                        num_retries: attempt,
                        last_call_latency_ms: latency_ms,
                        response_content_length: failure.content_length,
                        exception_history: history,
                    },
                    ctx.throw_remote_exceptions,
                ));
            }
            AttemptOutcome::Transport(description) => {
                push_history(&mut history, description.clone());
                LatencyTracker::global().record_error(
                    &base_request_id,
                    attempt,
                    latency_ms,
                    "transport",
                    spec.name,
                    body_len,
                    ctx.client_instance_id,
                );
                if opts.retry_policy.should_retry(0, true).await {
                    debug!(op = spec.name, error = %description, attempt, "retrying after transport failure");
                    attempt += 1;
                    continue;
                }
                return Err(surface_error(
                    RemoteCallError {
                        operation: spec.name,
                        path: path.to_string(),
                        http_status: 0,
                        http_message: None,
                        server_request_id: last_server_request_id,
                        remote_exception: None,
                        transport_error: Some(description),
                        num_retries: attempt,
                        last_call_latency_ms: latency_ms,
                        response_content_length: 0,
                        exception_history: history,
                    },
                    ctx.throw_remote_exceptions,
                ));
            }
        }
    }
}

async fn run_attempt(
    op: Operation,
    returns_body: bool,
    req: reqwest::RequestBuilder,
) -> AttemptOutcome {
    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => return AttemptOutcome::Transport(e.to_string()),
    };

    let status = resp.status();
    let headers = resp.headers();
    let server_request_id = header_string(headers, SERVER_REQUEST_ID_HEADER);
    let chunked = header_string(headers, "transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let content_length = header_string(headers, "content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if !status.is_success() {
        let failure_body = resp.bytes().await.unwrap_or_default();
        let remote_exception = serde_json::from_slice::<RemoteExceptionEnvelope>(&failure_body)
            .ok()
            .map(|env| RemoteException {
                name: env.remote_exception.exception,
                message: env.remote_exception.message,
                java_class_name: env.remote_exception.java_class_name,
            });
        return AttemptOutcome::Http(HttpFailure {
            http_status: status.as_u16(),
            http_message: status.canonical_reason().map(str::to_string),
            server_request_id,
            remote_exception,
            content_length,
        });
    }

    let committed_block_offset =
        header_string(headers, COMMITTED_BLOCK_OFFSET_HEADER).and_then(|v| v.parse().ok());

    let mut response = Response {
        http_status: status.as_u16(),
        server_request_id,
        committed_block_offset,
        num_retries: 0,
        last_call_latency_ms: 0,
        token_acquisition_latency_ms: 0,
        content_length,
        chunked,
        body: None,
        body_stream: None,
    };

    if op == Operation::Open {
        // hand the stream to the caller without buffering
        response.body_stream = Some(resp);
    } else if returns_body {
        match resp.bytes().await {
            Ok(bytes) => response.body = Some(bytes),
            Err(e) => return AttemptOutcome::Transport(e.to_string()),
        }
    }
    AttemptOutcome::Success(Box::new(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakestore_auth::StaticTokenSource;

    fn test_ctx() -> RequestContext {
        let provider = Arc::new(AccessTokenProvider::new(StaticTokenSource::new("t")));
        RequestContext::new("account.example.net", provider)
    }

    #[test]
    fn test_build_url_core_namespace() {
        let ctx = test_ctx();
        let qp = QueryParams::new(Operation::GetFileStatus);
        let url = build_url(&ctx, Operation::GetFileStatus, "/a/b", &qp);
        assert_eq!(
            url,
            format!(
                "https://account.example.net/webhdfs/v1/a/b?op=GETFILESTATUS&api-version={}",
                crate::query::API_VERSION
            )
        );
    }

    #[test]
    fn test_build_url_ext_namespace_and_prefix() {
        let mut ctx = test_ctx();
        ctx.path_prefix = Some("/tenant1".to_string());
        let qp = QueryParams::new(Operation::SetExpiry);
        let url = build_url(&ctx, Operation::SetExpiry, "/f", &qp);
        assert!(url.starts_with("https://account.example.net/WebHdfsExt/tenant1/f?op=SETEXPIRY"));
    }

    #[test]
    fn test_build_url_encodes_path() {
        let ctx = test_ctx();
        let qp = QueryParams::new(Operation::Open);
        let url = build_url(&ctx, Operation::Open, "/dir with space/f#1", &qp);
        assert!(url.contains("/webhdfs/v1/dir%20with%20space/f%231?"));
    }

    #[test]
    fn test_insecure_scheme() {
        let mut ctx = test_ctx();
        ctx.scheme = "http".to_string();
        let qp = QueryParams::new(Operation::Open);
        let url = build_url(&ctx, Operation::Open, "/f", &qp);
        assert!(url.starts_with("http://"));
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("/").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(method_for("GET"), Method::GET);
        assert_eq!(method_for("PUT"), Method::PUT);
        assert_eq!(method_for("POST"), Method::POST);
        assert_eq!(method_for("DELETE"), Method::DELETE);
    }

    #[test]
    fn test_push_history_accumulates() {
        let mut history = None;
        push_history(&mut history, "HTTP500()".to_string());
        push_history(&mut history, "HTTP503()".to_string());
        assert_eq!(history.as_deref(), Some("HTTP500(),HTTP503()"));
    }
}
