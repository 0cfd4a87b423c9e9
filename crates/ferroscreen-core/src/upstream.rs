//! Resilient POST-JSON client for the upstream data API.
//!
//! One call to [`UpstreamClient::request`] covers the whole retry cycle:
//! rate-limit waits with doubling backoff, retries of transient transport
//! failures, gzip decoding and classification of upstream rejections.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ScreenerConfig;
use crate::dataset::StockRecord;
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::retry::{RetryConfig, RATE_LIMITED_STATUS};
use crate::throttling::RequestThrottle;

const MESSAGE_FIELDS: [&str; 3] = ["message", "error", "msg"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream rate limit persisted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("upstream request failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: HttpError,
    },

    #[error("upstream API error: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid upstream payload: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// The upstream's own error text, when the upstream rejected the request.
    pub fn upstream_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: Arc<dyn HttpClient>,
    retry: RetryConfig,
    throttle: Option<RequestThrottle>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: Arc<dyn HttpClient>, retry: RetryConfig) -> Self {
        Self {
            http,
            retry,
            throttle: None,
            timeout: crate::config::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Production client over reqwest, tuned by `config`.
    pub fn from_config(config: &ScreenerConfig) -> Self {
        let client = Self::new(Arc::new(ReqwestHttpClient::new()), config.retry_config())
            .with_timeout(config.request_timeout);
        match config.requests_per_minute {
            Some(limit) => client.with_throttle(RequestThrottle::per_minute(limit)),
            None => client,
        }
    }

    pub fn with_throttle(mut self, throttle: RequestThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// POSTs `payload` and returns the decoded body of the first acceptable response.
    pub async fn request(&self, endpoint: &str, payload: &Value) -> Result<Vec<u8>, UpstreamError> {
        let body = payload.to_string();
        let mut attempt = 0_u32;

        loop {
            if let Some(throttle) = &self.throttle {
                throttle.acquire().await;
            }

            let request = HttpRequest::json_post(endpoint, body.clone(), self.timeout)
                .with_header("Accept-Encoding", "gzip");

            let response = match self.http.execute(request).await {
                Ok(response) => response,
                Err(error) => {
                    if error.retryable() && self.retry.has_attempts_after(attempt) {
                        let delay = self.retry.delay_for_retry(attempt);
                        warn!(
                            endpoint,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "upstream request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(UpstreamError::Transport {
                        attempts: attempt + 1,
                        source: error,
                    });
                }
            };

            if self.retry.should_retry_status(response.status) {
                if self.retry.has_attempts_after(attempt) {
                    let delay = self.retry.delay_for_retry(attempt);
                    warn!(
                        endpoint,
                        status = response.status,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "upstream rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                if response.status == RATE_LIMITED_STATUS {
                    return Err(UpstreamError::RateLimited {
                        attempts: attempt + 1,
                    });
                }
            }

            let status = response.status;
            let success = response.is_success();
            let body = decode_body(response);

            if !success {
                let message = extract_error_message(&body, status);
                warn!(endpoint, status, message = %message, "upstream rejected request");
                return Err(UpstreamError::Rejected { status, message });
            }

            if let Some(message) = logical_failure(&body) {
                warn!(endpoint, status, message = %message, "upstream reported an error");
                return Err(UpstreamError::Rejected { status, message });
            }

            debug!(endpoint, status, bytes = body.len(), "upstream request succeeded");
            return Ok(body);
        }
    }

    /// [`request`](Self::request) followed by JSON parsing of the body.
    pub async fn request_json(&self, endpoint: &str, payload: &Value) -> Result<Value, UpstreamError> {
        let body = self.request(endpoint, payload).await?;
        serde_json::from_slice(&body)
            .map_err(|error| UpstreamError::Decode(format!("response is not valid JSON: {error}")))
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("retry", &self.retry)
            .field("throttle", &self.throttle)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Pulls the `data` array out of a `{total, data}` response.
///
/// A missing `data` field reads as no records; non-object items are skipped.
pub fn records_from_response(value: Value) -> Result<Vec<StockRecord>, UpstreamError> {
    let Value::Object(mut envelope) = value else {
        return Err(UpstreamError::Decode(String::from(
            "expected a JSON object response",
        )));
    };

    match envelope.remove("data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|item| {
                let record = StockRecord::from_value(item);
                if record.is_none() {
                    debug!("skipping non-object item in upstream data");
                }
                record
            })
            .collect()),
        Some(other) => Err(UpstreamError::Decode(format!(
            "expected `data` to be an array, found {}",
            json_type_name(&other)
        ))),
    }
}

/// Decompresses gzip bodies. A body that fails to decompress is returned raw.
fn decode_body(response: HttpResponse) -> Vec<u8> {
    if !response.is_gzip() {
        return response.body;
    }

    let mut decoded = Vec::new();
    match GzDecoder::new(response.body.as_slice()).read_to_end(&mut decoded) {
        Ok(_) => decoded,
        Err(error) => {
            warn!(error = %error, "gzip decoding failed, using raw body");
            response.body
        }
    }
}

/// Best human-readable message for a failed response.
///
/// Prefers the `message`, `error` and `msg` fields of a JSON object, then the
/// raw body text, then the status line.
pub fn extract_error_message(body: &[u8], status: u16) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = first_message(&fields, false) {
            return message;
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return text.to_owned();
    }

    status_line(status)
}

/// A 2xx JSON object without `data` whose `error`/`message` is not "success".
fn logical_failure(body: &[u8]) -> Option<String> {
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
        return None;
    };
    if fields.contains_key("data") {
        return None;
    }

    let failing = ["error", "message"].iter().any(|field| {
        fields
            .get(*field)
            .is_some_and(|value| !value.is_null() && !is_success_marker(value))
    });
    if !failing {
        return None;
    }

    Some(
        first_message(&fields, true)
            .unwrap_or_else(|| String::from("upstream reported an error without a message")),
    )
}

fn first_message(fields: &Map<String, Value>, skip_success: bool) -> Option<String> {
    MESSAGE_FIELDS.iter().find_map(|field| {
        let value = fields.get(*field)?;
        if skip_success && is_success_marker(value) {
            return None;
        }
        match value {
            Value::Null | Value::Bool(false) => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => Some(text.clone()),
            Value::Array(items) if items.is_empty() => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other.to_string()),
        }
    })
}

fn is_success_marker(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|text| text.eq_ignore_ascii_case("success"))
}

fn status_line(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).expect("write");
        encoder.finish().expect("finish")
    }

    #[test]
    fn error_message_prefers_message_then_error_then_msg() {
        let body = br#"{"msg":"third","error":"second","message":"first"}"#;
        assert_eq!(extract_error_message(body, 400), "first");

        let body = br#"{"msg":"third","error":"second"}"#;
        assert_eq!(extract_error_message(body, 400), "second");

        let body = br#"{"msg":"third","message":""}"#;
        assert_eq!(extract_error_message(body, 400), "third");
    }

    #[test]
    fn error_message_falls_back_to_raw_text_then_status() {
        assert_eq!(extract_error_message(b"Bad Gateway from proxy", 502), "Bad Gateway from proxy");
        assert_eq!(extract_error_message(b"", 503), "HTTP 503 Service Unavailable");
        assert_eq!(extract_error_message(br#"{"code":1}"#, 400), r#"{"code":1}"#);
    }

    #[test]
    fn logical_failure_requires_missing_data_and_non_success_marker() {
        assert_eq!(
            logical_failure(br#"{"error":"token expired"}"#).as_deref(),
            Some("token expired")
        );
        assert_eq!(
            logical_failure(br#"{"message":"success","error":"quota exceeded"}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(logical_failure(br#"{"message":"success"}"#), None);
        assert_eq!(logical_failure(br#"{"message":"oops","data":[]}"#), None);
        assert_eq!(logical_failure(br#"{"total":0}"#), None);
        assert_eq!(logical_failure(b"[1,2,3]"), None);
    }

    #[test]
    fn gzip_bodies_are_decoded() {
        let plain = br#"{"total":0,"data":[]}"#;
        let response =
            HttpResponse::new(200, gzip(plain)).with_header("Content-Encoding", "gzip");

        assert_eq!(decode_body(response), plain.to_vec());
    }

    #[test]
    fn undecodable_gzip_falls_back_to_raw_body() {
        let raw = br#"{"total":0,"data":[]}"#.to_vec();
        let response = HttpResponse::new(200, raw.clone()).with_header("Content-Encoding", "gzip");

        assert_eq!(decode_body(response), raw);
    }

    #[test]
    fn records_are_read_from_the_data_array() {
        let records = records_from_response(json!({
            "total": 3,
            "data": [{"stockCode": "00700"}, 42, {"stockCode": "09988"}],
        }))
        .expect("records");

        let codes: Vec<_> = records.iter().filter_map(StockRecord::stock_code).collect();
        assert_eq!(codes, vec!["00700", "09988"]);

        assert!(records_from_response(json!({"total": 0})).expect("empty").is_empty());
        assert!(matches!(
            records_from_response(json!({"data": "nope"})),
            Err(UpstreamError::Decode(_))
        ));
    }
}
