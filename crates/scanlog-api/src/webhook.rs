use crate::wire::{PushRequest, RemoteRecord, RemoteStatus};
use crate::{Ack, BatchAck, RemoteAdapter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use scanlog_core::{Record, ScanError, ScanResult};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP adapter for the spreadsheet webhook.
///
/// The webhook answers every request with a transport-level success and
/// reports failures inside the JSON body, so the body is always inspected.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    endpoint: Url,
    client: Client,
    max_retries: u32,
}

impl WebhookClient {
    pub fn new(endpoint: &str) -> ScanResult<Self> {
        let trimmed = endpoint.trim();
        if trimmed.is_empty() {
            return Err(ScanError::usage(
                "webhook endpoint is not configured; run `scanlog profile set --url <URL>`",
            ));
        }

        let endpoint = Url::parse(trimmed).map_err(|err| {
            ScanError::usage(format!("invalid webhook endpoint '{trimmed}': {err}"))
        })?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("scanlog/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ScanError::io(format!("failed to construct webhook client: {err}")))?;

        Ok(Self {
            endpoint,
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// `None` means the request went through but the answer was unreadable.
    async fn post_items(
        &self,
        token: &str,
        items: Vec<RemoteRecord>,
    ) -> ScanResult<Option<RemoteStatus>> {
        require_token(token)?;
        let body = PushRequest { token, items };
        let body = &body;
        let client = &self.client;
        let endpoint = &self.endpoint;

        self.with_retry("push", move || async move {
            // Redirects are followed; the final hop carries the JSON answer.
            let response = client
                .post(endpoint.clone())
                .json(body)
                .send()
                .await
                .map_err(network_error)?;

            let status = response.status();
            let headers = response.headers().clone();
            let text = response.text().await.map_err(network_error)?;
            parse_push_response(status, &headers, &text)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, action: &str, mut attempt_fn: F) -> ScanResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ScanResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt < self.max_retries && is_retryable(&error) {
                        let delay = retry_delay(attempt, &error);
                        tracing::debug!(
                            action,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error.message,
                            "retrying webhook request"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(error);
                }
            }
        }
    }
}

#[async_trait]
impl RemoteAdapter for WebhookClient {
    async fn push_one(&self, record: &Record, token: &str) -> ScanResult<Ack> {
        let status = self
            .post_items(token, vec![RemoteRecord::from_record(record)])
            .await?;

        Ok(Ack {
            id: record.id.clone(),
            confirmed: status.is_some(),
        })
    }

    async fn push_batch(&self, records: &[Record], token: &str) -> ScanResult<BatchAck> {
        if records.is_empty() {
            return Ok(BatchAck {
                confirmed: true,
                ..BatchAck::default()
            });
        }

        let items = records.iter().map(RemoteRecord::from_record).collect();
        let status = self.post_items(token, items).await?;

        Ok(match status {
            Some(status) => BatchAck {
                added: status.added,
                updated: status.updated,
                total_processed: status.total_processed,
                confirmed: true,
            },
            None => BatchAck {
                total_processed: records.len() as u64,
                confirmed: false,
                ..BatchAck::default()
            },
        })
    }

    async fn pull_all(&self, token: &str) -> ScanResult<Vec<RemoteRecord>> {
        require_token(token)?;

        let client = &self.client;
        let endpoint = &self.endpoint;
        let mut records = self
            .with_retry("pull", move || async move {
                let response = client
                    .get(endpoint.clone())
                    .query(&[("token", token)])
                    .send()
                    .await
                    .map_err(network_error)?;

                let status = response.status();
                let headers = response.headers().clone();
                let text = response.text().await.map_err(network_error)?;
                parse_pull_response(status, &headers, &text)
            })
            .await?;

        records.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        Ok(records)
    }
}

fn require_token(token: &str) -> ScanResult<()> {
    if token.trim().is_empty() {
        return Err(ScanError::unauthorized(
            "auth token is required; run `scanlog auth set-token <token>` or set SCANLOG_TOKEN",
        ));
    }
    Ok(())
}

fn parse_push_response(
    status: StatusCode,
    headers: &HeaderMap,
    body_text: &str,
) -> ScanResult<Option<RemoteStatus>> {
    if !status.is_success() {
        return Err(http_error(status, headers, body_text));
    }

    let trimmed = body_text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let Ok(parsed) = serde_json::from_str::<RemoteStatus>(trimmed) else {
        tracing::debug!("webhook push answer is not JSON; assuming success");
        return Ok(None);
    };

    if parsed.is_error() {
        return Err(remote_error(&parsed));
    }

    if parsed.is_success() {
        Ok(Some(parsed))
    } else {
        Ok(None)
    }
}

fn parse_pull_response(
    status: StatusCode,
    headers: &HeaderMap,
    body_text: &str,
) -> ScanResult<Vec<RemoteRecord>> {
    if !status.is_success() {
        return Err(http_error(status, headers, body_text));
    }

    let value = serde_json::from_str::<Value>(body_text.trim()).map_err(|err| {
        ScanError::malformed(format!("failed to decode webhook listing JSON: {err}"))
    })?;

    match value {
        Value::Array(_) => {
            let rows = serde_json::from_value::<Vec<RemoteRecord>>(value).map_err(|err| {
                ScanError::malformed(format!(
                    "webhook listing has an unexpected record shape: {err}"
                ))
            })?;
            Ok(drop_rows_without_id(rows))
        }
        Value::Object(_) => {
            let parsed = serde_json::from_value::<RemoteStatus>(value).unwrap_or_default();
            if parsed.is_error() {
                Err(remote_error(&parsed))
            } else {
                Err(ScanError::malformed(
                    "webhook listing was an object without records",
                ))
            }
        }
        other => Err(ScanError::malformed(format!(
            "webhook listing was not an array: {}",
            truncate_for_error(&other.to_string(), 120)
        ))),
    }
}

fn remote_error(status: &RemoteStatus) -> ScanError {
    let message = status
        .message
        .clone()
        .unwrap_or_else(|| "remote reported an error without a message".to_string());

    if is_auth_rejection(status.code.as_deref(), &message) {
        ScanError::unauthorized(format!("webhook rejected the token: {message}"))
    } else {
        ScanError::transport(format!("webhook reported an error: {message}"))
    }
}

fn is_auth_rejection(code: Option<&str>, message: &str) -> bool {
    if code.is_some_and(|code| {
        code.eq_ignore_ascii_case("unauthorized") || code.eq_ignore_ascii_case("forbidden")
    }) {
        return true;
    }

    let lowered = message.to_ascii_lowercase();
    ["unauthorized", "invalid token", "forbidden"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

fn http_error(status: StatusCode, headers: &HeaderMap, body_text: &str) -> ScanError {
    let body_trimmed = body_text.trim();
    let detail = if body_trimmed.is_empty() {
        format!("request failed with status {}", status.as_u16())
    } else {
        format!(
            "request failed with status {}: {}",
            status.as_u16(),
            truncate_for_error(body_trimmed, 240)
        )
    };

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return ScanError::unauthorized(detail);
    }

    let with_retry_after = match extract_retry_after_header(headers) {
        Some(seconds) if status == StatusCode::TOO_MANY_REQUESTS => {
            format!("{detail} [retry_after_seconds={seconds}]")
        }
        _ => detail,
    };

    ScanError::transport(format!(
        "{} [http_status={}]",
        with_retry_after,
        status.as_u16()
    ))
}

fn is_retryable(error: &ScanError) -> bool {
    if !error.is_transient() {
        return false;
    }

    match extract_marker(&error.message, "[http_status=") {
        Some(status) => status >= 500 || status == 429,
        None => true,
    }
}

fn retry_delay(attempt: u32, error: &ScanError) -> Duration {
    let backoff = backoff_duration(attempt);
    if let Some(seconds) = extract_marker(&error.message, "[retry_after_seconds=") {
        return backoff.max(Duration::from_secs(seconds));
    }

    backoff
}

fn backoff_duration(attempt: u32) -> Duration {
    let base_ms = 250u64;
    let multiplier = 1u64 << attempt.min(6);
    Duration::from_millis(base_ms * multiplier)
}

fn extract_marker(message: &str, marker: &str) -> Option<u64> {
    let start = message.find(marker)?;
    let rest = &message[start + marker.len()..];
    let end = rest.find(']')?;
    rest[..end].parse::<u64>().ok()
}

fn extract_retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .and_then(|value| value.parse::<u64>().ok())
}

/// Spreadsheet rows with a blank id cannot be addressed locally.
fn drop_rows_without_id(rows: Vec<RemoteRecord>) -> Vec<RemoteRecord> {
    let listed = rows.len();
    let kept: Vec<RemoteRecord> = rows
        .into_iter()
        .filter(|row| !row.id.trim().is_empty())
        .collect();

    if kept.len() < listed {
        tracing::warn!(
            skipped = listed - kept.len(),
            "ignoring webhook rows without an id"
        );
    }
    kept
}

fn truncate_for_error(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

fn network_error(err: reqwest::Error) -> ScanError {
    ScanError::transport(format!("network request failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlog_core::ErrorKind;

    #[test]
    fn opaque_push_answers_are_optimistic() {
        let headers = HeaderMap::new();
        assert!(
            parse_push_response(StatusCode::OK, &headers, "")
                .expect("empty body")
                .is_none()
        );
        assert!(
            parse_push_response(StatusCode::OK, &headers, "<html>moved</html>")
                .expect("html body")
                .is_none()
        );
    }

    #[test]
    fn error_bodies_are_classified() {
        let headers = HeaderMap::new();
        let auth = parse_push_response(
            StatusCode::OK,
            &headers,
            r#"{"status":"error","message":"Unauthorized: invalid token"}"#,
        )
        .expect_err("auth rejection");
        assert_eq!(auth.kind, ErrorKind::Unauthorized);

        let other = parse_push_response(
            StatusCode::OK,
            &headers,
            r#"{"status":"error","message":"sheet is locked"}"#,
        )
        .expect_err("remote failure");
        assert_eq!(other.kind, ErrorKind::Transport);
    }

    #[test]
    fn pull_rejects_non_listing_bodies() {
        let headers = HeaderMap::new();
        let garbage = parse_pull_response(StatusCode::OK, &headers, "not json")
            .expect_err("garbage body");
        assert_eq!(garbage.kind, ErrorKind::MalformedResponse);

        let object = parse_pull_response(StatusCode::OK, &headers, r#"{"status":"success"}"#)
            .expect_err("object body");
        assert_eq!(object.kind, ErrorKind::MalformedResponse);

        let denied = parse_pull_response(
            StatusCode::OK,
            &headers,
            r#"{"status":"error","code":"unauthorized","message":"nope"}"#,
        )
        .expect_err("denied");
        assert_eq!(denied.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn http_status_drives_retry_classification() {
        let headers = HeaderMap::new();
        let server = http_error(StatusCode::BAD_GATEWAY, &headers, "");
        assert!(is_retryable(&server));

        let client = http_error(StatusCode::NOT_FOUND, &headers, "");
        assert!(!is_retryable(&client));

        let auth = http_error(StatusCode::UNAUTHORIZED, &headers, "");
        assert_eq!(auth.kind, ErrorKind::Unauthorized);
        assert!(!is_retryable(&auth));

        assert!(is_retryable(&ScanError::malformed("bad body")));
    }

    #[test]
    fn retry_delay_honors_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "3".parse().expect("header value"));
        let limited = http_error(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(retry_delay(0, &limited), Duration::from_secs(3));
    }

    #[test]
    fn backoff_duration_uses_exponential_steps_with_cap() {
        assert_eq!(backoff_duration(0), Duration::from_millis(250));
        assert_eq!(backoff_duration(2), Duration::from_millis(1000));
        assert_eq!(backoff_duration(40), Duration::from_millis(16_000));
    }
}
