//! HTTP client for the sync endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::remote::{PullPage, PushOperation, PushOutcome, RemoteBackend, RemoteError};
use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Client for a backend at `base_url` (scheme required, trailing slash ignored)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, entity: EntityType, action: &str) -> String {
        format!("{}/v1/sync/{}/{action}", self.base_url, entity.as_str())
    }
}

#[async_trait]
impl RemoteBackend for HttpRemote {
    async fn push(
        &self,
        entity: EntityType,
        operations: Vec<PushOperation>,
    ) -> std::result::Result<Vec<PushOutcome>, RemoteError> {
        let response = self
            .client
            .post(self.endpoint(entity, "push"))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&PushRequest { operations })
            .send()
            .await
            .map_err(map_transport_error)?;
        let body: PushResponse = read_json(response).await?;
        Ok(body.results)
    }

    async fn pull(
        &self,
        entity: EntityType,
        cursor: Option<&str>,
        limit: usize,
    ) -> std::result::Result<PullPage, RemoteError> {
        let mut url = format!("{}?limit={limit}", self.endpoint(entity, "changes"));
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(&urlencoding::encode(cursor));
        }
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;
        read_json(response).await
    }

    async fn health(&self) -> std::result::Result<(), RemoteError> {
        let response = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }
}

#[derive(serde::Serialize)]
struct PushRequest {
    operations: Vec<PushOperation>,
}

#[derive(Deserialize)]
struct PushResponse {
    results: Vec<PushOutcome>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;
    if !status.is_success() {
        return Err(classify_status(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|error| RemoteError::InvalidResponse(format!("{error}: {}", compact_text(&body))))
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(error.to_string())
    }
}

/// Map a non-success status to the error taxonomy
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status.as_u16() {
        400 | 409 | 422 => RemoteError::Validation(message),
        401 | 403 => RemoteError::Authorization(message),
        408 => RemoteError::Timeout,
        code => RemoteError::Unavailable {
            status: code,
            message,
        },
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn endpoints_include_entity_segment() {
        let remote = HttpRemote::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            remote.endpoint(EntityType::MoodEntry, "push"),
            "http://localhost:8080/v1/sync/mood_entry/push"
        );
    }

    #[test]
    fn status_codes_map_to_error_classes() {
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, r#"{"error":"score out of range"}"#),
            RemoteError::Validation(message) if message == "score out of range (400)"
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            RemoteError::Authorization(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            RemoteError::Timeout
        ));
        let unavailable = classify_status(StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(unavailable.is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
    }
}
