//! Content Store client — the remote REST service holding profile records.
//!
//! `POST /records` creates a record and returns its id; `PATCH /records/{id}`
//! merge-updates it. Requests carry a bearer credential that can expire; a 401
//! surfaces as `StoreError::Unauthorized` so the writer can refresh and retry.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ContentStoreConfig;
use crate::consultation::models::ConsultationKind;
use crate::retry::Transient;

pub mod persistence;

pub type RecordId = i64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Content store rejected the credential")]
    Unauthorized,

    #[error("Content store error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Content store returned an unexpected body: {0}")]
    Malformed(String),

    #[error("Credential refresh failed: {0}")]
    Refresh(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Status { status, .. } => *status >= 500,
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Body of the placeholder record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRecord {
    pub consultation_type: ConsultationKind,
}

/// Merge-update bodies. The stored shape tells pollers which state a record is in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordPatch {
    /// Best-effort parse of a document still being generated.
    Progress { raw_json: Value },
    /// Validated document plus the subject's codes and any validator warnings.
    Complete {
        base_profile_json: Value,
        digits: [u8; 5],
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    /// Unparsed or invalid output, tagged with the reason.
    Fallback { raw_content: String, error: String },
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create_record(&self, record: &NewRecord) -> Result<RecordId, StoreError>;
    async fn patch_record(&self, id: RecordId, patch: &RecordPatch) -> Result<(), StoreError>;
    /// Replaces the bearer credential. Black box: how it is obtained is the store's business.
    async fn refresh_credential(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: RecordId,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// `ContentStore` over HTTP with an in-place refreshable bearer token.
pub struct HttpContentStore {
    client: Client,
    config: ContentStoreConfig,
    token: RwLock<String>,
}

impl HttpContentStore {
    pub fn new(config: ContentStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let token = RwLock::new(config.token.clone());
        Ok(Self {
            client,
            config,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(StoreError::Unauthorized);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn create_record(&self, record: &NewRecord) -> Result<RecordId, StoreError> {
        let token = self.token.read().await.clone();
        let response = self
            .client
            .post(self.url("/records"))
            .bearer_auth(token)
            .json(record)
            .send()
            .await?;
        let created: CreatedRecord = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        debug!("Created record {}", created.id);
        Ok(created.id)
    }

    async fn patch_record(&self, id: RecordId, patch: &RecordPatch) -> Result<(), StoreError> {
        let token = self.token.read().await.clone();
        let response = self
            .client
            .patch(self.url(&format!("/records/{id}")))
            .bearer_auth(token)
            .json(patch)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn refresh_credential(&self) -> Result<(), StoreError> {
        let Some(refresh) = &self.config.refresh else {
            return Err(StoreError::Refresh(
                "no refresh endpoint configured".to_string(),
            ));
        };
        let response = self
            .client
            .post(&refresh.url)
            .json(&RefreshRequest {
                refresh_token: &refresh.refresh_token,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Refresh(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Refresh(e.to_string()))?;
        *self.token.write().await = body.access_token;
        info!("Content store credential refreshed");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefreshConfig;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;
    use std::time::Duration;

    fn store(server: &MockServer, refresh: bool) -> HttpContentStore {
        HttpContentStore::new(ContentStoreConfig {
            base_url: server.base_url(),
            token: "old".to_string(),
            refresh: refresh.then(|| RefreshConfig {
                url: server.url("/auth/refresh"),
                refresh_token: "rt".to_string(),
            }),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_patch_shapes() {
        let progress = RecordPatch::Progress {
            raw_json: json!({"opener": "hi"}),
        };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"raw_json": {"opener": "hi"}})
        );

        let complete = RecordPatch::Complete {
            base_profile_json: json!({}),
            digits: [6, 8, 9, 6, 5],
            warnings: vec![],
        };
        assert_eq!(
            serde_json::to_value(&complete).unwrap(),
            json!({"base_profile_json": {}, "digits": [6, 8, 9, 6, 5]})
        );

        let flagged = RecordPatch::Complete {
            base_profile_json: json!({}),
            digits: [6, 8, 9, 6, 5],
            warnings: vec!["weaknesses[3] reads like a signal entry".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&flagged).unwrap(),
            json!({
                "base_profile_json": {},
                "digits": [6, 8, 9, 6, 5],
                "warnings": ["weaknesses[3] reads like a signal entry"]
            })
        );

        let fallback = RecordPatch::Fallback {
            raw_content: "{\"a\":".to_string(),
            error: "parse_error: EOF".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&fallback).unwrap(),
            json!({"raw_content": "{\"a\":", "error": "parse_error: EOF"})
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(testing::server_error().is_transient());
        assert!(!StoreError::Unauthorized.is_transient());
        assert!(!StoreError::Status {
            status: 422,
            message: String::new()
        }
        .is_transient());
    }

    #[tokio::test]
    async fn test_create_record_returns_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/records")
                    .header("authorization", "Bearer old")
                    .json_body(json!({"consultation_type": "base"}));
                then.status(201).json_body(json!({"id": 42}));
            })
            .await;

        let id = store(&server, false)
            .create_record(&NewRecord {
                consultation_type: ConsultationKind::Base,
            })
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(id, 42);
    }

    #[tokio::test]
    async fn test_unauthorized_patch_then_refresh() {
        let server = MockServer::start_async().await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/records/7")
                    .header("authorization", "Bearer old");
                then.status(401);
            })
            .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/refresh")
                    .json_body(json!({"refresh_token": "rt"}));
                then.status(200).json_body(json!({"access_token": "new"}));
            })
            .await;
        let accepted = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/records/7")
                    .header("authorization", "Bearer new");
                then.status(204);
            })
            .await;

        let store = store(&server, true);
        let patch = RecordPatch::Progress { raw_json: json!({}) };
        assert!(matches!(
            store.patch_record(7, &patch).await,
            Err(StoreError::Unauthorized)
        ));
        store.refresh_credential().await.unwrap();
        store.patch_record(7, &patch).await.unwrap();

        rejected.assert_async().await;
        refresh.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_endpoint_fails() {
        let server = MockServer::start_async().await;
        let err = store(&server, false).refresh_credential().await.unwrap_err();
        assert!(matches!(err, StoreError::Refresh(_)));
    }

    #[tokio::test]
    async fn test_server_error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/records/9");
                then.status(500).body("boom");
            })
            .await;
        let err = store(&server, false)
            .patch_record(9, &RecordPatch::Progress { raw_json: json!({}) })
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::Status { status: 500, ref message } if message == "boom")
        );
    }
}
