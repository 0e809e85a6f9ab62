//! Per-job record writer.
//!
//! One placeholder per job, any number of throttled best-effort progress
//! saves, then exactly one terminal write. Terminal writes retry transient
//! failures and refresh the credential once on a 401.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::consultation::codes::Codes;
use crate::consultation::models::ConsultationKind;
use crate::content_store::{ContentStore, NewRecord, RecordId, RecordPatch, StoreError};
use crate::errors::{ErrorKind, JobError};
use crate::retry::{RetryError, RetryPolicy};

/// What the terminal write stores.
#[derive(Debug, Clone)]
pub enum FinalPayload {
    Complete {
        document: Value,
        codes: Codes,
        warnings: Vec<String>,
    },
    Fallback { raw_content: String, error: JobError },
}

impl FinalPayload {
    fn into_patch(self) -> RecordPatch {
        match self {
            FinalPayload::Complete {
                document,
                codes,
                warnings,
            } => RecordPatch::Complete {
                base_profile_json: document,
                digits: codes.as_array(),
                warnings,
            },
            FinalPayload::Fallback { raw_content, error } => RecordPatch::Fallback {
                raw_content,
                error: error.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct PersistenceCoordinator {
    store: Arc<dyn ContentStore>,
    retry: RetryPolicy,
    intermediate_interval: Duration,
}

impl PersistenceCoordinator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        retry: RetryPolicy,
        intermediate_interval: Duration,
    ) -> Self {
        Self {
            store,
            retry,
            intermediate_interval,
        }
    }

    /// Creates the empty record a job writes into. Failure here ends the job.
    pub async fn create_placeholder(
        &self,
        kind: ConsultationKind,
    ) -> Result<RecordWriter, JobError> {
        let record = NewRecord {
            consultation_type: kind,
        };
        let record = &record;
        let id = authorized(self.store.as_ref(), self.retry, "Placeholder create", |store| {
            store.create_record(record)
        })
        .await?;
        info!("Placeholder record {id} created");

        Ok(RecordWriter {
            id,
            store: Arc::clone(&self.store),
            retry: self.retry,
            interval: self.intermediate_interval,
            last_write: None,
            finalized: None,
        })
    }
}

/// Write handle for a single record, owned by the job that created it.
pub struct RecordWriter {
    id: RecordId,
    store: Arc<dyn ContentStore>,
    retry: RetryPolicy,
    interval: Duration,
    last_write: Option<Instant>,
    finalized: Option<Result<(), JobError>>,
}

impl RecordWriter {
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Stores a partial document if the throttle interval has passed.
    /// Single attempt; failures are logged and dropped. Returns whether a write was attempted.
    pub async fn save_intermediate(&mut self, partial: &Value) -> bool {
        if self.finalized.is_some() {
            return false;
        }
        let now = Instant::now();
        if let Some(last) = self.last_write {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_write = Some(now);

        let patch = RecordPatch::Progress {
            raw_json: partial.clone(),
        };
        match self.store.patch_record(self.id, &patch).await {
            Ok(()) => debug!("Intermediate save for record {}", self.id),
            Err(e) => warn!("Intermediate save for record {} failed: {e}", self.id),
        }
        true
    }

    /// Writes the terminal state. Later calls return the first call's result without writing.
    pub async fn save_final(&mut self, payload: FinalPayload) -> Result<(), JobError> {
        if let Some(done) = &self.finalized {
            debug!("Record {} already finalized; skipping write", self.id);
            return done.clone();
        }

        let patch = payload.into_patch();
        let patch = &patch;
        let id = self.id;
        let result = authorized(self.store.as_ref(), self.retry, "Final save", |store| {
            store.patch_record(id, patch)
        })
        .await;

        match &result {
            Ok(()) => info!("Record {id} finalized"),
            Err(e) => warn!("Final save for record {id} failed: {e}"),
        }
        self.finalized = Some(result.clone());
        result
    }
}

/// Runs a store call under the retry policy. The first 401 triggers one
/// credential refresh and an immediate repeat of the call.
async fn authorized<'a, T, F, Fut>(
    store: &'a dyn ContentStore,
    retry: RetryPolicy,
    label: &str,
    op: F,
) -> Result<T, JobError>
where
    F: Fn(&'a dyn ContentStore) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let refreshed = AtomicBool::new(false);
    let refreshed = &refreshed;
    let op = &op;

    let result = retry
        .run(label, |_| async move {
            match op(store).await {
                Err(StoreError::Unauthorized) if !refreshed.swap(true, Ordering::SeqCst) => {
                    warn!("{label} rejected the credential; refreshing");
                    store.refresh_credential().await?;
                    op(store).await
                }
                other => other,
            }
        })
        .await;

    result.map_err(|e| {
        let message = match e {
            RetryError::Fatal { attempt, error } => {
                format!("rejected on attempt {attempt}: {error}")
            }
            RetryError::Exhausted { attempts, last } => {
                format!("gave up after {attempts} attempts: {last}")
            }
        };
        JobError::new(ErrorKind::PersistenceFailure, message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consultation::codes::calculate;
    use crate::content_store::testing::{server_error, MemoryStore, StoreCall};
    use serde_json::json;

    fn coordinator(store: Arc<MemoryStore>) -> PersistenceCoordinator {
        PersistenceCoordinator::new(
            store,
            RetryPolicy::new(3, Duration::from_millis(100)),
            Duration::from_secs(5),
        )
    }

    fn complete() -> FinalPayload {
        FinalPayload::Complete {
            document: json!({"opener": "hi"}),
            codes: calculate("1990-01-15").unwrap(),
            warnings: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_creation() {
        let store = Arc::new(MemoryStore::new());
        let writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Partner)
            .await
            .unwrap();
        assert_eq!(writer.id(), 100);
        assert_eq!(
            store.calls(),
            vec![StoreCall::Create(NewRecord {
                consultation_type: ConsultationKind::Partner
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_failure_is_persistence_failure() {
        let store = Arc::new(MemoryStore::new().fail_creates(vec![StoreError::Status {
            status: 400,
            message: "bad".to_string(),
        }]));
        let err = coordinator(store)
            .create_placeholder(ConsultationKind::Base)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
        assert!(err.message.starts_with("rejected on attempt 1: "), "{}", err.message);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intermediate_saves_are_throttled() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        assert!(writer.save_intermediate(&json!({"a": 1})).await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!writer.save_intermediate(&json!({"a": 2})).await);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(writer.save_intermediate(&json!({"a": 3})).await);

        assert_eq!(
            store.patches(),
            vec![
                RecordPatch::Progress { raw_json: json!({"a": 1}) },
                RecordPatch::Progress { raw_json: json!({"a": 3}) },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_intermediate_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::new().fail_patches(vec![server_error()]));
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        assert!(writer.save_intermediate(&json!({})).await);
        // single attempt only
        assert_eq!(store.patches().len(), 1);
        writer.save_final(complete()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_save_retries_transient_failures() {
        let store = Arc::new(MemoryStore::new().fail_patches(vec![server_error(), server_error()]));
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        writer.save_final(complete()).await.unwrap();
        assert_eq!(store.patches().len(), 3);
        assert!(matches!(
            store.patches().last(),
            Some(RecordPatch::Complete { digits: [6, 8, 9, 6, 5], .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_save_gives_up_after_max_attempts() {
        let store = Arc::new(MemoryStore::new().fail_patches(vec![
            server_error(),
            server_error(),
            server_error(),
        ]));
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        let err = writer.save_final(complete()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
        assert!(err.message.contains("3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_refreshes_once() {
        let store = Arc::new(MemoryStore::new().fail_patches(vec![
            StoreError::Unauthorized,
            StoreError::Unauthorized,
        ]));
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        let err = writer.save_final(complete()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
        let refreshes = store
            .calls()
            .into_iter()
            .filter(|c| *c == StoreCall::Refresh)
            .count();
        assert_eq!(refreshes, 1);
        assert_eq!(store.patches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_then_success() {
        let store = Arc::new(MemoryStore::new().fail_patches(vec![StoreError::Unauthorized]));
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        writer.save_final(complete()).await.unwrap();
        let calls = store.calls();
        assert!(matches!(calls[1], StoreCall::Patch(100, _)));
        assert_eq!(calls[2], StoreCall::Refresh);
        assert!(matches!(calls[3], StoreCall::Patch(100, RecordPatch::Complete { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_save_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        writer.save_final(complete()).await.unwrap();
        writer
            .save_final(FinalPayload::Fallback {
                raw_content: "x".to_string(),
                error: JobError::new(ErrorKind::ParseError, "late"),
            })
            .await
            .unwrap();
        assert!(!writer.save_intermediate(&json!({})).await);

        assert_eq!(store.patches().len(), 1);
        assert!(matches!(store.patches()[0], RecordPatch::Complete { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_write_keeps_warnings() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Base)
            .await
            .unwrap();

        writer
            .save_final(FinalPayload::Complete {
                document: json!({"opener": "hi"}),
                codes: calculate("1990-01-15").unwrap(),
                warnings: vec!["weaknesses[0] reads like a signal entry".to_string()],
            })
            .await
            .unwrap();
        assert!(matches!(
            &store.patches()[..],
            [RecordPatch::Complete { warnings, .. }] if warnings.len() == 1
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_stores_categorized_error() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = coordinator(store.clone())
            .create_placeholder(ConsultationKind::Child)
            .await
            .unwrap();

        writer
            .save_final(FinalPayload::Fallback {
                raw_content: "{\"opener\":".to_string(),
                error: JobError::new(ErrorKind::ParseError, "EOF while parsing"),
            })
            .await
            .unwrap();
        assert_eq!(
            store.patches(),
            vec![RecordPatch::Fallback {
                raw_content: "{\"opener\":".to_string(),
                error: "parse_error: EOF while parsing".to_string(),
            }]
        );
    }
}
