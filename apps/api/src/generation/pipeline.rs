//! Job orchestration — the one entry point callers use.
//!
//! Flow: placeholder → codes → prompt → generation call → (stream: relay
//! progress, save snapshots) → parse → validate → terminal write.
//!
//! Every failure after the placeholder exists becomes a stored terminal state
//! and a structured outcome; nothing propagates to the caller as a panic or
//! bare error.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::consultation::codes::Codes;
use crate::consultation::models::ConsultationRequest;
use crate::consultation::prompts::{assemble, CodeSet};
use crate::consultation::schema::descriptor;
use crate::consultation::validation::validate;
use crate::content_store::persistence::{FinalPayload, PersistenceCoordinator, RecordWriter};
use crate::content_store::RecordId;
use crate::errors::{ErrorKind, JobError};
use crate::llm_client::stream::{AssemblerEvent, StreamAssembler};
use crate::llm_client::{
    parse_document, Generation, GenerationInvoker, GenerationRequest, ReasoningEffort,
};

const EVENT_BUFFER: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Outcome types
// ────────────────────────────────────────────────────────────────────────────

/// Terminal state of a job, mirrored by the stored record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Validated document stored.
    Complete,
    /// Raw content stored with an error tag.
    Degraded,
    /// No terminal state could be stored.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub record_id: Option<RecordId>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub warnings: Vec<String>,
}

/// Status events sent to callers; non-streaming callers only see `accepted`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Accepted {
        #[serde(rename = "recordId")]
        record_id: RecordId,
    },
    Progress {
        length: usize,
    },
    Complete {
        #[serde(rename = "recordId")]
        record_id: RecordId,
    },
    Error {
        message: String,
        kind: ErrorKind,
    },
}

/// A job running in the background. `events` ends after the terminal event.
pub struct Submission {
    pub record_id: RecordId,
    pub events: mpsc::Receiver<JobEvent>,
    pub outcome: JoinHandle<JobOutcome>,
}

/// Model parameters applied to every generation call.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Where a job's generation ended up before the terminal write.
enum Draft {
    Document {
        document: Value,
        codes: Codes,
        warnings: Vec<String>,
    },
    Fallback {
        raw_content: String,
        error: JobError,
        warnings: Vec<String>,
    },
}

impl Draft {
    fn fallback(raw_content: impl Into<String>, error: JobError) -> Self {
        Draft::Fallback {
            raw_content: raw_content.into(),
            error,
            warnings: Vec::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

pub struct Pipeline {
    invoker: GenerationInvoker,
    persistence: PersistenceCoordinator,
    settings: GenerationSettings,
    snapshot_interval: Duration,
}

impl Pipeline {
    pub fn new(
        invoker: GenerationInvoker,
        persistence: PersistenceCoordinator,
        settings: GenerationSettings,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            invoker,
            persistence,
            settings,
            snapshot_interval: config.snapshot_interval,
        }
    }

    /// Runs a whole job on the current task and returns its outcome.
    pub async fn run_to_completion(
        &self,
        request: ConsultationRequest,
        streaming: bool,
    ) -> JobOutcome {
        let span = job_span(&request);
        async {
            let writer = match self.persistence.create_placeholder(request.kind()).await {
                Ok(writer) => writer,
                Err(err) => {
                    error!("Could not create placeholder record: {err}");
                    return JobOutcome {
                        record_id: None,
                        status: JobStatus::Failed,
                        error: Some(err),
                        warnings: Vec::new(),
                    };
                }
            };
            Span::current().record("record_id", writer.id());
            self.drive(writer, request, streaming, None).await
        }
        .instrument(span)
        .await
    }

    /// Creates the placeholder, then continues the job on a spawned task.
    /// Only placeholder failure is returned as an error; everything later
    /// arrives through `events` and `outcome`.
    pub async fn submit(
        self: &Arc<Self>,
        request: ConsultationRequest,
        streaming: bool,
    ) -> Result<Submission, JobError> {
        let span = job_span(&request);
        let writer = self
            .persistence
            .create_placeholder(request.kind())
            .instrument(span.clone())
            .await
            .map_err(|err| {
                span.in_scope(|| error!("Could not create placeholder record: {err}"));
                err
            })?;
        let record_id = writer.id();
        span.record("record_id", record_id);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // capacity is fresh, so this cannot fail
        let _ = tx.try_send(JobEvent::Accepted { record_id });

        let pipeline = Arc::clone(self);
        let outcome = tokio::spawn(
            async move { pipeline.drive(writer, request, streaming, Some(&tx)).await }
                .instrument(span),
        );

        Ok(Submission {
            record_id,
            events: rx,
            outcome,
        })
    }

    async fn drive(
        &self,
        mut writer: RecordWriter,
        request: ConsultationRequest,
        streaming: bool,
        events: Option<&mpsc::Sender<JobEvent>>,
    ) -> JobOutcome {
        let record_id = writer.id();
        info!("Job started (streaming={streaming})");

        let draft = self.generate(&mut writer, &request, streaming, events).await;

        let outcome = match draft {
            Draft::Document {
                document,
                codes,
                warnings,
            } => {
                let payload = FinalPayload::Complete {
                    document,
                    codes,
                    warnings: warnings.clone(),
                };
                match writer.save_final(payload).await {
                    Ok(()) => {
                        info!("Job complete with {} warning(s)", warnings.len());
                        JobOutcome {
                            record_id: Some(record_id),
                            status: JobStatus::Complete,
                            error: None,
                            warnings,
                        }
                    }
                    Err(err) => failed(record_id, err, warnings),
                }
            }
            Draft::Fallback {
                raw_content,
                error,
                warnings,
            } => {
                let payload = FinalPayload::Fallback {
                    raw_content,
                    error: error.clone(),
                };
                match writer.save_final(payload).await {
                    Ok(()) => {
                        warn!("Job degraded: {error}");
                        JobOutcome {
                            record_id: Some(record_id),
                            status: JobStatus::Degraded,
                            error: Some(error),
                            warnings,
                        }
                    }
                    Err(err) => failed(record_id, err, warnings),
                }
            }
        };

        if let Some(tx) = events {
            let terminal = match (&outcome.status, &outcome.error) {
                (JobStatus::Complete, _) => JobEvent::Complete { record_id },
                (_, Some(err)) => JobEvent::Error {
                    message: err.message.clone(),
                    kind: err.kind,
                },
                (_, None) => JobEvent::Error {
                    message: "job ended without a result".to_string(),
                    kind: ErrorKind::PersistenceFailure,
                },
            };
            if tx.send(terminal).await.is_err() {
                debug!("Event receiver dropped before the terminal event");
            }
        }

        outcome
    }

    async fn generate(
        &self,
        writer: &mut RecordWriter,
        request: &ConsultationRequest,
        streaming: bool,
        events: Option<&mpsc::Sender<JobEvent>>,
    ) -> Draft {
        let kind = request.kind();

        let codes = match CodeSet::for_request(request) {
            Ok(codes) => codes,
            Err(err) => return Draft::fallback("", err.into()),
        };
        debug!("Subject codes: {:?}", codes.subject.as_array());

        let prompt = assemble(request, &codes);
        tracing::trace!(system = %prompt.system, "Assembled prompt");
        let call = GenerationRequest {
            model: self.settings.model.clone(),
            system: prompt.system,
            user_turns: prompt.user_turns,
            schema: descriptor(kind),
            reasoning_effort: self.settings.reasoning_effort,
            stream: streaming,
        };

        let text = match self.invoker.invoke(&call).await {
            Ok(Generation::Complete(text)) => text,
            Ok(Generation::Stream(body)) => {
                let mut assembler = StreamAssembler::new(body, self.snapshot_interval);
                let assembled = loop {
                    match assembler.next().await {
                        Some(AssemblerEvent::Progress(progress)) => {
                            debug!("Stream progress: {} bytes", progress.length);
                            if let Some(tx) = events {
                                // progress is lossy under backpressure
                                let _ = tx.try_send(JobEvent::Progress {
                                    length: progress.length,
                                });
                            }
                            if let Some(snapshot) = progress.snapshot {
                                writer.save_intermediate(&snapshot).await;
                            }
                        }
                        Some(AssemblerEvent::Finished(assembled)) => break assembled,
                        None => return Draft::fallback(
                            assembler.text(),
                            JobError::new(ErrorKind::ParseError, "stream ended without a result"),
                        ),
                    }
                };

                match (assembled.document, assembled.interruption) {
                    (Ok(document), interruption) => {
                        if let Some(err) = interruption {
                            warn!("Stream interrupted after a complete document: {err}");
                        } else if !assembled.saw_sentinel {
                            debug!("Stream ended without a sentinel; document parsed anyway");
                        }
                        return self.check(request, document, assembled.text, codes.subject);
                    }
                    (Err(_), Some(err)) => return Draft::fallback(assembled.text, err.into()),
                    (Err(reason), None) => {
                        return Draft::fallback(
                            assembled.text,
                            JobError::new(ErrorKind::ParseError, reason),
                        )
                    }
                }
            }
            Err(err) => return Draft::fallback("", err.into()),
        };

        match parse_document(&text) {
            Ok(document) => self.check(request, document, text, codes.subject),
            Err(err) => {
                Draft::fallback(text, JobError::new(ErrorKind::ParseError, err.to_string()))
            }
        }
    }

    fn check(
        &self,
        request: &ConsultationRequest,
        document: Value,
        raw: String,
        codes: Codes,
    ) -> Draft {
        let result = validate(request.kind(), &document);
        for warning in &result.warnings {
            debug!("Validation warning: {warning}");
        }
        if result.valid {
            Draft::Document {
                document,
                codes,
                warnings: result.warnings,
            }
        } else {
            Draft::Fallback {
                raw_content: raw,
                error: JobError::new(ErrorKind::ValidationError, result.errors.join("; ")),
                warnings: result.warnings,
            }
        }
    }
}

fn job_span(request: &ConsultationRequest) -> Span {
    info_span!(
        "job",
        job_id = %Uuid::new_v4(),
        kind = %request.kind(),
        record_id = tracing::field::Empty,
    )
}

fn failed(record_id: RecordId, err: JobError, warnings: Vec<String>) -> JobOutcome {
    error!("Job failed: {err}");
    JobOutcome {
        record_id: Some(record_id),
        status: JobStatus::Failed,
        error: Some(err),
        warnings,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::content_store::testing::MemoryStore;
    use crate::llm_client::testing::ScriptedTransport;
    use crate::retry::RetryPolicy;

    /// Pipeline over in-memory fakes, snapshotting on every progress event.
    pub fn pipeline(transport: Arc<ScriptedTransport>, store: Arc<MemoryStore>) -> Arc<Pipeline> {
        let retry = RetryPolicy::new(3, Duration::from_millis(200));
        let invoker = GenerationInvoker::new(
            transport.clone(),
            transport,
            retry,
            Duration::from_secs(120),
        );
        let config = PipelineConfig {
            intermediate_save_interval: Duration::from_secs(5),
            snapshot_interval: Duration::ZERO,
            store_retry: retry,
        };
        let persistence = PersistenceCoordinator::new(
            store,
            config.store_retry,
            config.intermediate_save_interval,
        );
        Arc::new(Pipeline::new(
            invoker,
            persistence,
            GenerationSettings {
                model: "gpt-4o".to_string(),
                reasoning_effort: None,
            },
            &config,
        ))
    }
}
