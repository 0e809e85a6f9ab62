//! Stream Assembler — turns a `data: …` event stream into document text.
//!
//! Bytes may be split anywhere, so complete lines are buffered before decoding.
//! Token deltas append; a full-message event replaces the accumulated text.
//! Partial documents are parsed opportunistically (at most once per snapshot
//! interval) for progress snapshots; the definitive parse happens once, when
//! the stream ends with or without its sentinel.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::llm_client::responses::extract_output_text;
use crate::llm_client::{parse_document, ByteStream, LlmError};

pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Token delta; appended.
    Delta(String),
    /// Full message; replaces everything received so far.
    Replace(String),
    /// Terminal sentinel.
    Done,
    /// Upstream reported a failure inside the stream.
    Failed(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Line framing
// ────────────────────────────────────────────────────────────────────────────

/// Buffers raw bytes and yields frames for every complete line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            decode_line(&String::from_utf8_lossy(&line), &mut frames);
        }
        frames
    }

    /// Decodes whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            decode_line(&String::from_utf8_lossy(&rest), &mut frames);
        }
        frames
    }
}

fn decode_line(line: &str, frames: &mut Vec<Frame>) {
    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let Some(payload) = line.strip_prefix("data:") else {
        // `event:`, `id:`, comments and blank separators carry nothing we need.
        return;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        frames.push(Frame::Done);
        return;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(event) => decode_event(&event, frames),
        Err(e) => trace!(target: "llm", error = %e, "skipping undecodable event"),
    }
}

fn decode_event(event: &Value, frames: &mut Vec<Frame>) {
    let str_at = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);

    match event.get("type").and_then(Value::as_str) {
        Some("response.output_text.delta") => {
            if let Some(delta) = str_at(event, "delta") {
                frames.push(Frame::Delta(delta));
            }
        }
        Some("response.output_text.done") => {
            if let Some(text) = str_at(event, "text") {
                frames.push(Frame::Replace(text));
            }
        }
        Some("response.completed") => {
            if let Some(text) = event.get("response").and_then(extract_output_text) {
                frames.push(Frame::Replace(text));
            }
            frames.push(Frame::Done);
        }
        Some("response.failed") | Some("error") => {
            let message = event
                .pointer("/response/error/message")
                .or_else(|| event.get("message"))
                .or_else(|| event.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("generation failed")
                .to_string();
            frames.push(Frame::Failed(message));
        }
        Some(_) => {}
        None => {
            // Chat-completions shaped events.
            if let Some(message) = event.pointer("/error/message").and_then(Value::as_str) {
                frames.push(Frame::Failed(message.to_string()));
            } else if let Some(delta) = event
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
            {
                frames.push(Frame::Delta(delta.to_string()));
            } else if let Some(full) = event
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
            {
                frames.push(Frame::Replace(full.to_string()));
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Partial documents
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Container {
    Object { expect_key: bool },
    Array,
}

fn closers(stack: &[Container]) -> String {
    stack
        .iter()
        .rev()
        .map(|c| match c {
            Container::Object { .. } => '}',
            Container::Array => ']',
        })
        .collect()
}

/// Best-effort parse of a document that may still be open: closes the open
/// string, arrays and objects, dropping a trailing incomplete member.
pub fn parse_partial(text: &str) -> Option<Value> {
    if let Ok(value) = parse_document(text) {
        return Some(value);
    }

    let mut stack: Vec<Container> = Vec::new();
    let mut in_string = false;
    let mut string_is_key = false;
    let mut escaped = false;
    // Last byte offset after which the document can be closed, with the open containers there.
    let mut last_cut: Option<(usize, Vec<Container>)> = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if !string_is_key {
                    last_cut = Some((i + 1, stack.clone()));
                }
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                string_is_key =
                    matches!(stack.last(), Some(Container::Object { expect_key: true }));
            }
            '{' => {
                stack.push(Container::Object { expect_key: true });
                last_cut = Some((i + 1, stack.clone()));
            }
            '[' => {
                stack.push(Container::Array);
                last_cut = Some((i + 1, stack.clone()));
            }
            '}' | ']' => {
                stack.pop();
                last_cut = Some((i + 1, stack.clone()));
            }
            ':' => {
                if let Some(Container::Object { expect_key }) = stack.last_mut() {
                    *expect_key = false;
                }
            }
            ',' => {
                if let Some(Container::Object { expect_key }) = stack.last_mut() {
                    *expect_key = true;
                }
            }
            _ => {}
        }
    }

    let mut candidates = Vec::with_capacity(2);
    if in_string && !string_is_key {
        let body = if escaped {
            &text[..text.len() - 1]
        } else {
            text
        };
        candidates.push(format!("{body}\"{}", closers(&stack)));
    }
    if let Some((cut, open)) = last_cut {
        candidates.push(format!("{}{}", &text[..cut], closers(&open)));
    }

    candidates
        .iter()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate.trim()).ok())
        .filter(|value| value.is_object() || value.is_array())
}

// ────────────────────────────────────────────────────────────────────────────
// Assembler
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Progress {
    /// Bytes of document text accumulated so far.
    pub length: usize,
    /// Best-effort parse, present only when a parse was attempted and succeeded.
    pub snapshot: Option<Value>,
}

/// Final state of a drained stream.
#[derive(Debug)]
pub struct Assembled {
    pub text: String,
    pub document: Result<Value, String>,
    pub saw_sentinel: bool,
    /// Why the stream stopped early, if it did.
    pub interruption: Option<LlmError>,
}

#[derive(Debug)]
pub enum AssemblerEvent {
    Progress(Progress),
    Finished(Assembled),
}

/// Pull-based reader over one generation stream.
pub struct StreamAssembler {
    source: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Frame>,
    text: String,
    snapshot_interval: Duration,
    last_snapshot: Instant,
    source_ended: bool,
    interruption: Option<LlmError>,
    finished: bool,
}

impl StreamAssembler {
    pub fn new(source: ByteStream, snapshot_interval: Duration) -> Self {
        Self {
            source,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            text: String::new(),
            snapshot_interval,
            last_snapshot: Instant::now(),
            source_ended: false,
            interruption: None,
            finished: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Next progress event, then exactly one `Finished`, then `None`.
    pub async fn next(&mut self) -> Option<AssemblerEvent> {
        loop {
            if self.finished {
                return None;
            }

            let mut changed = false;
            while let Some(frame) = self.pending.pop_front() {
                match frame {
                    Frame::Delta(delta) => {
                        self.text.push_str(&delta);
                        changed = true;
                    }
                    Frame::Replace(full) => {
                        self.text = full;
                        changed = true;
                    }
                    Frame::Done => return Some(AssemblerEvent::Finished(self.finish(true))),
                    Frame::Failed(message) => {
                        self.interruption = Some(LlmError::StreamFailed(message));
                        return Some(AssemblerEvent::Finished(self.finish(false)));
                    }
                }
            }

            if changed {
                return Some(AssemblerEvent::Progress(self.progress()));
            }

            if self.source_ended {
                return Some(AssemblerEvent::Finished(self.finish(false)));
            }

            match self.source.next().await {
                Some(Ok(chunk)) => {
                    let frames = self.decoder.push(&chunk);
                    self.pending.extend(frames);
                }
                Some(Err(err)) => {
                    debug!("Generation stream interrupted: {err}");
                    let frames = self.decoder.finish();
                    self.pending.extend(frames);
                    self.interruption = Some(err);
                    self.source_ended = true;
                }
                None => {
                    let frames = self.decoder.finish();
                    self.pending.extend(frames);
                    self.source_ended = true;
                }
            }
        }
    }

    /// Drains the stream, discarding progress.
    #[cfg(test)]
    pub async fn drain(mut self) -> Assembled {
        while let Some(event) = self.next().await {
            if let AssemblerEvent::Finished(assembled) = event {
                return assembled;
            }
        }
        self.finish(false)
    }

    fn progress(&mut self) -> Progress {
        let snapshot = if self.last_snapshot.elapsed() >= self.snapshot_interval {
            self.last_snapshot = Instant::now();
            parse_partial(&self.text)
        } else {
            None
        };
        Progress {
            length: self.text.len(),
            snapshot,
        }
    }

    fn finish(&mut self, saw_sentinel: bool) -> Assembled {
        self.finished = true;
        let text = std::mem::take(&mut self.text);
        let document = if text.trim().is_empty() {
            Err("no content received".to_string())
        } else {
            parse_document(&text).map_err(|e| e.to_string())
        };
        Assembled {
            text,
            document,
            saw_sentinel,
            interruption: self.interruption.take(),
        }
    }
}
