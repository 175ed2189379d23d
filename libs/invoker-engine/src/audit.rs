//! Audit Event Recorder
//!
//! **Lifecycle:**
//! 1. `AuditRecorder::open` captures the request side before the pipeline runs
//!    and hands back a [`PendingAudit`]
//! 2. `PendingAudit::finish` attaches the outcome and emits the event
//!
//! A `PendingAudit` dropped before `finish` (client went away, task aborted)
//! emits the event as abandoned, so every opened invocation is recorded
//! exactly once. Emission is best-effort and never fails the invocation.

use crate::error::{ErrorKind, ExecError};
use crate::framing::{FramedResponse, Headers};
use chrono::{DateTime, Utc};
use invoker_common::types::InvocationRequest;
use md5::{Digest, Md5};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const ABANDONED: &str = "invocation abandoned before completion";

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub invocation_id: Uuid,
    pub image: String,
    pub tag: String,
    pub request_time: DateTime<Utc>,
    pub params: Vec<String>,
    pub method: String,
    pub image_exists_in_local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Removal failure that followed `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl AuditEvent {
    /// Request-side fields, fixed before anything runs
    pub fn begin(request: &InvocationRequest, image_exists_in_local: bool) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            image: request.image.name.clone(),
            tag: request.image.tag.clone(),
            request_time: Utc::now(),
            params: request.mode.params().to_vec(),
            method: request.mode.method().to_string(),
            image_exists_in_local,
            response_time: None,
            duration_ms: None,
            headers: None,
            error: String::new(),
            error_kind: None,
            cleanup_error: None,
            content_md5: None,
            content: None,
        }
    }

    /// Attach the outcome. Failures leave headers and content empty.
    pub fn complete(
        mut self,
        outcome: &Result<FramedResponse, ExecError>,
        preview_chars: usize,
    ) -> Self {
        self.stamp_response_time();

        match outcome {
            Ok(response) => {
                self.headers = Some(response.headers().clone());
                self.content_md5 = Some(content_fingerprint(response.body()));
                self.content = Some(content_preview(response.body(), preview_chars));
            }
            Err(e) => {
                self.error = e.to_string();
                self.error_kind = Some(e.kind());
                self.cleanup_error = e.suppressed().map(ToString::to_string);
            }
        }
        self
    }

    /// The invocation stopped before producing an outcome
    pub fn abandon(mut self) -> Self {
        self.stamp_response_time();
        self.error = ABANDONED.to_string();
        self.error_kind = Some(ErrorKind::Cancelled);
        self
    }

    fn stamp_response_time(&mut self) {
        let now = Utc::now();
        self.duration_ms = Some((now - self.request_time).num_milliseconds());
        self.response_time = Some(now);
    }
}

/// Hex MD5 of the exact body bytes
pub fn content_fingerprint(body: &[u8]) -> String {
    hex::encode(Md5::digest(body))
}

/// First `max_chars` characters of the body (lossy UTF-8), whole body if shorter
pub fn content_preview(body: &[u8], max_chars: usize) -> String {
    String::from_utf8_lossy(body).chars().take(max_chars).collect()
}

/// Destination for completed audit events
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Writes each event as one structured log line under the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &AuditEvent) {
        let response_time = event.response_time.map(|t| t.to_rfc3339());
        let headers = event.headers.as_ref().map(|h| format!("{:?}", h));

        info!(
            target: "audit",
            invocation_id = %event.invocation_id,
            image = %event.image,
            tag = %event.tag,
            method = %event.method,
            params = ?event.params,
            request_time = %event.request_time.to_rfc3339(),
            response_time = response_time.as_deref(),
            duration_ms = event.duration_ms,
            image_exists_in_local = event.image_exists_in_local,
            headers = headers.as_deref(),
            error = (!event.error.is_empty()).then_some(event.error.as_str()),
            error_kind = event.error_kind.as_ref().map(ErrorKind::as_str),
            cleanup_error = event.cleanup_error.as_deref(),
            content_md5 = event.content_md5.as_deref(),
            content = event.content.as_deref(),
            "incoming request"
        );
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    preview_chars: usize,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, preview_chars: usize) -> Self {
        Self {
            sink,
            preview_chars,
        }
    }

    /// Recorder that logs through `tracing`
    pub fn tracing(preview_chars: usize) -> Self {
        Self::new(Arc::new(TracingAuditSink), preview_chars)
    }

    pub fn open(&self, request: &InvocationRequest, image_exists_in_local: bool) -> PendingAudit {
        PendingAudit {
            recorder: self.clone(),
            event: Some(AuditEvent::begin(request, image_exists_in_local)),
        }
    }
}

/// An opened audit event that has not been emitted yet
pub struct PendingAudit {
    recorder: AuditRecorder,
    event: Option<AuditEvent>,
}

impl PendingAudit {
    pub fn invocation_id(&self) -> Option<Uuid> {
        self.event.as_ref().map(|event| event.invocation_id)
    }

    pub fn finish(mut self, outcome: &Result<FramedResponse, ExecError>) {
        if let Some(event) = self.event.take() {
            let event = event.complete(outcome, self.recorder.preview_chars);
            self.recorder.sink.emit(&event);
        }
    }
}

impl Drop for PendingAudit {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.recorder.sink.emit(&event.abandon());
        }
    }
}
