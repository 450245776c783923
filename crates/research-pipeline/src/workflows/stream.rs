//! Progress streaming
//!
//! A streaming run is a spawned producer writing [`ProgressSnapshot`]s into a bounded
//! channel and a consumer holding the [`PipelineStream`] end. The stream is single
//! pass and ends right after one terminal snapshot (completed, cancelled or error).
//! Dropping the stream cancels the producer.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::supervisor::SupervisorUpdate;
use crate::error::PipelineError;
use crate::research::{FinalReport, PipelinePhase};
use crate::text::{flatten_whitespace, truncate_with_ellipsis};

pub const BRIEF_PREVIEW_CHARS: usize = 150;
pub const TOTAL_STEPS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Connected,
    InProgress,
    Completed,
    Cancelled,
    Error,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

/// One progress event; only newly available payloads are set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub research_id: String,
    pub status: StreamStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PipelinePhase>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_update: Option<SupervisorUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<FinalReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    fn base(research_id: &str, status: StreamStatus, message: impl Into<String>) -> Self {
        Self {
            research_id: research_id.to_string(),
            status,
            step: None,
            phase: None,
            message: message.into(),
            brief_preview: None,
            draft_report: None,
            supervisor_update: None,
            final_report: None,
            clarification_question: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn connected(research_id: &str) -> Self {
        Self::base(research_id, StreamStatus::Connected, "Connected")
    }

    pub fn step(research_id: &str, step: u8, phase: PipelinePhase, message: impl Into<String>) -> Self {
        let mut snapshot = Self::base(research_id, StreamStatus::InProgress, message);
        snapshot.step = Some(step);
        snapshot.phase = Some(phase);
        snapshot
    }

    /// Brief preview: newlines flattened, capped at [`BRIEF_PREVIEW_CHARS`]
    pub fn with_brief_preview(mut self, brief: &str) -> Self {
        self.brief_preview = Some(truncate_with_ellipsis(
            &flatten_whitespace(brief),
            BRIEF_PREVIEW_CHARS,
        ));
        self
    }

    pub fn with_draft(mut self, draft: impl Into<String>) -> Self {
        self.draft_report = Some(draft.into());
        self
    }

    pub fn with_supervisor_update(mut self, update: SupervisorUpdate) -> Self {
        self.supervisor_update = Some(update);
        self
    }

    pub fn completed(research_id: &str, report: FinalReport) -> Self {
        let mut snapshot = Self::base(research_id, StreamStatus::Completed, "Research complete");
        snapshot.phase = Some(PipelinePhase::Completed);
        snapshot.final_report = Some(report);
        snapshot
    }

    /// Terminal marker for a run stopped at clarification
    pub fn needs_clarification(research_id: &str, question: impl Into<String>) -> Self {
        let mut snapshot = Self::base(research_id, StreamStatus::Completed, "Clarification required");
        snapshot.phase = Some(PipelinePhase::Clarify);
        snapshot.clarification_question = Some(question.into());
        snapshot
    }

    pub fn cancelled(research_id: &str, phase: PipelinePhase) -> Self {
        let mut snapshot = Self::base(research_id, StreamStatus::Cancelled, "Research cancelled");
        snapshot.phase = Some(phase);
        snapshot
    }

    pub fn error(research_id: &str, error: &PipelineError) -> Self {
        let mut snapshot = Self::base(research_id, StreamStatus::Error, "Research failed");
        snapshot.phase = Some(PipelinePhase::Failed);
        snapshot.error = Some(error.to_string());
        snapshot
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// One JSON object followed by `\n`
    pub fn to_ndjson(&self) -> Result<String, PipelineError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// `data: {json}` followed by a blank line
    pub fn to_sse(&self) -> Result<String, PipelineError> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Producer half handed to the pipeline task
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressSnapshot>,
}

impl ProgressSink {
    /// Returns false once the consumer is gone
    pub async fn emit(&self, snapshot: ProgressSnapshot) -> bool {
        self.tx.send(snapshot).await.is_ok()
    }
}

/// Consumer half; cancels the producing task on drop
pub struct PipelineStream {
    inner: ReceiverStream<ProgressSnapshot>,
    cancel: CancellationToken,
}

impl PipelineStream {
    /// Bounded channel whose producer observes a child of `parent`
    pub fn channel(capacity: usize, parent: &CancellationToken) -> (ProgressSink, Self, CancellationToken) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = parent.child_token();
        let stream = Self {
            inner: ReceiverStream::new(rx),
            cancel: cancel.clone(),
        };
        (ProgressSink { tx }, stream, cancel)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Stream for PipelineStream {
    type Item = ProgressSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for PipelineStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PipelineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
