//! Progress events streamed to the client during a bulk send.

use serde::Serialize;
use uuid::Uuid;

use crate::store::DeliveryLogEntry;

/// Outcome of one delivery attempt.
///
/// Created once per recipient and never changed afterwards. Serializes as
/// `{ email, success, messageId?, error? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttemptResult {
    email: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DeliveryAttemptResult {
    pub fn delivered(recipient: &str, message_id: impl Into<String>) -> Self {
        DeliveryAttemptResult {
            email: recipient.to_string(),
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(recipient: &str, error: impl Into<String>) -> Self {
        DeliveryAttemptResult {
            email: recipient.to_string(),
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }

    pub fn recipient(&self) -> &str {
        &self.email
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn log_entry(&self, user_id: Uuid, subject: &str) -> DeliveryLogEntry {
        match &self.message_id {
            Some(message_id) if self.success => {
                DeliveryLogEntry::delivered(user_id, &self.email, subject, message_id)
            }
            _ => DeliveryLogEntry::failed(user_id, &self.email, subject, self.error().unwrap_or_default()),
        }
    }
}

/// Point-in-time view of a running batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
    pub successful: usize,
    pub failed: usize,
    /// Absent on the snapshot emitted before the first attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<DeliveryAttemptResult>,
}

/// Final event of a batch that ran to the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<DeliveryAttemptResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub error: String,
    pub details: String,
}

/// One message of the progress stream, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BulkEvent {
    Progress(ProgressSnapshot),
    Complete(BatchSummary),
    Error(BatchFailure),
}

impl BulkEvent {
    pub fn error(error: impl Into<String>, details: impl Into<String>) -> Self {
        BulkEvent::Error(BatchFailure {
            error: error.into(),
            details: details.into(),
        })
    }

    /// Whether the stream ends after this event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BulkEvent::Progress(_))
    }
}

/// `round(processed / total * 100)`, rounding halves up.
pub fn percentage(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Running counters for one batch. Owned by a single invocation.
#[derive(Debug)]
pub(crate) struct Tally {
    total: usize,
    successful: usize,
    failed: usize,
    results: Vec<DeliveryAttemptResult>,
}

impl Tally {
    pub(crate) fn new(total: usize) -> Self {
        Tally {
            total,
            successful: 0,
            failed: 0,
            results: Vec::with_capacity(total),
        }
    }

    pub(crate) fn processed(&self) -> usize {
        self.successful + self.failed
    }

    /// Snapshot before any attempt.
    pub(crate) fn initial(&self) -> BulkEvent {
        BulkEvent::Progress(ProgressSnapshot {
            processed: self.processed(),
            total: self.total,
            percentage: percentage(self.processed(), self.total),
            successful: self.successful,
            failed: self.failed,
            current_email: None,
            last_result: None,
        })
    }

    /// Fold in one attempt and return the snapshot describing it.
    pub(crate) fn record(&mut self, result: DeliveryAttemptResult) -> BulkEvent {
        if result.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result.clone());

        BulkEvent::Progress(ProgressSnapshot {
            processed: self.processed(),
            total: self.total,
            percentage: percentage(self.processed(), self.total),
            successful: self.successful,
            failed: self.failed,
            current_email: Some(result.email.clone()),
            last_result: Some(result),
        })
    }

    pub(crate) fn complete(self) -> BulkEvent {
        BulkEvent::Complete(BatchSummary {
            processed: self.processed(),
            total: self.total,
            percentage: 100,
            successful: self.successful,
            failed: self.failed,
            results: self.results,
        })
    }
}
