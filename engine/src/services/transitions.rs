//! State transition applier
//!
//! Marks records as "report generated" and "report sent". Every id is
//! checked and applied on its own: a rejected id never rolls back the
//! others, and a failing store stops the batch with what was already
//! applied left committed.

use crate::database::{BulletinRecord, Importance, Repository};
use crate::error::{AppError, Result};
use chrono::Utc;
use serde::Serialize;

/// Why a transition was refused for one id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotFound,
    /// Importance is still awaiting review
    PendingImportance,
    UnrecognizedImportance,
    AlreadyGenerated,
    /// Sending requires a generated report first
    NotGenerated,
    AlreadySent,
    /// The record changed between the check and the update
    StateChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RejectedId {
    pub id: i64,
    pub reason: RejectionReason,
}

/// Per-id result of a transition batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub applied: Vec<i64>,
    pub rejected: Vec<RejectedId>,
}

impl TransitionOutcome {
    fn reject(&mut self, id: i64, reason: RejectionReason) {
        tracing::warn!("Transition rejected for record {}: {:?}", id, reason);
        self.rejected.push(RejectedId { id, reason });
    }

    pub fn rejected_ids(&self) -> Vec<i64> {
        self.rejected.iter().map(|r| r.id).collect()
    }

    /// True when every requested id was applied
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Drop repeated ids, keeping first occurrences in order
fn distinct(ids: &[i64]) -> Vec<i64> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

/// Precondition for `mark_generated` on one record
fn generation_blocker(record: &BulletinRecord) -> Option<RejectionReason> {
    match record.importance() {
        Err(_) => Some(RejectionReason::UnrecognizedImportance),
        Ok(Importance::Pending) => Some(RejectionReason::PendingImportance),
        Ok(_) if record.report_generated => Some(RejectionReason::AlreadyGenerated),
        Ok(_) => None,
    }
}

/// Precondition for `mark_sent` on one record
fn send_blocker(record: &BulletinRecord) -> Option<RejectionReason> {
    if !record.report_generated {
        Some(RejectionReason::NotGenerated)
    } else if record.report_sent {
        Some(RejectionReason::AlreadySent)
    } else {
        None
    }
}

/// Applies report lifecycle transitions against the store
#[derive(Clone)]
pub struct TransitionService {
    repo: Repository,
}

impl TransitionService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Mark `ids` as having the report `report_name` stored at `report_path`.
    ///
    /// Pending, unrecognized, missing or already generated ids are rejected.
    pub async fn mark_generated(
        &self,
        ids: &[i64],
        report_name: &str,
        report_path: &str,
    ) -> Result<TransitionOutcome> {
        let report_name = report_name.trim();
        let report_path = report_path.trim();
        if report_name.is_empty() || report_path.is_empty() {
            return Err(AppError::Validation(
                "report name and path are required to mark a report as generated".to_string(),
            ));
        }

        let now = Utc::now();
        let mut outcome = TransitionOutcome::default();

        for id in distinct(ids) {
            let Some(record) = self.repo.find_bulletin(id).await? else {
                outcome.reject(id, RejectionReason::NotFound);
                continue;
            };

            if let Some(reason) = generation_blocker(&record) {
                outcome.reject(id, reason);
                continue;
            }

            let applied = self
                .repo
                .apply_generated(id, &record.importance_label, report_name, report_path, now)
                .await?;

            if applied {
                outcome.applied.push(id);
            } else {
                outcome.reject(id, RejectionReason::StateChanged);
            }
        }

        tracing::info!(
            "Marked {} record(s) as generated ({}), {} rejected",
            outcome.applied.len(),
            report_name,
            outcome.rejected.len()
        );

        Ok(outcome)
    }

    /// Mark `ids` as sent. Ids without a generated report are rejected.
    pub async fn mark_sent(&self, ids: &[i64]) -> Result<TransitionOutcome> {
        let now = Utc::now();
        let mut outcome = TransitionOutcome::default();

        for id in distinct(ids) {
            let Some(record) = self.repo.find_bulletin(id).await? else {
                outcome.reject(id, RejectionReason::NotFound);
                continue;
            };

            if let Some(reason) = send_blocker(&record) {
                outcome.reject(id, reason);
                continue;
            }

            // Never stamp a send before its generation
            let sent_at = record
                .report_generated_at
                .map_or(now, |generated_at| generated_at.max(now));

            if self.repo.apply_sent(id, sent_at).await? {
                outcome.applied.push(id);
            } else {
                outcome.reject(id, RejectionReason::StateChanged);
            }
        }

        tracing::info!(
            "Marked {} record(s) as sent, {} rejected",
            outcome.applied.len(),
            outcome.rejected.len()
        );

        Ok(outcome)
    }
}
