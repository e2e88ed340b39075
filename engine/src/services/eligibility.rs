//! Eligibility filter
//!
//! Decides which bulletin records may have a report generated and which may
//! be included in an email send. Both filters are pure: they never touch the
//! store, they only classify what they are given.

use crate::database::{BulletinRecord, Importance, SendCandidate};
use serde::Serialize;

/// Non-fatal data problem found while screening or grouping records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Stored importance matches no known level; the record is excluded
    UnrecognizedImportance {
        record_id: i64,
        titular: String,
        value: String,
    },
    /// Send group whose titular has no usable email
    MissingEmail {
        titular: String,
        importance: Importance,
    },
    /// Send group none of whose report files can be found
    MissingReportFile {
        titular: String,
        importance: Importance,
        record_ids: Vec<i64>,
    },
}

impl DataQualityWarning {
    pub(crate) fn log(&self) {
        match self {
            DataQualityWarning::UnrecognizedImportance {
                record_id,
                titular,
                value,
            } => tracing::warn!(
                "Record {} ({}) has unrecognized importance {:?}; excluded",
                record_id,
                titular,
                value
            ),
            DataQualityWarning::MissingEmail {
                titular,
                importance,
            } => tracing::warn!("No email on file for {} ({} group)", titular, importance),
            DataQualityWarning::MissingReportFile {
                titular,
                importance,
                record_ids,
            } => tracing::warn!(
                "No report file found for {} ({} group, records {:?})",
                titular,
                importance,
                record_ids
            ),
        }
    }
}

/// Records that passed a filter, plus what was set aside and why
#[derive(Debug, Clone, Serialize)]
pub struct Screened<T> {
    pub eligible: Vec<T>,
    pub warnings: Vec<DataQualityWarning>,
}

impl<T> Default for Screened<T> {
    fn default() -> Self {
        Self {
            eligible: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Reportable importance of a record, or the warning explaining why it has none
fn reportable_importance(
    record: &BulletinRecord,
) -> std::result::Result<Option<Importance>, DataQualityWarning> {
    match record.importance() {
        Ok(level) if level.is_reportable() => Ok(Some(level)),
        Ok(_) => Ok(None),
        Err(unknown) => Err(DataQualityWarning::UnrecognizedImportance {
            record_id: record.id,
            titular: record.titular.clone(),
            value: unknown.0,
        }),
    }
}

/// Records that may have a report generated:
/// not yet generated and importance other than pending.
pub fn for_generation<I>(records: I) -> Screened<BulletinRecord>
where
    I: IntoIterator<Item = BulletinRecord>,
{
    let mut screened = Screened::default();

    for record in records {
        if record.report_generated {
            continue;
        }

        match reportable_importance(&record) {
            Ok(Some(_)) => screened.eligible.push(record),
            Ok(None) => {}
            Err(warning) => {
                warning.log();
                screened.warnings.push(warning);
            }
        }
    }

    screened
}

/// Records that may be emailed: generated, not yet sent, and of a
/// reportable importance.
pub fn for_send<I>(candidates: I) -> Screened<SendCandidate>
where
    I: IntoIterator<Item = SendCandidate>,
{
    let mut screened = Screened::default();

    for candidate in candidates {
        let record = &candidate.record;
        if !record.report_generated || record.report_sent {
            continue;
        }

        match reportable_importance(record) {
            Ok(Some(_)) => screened.eligible.push(candidate),
            Ok(None) => {}
            Err(warning) => {
                warning.log();
                screened.warnings.push(warning);
            }
        }
    }

    screened
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Utc;

    pub fn record(id: i64, titular: &str, importance: &str) -> BulletinRecord {
        BulletinRecord {
            id,
            titular: titular.to_string(),
            bulletin_number: 500,
            bulletin_date: "05/03/2024".to_string(),
            order_number: id,
            applicant: None,
            agent: None,
            file_number: None,
            class: None,
            custody_mark: None,
            published_mark: Some(format!("MARCA {}", id)),
            importance_label: importance.to_string(),
            report_generated: false,
            report_sent: false,
            report_name: None,
            report_path: None,
            created_at: Utc::now(),
            report_generated_at: None,
            report_sent_at: None,
        }
    }

    pub fn generated(id: i64, titular: &str, importance: &str) -> BulletinRecord {
        let mut record = record(id, titular, importance);
        record.report_generated = true;
        record.report_generated_at = Some(Utc::now());
        record.report_name = Some(format!("Reporte_{}.txt", id));
        record.report_path = Some(format!("/reports/Reporte_{}.txt", id));
        record
    }

    pub fn candidate(record: BulletinRecord, email: Option<&str>) -> SendCandidate {
        SendCandidate {
            record,
            email: email.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_generation_excludes_pending_and_generated() {
        let records = vec![
            record(1, "Acme Corp", "Alta"),
            record(2, "Acme Corp", "Pendiente"),
            generated(3, "Acme Corp", "Media"),
            record(4, "Beta LLC", "Baja"),
        ];

        let screened = for_generation(records);

        let ids: Vec<i64> = screened.eligible.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert!(screened.warnings.is_empty());
    }

    #[test]
    fn test_generation_warns_on_unrecognized_importance() {
        let records = vec![record(1, "Acme Corp", "Urgente"), record(2, "Acme Corp", "alta")];

        let screened = for_generation(records);

        assert_eq!(screened.eligible.len(), 1);
        assert_eq!(screened.eligible[0].id, 2);
        assert_eq!(
            screened.warnings,
            vec![DataQualityWarning::UnrecognizedImportance {
                record_id: 1,
                titular: "Acme Corp".to_string(),
                value: "Urgente".to_string(),
            }]
        );
    }

    #[test]
    fn test_send_requires_generated_and_unsent() {
        let mut sent = generated(3, "Acme Corp", "Alta");
        sent.report_sent = true;

        let candidates = vec![
            candidate(record(1, "Acme Corp", "Alta"), Some("a@acme.test")),
            candidate(generated(2, "Acme Corp", "Alta"), Some("a@acme.test")),
            candidate(sent, Some("a@acme.test")),
            candidate(generated(4, "Acme Corp", "???"), Some("a@acme.test")),
        ];

        let screened = for_send(candidates);

        let ids: Vec<i64> = screened.eligible.iter().map(|c| c.record.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(screened.warnings.len(), 1);
    }

    #[test]
    fn test_pending_never_eligible_for_either_filter() {
        let odd = generated(1, "Acme Corp", "Pendiente");

        assert!(for_generation(vec![record(2, "Acme Corp", "Pendiente")])
            .eligible
            .is_empty());
        assert!(for_send(vec![candidate(odd, Some("a@acme.test"))])
            .eligible
            .is_empty());
    }
}
