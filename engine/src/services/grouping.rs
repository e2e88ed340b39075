//! Grouping engine
//!
//! Partitions eligible records into send groups keyed by (titular, importance).
//! A titular with records at several importance levels always gets one group
//! per level, so a single email never mixes urgencies.

use super::eligibility::DataQualityWarning;
use crate::database::{normalize_email, BulletinRecord, Importance, SendCandidate};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Grouping key. Within a titular, more urgent levels sort first.
type GroupKey = (String, Reverse<Importance>);

/// One outbound email: a titular, one importance level, and its records
#[derive(Debug, Clone, Serialize)]
pub struct SendGroup {
    pub titular: String,
    pub importance: Importance,
    pub email: Option<String>,
    /// Ascending bulletin number, then order number
    pub records: Vec<BulletinRecord>,
}

impl SendGroup {
    pub fn record_ids(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.id).collect()
    }
}

/// A group routed away from sending, identified by its key and records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedGroup {
    pub titular: String,
    pub importance: Importance,
    pub record_ids: Vec<i64>,
}

/// Result of grouping the send-eligible records
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupingOutcome {
    #[serde(rename = "sendGroups")]
    pub send_groups: Vec<SendGroup>,
    /// Groups whose titular has no email on file
    #[serde(rename = "sinEmail")]
    pub sin_email: Vec<SkippedGroup>,
    /// Groups none of whose records has a report file
    #[serde(rename = "sinArchivo")]
    pub sin_archivo: Vec<SkippedGroup>,
    pub warnings: Vec<DataQualityWarning>,
}

impl GroupingOutcome {
    /// Titulares with at least one group in the `sin_email` bucket
    pub fn sin_email_titulares(&self) -> Vec<&str> {
        distinct_titulares(&self.sin_email)
    }

    /// Titulares with at least one group in the `sin_archivo` bucket
    pub fn sin_archivo_titulares(&self) -> Vec<&str> {
        distinct_titulares(&self.sin_archivo)
    }
}

fn distinct_titulares(groups: &[SkippedGroup]) -> Vec<&str> {
    let mut titulares: Vec<&str> = groups.iter().map(|g| g.titular.as_str()).collect();
    titulares.dedup();
    titulares
}

/// Partition records by (titular, importance).
///
/// Records whose importance cannot be parsed or is pending are left out;
/// the eligibility filter has already reported them.
pub fn partition<I>(records: I) -> Vec<(String, Importance, Vec<BulletinRecord>)>
where
    I: IntoIterator<Item = BulletinRecord>,
{
    let mut groups: BTreeMap<GroupKey, Vec<BulletinRecord>> = BTreeMap::new();

    for record in records {
        let importance = match record.importance() {
            Ok(level) if level.is_reportable() => level,
            _ => continue,
        };
        groups
            .entry((record.titular.clone(), Reverse(importance)))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((titular, Reverse(importance)), mut records)| {
            records.sort_by_key(|r| (r.bulletin_number, r.order_number, r.id));
            (titular, importance, records)
        })
        .collect()
}

/// Group send-eligible candidates and route each group to sending,
/// `sin_email` or `sin_archivo`.
///
/// `has_report_file` tells whether a record's report file can be attached.
/// A group with neither an email nor a file lands in `sin_email`, since it
/// could not be delivered either way.
pub fn group_for_send<I, F>(candidates: I, has_report_file: F) -> GroupingOutcome
where
    I: IntoIterator<Item = SendCandidate>,
    F: Fn(&BulletinRecord) -> bool,
{
    let mut emails: BTreeMap<String, String> = BTreeMap::new();
    let mut records = Vec::new();

    for candidate in candidates {
        if let Some(email) = normalize_email(candidate.email.as_deref()) {
            emails
                .entry(candidate.record.titular.clone())
                .or_insert_with(|| email.to_string());
        }
        records.push(candidate.record);
    }

    let mut outcome = GroupingOutcome::default();

    for (titular, importance, records) in partition(records) {
        let record_ids: Vec<i64> = records.iter().map(|r| r.id).collect();

        let Some(email) = emails.get(&titular).cloned() else {
            let warning = DataQualityWarning::MissingEmail {
                titular: titular.clone(),
                importance,
            };
            warning.log();
            outcome.warnings.push(warning);
            outcome.sin_email.push(SkippedGroup {
                titular,
                importance,
                record_ids,
            });
            continue;
        };

        if !records.iter().any(|r| has_report_file(r)) {
            let warning = DataQualityWarning::MissingReportFile {
                titular: titular.clone(),
                importance,
                record_ids: record_ids.clone(),
            };
            warning.log();
            outcome.warnings.push(warning);
            outcome.sin_archivo.push(SkippedGroup {
                titular,
                importance,
                record_ids,
            });
            continue;
        }

        outcome.send_groups.push(SendGroup {
            titular,
            importance,
            email: Some(email),
            records,
        });
    }

    tracing::info!(
        "Grouped send candidates: {} groups, {} without email, {} without report file",
        outcome.send_groups.len(),
        outcome.sin_email.len(),
        outcome.sin_archivo.len()
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::eligibility::fixtures::{candidate, generated};
    use std::collections::HashSet;

    fn always(_: &BulletinRecord) -> bool {
        true
    }

    #[test]
    fn test_one_group_per_importance_level() {
        let candidates = vec![
            candidate(generated(1, "Acme Corp", "Baja"), Some("a@acme.test")),
            candidate(generated(2, "Acme Corp", "Media"), Some("a@acme.test")),
            candidate(generated(3, "Acme Corp", "Alta"), Some("a@acme.test")),
        ];

        let outcome = group_for_send(candidates, always);

        assert_eq!(outcome.send_groups.len(), 3);
        let levels: Vec<Importance> = outcome.send_groups.iter().map(|g| g.importance).collect();
        assert_eq!(
            levels,
            vec![Importance::High, Importance::Medium, Importance::Low]
        );
    }

    #[test]
    fn test_group_keys_are_unique() {
        let candidates = vec![
            candidate(generated(1, "Acme Corp", "Alta"), Some("a@acme.test")),
            candidate(generated(2, "Beta LLC", "Alta"), Some("b@beta.test")),
            candidate(generated(3, "Acme Corp", "alta"), Some("a@acme.test")),
            candidate(generated(4, "Beta LLC", "Baja"), Some("b@beta.test")),
        ];

        let outcome = group_for_send(candidates, always);

        let keys: HashSet<(String, Importance)> = outcome
            .send_groups
            .iter()
            .map(|g| (g.titular.clone(), g.importance))
            .collect();
        assert_eq!(keys.len(), outcome.send_groups.len());
        assert_eq!(outcome.send_groups.len(), 3);
        assert_eq!(outcome.send_groups[0].record_ids(), vec![1, 3]);
    }

    #[test]
    fn test_records_ordered_by_bulletin_then_order_number() {
        let mut late = generated(1, "Acme Corp", "Alta");
        late.bulletin_number = 520;
        late.order_number = 1;
        let mut early_second = generated(2, "Acme Corp", "Alta");
        early_second.bulletin_number = 510;
        early_second.order_number = 9;
        let mut early_first = generated(3, "Acme Corp", "Alta");
        early_first.bulletin_number = 510;
        early_first.order_number = 4;

        let candidates = vec![late, early_second, early_first]
            .into_iter()
            .map(|r| candidate(r, Some("a@acme.test")));

        let outcome = group_for_send(candidates, always);

        assert_eq!(outcome.send_groups[0].record_ids(), vec![3, 2, 1]);
    }

    #[test]
    fn test_missing_email_routes_every_group_to_sin_email() {
        let candidates = vec![
            candidate(generated(1, "Acme Corp", "Alta"), None),
            candidate(generated(2, "Acme Corp", "Alta"), None),
            candidate(generated(3, "Acme Corp", "Media"), Some("  ")),
        ];

        let outcome = group_for_send(candidates, always);

        assert!(outcome.send_groups.is_empty());
        assert_eq!(outcome.sin_email.len(), 2);
        assert_eq!(outcome.sin_email[0].importance, Importance::High);
        assert_eq!(outcome.sin_email[0].record_ids, vec![1, 2]);
        assert_eq!(outcome.sin_email[1].importance, Importance::Medium);
        assert_eq!(outcome.sin_email_titulares(), vec!["Acme Corp"]);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_missing_files_route_to_sin_archivo() {
        let with_file = generated(1, "Acme Corp", "Alta");
        let mut without_file = generated(2, "Acme Corp", "Alta");
        without_file.report_path = None;
        let mut lonely = generated(3, "Acme Corp", "Baja");
        lonely.report_path = None;

        let candidates = vec![
            candidate(with_file, Some("a@acme.test")),
            candidate(without_file, Some("a@acme.test")),
            candidate(lonely, Some("a@acme.test")),
        ];

        let outcome = group_for_send(candidates, |r| r.report_file().is_some());

        assert_eq!(outcome.send_groups.len(), 1);
        assert_eq!(outcome.send_groups[0].record_ids(), vec![1, 2]);
        assert_eq!(
            outcome.sin_archivo,
            vec![SkippedGroup {
                titular: "Acme Corp".to_string(),
                importance: Importance::Low,
                record_ids: vec![3],
            }]
        );
        assert_eq!(outcome.sin_archivo_titulares(), vec!["Acme Corp"]);
    }
}
