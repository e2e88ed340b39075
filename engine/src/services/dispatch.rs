//! Report pipeline
//!
//! Ties the eligibility filter, grouping engine and transition applier to
//! the record store and the outbound collaborators. A failing collaborator
//! only fails its own group; nothing is marked for it and the next run picks
//! it up again.

use super::eligibility::{self, DataQualityWarning, Screened};
use super::grouping::{self, GroupingOutcome, SendGroup, SkippedGroup};
use super::settings::MailSettings;
use super::transitions::{TransitionOutcome, TransitionService};
use super::transport::{EmailTransport, OutgoingEmail, ReportRenderer, ReportRequest};
use crate::config::REPORT_DATE_STAMP_FORMAT;
use crate::database::{BulletinRecord, Importance, Repository, SendCandidate};
use crate::error::Result;
use crate::storage::{file_slug, ReportStore};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// A group whose collaborator call failed
#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    pub titular: String,
    pub importance: Importance,
    pub record_ids: Vec<i64>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub titular: String,
    pub importance: Importance,
    pub report_name: String,
    pub report_path: String,
    #[serde(flatten)]
    pub transition: TransitionOutcome,
}

/// Result of one report generation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationRun {
    pub generated: Vec<GeneratedReport>,
    pub failed: Vec<GroupFailure>,
    pub warnings: Vec<DataQualityWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveredGroup {
    pub titular: String,
    pub importance: Importance,
    pub recipient: String,
    pub attachments: Vec<PathBuf>,
    /// Records left unsent because their report file is missing
    pub unattached: Vec<i64>,
    #[serde(flatten)]
    pub transition: TransitionOutcome,
}

/// Result of one report send run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendRun {
    pub sent: Vec<DeliveredGroup>,
    pub failed: Vec<GroupFailure>,
    #[serde(rename = "sinEmail")]
    pub sin_email: Vec<SkippedGroup>,
    #[serde(rename = "sinArchivo")]
    pub sin_archivo: Vec<SkippedGroup>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Drives report generation and delivery against the record store
#[derive(Clone)]
pub struct DispatchService {
    repo: Repository,
    transitions: TransitionService,
    store: ReportStore,
    mail: MailSettings,
}

impl DispatchService {
    pub fn new(repo: Repository, store: ReportStore, mail: MailSettings) -> Self {
        Self {
            transitions: TransitionService::new(repo.clone()),
            repo,
            store,
            mail,
        }
    }

    /// Records that may have a report generated
    pub async fn eligible_for_generation(&self) -> Result<Screened<BulletinRecord>> {
        let records = self.repo.list_ungenerated().await?;
        Ok(eligibility::for_generation(records))
    }

    /// Records that may be emailed, with their titular's email
    pub async fn eligible_for_send(&self) -> Result<Screened<SendCandidate>> {
        let candidates = self.repo.list_unsent().await?;
        Ok(eligibility::for_send(candidates))
    }

    /// Screen and group everything ready to send, without sending
    pub async fn run_eligibility_and_grouping(&self) -> Result<GroupingOutcome> {
        let (outcome, _) = self.screen_and_group().await?;
        Ok(outcome)
    }

    pub async fn apply_generation(
        &self,
        ids: &[i64],
        report_name: &str,
        report_path: &str,
    ) -> Result<TransitionOutcome> {
        self.transitions
            .mark_generated(ids, report_name, report_path)
            .await
    }

    pub async fn apply_send(&self, ids: &[i64]) -> Result<TransitionOutcome> {
        self.transitions.mark_sent(ids).await
    }

    /// Render one report per (titular, importance) group of generation
    /// eligible records and mark its records as generated.
    pub async fn generate_pending_reports(
        &self,
        renderer: &dyn ReportRenderer,
    ) -> Result<GenerationRun> {
        let screened = self.eligible_for_generation().await?;
        let issued_on = Utc::now().date_naive();
        let mut run = GenerationRun {
            warnings: screened.warnings,
            ..GenerationRun::default()
        };

        for (titular, importance, records) in grouping::partition(screened.eligible) {
            let record_ids: Vec<i64> = records.iter().map(|r| r.id).collect();
            let report_name = self
                .unused_report_name(&titular, importance, issued_on, renderer.extension())
                .await;

            let request = ReportRequest {
                titular: &titular,
                importance,
                report_name: &report_name,
                records: &records,
                issued_on,
            };

            let path = match renderer.render(&request).await {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Report for {} ({}) failed: {}", titular, importance, e);
                    run.failed.push(GroupFailure {
                        titular,
                        importance,
                        record_ids,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let report_path = path.to_string_lossy().into_owned();
            let transition = self
                .transitions
                .mark_generated(&record_ids, &report_name, &report_path)
                .await?;

            tracing::info!(
                "Generated {} for {} ({}, {} record(s))",
                report_name,
                titular,
                importance,
                transition.applied.len()
            );

            run.generated.push(GeneratedReport {
                titular,
                importance,
                report_name,
                report_path,
                transition,
            });
        }

        Ok(run)
    }

    /// Email every send group with its report files attached and mark the
    /// attached records as sent.
    pub async fn send_pending_reports(&self, transport: &dyn EmailTransport) -> Result<SendRun> {
        let (outcome, with_file) = self.screen_and_group().await?;
        let mut run = SendRun {
            sin_email: outcome.sin_email,
            sin_archivo: outcome.sin_archivo,
            warnings: outcome.warnings,
            ..SendRun::default()
        };

        for group in outcome.send_groups {
            let Some(recipient) = group.email.clone() else {
                continue;
            };

            let (attached, unattached): (Vec<&BulletinRecord>, Vec<&BulletinRecord>) = group
                .records
                .iter()
                .partition(|record| with_file.contains(&record.id));

            let mut attachments: Vec<PathBuf> = Vec::new();
            for path in attached.iter().filter_map(|r| r.report_file()) {
                let path = self.store.resolve(path);
                if !attachments.contains(&path) {
                    attachments.push(path);
                }
            }

            let email = OutgoingEmail {
                recipient: recipient.clone(),
                subject: format!(
                    "{} - {} - {}",
                    self.mail.report_subject_prefix, group.importance, group.titular
                ),
                body: self.compose_report_body(&group),
                attachments: attachments.clone(),
            };

            if let Err(e) = transport.send(&email).await {
                tracing::warn!(
                    "Sending {} report to {} failed: {}",
                    group.importance,
                    recipient,
                    e
                );
                run.failed.push(GroupFailure {
                    titular: group.titular.clone(),
                    importance: group.importance,
                    record_ids: group.record_ids(),
                    error: e.to_string(),
                });
                continue;
            }

            let attached_ids: Vec<i64> = attached.iter().map(|r| r.id).collect();
            let transition = self.transitions.mark_sent(&attached_ids).await?;

            tracing::info!(
                "Sent {} report for {} to {} ({} file(s))",
                group.importance,
                group.titular,
                recipient,
                attachments.len()
            );

            run.sent.push(DeliveredGroup {
                titular: group.titular.clone(),
                importance: group.importance,
                recipient,
                attachments,
                unattached: unattached.iter().map(|r| r.id).collect(),
                transition,
            });
        }

        Ok(run)
    }

    /// Group send candidates, returning the ids whose report file exists
    async fn screen_and_group(&self) -> Result<(GroupingOutcome, HashSet<i64>)> {
        let screened = self.eligible_for_send().await?;

        let mut with_file = HashSet::new();
        for candidate in &screened.eligible {
            if let Some(path) = candidate.record.report_file() {
                if self.store.exists(path).await {
                    with_file.insert(candidate.record.id);
                }
            }
        }

        let mut outcome =
            grouping::group_for_send(screened.eligible, |record| with_file.contains(&record.id));

        let mut warnings = screened.warnings;
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;

        Ok((outcome, with_file))
    }

    /// `Reporte_<titular>_<importance>_<YYYYMMDD>.<ext>`, suffixed when
    /// a report of that name already exists
    async fn unused_report_name(
        &self,
        titular: &str,
        importance: Importance,
        issued_on: NaiveDate,
        extension: &str,
    ) -> String {
        let stem = format!(
            "Reporte_{}_{}_{}",
            file_slug(titular),
            importance.label(),
            issued_on.format(REPORT_DATE_STAMP_FORMAT)
        );

        let mut name = format!("{}.{}", stem, extension);
        let mut n = 2;
        while self.store.exists(&name).await {
            name = format!("{}_{}.{}", stem, n, extension);
            n += 1;
        }
        name
    }

    fn compose_report_body(&self, group: &SendGroup) -> String {
        let mut lines = vec![
            "Estimado cliente,".to_string(),
            String::new(),
            format!(
                "Adjuntamos el reporte de publicaciones en boletín de importancia {} para {}.",
                group.importance, group.titular
            ),
            String::new(),
            "Publicaciones incluidas:".to_string(),
        ];
        lines.extend(group.records.iter().map(|record| {
            format!(
                "  - Boletín {}, orden {}: {}",
                record.bulletin_number,
                record.order_number,
                record.mark_label()
            )
        }));
        lines.push(String::new());
        lines.push("Atentamente,".to_string());
        lines.push(self.mail.company_name.clone());

        lines.join("\n") + "\n"
    }
}
