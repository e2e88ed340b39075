//! Sin-reportes notifier
//!
//! Once per calendar month, tells every client with an email whose titular
//! got no generated report in that month. A delivered notice is written to
//! the notification log under the period key, and a later pass in the same
//! month finds it and skips the client, so re-running the job never sends a
//! second notice. A failed delivery writes nothing and stays eligible for the
//! next run.
//!
//! The check-then-send sequence takes no lock: two passes started at the
//! same moment can both see "not yet notified" before either logs.

use super::period::ReportingPeriod;
use super::settings::MailSettings;
use super::transport::{EmailTransport, OutgoingEmail};
use crate::database::{Client, NotificationLogEntry, Repository};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Terminal state of one client in a monthly pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "estado", rename_all = "snake_case")]
pub enum NoticeOutcome {
    /// Reports were generated this month; not a candidate
    HasReports { count: i64 },
    /// A notice for this period is already logged
    AlreadyNotified { sent_at: DateTime<Utc> },
    Sent,
    /// Delivery failed; nothing logged, retried next run
    SendFailed { error: String },
    /// Delivered, but the log write failed
    SentNotLogged { error: String },
    /// Log lookup failed even after repairing the schema
    LookupFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientNotice {
    pub titular: String,
    pub recipient: String,
    #[serde(flatten)]
    pub outcome: NoticeOutcome,
}

/// Aggregate result of one monthly pass
#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    /// Candidates: clients with email and zero generated reports this month
    #[serde(rename = "titulares_sin_reportes")]
    pub titulares_without_reports: usize,
    #[serde(rename = "emails_enviados")]
    pub emails_sent: usize,
    #[serde(rename = "ya_notificados")]
    pub already_notified: usize,
    #[serde(rename = "errores")]
    pub errors: usize,
    #[serde(rename = "fecha_verificacion")]
    pub verified_at: DateTime<Utc>,
    pub period_key: String,
    /// Columns added to the notification log during this pass
    pub schema_repaired: Vec<&'static str>,
    #[serde(rename = "detalle")]
    pub details: Vec<ClientNotice>,
}

impl MonthlySummary {
    fn new(period: &ReportingPeriod, verified_at: DateTime<Utc>) -> Self {
        Self {
            titulares_without_reports: 0,
            emails_sent: 0,
            already_notified: 0,
            errors: 0,
            verified_at,
            period_key: period.key(),
            schema_repaired: Vec::new(),
            details: Vec::new(),
        }
    }

    fn record(&mut self, titular: &str, recipient: &str, outcome: NoticeOutcome) {
        match &outcome {
            NoticeOutcome::HasReports { .. } => {}
            NoticeOutcome::AlreadyNotified { .. } => self.already_notified += 1,
            NoticeOutcome::Sent => self.emails_sent += 1,
            NoticeOutcome::SentNotLogged { .. } => {
                self.emails_sent += 1;
                self.errors += 1;
            }
            NoticeOutcome::SendFailed { .. } | NoticeOutcome::LookupFailed { .. } => {
                self.errors += 1
            }
        }

        self.details.push(ClientNotice {
            titular: titular.to_string(),
            recipient: recipient.to_string(),
            outcome,
        });
    }
}

/// Result of checking the log for one candidate
enum Evaluation {
    AlreadyNotified(NotificationLogEntry),
    EligibleToNotify,
}

/// Sends the monthly "no reports this period" notices
#[derive(Clone)]
pub struct NotifierService {
    repo: Repository,
    transport: Arc<dyn EmailTransport>,
    mail: MailSettings,
}

impl NotifierService {
    pub fn new(repo: Repository, transport: Arc<dyn EmailTransport>, mail: MailSettings) -> Self {
        Self {
            repo,
            transport,
            mail,
        }
    }

    /// Run the pass for the current month
    pub async fn run_monthly(&self) -> Result<MonthlySummary> {
        self.run_at(Utc::now()).await
    }

    /// Run the pass for the month containing `now`, stamping logs with `now`
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<MonthlySummary> {
        let period = ReportingPeriod::containing(now.date_naive());
        let period_key = period.key();
        let mut summary = MonthlySummary::new(&period, now);

        tracing::info!(
            "Starting sin-reportes pass for {} ({} to {})",
            period_key,
            period.first_day,
            period.last_day
        );

        let clients = self.repo.list_clients().await?;

        for client in &clients {
            let Some(recipient) = client.contact_email() else {
                tracing::debug!("Skipping {}: no email on file", client.titular);
                continue;
            };

            let count = self
                .repo
                .count_generated_in_period(&client.titular, period.first_day, period.last_day)
                .await?;
            if count > 0 {
                summary.record(&client.titular, recipient, NoticeOutcome::HasReports { count });
                continue;
            }

            summary.titulares_without_reports += 1;

            let evaluation = match self.evaluate(&client.titular, &period_key, &mut summary).await {
                Ok(evaluation) => evaluation,
                Err(e) if e.is_missing_schema() => {
                    tracing::error!("Notification log unreadable for {}: {}", client.titular, e);
                    summary.record(
                        &client.titular,
                        recipient,
                        NoticeOutcome::LookupFailed {
                            error: e.to_string(),
                        },
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome = match evaluation {
                Evaluation::AlreadyNotified(entry) => {
                    tracing::info!(
                        "{} already notified for {} on {}",
                        client.titular,
                        period_key,
                        entry.sent_at
                    );
                    NoticeOutcome::AlreadyNotified {
                        sent_at: entry.sent_at,
                    }
                }
                Evaluation::EligibleToNotify => {
                    self.deliver(client, recipient, &period, now, &mut summary)
                        .await?
                }
            };

            summary.record(&client.titular, recipient, outcome);
        }

        tracing::info!(
            "Sin-reportes pass {} done: {} without reports, {} sent, {} already notified, {} errors",
            period_key,
            summary.titulares_without_reports,
            summary.emails_sent,
            summary.already_notified,
            summary.errors
        );

        Ok(summary)
    }

    /// Look up the period's log entry, repairing the log schema once per pass
    async fn evaluate(
        &self,
        titular: &str,
        period_key: &str,
        summary: &mut MonthlySummary,
    ) -> Result<Evaluation> {
        let entry = match self.repo.find_notification_log_entry(titular, period_key).await {
            Err(e) if e.is_missing_schema() && summary.schema_repaired.is_empty() => {
                self.repair_log_schema(&e, summary).await?;
                self.repo.find_notification_log_entry(titular, period_key).await?
            }
            other => other?,
        };

        Ok(match entry {
            Some(entry) if entry.is_sent() => Evaluation::AlreadyNotified(entry),
            _ => Evaluation::EligibleToNotify,
        })
    }

    /// Repair the log schema; runs at most once per pass
    async fn repair_log_schema(&self, cause: &AppError, summary: &mut MonthlySummary) -> Result<()> {
        tracing::warn!("Notification log schema incomplete ({}); repairing", cause);
        let added = self.repo.ensure_notification_log_schema().await?;
        summary.schema_repaired = if added.is_empty() {
            vec!["notification_log"]
        } else {
            added
        };
        Ok(())
    }

    async fn deliver(
        &self,
        client: &Client,
        recipient: &str,
        period: &ReportingPeriod,
        now: DateTime<Utc>,
        summary: &mut MonthlySummary,
    ) -> Result<NoticeOutcome> {
        let marks = self.repo.list_marks_for_titular(&client.titular).await?;
        let email = self.compose(client, recipient, period, &marks);

        if let Err(e) = self.transport.send(&email).await {
            tracing::warn!("Notice to {} for {} failed: {}", recipient, client.titular, e);
            return Ok(NoticeOutcome::SendFailed {
                error: e.to_string(),
            });
        }

        let entry = NotificationLogEntry::sent(recipient, &client.titular, &period.key(), now);
        let logged = match self.repo.insert_notification_log_entry(&entry).await {
            Err(e) if e.is_missing_schema() && summary.schema_repaired.is_empty() => {
                self.repair_log_schema(&e, summary).await?;
                self.repo.insert_notification_log_entry(&entry).await
            }
            other => other,
        };

        match logged {
            Ok(()) => {
                tracing::info!("Notice sent to {} for {}", recipient, client.titular);
                Ok(NoticeOutcome::Sent)
            }
            Err(e) => {
                tracing::error!(
                    "Notice to {} delivered but not logged for {}: {}",
                    recipient,
                    client.titular,
                    e
                );
                Ok(NoticeOutcome::SentNotLogged {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Assemble the notice email for one client
    fn compose(
        &self,
        client: &Client,
        recipient: &str,
        period: &ReportingPeriod,
        marks: &[String],
    ) -> OutgoingEmail {
        let month = period.label_es();
        let subject = format!(
            "{} - {} - {}",
            self.mail.notice_subject_prefix, client.titular, month
        );

        let mut lines = vec![
            "Estimado cliente,".to_string(),
            String::new(),
            format!(
                "Le informamos que durante {} no se registraron publicaciones en boletín \
                 con reporte para el titular {}.",
                month, client.titular
            ),
            String::new(),
        ];

        if marks.is_empty() {
            lines.push(
                "Por el momento no tenemos marcas registradas a su nombre en los boletines \
                 revisados."
                    .to_string(),
            );
        } else {
            let limit = self.mail.max_marks_listed as usize;
            lines.push("Marcas en seguimiento:".to_string());
            lines.extend(marks.iter().take(limit).map(|mark| format!("  - {}", mark)));
            if marks.len() > limit {
                lines.push(format!("  ... y {} más.", marks.len() - limit));
            }
        }

        lines.push(String::new());
        lines.push(
            "Seguiremos revisando cada boletín y le avisaremos ante cualquier novedad.".to_string(),
        );
        lines.push(String::new());
        lines.push("Atentamente,".to_string());
        lines.push(self.mail.company_name.clone());
        let body = lines.join("\n") + "\n";

        OutgoingEmail {
            recipient: recipient.to_string(),
            subject,
            body,
            attachments: Vec::new(),
        }
    }
}
