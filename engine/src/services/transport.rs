//! Outbound collaborators
//!
//! Report rendering and email delivery sit behind narrow traits so the
//! pipelines never depend on a concrete PDF library or mail server.
//! The default implementations keep everything on disk: a plain-text
//! report renderer and an outbox that queues messages as JSON files.

use crate::config::BULLETIN_DATE_FORMAT;
use crate::database::{BulletinRecord, Importance};
use crate::storage::ReportStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Message handed to an [`EmailTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
}

#[derive(Debug, Clone, Error)]
#[error("email transport failed: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}

/// Everything a renderer needs to produce one report
#[derive(Debug, Clone)]
pub struct ReportRequest<'a> {
    pub titular: &'a str,
    pub importance: Importance,
    pub report_name: &'a str,
    /// Ascending bulletin number, then order number
    pub records: &'a [BulletinRecord],
    pub issued_on: NaiveDate,
}

#[derive(Debug, Clone, Error)]
#[error("report rendering failed: {0}")]
pub struct RenderError(pub String);

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// File extension of produced reports, without the dot
    fn extension(&self) -> &'static str;

    /// Render the report and return where it was stored
    async fn render(&self, request: &ReportRequest<'_>) -> Result<PathBuf, RenderError>;
}

/// Renders reports as plain text into the report store
#[derive(Clone)]
pub struct PlainTextReportRenderer {
    store: ReportStore,
    company_name: String,
}

impl PlainTextReportRenderer {
    pub fn new(store: ReportStore, company_name: impl Into<String>) -> Self {
        Self {
            store,
            company_name: company_name.into(),
        }
    }

    fn compose(&self, request: &ReportRequest<'_>) -> String {
        let mut lines = vec![
            self.company_name.clone(),
            "REPORTE DE PUBLICACIONES EN BOLETÍN".to_string(),
            format!("Titular: {}", request.titular),
            format!("Importancia: {}", request.importance),
            format!(
                "Fecha de emisión: {}",
                request.issued_on.format(BULLETIN_DATE_FORMAT)
            ),
            format!("Publicaciones: {}", request.records.len()),
        ];

        for record in request.records {
            lines.push(String::new());
            lines.push(format!(
                "Boletín {} ({}) - Orden {}",
                record.bulletin_number, record.bulletin_date, record.order_number
            ));
            let fields = [
                ("Marca publicada", &record.published_mark),
                ("Marca en custodia", &record.custody_mark),
                ("Solicitante", &record.applicant),
                ("Agente", &record.agent),
                ("Expediente", &record.file_number),
                ("Clase", &record.class),
            ];
            for (label, value) in fields {
                if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                    lines.push(format!("  {}: {}", label, value.trim()));
                }
            }
        }

        lines.join("\n") + "\n"
    }
}

#[async_trait]
impl ReportRenderer for PlainTextReportRenderer {
    fn extension(&self) -> &'static str {
        "txt"
    }

    async fn render(&self, request: &ReportRequest<'_>) -> Result<PathBuf, RenderError> {
        if request.records.is_empty() {
            return Err(RenderError(format!(
                "no records to report for {}",
                request.titular
            )));
        }

        let text = self.compose(request);
        self.store
            .write(request.report_name, text.as_bytes())
            .await
            .map_err(|e| RenderError(e.to_string()))
    }
}

/// Queued message as written to the outbox directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEmail {
    pub id: String,
    pub queued_at: DateTime<Utc>,
    #[serde(flatten)]
    pub email: OutgoingEmail,
}

/// Queues each message as a JSON file for an external mailer to pick up
#[derive(Clone)]
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Read back every queued message, oldest first
    pub async fn queued(&self) -> std::io::Result<Vec<QueuedEmail>> {
        let mut messages = Vec::new();
        if fs::metadata(&self.dir).await.is_err() {
            return Ok(messages);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<QueuedEmail>(&content) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("Skipping unreadable outbox file {:?}: {}", path, e),
            }
        }

        messages.sort_by_key(|m| m.queued_at);
        Ok(messages)
    }
}

#[async_trait]
impl EmailTransport for OutboxTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        if !email.recipient.contains('@') {
            return Err(TransportError(format!(
                "invalid recipient {:?}",
                email.recipient
            )));
        }

        for attachment in &email.attachments {
            if fs::metadata(attachment).await.is_err() {
                return Err(TransportError(format!(
                    "attachment not found: {}",
                    attachment.display()
                )));
            }
        }

        let message = QueuedEmail {
            id: Uuid::new_v4().to_string(),
            queued_at: Utc::now(),
            email: email.clone(),
        };
        let content =
            serde_json::to_string_pretty(&message).map_err(|e| TransportError(e.to_string()))?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let path = self.dir.join(format!(
            "{}_{}.json",
            message.queued_at.format("%Y%m%dT%H%M%S%f"),
            message.id
        ));
        fs::write(&path, content)
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        tracing::info!("Queued email to {} at {:?}", email.recipient, path);
        Ok(())
    }
}

/// In-memory collaborators for pipeline tests
#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Records every message; fails for recipients listed in `failing`
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<OutgoingEmail>>,
        pub failing: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub fn fail_for(&self, recipient: &str) {
            self.failing.lock().unwrap().push(recipient.to_string());
        }

        pub fn recover(&self) {
            self.failing.lock().unwrap().clear();
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
            if self.failing.lock().unwrap().contains(&email.recipient) {
                return Err(TransportError("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}
