//! Database models
//!
//! Rust structs representing the bulletin, client and notification-log
//! tables. All models use serde so outcomes can be printed as JSON.

use crate::config::{
    IMPORTANCE_HIGH, IMPORTANCE_LOW, IMPORTANCE_MEDIUM, IMPORTANCE_PENDING, NOTICE_STATUS_SENT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Importance assigned to a bulletin record by a human reviewer.
///
/// Ordering follows urgency, so `High` sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Importance {
    #[serde(rename = "Pendiente")]
    Pending,
    #[serde(rename = "Baja")]
    Low,
    #[serde(rename = "Media")]
    Medium,
    #[serde(rename = "Alta")]
    High,
}

impl Importance {
    /// Levels that may carry a report.
    pub const REPORTABLE: [Importance; 3] = [Importance::Low, Importance::Medium, Importance::High];

    /// Label stored in the `importance` column
    pub fn label(self) -> &'static str {
        match self {
            Importance::Pending => IMPORTANCE_PENDING,
            Importance::Low => IMPORTANCE_LOW,
            Importance::Medium => IMPORTANCE_MEDIUM,
            Importance::High => IMPORTANCE_HIGH,
        }
    }

    pub fn is_reportable(self) -> bool {
        !matches!(self, Importance::Pending)
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a stored importance label matches no known level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized importance value: {0:?}")]
pub struct UnknownImportance(pub String);

impl FromStr for Importance {
    type Err = UnknownImportance;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Spanish labels are canonical; English names come from older imports
        match s.trim().to_lowercase().as_str() {
            "pendiente" | "pending" => Ok(Importance::Pending),
            "baja" | "low" => Ok(Importance::Low),
            "media" | "medium" => Ok(Importance::Medium),
            "alta" | "high" => Ok(Importance::High),
            _ => Err(UnknownImportance(s.to_string())),
        }
    }
}

/// One trademark-bulletin line item
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BulletinRecord {
    pub id: i64,
    pub titular: String,
    pub bulletin_number: i64,
    /// External DD/MM/YYYY string, kept as published
    pub bulletin_date: String,
    pub order_number: i64,
    pub applicant: Option<String>,
    pub agent: Option<String>,
    pub file_number: Option<String>,
    pub class: Option<String>,
    pub custody_mark: Option<String>,
    pub published_mark: Option<String>,
    /// Raw label as stored; see [`BulletinRecord::importance`]
    #[sqlx(rename = "importance")]
    #[serde(rename = "importance")]
    pub importance_label: String,
    pub report_generated: bool,
    pub report_sent: bool,
    pub report_name: Option<String>,
    pub report_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub report_generated_at: Option<DateTime<Utc>>,
    pub report_sent_at: Option<DateTime<Utc>>,
}

impl BulletinRecord {
    /// Parsed importance level
    pub fn importance(&self) -> std::result::Result<Importance, UnknownImportance> {
        self.importance_label.parse()
    }

    /// Name used when listing this record to a client
    pub fn mark_label(&self) -> &str {
        self.published_mark
            .as_deref()
            .or(self.custody_mark.as_deref())
            .map(str::trim)
            .filter(|mark| !mark.is_empty())
            .unwrap_or("(sin denominación)")
    }

    /// Non-empty report path, if one was recorded
    pub fn report_file(&self) -> Option<&str> {
        self.report_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
    }
}

/// Bulletin record joined with its titular's contact email
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SendCandidate {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub record: BulletinRecord,
    pub email: Option<String>,
}

/// Ingest bulletin request
#[derive(Debug, Clone, Deserialize)]
pub struct NewBulletinRecord {
    pub titular: String,
    pub bulletin_number: i64,
    pub bulletin_date: String,
    pub order_number: i64,
    #[serde(default)]
    pub applicant: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub file_number: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub custody_mark: Option<String>,
    #[serde(default)]
    pub published_mark: Option<String>,
    /// Defaults to pending review
    #[serde(default)]
    pub importance: Option<String>,
    /// Defaults to the insertion time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One titular's contact profile
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub titular: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Client {
    /// Trimmed email, `None` when absent or blank
    pub fn contact_email(&self) -> Option<&str> {
        normalize_email(self.email.as_deref())
    }
}

/// Trim an optional email, treating blank values as missing
pub fn normalize_email(email: Option<&str>) -> Option<&str> {
    email.map(str::trim).filter(|e| !e.is_empty())
}

/// Record of a delivered "sin reportes" notice
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationLogEntry {
    pub id: String,
    pub recipient: String,
    pub titular: String,
    /// MM-YYYY
    pub period_key: String,
    pub sent_at: DateTime<Utc>,
    pub status: String,
}

impl NotificationLogEntry {
    /// Entry for a notice that was just delivered
    pub fn sent(recipient: &str, titular: &str, period_key: &str, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recipient: recipient.to_string(),
            titular: titular.to_string(),
            period_key: period_key.to_string(),
            sent_at,
            status: NOTICE_STATUS_SENT.to_string(),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == NOTICE_STATUS_SENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_parses_spanish_and_english_labels() {
        assert_eq!("Alta".parse::<Importance>(), Ok(Importance::High));
        assert_eq!(" media ".parse::<Importance>(), Ok(Importance::Medium));
        assert_eq!("LOW".parse::<Importance>(), Ok(Importance::Low));
        assert_eq!("Pendiente".parse::<Importance>(), Ok(Importance::Pending));
        assert_eq!(
            "Urgente".parse::<Importance>(),
            Err(UnknownImportance("Urgente".to_string()))
        );
    }

    #[test]
    fn test_importance_labels_round_trip_through_storage_labels() {
        for level in [
            Importance::Pending,
            Importance::Low,
            Importance::Medium,
            Importance::High,
        ] {
            assert_eq!(level.label().parse::<Importance>(), Ok(level));
        }
        assert!(!Importance::Pending.is_reportable());
        assert!(Importance::REPORTABLE.iter().all(|level| level.is_reportable()));
    }

    #[test]
    fn test_client_contact_email_ignores_blank() {
        let mut client = Client {
            titular: "Acme Corp".to_string(),
            email: Some("   ".to_string()),
            phone: None,
            address: None,
            city: None,
        };
        assert_eq!(client.contact_email(), None);

        client.email = Some(" legal@acme.test ".to_string());
        assert_eq!(client.contact_email(), Some("legal@acme.test"));
    }

    #[test]
    fn test_notification_log_entry_sent() {
        let entry = NotificationLogEntry::sent("a@b.test", "Beta LLC", "03-2024", Utc::now());
        assert!(entry.is_sent());
        assert_eq!(entry.period_key, "03-2024");
        assert!(!entry.id.is_empty());
    }
}
