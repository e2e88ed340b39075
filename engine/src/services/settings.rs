//! Settings service
//!
//! Manages engine settings persistence using JSON file storage.

use crate::config::{MAX_MARKS_LISTED, MAX_SUBJECT_PREFIX_LENGTH, MIN_MARKS_LISTED};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Mail composition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSettings {
    /// Address messages are sent from
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Signature line and report header
    #[serde(default = "default_company_name")]
    pub company_name: String,
    #[serde(default = "default_report_subject_prefix")]
    pub report_subject_prefix: String,
    #[serde(default = "default_notice_subject_prefix")]
    pub notice_subject_prefix: String,
    /// Marks listed in a notice body before summarising the rest
    #[serde(default = "default_max_marks_listed")]
    pub max_marks_listed: u32,
}

fn default_sender() -> String {
    "reportes@localhost".to_string()
}

fn default_company_name() -> String {
    "Departamento de Marcas".to_string()
}

fn default_report_subject_prefix() -> String {
    "Reporte de publicaciones".to_string()
}

fn default_notice_subject_prefix() -> String {
    "Sin publicaciones este mes".to_string()
}

fn default_max_marks_listed() -> u32 {
    20
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: default_sender(),
            company_name: default_company_name(),
            report_subject_prefix: default_report_subject_prefix(),
            notice_subject_prefix: default_notice_subject_prefix(),
            max_marks_listed: default_max_marks_listed(),
        }
    }
}

/// Monthly notifier schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Six-field cron expression (sec min hour day month weekday)
    #[serde(default = "default_notifier_cron")]
    pub cron: String,
}

fn default_notifier_cron() -> String {
    "0 0 9 28 * *".to_string() // 09:00 on the 28th
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: default_notifier_cron(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// SQLite file, relative to the data directory
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,
    #[serde(default)]
    pub mail: MailSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
}

fn default_database_file() -> String {
    "boletines.db".to_string()
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

fn default_outbox_dir() -> String {
    "outbox".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            reports_dir: default_reports_dir(),
            outbox_dir: default_outbox_dir(),
            mail: MailSettings::default(),
            notifier: NotifierSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Check value ranges before persisting
    pub fn validate(&self) -> Result<()> {
        if !self.mail.sender.contains('@') {
            return Err(AppError::Validation(format!(
                "sender {:?} is not an email address",
                self.mail.sender
            )));
        }

        if !(MIN_MARKS_LISTED..=MAX_MARKS_LISTED).contains(&self.mail.max_marks_listed) {
            return Err(AppError::Validation(format!(
                "max_marks_listed must be between {} and {}",
                MIN_MARKS_LISTED, MAX_MARKS_LISTED
            )));
        }

        for prefix in [
            &self.mail.report_subject_prefix,
            &self.mail.notice_subject_prefix,
        ] {
            if prefix.trim().is_empty() || prefix.len() > MAX_SUBJECT_PREFIX_LENGTH {
                return Err(AppError::Validation(format!(
                    "subject prefix must be 1 to {} characters",
                    MAX_SUBJECT_PREFIX_LENGTH
                )));
            }
        }

        if self.notifier.cron.trim().is_empty() {
            return Err(AppError::Validation(
                "notifier cron expression must not be empty".to_string(),
            ));
        }

        for (name, dir) in [
            ("database_file", &self.database_file),
            ("reports_dir", &self.reports_dir),
            ("outbox_dir", &self.outbox_dir),
        ] {
            if dir.trim().is_empty() {
                return Err(AppError::Validation(format!("{} must not be empty", name)));
            }
        }

        Ok(())
    }

    /// Resolve a configured path against the data directory
    pub fn resolve(&self, data_dir: &Path, configured: &str) -> PathBuf {
        let path = Path::new(configured);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            data_dir.join(path)
        }
    }
}

/// Service for loading and saving engine settings
#[derive(Clone)]
pub struct SettingsService {
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join("settings.json"),
        }
    }

    /// Load settings from disk or create default if not exists
    pub async fn load(&self) -> Result<EngineSettings> {
        if fs::metadata(&self.settings_path).await.is_err() {
            tracing::info!("Settings file not found, creating default settings");
            let default = EngineSettings::default();
            self.save(&default).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(&self.settings_path).await?;
        let settings: EngineSettings = serde_json::from_str(&content)
            .map_err(|e| AppError::Generic(format!("Failed to parse settings: {}", e)))?;

        Ok(settings)
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &EngineSettings) -> Result<()> {
        settings.validate()?;

        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_path, content).await?;
        tracing::info!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }

    pub async fn get_mail(&self) -> Result<MailSettings> {
        let settings = self.load().await?;
        Ok(settings.mail)
    }

    pub async fn update_mail(&self, mail: MailSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.mail = mail;
        self.save(&settings).await?;
        Ok(())
    }

    pub async fn get_notifier(&self) -> Result<NotifierSettings> {
        let settings = self.load().await?;
        Ok(settings.notifier)
    }

    pub async fn update_notifier(&self, notifier: NotifierSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.notifier = notifier;
        self.save(&settings).await?;
        Ok(())
    }
}
