// Bulletin report engine
// Command-line entry point

use anyhow::{bail, Context};
use boletin_reports::database::{Client, Importance, NewBulletinRecord};
use boletin_reports::AppState;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "boletin-reports", version, about)]
struct Cli {
    /// Directory holding settings, database, reports and outbox
    #[arg(long, env = "BOLETIN_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Group records ready to send and list what cannot be sent
    Verify,
    /// Render reports for every eligible record
    Generate,
    /// Email generated reports to their titulares
    Send,
    /// Mark records as having a generated report
    MarkGenerated {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        path: String,
    },
    /// Mark records as sent
    MarkSent {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },
    /// Send this month's no-report notices
    Notify {
        /// Run as of this day (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List the notices logged for a month
    Log {
        /// Period as MM-YYYY
        #[arg(long)]
        period: String,
    },
    /// Run the notifier on its configured schedule until interrupted
    Schedule,
    /// Show or change settings.json
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Load client contacts from a JSON array
    ImportClients { file: PathBuf },
    /// Load bulletin records from a JSON array
    ImportBulletins { file: PathBuf },
    /// Record the reviewed importance of a record
    SetImportance {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        level: Importance,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Change mail composition settings
    Mail {
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        company_name: Option<String>,
        #[arg(long)]
        report_subject_prefix: Option<String>,
        #[arg(long)]
        notice_subject_prefix: Option<String>,
        #[arg(long)]
        max_marks_listed: Option<u32>,
    },
    /// Change the notifier schedule
    Notifier {
        #[arg(long)]
        enabled: Option<bool>,
        /// Six-field cron expression
        #[arg(long)]
        cron: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(file: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", file.display()))
}

async fn update_settings(state: &AppState, action: SettingsAction) -> anyhow::Result<()> {
    let service = &state.settings_service;

    match action {
        SettingsAction::Show => print_json(&service.load().await?)?,
        SettingsAction::Mail {
            sender,
            company_name,
            report_subject_prefix,
            notice_subject_prefix,
            max_marks_listed,
        } => {
            let mut mail = service.get_mail().await?;
            if let Some(sender) = sender {
                mail.sender = sender;
            }
            if let Some(company_name) = company_name {
                mail.company_name = company_name;
            }
            if let Some(prefix) = report_subject_prefix {
                mail.report_subject_prefix = prefix;
            }
            if let Some(prefix) = notice_subject_prefix {
                mail.notice_subject_prefix = prefix;
            }
            if let Some(max) = max_marks_listed {
                mail.max_marks_listed = max;
            }
            service.update_mail(mail.clone()).await?;
            print_json(&mail)?
        }
        SettingsAction::Notifier { enabled, cron } => {
            let mut notifier = service.get_notifier().await?;
            if let Some(enabled) = enabled {
                notifier.enabled = enabled;
            }
            if let Some(cron) = cron {
                notifier.cron = cron;
            }
            service.update_notifier(notifier.clone()).await?;
            print_json(&notifier)?
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boletin_reports=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting boletin-reports");

    let state = AppState::open(cli.data_dir).await?;

    match cli.command {
        Command::Verify => print_json(&state.run_eligibility_and_grouping().await?)?,
        Command::Generate => print_json(&state.generate_pending_reports().await?)?,
        Command::Send => print_json(&state.send_pending_reports().await?)?,
        Command::MarkGenerated { ids, name, path } => {
            print_json(&state.apply_generation(&ids, &name, &path).await?)?
        }
        Command::MarkSent { ids } => print_json(&state.apply_send(&ids).await?)?,
        Command::Notify { date: None } => print_json(&state.run_monthly_notifier().await?)?,
        Command::Notify { date: Some(date) } => {
            let as_of = date.and_time(Utc::now().time()).and_utc();
            print_json(&state.notifier.run_at(as_of).await?)?
        }
        Command::Log { period } => print_json(&state.notification_log(&period).await?)?,
        Command::Settings { action } => update_settings(&state, action).await?,
        Command::Schedule => {
            if !state.settings.notifier.enabled {
                bail!("The notifier is disabled; set notifier.enabled in settings.json");
            }
            let scheduler = state.start_scheduler().await?;
            tracing::info!("Waiting for scheduled runs, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
        Command::ImportClients { file } => {
            let clients: Vec<Client> = read_json(&file)?;
            let count = state.import_clients(&clients).await?;
            print_json(&serde_json::json!({ "imported": count }))?
        }
        Command::ImportBulletins { file } => {
            let records: Vec<NewBulletinRecord> = read_json(&file)?;
            let ids = state.import_bulletins(records).await?;
            print_json(&serde_json::json!({ "imported": ids }))?
        }
        Command::SetImportance { id, level } => {
            print_json(&state.set_importance(id, level).await?)?
        }
    }

    Ok(())
}
