/// Scheduler Service
/// Runs the monthly sin-reportes notifier on a cron schedule.
/// A failed run is only logged; the next tick is the retry.
use super::notifier::NotifierService;
use super::settings::NotifierSettings;
use crate::error::{AppError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Scheduler service for the monthly notifier
pub struct SchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    notifier: Arc<NotifierService>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl SchedulerService {
    /// Create new scheduler service
    pub async fn new(notifier: NotifierService) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            notifier: Arc::new(notifier),
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Notifier scheduler started");
        Ok(())
    }

    /// Schedule the monthly notifier, replacing any previous schedule
    pub async fn schedule_notifier(&self, settings: &NotifierSettings) -> Result<()> {
        self.cancel_notifier().await?;

        if !settings.enabled {
            tracing::info!("Scheduled sin-reportes notices disabled");
            return Ok(());
        }

        let cron_expr = settings.cron.trim().to_string();
        let notifier = Arc::clone(&self.notifier);

        let job = Job::new_async(cron_expr.clone(), move |_uuid, _l| {
            let notifier = Arc::clone(&notifier);
            Box::pin(async move {
                tracing::info!("Running scheduled sin-reportes pass");

                match notifier.run_monthly().await {
                    Ok(summary) => tracing::info!(
                        "Scheduled pass {} finished: {} sent, {} already notified, {} errors",
                        summary.period_key,
                        summary.emails_sent,
                        summary.already_notified,
                        summary.errors
                    ),
                    Err(e) => tracing::error!("Scheduled sin-reportes pass failed: {}", e),
                }
            })
        })
        .map_err(|e| {
            AppError::Scheduler(format!("Invalid notifier cron {:?}: {}", cron_expr, e))
        })?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule job: {}", e)))?;

        let mut current_job = self.current_job_id.write().await;
        *current_job = Some(job_id);

        tracing::info!("Sin-reportes notifier scheduled ({})", cron_expr);
        Ok(())
    }

    /// Cancel the scheduled notifier
    pub async fn cancel_notifier(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = *current_job {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Scheduler(format!("Failed to remove job: {}", e)))?;

            *current_job = None;
            tracing::info!("Sin-reportes notifier schedule cancelled");
        }

        Ok(())
    }

    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    /// Shutdown scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("Notifier scheduler shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{initialize_database, Repository};
    use crate::services::settings::MailSettings;
    use crate::services::transport::fakes::RecordingTransport;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_scheduler() -> SchedulerService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize_database(&pool).await.unwrap();

        let notifier = NotifierService::new(
            Repository::new(pool),
            Arc::new(RecordingTransport::default()),
            MailSettings::default(),
        );
        SchedulerService::new(notifier).await.unwrap()
    }

    #[tokio::test]
    async fn test_schedule_and_cancel() {
        let scheduler = create_test_scheduler().await;

        scheduler
            .schedule_notifier(&NotifierSettings {
                enabled: true,
                cron: "0 0 9 28 * *".to_string(),
            })
            .await
            .unwrap();
        assert!(scheduler.is_scheduled().await);

        scheduler.cancel_notifier().await.unwrap();
        assert!(!scheduler.is_scheduled().await);
    }

    #[tokio::test]
    async fn test_disabled_schedules_nothing() {
        let scheduler = create_test_scheduler().await;

        scheduler
            .schedule_notifier(&NotifierSettings::default())
            .await
            .unwrap();

        assert!(!scheduler.is_scheduled().await);
    }

    #[tokio::test]
    async fn test_invalid_cron_is_rejected() {
        let scheduler = create_test_scheduler().await;

        let result = scheduler
            .schedule_notifier(&NotifierSettings {
                enabled: true,
                cron: "every month".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AppError::Scheduler(_))));
        assert!(!scheduler.is_scheduled().await);
    }
}
