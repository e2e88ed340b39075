//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::database::{
    create_pool, BulletinRecord, Client, Importance, NewBulletinRecord, NotificationLogEntry,
    Repository,
};
use crate::error::Result;
use crate::services::{
    DispatchService, EmailTransport, EngineSettings, GenerationRun, GroupingOutcome,
    MonthlySummary, NotifierService, OutboxTransport, PlainTextReportRenderer, ReportRenderer,
    ReportingPeriod, SchedulerService, SendRun, SettingsService, TransitionOutcome,
};
use crate::storage::ReportStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: EngineSettings,
    pub settings_service: SettingsService,
    pub repo: Repository,
    pub dispatch: DispatchService,
    pub notifier: NotifierService,
    pub renderer: Arc<dyn ReportRenderer>,
    pub transport: Arc<dyn EmailTransport>,
}

impl AppState {
    /// Open the data directory with the file-backed outbox as transport
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        let settings = SettingsService::new(data_dir.clone()).load().await?;
        let outbox = settings.resolve(&data_dir, &settings.outbox_dir);
        Self::open_with(data_dir, Arc::new(OutboxTransport::new(outbox))).await
    }

    /// Open the data directory, delivering email through `transport`
    pub async fn open_with(data_dir: PathBuf, transport: Arc<dyn EmailTransport>) -> Result<Self> {
        tracing::info!("Initializing engine in {:?}", data_dir);

        std::fs::create_dir_all(&data_dir)?;

        let settings_service = SettingsService::new(data_dir.clone());
        let settings = settings_service.load().await?;

        let pool = create_pool(&settings.resolve(&data_dir, &settings.database_file)).await?;
        let repo = Repository::new(pool);

        let store = ReportStore::new(settings.resolve(&data_dir, &settings.reports_dir));
        store.initialize().await?;

        let renderer: Arc<dyn ReportRenderer> = Arc::new(PlainTextReportRenderer::new(
            store.clone(),
            settings.mail.company_name.clone(),
        ));

        let dispatch = DispatchService::new(repo.clone(), store, settings.mail.clone());
        let notifier =
            NotifierService::new(repo.clone(), Arc::clone(&transport), settings.mail.clone());

        tracing::info!("Engine initialized successfully");

        Ok(Self {
            data_dir,
            settings,
            settings_service,
            repo,
            dispatch,
            notifier,
            renderer,
            transport,
        })
    }

    pub async fn run_eligibility_and_grouping(&self) -> Result<GroupingOutcome> {
        self.dispatch.run_eligibility_and_grouping().await
    }

    pub async fn apply_generation(
        &self,
        ids: &[i64],
        report_name: &str,
        report_path: &str,
    ) -> Result<TransitionOutcome> {
        self.dispatch
            .apply_generation(ids, report_name, report_path)
            .await
    }

    pub async fn apply_send(&self, ids: &[i64]) -> Result<TransitionOutcome> {
        self.dispatch.apply_send(ids).await
    }

    pub async fn run_monthly_notifier(&self) -> Result<MonthlySummary> {
        self.notifier.run_monthly().await
    }

    /// Notices logged for a "MM-YYYY" period
    pub async fn notification_log(&self, period_key: &str) -> Result<Vec<NotificationLogEntry>> {
        let period = ReportingPeriod::from_key(period_key)?;
        self.repo.list_notification_log(&period.key()).await
    }

    pub async fn generate_pending_reports(&self) -> Result<GenerationRun> {
        self.dispatch
            .generate_pending_reports(self.renderer.as_ref())
            .await
    }

    pub async fn send_pending_reports(&self) -> Result<SendRun> {
        self.dispatch
            .send_pending_reports(self.transport.as_ref())
            .await
    }

    /// Scheduler with the monthly notifier registered per the settings
    pub async fn start_scheduler(&self) -> Result<SchedulerService> {
        let scheduler = SchedulerService::new(self.notifier.clone()).await?;
        scheduler.schedule_notifier(&self.settings.notifier).await?;
        scheduler.start().await?;
        Ok(scheduler)
    }

    pub async fn import_clients(&self, clients: &[Client]) -> Result<usize> {
        for client in clients {
            self.repo.upsert_client(client).await?;
        }
        tracing::info!("Imported {} client(s)", clients.len());
        Ok(clients.len())
    }

    pub async fn import_bulletins(&self, records: Vec<NewBulletinRecord>) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.repo.insert_bulletin(record).await?.id);
        }
        tracing::info!("Imported {} bulletin record(s)", ids.len());
        Ok(ids)
    }

    pub async fn set_importance(&self, id: i64, importance: Importance) -> Result<BulletinRecord> {
        self.repo.set_importance(id, importance).await
    }
}
