//! Services module
//!
//! Business logic services that coordinate between the CLI and repository.

pub mod dispatch;
pub mod eligibility;
pub mod grouping;
pub mod notifier;
pub mod period;
pub mod scheduler;
pub mod settings;
pub mod transitions;
pub mod transport;

pub use dispatch::{DispatchService, GenerationRun, SendRun};
pub use eligibility::DataQualityWarning;
pub use grouping::{GroupingOutcome, SendGroup, SkippedGroup};
pub use notifier::{MonthlySummary, NotifierService};
pub use period::ReportingPeriod;
pub use scheduler::SchedulerService;
pub use settings::{EngineSettings, MailSettings, NotifierSettings, SettingsService};
pub use transitions::{RejectionReason, TransitionOutcome, TransitionService};
pub use transport::{
    EmailTransport, OutboxTransport, OutgoingEmail, PlainTextReportRenderer, ReportRenderer,
};
