//! Engine configuration constants
//!
//! Central location for labels, formats and validation boundaries used
//! throughout the engine. Runtime-adjustable values live in
//! [`crate::services::settings`].

// ===== Importance Labels =====

/// Stored label for records still awaiting human review
pub const IMPORTANCE_PENDING: &str = "Pendiente";
/// Stored label for low-importance records
pub const IMPORTANCE_LOW: &str = "Baja";
/// Stored label for medium-importance records
pub const IMPORTANCE_MEDIUM: &str = "Media";
/// Stored label for high-importance records
pub const IMPORTANCE_HIGH: &str = "Alta";

// ===== Dates and Periods =====

/// Day-first date format of bulletins and printed reports (e.g. "05/03/2024")
pub const BULLETIN_DATE_FORMAT: &str = "%d/%m/%Y";

/// Date stamp appended to generated report names
pub const REPORT_DATE_STAMP_FORMAT: &str = "%Y%m%d";

/// Lower-case Spanish month names, January first
pub const MONTH_NAMES_ES: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

// ===== Notification Log =====

/// Status written for a successfully delivered notice
pub const NOTICE_STATUS_SENT: &str = "sent";

// ===== Mail Settings Limits =====

/// Minimum number of marks listed in a notice body
pub const MIN_MARKS_LISTED: u32 = 1;

/// Maximum number of marks listed in a notice body.
/// Larger portfolios are summarised with a trailing count.
pub const MAX_MARKS_LISTED: u32 = 200;

/// Maximum length of a subject prefix
pub const MAX_SUBJECT_PREFIX_LENGTH: usize = 120;
