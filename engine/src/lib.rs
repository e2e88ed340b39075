//! Bulletin report engine library
//!
//! Decides which trademark-bulletin records get a report, groups them into
//! one email per titular and importance, tracks the generated/sent lifecycle,
//! and sends the monthly "no reports this period" notices exactly once.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;

pub use app::AppState;
pub use error::{AppError, Result};
