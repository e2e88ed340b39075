//! Storage module
//!
//! Provides the on-disk store for generated report files.

pub mod report_store;

pub use report_store::{file_slug, ReportStore};
