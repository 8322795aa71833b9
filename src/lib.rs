//! Dashboard analytics for a personal job-application tracker.

pub mod analytics;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod report;
pub mod store;
