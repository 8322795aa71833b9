use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::calendar::Calendar;
use crate::error::OwnerId;
use crate::models::{ApplicationStatus, WeekKey};

pub mod memory;

pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connectivity, pool exhaustion or I/O failure. Retrying may succeed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Inclusive bounds on `applied_date`. A missing side is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

/// Owner-scoped counting queries over application records.
///
/// Bucket keys are computed in the supplied [`Calendar`] so that every backend
/// agrees on where a day, week or month begins.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn count_in_range(&self, owner: OwnerId, range: &DateRange) -> StoreResult<i64>;

    async fn count_by_day(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<NaiveDate, i64>>;

    async fn count_by_week(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<WeekKey, i64>>;

    async fn count_by_month(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<u32, i64>>;

    async fn count_by_status(
        &self,
        owner: OwnerId,
    ) -> StoreResult<HashMap<ApplicationStatus, i64>>;
}
