use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Pending,
    Interview,
    Selected,
    Rejected,
}

impl ApplicationStatus {
    /// Declaration order, which is also the order of the status distribution.
    pub const ALL: [ApplicationStatus; 4] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Interview,
        ApplicationStatus::Selected,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "Pending",
            ApplicationStatus::Interview => "Interview",
            ApplicationStatus::Selected => "Selected",
            ApplicationStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown application status '{value}'"))
    }
}

#[derive(Debug, Clone)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub company_name: String,
    pub job_title: String,
    pub applied_date: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub notes: Option<String>,
}

/// Sunday- or ISO-based week identifier, ordered by `(year, week)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekKey {
    pub year: i32,
    pub week: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyCount {
    pub year: i32,
    pub week: u32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    pub month: u32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ApplicationStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Week,
    Month,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "granularity", content = "buckets", rename_all = "lowercase")]
pub enum Series {
    Day(Vec<DailyCount>),
    Week(Vec<WeeklyCount>),
    Month(Vec<MonthlyCount>),
    Status(Vec<StatusCount>),
}

impl Series {
    pub fn total(&self) -> i64 {
        match self {
            Series::Day(buckets) => buckets.iter().map(|b| b.count).sum(),
            Series::Week(buckets) => buckets.iter().map(|b| b.count).sum(),
            Series::Month(buckets) => buckets.iter().map(|b| b.count).sum(),
            Series::Status(buckets) => buckets.iter().map(|b| b.count).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub summary: DashboardSummary,
    pub daily: Vec<DailyCount>,
    pub weekly: Vec<WeeklyCount>,
    pub monthly: Vec<MonthlyCount>,
    pub status: Vec<StatusCount>,
}
