use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::{Calendar, WeekStart};
use crate::error::OwnerId;
use crate::models::{ApplicationRecord, ApplicationStatus, WeekKey};
use crate::store::{ApplicationStore, DateRange, StoreError, StoreResult};

/// Applied date shifted into the calendar's wall-clock time. `$2` is the
/// calendar offset in seconds.
const LOCAL_APPLIED: &str =
    "((a.applied_date AT TIME ZONE 'UTC') + ($2::int * INTERVAL '1 second'))";

/// Demo owner used by `seed`.
pub const SEED_OWNER: &str = "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_application(
        &self,
        record: &ApplicationRecord,
        source_key: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_tracker.applications
            (id, owner_id, company_name, job_title, applied_date, status, notes, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.company_name)
        .bind(&record.job_title)
        .bind(record.applied_date)
        .bind(record.status.as_str())
        .bind(&record.notes)
        .bind(source_key)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert application {source_key}"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Loads demo applications for [`SEED_OWNER`], spread over the days
    /// leading up to `now`.
    pub async fn seed(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let owner_id = Uuid::parse_str(SEED_OWNER)?;
        let applications = [
            (
                "seed-001",
                "Northwind Labs",
                "Backend Engineer",
                0,
                ApplicationStatus::Pending,
                "Referred by Sam",
            ),
            (
                "seed-002",
                "Contoso",
                "Platform Engineer",
                1,
                ApplicationStatus::Interview,
                "Phone screen booked",
            ),
            (
                "seed-003",
                "Globex",
                "Site Reliability Engineer",
                3,
                ApplicationStatus::Pending,
                "Applied via careers page",
            ),
            (
                "seed-004",
                "Initech",
                "Rust Developer",
                3,
                ApplicationStatus::Rejected,
                "Position filled",
            ),
            (
                "seed-005",
                "Umbrella Health",
                "Data Engineer",
                6,
                ApplicationStatus::Pending,
                "Follow up next week",
            ),
            (
                "seed-006",
                "Hooli",
                "Software Engineer II",
                12,
                ApplicationStatus::Interview,
                "Onsite scheduled",
            ),
            (
                "seed-007",
                "Stark Industries",
                "Systems Engineer",
                27,
                ApplicationStatus::Selected,
                "Offer received",
            ),
            (
                "seed-008",
                "Wayne Enterprises",
                "Infrastructure Engineer",
                45,
                ApplicationStatus::Rejected,
                "No response after onsite",
            ),
        ];

        let mut inserted = 0usize;
        for (source_key, company, title, days_ago, status, note) in applications {
            let record = ApplicationRecord {
                id: Uuid::new_v4(),
                owner_id,
                company_name: company.to_string(),
                job_title: title.to_string(),
                applied_date: now - Duration::days(days_ago),
                status,
                notes: Some(note.to_string()),
            };
            if self.insert_application(&record, source_key).await? {
                inserted += 1;
            }
        }

        info!(inserted, owner = SEED_OWNER, "seeded demo applications");
        Ok(inserted)
    }

    pub async fn import_csv(&self, csv_path: &std::path::Path) -> anyhow::Result<usize> {
        #[derive(serde::Deserialize)]
        struct CsvRow {
            owner_id: Uuid,
            company_name: String,
            job_title: String,
            applied_date: DateTime<Utc>,
            status: Option<String>,
            notes: Option<String>,
            source_key: Option<String>,
        }

        let mut reader = csv::Reader::from_path(csv_path)
            .with_context(|| format!("failed to open {}", csv_path.display()))?;
        let mut inserted = 0usize;

        for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = result.with_context(|| format!("invalid CSV row {}", line + 1))?;
            let status = match row.status.as_deref().map(str::trim) {
                None | Some("") => ApplicationStatus::Pending,
                Some(value) => value
                    .parse::<ApplicationStatus>()
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("invalid status on CSV row {}", line + 1))?,
            };
            let source_key = row
                .source_key
                .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

            let record = ApplicationRecord {
                id: Uuid::new_v4(),
                owner_id: row.owner_id,
                company_name: row.company_name,
                job_title: row.job_title,
                applied_date: row.applied_date,
                status,
                notes: row.notes,
            };

            if self.insert_application(&record, &source_key).await? {
                inserted += 1;
            } else {
                debug!(source_key = %source_key, "skipping already imported application");
            }
        }

        Ok(inserted)
    }
}

/// Appends the present bounds of `range` as numbered placeholders starting at
/// `next`, returning the values to bind in order.
fn push_range(sql: &mut String, range: &DateRange, mut next: usize) -> Vec<DateTime<Utc>> {
    let mut values = Vec::new();
    if let Some(start) = range.start {
        sql.push_str(&format!(" AND a.applied_date >= ${next}"));
        values.push(start);
        next += 1;
    }
    if let Some(end) = range.end {
        sql.push_str(&format!(" AND a.applied_date <= ${next}"));
        values.push(end);
    }
    values
}

impl PostgresStore {
    /// Runs a grouped count where `key_columns` are computed on the
    /// calendar-local applied date and `group_by` lists their positions.
    async fn grouped<K>(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
        key_columns: &str,
        group_by: &str,
        decode: impl Fn(&sqlx::postgres::PgRow) -> Result<K, sqlx::Error>,
    ) -> StoreResult<BTreeMap<K, i64>>
    where
        K: Ord,
    {
        let mut sql = format!(
            "SELECT {key_columns}, COUNT(*)::bigint AS count \
             FROM job_tracker.applications a \
             WHERE a.owner_id = $1"
        );
        let bounds = push_range(&mut sql, range, 3);
        sql.push_str(&format!(" GROUP BY {group_by}"));

        let mut query = sqlx::query(&sql)
            .bind(owner.as_uuid())
            .bind(calendar.offset_seconds());
        for bound in bounds {
            query = query.bind(bound);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(decode(&row)?, row.try_get::<i64, _>("count")?);
        }
        Ok(counts)
    }
}

fn day_key_column() -> String {
    format!("({LOCAL_APPLIED})::date AS day")
}

/// SQL form of [`Calendar::week_key`]. Sunday weeks take the year and
/// `(ordinal0 + 7) / 7` of their Sunday; Postgres `DOY` is 1-based, hence `+ 6`.
fn week_key_columns(week_start: WeekStart) -> String {
    match week_start {
        WeekStart::Sunday => {
            let sunday =
                format!("(({LOCAL_APPLIED})::date - EXTRACT(DOW FROM {LOCAL_APPLIED})::int)");
            format!(
                "EXTRACT(YEAR FROM {sunday})::int AS year, \
                 ((EXTRACT(DOY FROM {sunday})::int + 6) / 7) AS week"
            )
        }
        WeekStart::Monday => format!(
            "EXTRACT(ISOYEAR FROM {LOCAL_APPLIED})::int AS year, \
             EXTRACT(WEEK FROM {LOCAL_APPLIED})::int AS week"
        ),
    }
}

fn month_key_column() -> String {
    format!("EXTRACT(MONTH FROM {LOCAL_APPLIED})::int AS month")
}

#[async_trait]
impl ApplicationStore for PostgresStore {
    async fn count_in_range(&self, owner: OwnerId, range: &DateRange) -> StoreResult<i64> {
        let mut sql = String::from(
            "SELECT COUNT(*)::bigint AS count \
             FROM job_tracker.applications a \
             WHERE a.owner_id = $1",
        );
        let bounds = push_range(&mut sql, range, 2);

        let mut query = sqlx::query(&sql).bind(owner.as_uuid());
        for bound in bounds {
            query = query.bind(bound);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get("count")?)
    }

    async fn count_by_day(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<NaiveDate, i64>> {
        self.grouped(owner, range, calendar, &day_key_column(), "1", |row| {
            row.try_get::<NaiveDate, _>("day")
        })
        .await
    }

    async fn count_by_week(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<WeekKey, i64>> {
        let key = week_key_columns(calendar.week_start());
        self.grouped(owner, range, calendar, &key, "1, 2", |row| {
            let week: i32 = row.try_get("week")?;
            Ok(WeekKey {
                year: row.try_get("year")?,
                week: week.max(0) as u32,
            })
        })
        .await
    }

    async fn count_by_month(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<u32, i64>> {
        self.grouped(owner, range, calendar, &month_key_column(), "1", |row| {
            let month: i32 = row.try_get("month")?;
            Ok(month.max(0) as u32)
        })
        .await
    }

    async fn count_by_status(
        &self,
        owner: OwnerId,
    ) -> StoreResult<HashMap<ApplicationStatus, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT a.status, COUNT(*)::bigint AS count
            FROM job_tracker.applications a
            WHERE a.owner_id = $1
            GROUP BY a.status
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let status = status.parse::<ApplicationStatus>().map_err(StoreError::Query)?;
            counts.insert(status, row.try_get::<i64, _>("count")?);
        }
        Ok(counts)
    }
}
