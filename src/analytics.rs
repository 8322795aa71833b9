use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

use crate::calendar::Calendar;
use crate::error::{AnalyticsError, AnalyticsResult, OwnerId};
use crate::models::{
    AnalyticsSnapshot, ApplicationStatus, DailyCount, DashboardSummary, Granularity,
    MonthlyCount, Series, StatusCount, WeeklyCount,
};
use crate::store::{ApplicationStore, DateRange, StoreError};

const DAILY_WINDOW_DAYS: i64 = 7;
const WEEKLY_WINDOW_WEEKS: i64 = 8;

pub struct Aggregator<S> {
    store: S,
    calendar: Calendar,
}

fn store_failure(operation: &'static str) -> impl Fn(StoreError) -> AnalyticsError {
    move |err| {
        warn!(operation, transient = err.is_transient(), error = %err, "store query failed");
        AnalyticsError::from(err)
    }
}

impl<S: ApplicationStore> Aggregator<S> {
    pub fn new(store: S, calendar: Calendar) -> Self {
        Self { store, calendar }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// Seven entries, one per local day from `now - 6 days` through `now`.
    #[instrument(skip(self))]
    pub async fn get_daily(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<Vec<DailyCount>> {
        let first_day = self.calendar.local_date(now) - Duration::days(DAILY_WINDOW_DAYS - 1);
        let range = DateRange::between(
            self.calendar.midnight(first_day),
            self.calendar.end_of_day(now),
        );

        let counts = self
            .store
            .count_by_day(owner, &range, &self.calendar)
            .await
            .map_err(store_failure("daily"))?;
        debug!(days_with_data = counts.len(), "grouped daily counts");

        Ok((0..DAILY_WINDOW_DAYS)
            .map(|offset| {
                let date = first_day + Duration::days(offset);
                DailyCount {
                    date,
                    count: counts.get(&date).copied().unwrap_or(0),
                }
            })
            .collect())
    }

    /// Weeks in the eight-week window ending with the current week that have
    /// at least one application, ascending by `(year, week)`. Empty weeks are
    /// left out rather than zero-filled.
    #[instrument(skip(self))]
    pub async fn get_weekly(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<Vec<WeeklyCount>> {
        let current_week = self.calendar.first_day_of_week(self.calendar.local_date(now));
        let first_week = current_week - Duration::weeks(WEEKLY_WINDOW_WEEKS - 1);
        let range = DateRange::between(
            self.calendar.midnight(first_week),
            self.calendar.end_of_week(now),
        );

        let counts = self
            .store
            .count_by_week(owner, &range, &self.calendar)
            .await
            .map_err(store_failure("weekly"))?;

        Ok(counts
            .into_iter()
            .map(|(key, count)| WeeklyCount {
                year: key.year,
                week: key.week,
                count,
            })
            .collect())
    }

    /// Twelve entries for January through December of `now`'s year.
    #[instrument(skip(self))]
    pub async fn get_monthly(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<Vec<MonthlyCount>> {
        let range = DateRange::between(
            self.calendar.start_of_year(now),
            self.calendar.end_of_year(now),
        );

        let counts = self
            .store
            .count_by_month(owner, &range, &self.calendar)
            .await
            .map_err(store_failure("monthly"))?;

        Ok((1..=12)
            .map(|month| MonthlyCount {
                month,
                count: counts.get(&month).copied().unwrap_or(0),
            })
            .collect())
    }

    /// One entry per status in declaration order, across all of the owner's
    /// applications regardless of date.
    #[instrument(skip(self))]
    pub async fn get_status_distribution(
        &self,
        owner: OwnerId,
    ) -> AnalyticsResult<Vec<StatusCount>> {
        let counts = self
            .store
            .count_by_status(owner)
            .await
            .map_err(store_failure("status"))?;

        Ok(ApplicationStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: counts.get(&status).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Open-ended counts since the start of today, this week and this month,
    /// plus the overall total.
    #[instrument(skip(self))]
    pub async fn get_dashboard_summary(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<DashboardSummary> {
        let start_of_month = self.calendar.start_of_month(now);
        // Clamped to the month start: a week that began last month must not
        // count more than this_month.
        let start_of_week = self.calendar.start_of_week(now).max(start_of_month);

        let today_range = DateRange::since(self.calendar.start_of_day(now));
        let week_range = DateRange::since(start_of_week);
        let month_range = DateRange::since(start_of_month);
        let all = DateRange::all();

        let (today, this_week, this_month, total) = tokio::try_join!(
            self.store.count_in_range(owner, &today_range),
            self.store.count_in_range(owner, &week_range),
            self.store.count_in_range(owner, &month_range),
            self.store.count_in_range(owner, &all),
        )
        .map_err(store_failure("summary"))?;

        Ok(DashboardSummary {
            today,
            this_week,
            this_month,
            total,
        })
    }

    pub async fn series(
        &self,
        owner: OwnerId,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<Series> {
        Ok(match granularity {
            Granularity::Day => Series::Day(self.get_daily(owner, now).await?),
            Granularity::Week => Series::Week(self.get_weekly(owner, now).await?),
            Granularity::Month => Series::Month(self.get_monthly(owner, now).await?),
            Granularity::Status => Series::Status(self.get_status_distribution(owner).await?),
        })
    }

    /// All five views, fetched concurrently. Fails as a whole if any view fails.
    pub async fn snapshot(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<AnalyticsSnapshot> {
        let (summary, daily, weekly, monthly, status) = tokio::try_join!(
            self.get_dashboard_summary(owner, now),
            self.get_daily(owner, now),
            self.get_weekly(owner, now),
            self.get_monthly(owner, now),
            self.get_status_distribution(owner),
        )?;

        Ok(AnalyticsSnapshot {
            generated_at: now,
            summary,
            daily,
            weekly,
            monthly,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::*;
    use crate::calendar::WeekStart;
    use crate::models::WeekKey;
    use crate::store::{MemoryStore, StoreResult};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Wednesday
    fn now() -> DateTime<Utc> {
        at("2026-03-11T15:00:00Z")
    }

    fn setup() -> (Aggregator<MemoryStore>, MemoryStore, Uuid, OwnerId) {
        let store = MemoryStore::new();
        let raw = Uuid::new_v4();
        let owner = OwnerId::new(raw).unwrap();
        (Aggregator::new(store.clone(), Calendar::default()), store, raw, owner)
    }

    fn add_n(
        store: &MemoryStore,
        owner: Uuid,
        when: DateTime<Utc>,
        status: ApplicationStatus,
        n: usize,
    ) {
        for _ in 0..n {
            store.add(owner, when, status).unwrap();
        }
    }

    #[tokio::test]
    async fn daily_fills_gaps_around_sparse_days() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, now() - Duration::days(6), ApplicationStatus::Pending, 2);
        add_n(&store, raw, now() - Duration::days(3), ApplicationStatus::Interview, 5);
        // Outside the window on both sides.
        add_n(&store, raw, now() - Duration::days(7), ApplicationStatus::Pending, 1);
        add_n(&store, raw, now() + Duration::days(1), ApplicationStatus::Pending, 1);

        let daily = agg.get_daily(owner, now()).await.unwrap();
        let counts: Vec<i64> = daily.iter().map(|d| d.count).collect();
        assert_eq!(counts, vec![2, 0, 0, 5, 0, 0, 0]);
        assert_eq!(daily[0].date, date(2026, 3, 5));
        assert_eq!(daily[6].date, date(2026, 3, 11));
    }

    #[tokio::test]
    async fn daily_window_is_seven_contiguous_days_for_any_now() {
        let store = MemoryStore::new();
        let owner = OwnerId::new(Uuid::new_v4()).unwrap();
        for minutes in [-480, 0, 330] {
            let calendar = Calendar::from_offset_minutes(minutes, WeekStart::Sunday).unwrap();
            let agg = Aggregator::new(store.clone(), calendar);
            for hours in (0..24 * 400).step_by(7) {
                let now = at("2025-06-01T00:00:00Z") + Duration::hours(hours);
                let daily = agg.get_daily(owner, now).await.unwrap();
                assert_eq!(daily.len(), 7);
                assert_eq!(daily[6].date, calendar.local_date(now));
                for pair in daily.windows(2) {
                    assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
                }
            }
        }
    }

    #[tokio::test]
    async fn daily_includes_the_last_instant_of_today() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, at("2026-03-11T23:59:59.999Z"), ApplicationStatus::Pending, 1);
        add_n(&store, raw, at("2026-03-05T00:00:00Z"), ApplicationStatus::Pending, 1);

        let daily = agg.get_daily(owner, now()).await.unwrap();
        assert_eq!(daily[0].count, 1);
        assert_eq!(daily[6].count, 1);
    }

    #[tokio::test]
    async fn weekly_is_sparse_and_ordered() {
        let (agg, store, raw, owner) = setup();
        // Current week starts Sunday 2026-03-08; the window starts 2026-01-18.
        add_n(&store, raw, at("2026-03-09T10:00:00Z"), ApplicationStatus::Pending, 3);
        add_n(&store, raw, at("2026-01-18T00:00:00Z"), ApplicationStatus::Pending, 1);
        add_n(&store, raw, at("2026-02-03T10:00:00Z"), ApplicationStatus::Pending, 2);
        add_n(&store, raw, at("2026-01-17T23:59:59Z"), ApplicationStatus::Pending, 4);

        let weekly = agg.get_weekly(owner, now()).await.unwrap();
        assert_eq!(
            weekly,
            vec![
                WeeklyCount { year: 2026, week: 3, count: 1 },
                WeeklyCount { year: 2026, week: 5, count: 2 },
                WeeklyCount { year: 2026, week: 10, count: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn weekly_never_exceeds_eight_buckets_across_new_year() {
        let (agg, store, raw, owner) = setup();
        let now = at("2026-01-20T12:00:00Z");
        for day in 0..80 {
            add_n(&store, raw, now - Duration::days(day), ApplicationStatus::Pending, 1);
        }

        let weekly = agg.get_weekly(owner, now).await.unwrap();
        assert_eq!(weekly.len(), 8);
        let keys: Vec<WeekKey> = weekly
            .iter()
            .map(|w| WeekKey { year: w.year, week: w.week })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys[0], WeekKey { year: 2025, week: 48 });
    }

    #[tokio::test]
    async fn weekly_uses_iso_weeks_when_weeks_start_monday() {
        let store = MemoryStore::new();
        let raw = Uuid::new_v4();
        let owner = OwnerId::new(raw).unwrap();
        let agg = Aggregator::new(store.clone(), Calendar::utc(WeekStart::Monday));
        add_n(&store, raw, at("2026-03-08T10:00:00Z"), ApplicationStatus::Pending, 1);
        add_n(&store, raw, at("2026-03-09T10:00:00Z"), ApplicationStatus::Pending, 1);

        let weekly = agg.get_weekly(owner, now()).await.unwrap();
        assert_eq!(
            weekly,
            vec![
                WeeklyCount { year: 2026, week: 10, count: 1 },
                WeeklyCount { year: 2026, week: 11, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn monthly_covers_the_current_year_only() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, at("2026-01-01T00:00:00Z"), ApplicationStatus::Pending, 1);
        add_n(&store, raw, at("2026-03-02T00:00:00Z"), ApplicationStatus::Pending, 4);
        add_n(&store, raw, at("2026-12-31T23:59:59Z"), ApplicationStatus::Pending, 2);
        add_n(&store, raw, at("2025-12-31T23:59:59Z"), ApplicationStatus::Pending, 9);

        let monthly = agg.get_monthly(owner, now()).await.unwrap();
        assert_eq!(monthly.len(), 12);
        let months: Vec<u32> = monthly.iter().map(|m| m.month).collect();
        assert_eq!(months, (1..=12).collect::<Vec<_>>());
        assert_eq!(monthly[0].count, 1);
        assert_eq!(monthly[2].count, 4);
        assert_eq!(monthly[11].count, 2);
        assert_eq!(monthly.iter().map(|m| m.count).sum::<i64>(), 7);
    }

    #[tokio::test]
    async fn status_distribution_keeps_declaration_order() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, now(), ApplicationStatus::Rejected, 2);
        add_n(&store, raw, now() - Duration::days(400), ApplicationStatus::Pending, 3);
        add_n(&store, raw, now(), ApplicationStatus::Interview, 1);

        let status = agg.get_status_distribution(owner).await.unwrap();
        assert_eq!(
            status,
            vec![
                StatusCount { status: ApplicationStatus::Pending, count: 3 },
                StatusCount { status: ApplicationStatus::Interview, count: 1 },
                StatusCount { status: ApplicationStatus::Selected, count: 0 },
                StatusCount { status: ApplicationStatus::Rejected, count: 2 },
            ]
        );
        assert_eq!(status.iter().map(|s| s.count).sum::<i64>(), 6);
    }

    #[tokio::test]
    async fn empty_owner_gets_full_zero_shapes() {
        let (agg, _store, _raw, owner) = setup();
        let snapshot = agg.snapshot(owner, now()).await.unwrap();

        assert_eq!(snapshot.daily.len(), 7);
        assert_eq!(snapshot.monthly.len(), 12);
        assert_eq!(snapshot.status.len(), 4);
        assert!(snapshot.weekly.is_empty());
        assert!(snapshot.daily.iter().all(|d| d.count == 0));
        assert!(snapshot.monthly.iter().all(|m| m.count == 0));
        assert!(snapshot.status.iter().all(|s| s.count == 0));
        assert_eq!(snapshot.summary, DashboardSummary::default());
    }

    #[tokio::test]
    async fn summary_counts_are_open_ended() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, at("2026-03-11T08:00:00Z"), ApplicationStatus::Pending, 1);
        add_n(&store, raw, at("2026-03-13T08:00:00Z"), ApplicationStatus::Pending, 1);
        add_n(&store, raw, at("2026-03-09T08:00:00Z"), ApplicationStatus::Pending, 2);
        add_n(&store, raw, at("2026-03-02T08:00:00Z"), ApplicationStatus::Pending, 3);
        add_n(&store, raw, at("2025-11-02T08:00:00Z"), ApplicationStatus::Pending, 4);

        let summary = agg.get_dashboard_summary(owner, now()).await.unwrap();
        assert_eq!(
            summary,
            DashboardSummary {
                today: 2,
                this_week: 4,
                this_month: 7,
                total: 11,
            }
        );
    }

    #[tokio::test]
    async fn summary_containment_holds_when_week_starts_in_previous_month() {
        let (agg, store, raw, owner) = setup();
        // 2026-04-01 is a Wednesday; its week started Sunday 2026-03-29.
        add_n(&store, raw, at("2026-03-30T08:00:00Z"), ApplicationStatus::Pending, 3);
        add_n(&store, raw, at("2026-04-01T08:00:00Z"), ApplicationStatus::Pending, 1);

        let summary = agg.get_dashboard_summary(owner, at("2026-04-01T12:00:00Z")).await.unwrap();
        assert_eq!(summary.this_week, 1);
        assert_eq!(summary.this_month, 1);
        assert_eq!(summary.total, 4);
    }

    #[tokio::test]
    async fn summary_containment_holds_for_any_now() {
        let (agg, store, raw, owner) = setup();
        let origin = at("2025-12-01T00:00:00Z");
        for hours in (0..24 * 120).step_by(13) {
            add_n(&store, raw, origin + Duration::hours(hours), ApplicationStatus::Pending, 1);
        }

        for days in 0..120 {
            let now = origin + Duration::days(days) + Duration::hours(11);
            let s = agg.get_dashboard_summary(owner, now).await.unwrap();
            assert!(s.today <= s.this_week, "{now}: {s:?}");
            assert!(s.this_week <= s.this_month, "{now}: {s:?}");
            assert!(s.this_month <= s.total, "{now}: {s:?}");
        }
    }

    #[tokio::test]
    async fn other_owners_never_leak_into_aggregates() {
        let (agg, store, raw, owner) = setup();
        let stranger = Uuid::new_v4();
        add_n(&store, stranger, now(), ApplicationStatus::Selected, 5);
        add_n(&store, raw, now(), ApplicationStatus::Pending, 1);

        let snapshot = agg.snapshot(owner, now()).await.unwrap();
        assert_eq!(snapshot.summary.total, 1);
        assert_eq!(snapshot.status[2].count, 0);
        assert_eq!(snapshot.daily.iter().map(|d| d.count).sum::<i64>(), 1);
        assert_eq!(snapshot.weekly.iter().map(|w| w.count).sum::<i64>(), 1);
    }

    #[tokio::test]
    async fn repeated_calls_are_identical() {
        let (agg, store, raw, owner) = setup();
        for day in 0..30 {
            let status = ApplicationStatus::ALL[day as usize % 4];
            add_n(&store, raw, now() - Duration::days(day * 3), status, 1);
        }

        let first = agg.snapshot(owner, now()).await.unwrap();
        let second = agg.snapshot(owner, now()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn series_wraps_each_granularity() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, now(), ApplicationStatus::Pending, 2);

        for granularity in [
            Granularity::Day,
            Granularity::Week,
            Granularity::Month,
            Granularity::Status,
        ] {
            let series = agg.series(owner, granularity, now()).await.unwrap();
            assert_eq!(series.total(), 2, "{granularity:?}");
        }
        assert!(matches!(
            agg.series(owner, Granularity::Month, now()).await.unwrap(),
            Series::Month(ref months) if months.len() == 12
        ));
    }

    #[tokio::test]
    async fn store_outage_fails_every_view() {
        let (agg, store, raw, owner) = setup();
        add_n(&store, raw, now(), ApplicationStatus::Pending, 1);
        store.set_available(false);

        assert!(agg.get_daily(owner, now()).await.unwrap_err().is_transient());
        assert!(agg.get_weekly(owner, now()).await.unwrap_err().is_transient());
        assert!(agg.get_monthly(owner, now()).await.unwrap_err().is_transient());
        assert!(agg.get_status_distribution(owner).await.unwrap_err().is_transient());
        assert!(matches!(
            agg.get_dashboard_summary(owner, now()).await,
            Err(AnalyticsError::StoreUnavailable(_))
        ));
    }

    /// Fails only the unbounded total count.
    struct TotalFailsStore(MemoryStore);

    #[async_trait]
    impl ApplicationStore for TotalFailsStore {
        async fn count_in_range(&self, owner: OwnerId, range: &DateRange) -> StoreResult<i64> {
            if *range == DateRange::all() {
                return Err(StoreError::Query("relation does not exist".to_string()));
            }
            self.0.count_in_range(owner, range).await
        }

        async fn count_by_day(
            &self,
            owner: OwnerId,
            range: &DateRange,
            calendar: &Calendar,
        ) -> StoreResult<BTreeMap<NaiveDate, i64>> {
            self.0.count_by_day(owner, range, calendar).await
        }

        async fn count_by_week(
            &self,
            owner: OwnerId,
            range: &DateRange,
            calendar: &Calendar,
        ) -> StoreResult<BTreeMap<WeekKey, i64>> {
            self.0.count_by_week(owner, range, calendar).await
        }

        async fn count_by_month(
            &self,
            owner: OwnerId,
            range: &DateRange,
            calendar: &Calendar,
        ) -> StoreResult<BTreeMap<u32, i64>> {
            self.0.count_by_month(owner, range, calendar).await
        }

        async fn count_by_status(
            &self,
            owner: OwnerId,
        ) -> StoreResult<HashMap<ApplicationStatus, i64>> {
            self.0.count_by_status(owner).await
        }
    }

    #[tokio::test]
    async fn one_failed_sub_query_fails_the_whole_summary() {
        let store = MemoryStore::new();
        let raw = Uuid::new_v4();
        add_n(&store, raw, now(), ApplicationStatus::Pending, 1);
        let agg = Aggregator::new(TotalFailsStore(store), Calendar::default());
        let owner = OwnerId::new(raw).unwrap();

        let err = agg.get_dashboard_summary(owner, now()).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::Unexpected(_)));
        assert!(!err.is_transient());
        assert!(agg.snapshot(owner, now()).await.is_err());
        assert_eq!(agg.get_daily(owner, now()).await.unwrap()[6].count, 1);
    }
}
