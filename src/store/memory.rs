use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::{ApplicationStore, DateRange, StoreError, StoreResult};
use crate::calendar::Calendar;
use crate::error::OwnerId;
use crate::models::{ApplicationRecord, ApplicationStatus, WeekKey};

#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<Vec<ApplicationRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ApplicationRecord) -> StoreResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Query("record lock poisoned".to_string()))?;
        records.push(record);
        Ok(())
    }

    /// Adds a bare record for `owner` and returns its id.
    pub fn add(
        &self,
        owner: Uuid,
        applied_date: DateTime<Utc>,
        status: ApplicationStatus,
    ) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.insert(ApplicationRecord {
            id,
            owner_id: owner,
            company_name: "Acme Corp".to_string(),
            job_title: "Software Engineer".to_string(),
            applied_date,
            status,
            notes: None,
        })?;
        Ok(id)
    }

    /// Simulates a connectivity outage: every query fails with
    /// [`StoreError::Unavailable`] until switched back.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn snapshot(&self) -> StoreResult<RwLockReadGuard<'_, Vec<ApplicationRecord>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        self.records
            .read()
            .map_err(|_| StoreError::Query("record lock poisoned".to_string()))
    }

    fn matching<'a>(
        records: &'a [ApplicationRecord],
        owner: OwnerId,
        range: &'a DateRange,
    ) -> impl Iterator<Item = &'a ApplicationRecord> + 'a {
        records
            .iter()
            .filter(move |r| r.owner_id == owner.as_uuid() && range.contains(r.applied_date))
    }
}

fn tally<K: Ord>(keys: impl Iterator<Item = K>) -> BTreeMap<K, i64> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn count_in_range(&self, owner: OwnerId, range: &DateRange) -> StoreResult<i64> {
        let records = self.snapshot()?;
        Ok(Self::matching(&records, owner, range).count() as i64)
    }

    async fn count_by_day(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<NaiveDate, i64>> {
        let records = self.snapshot()?;
        Ok(tally(
            Self::matching(&records, owner, range).map(|r| calendar.day_key(r.applied_date)),
        ))
    }

    async fn count_by_week(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<WeekKey, i64>> {
        let records = self.snapshot()?;
        Ok(tally(
            Self::matching(&records, owner, range).map(|r| calendar.week_key(r.applied_date)),
        ))
    }

    async fn count_by_month(
        &self,
        owner: OwnerId,
        range: &DateRange,
        calendar: &Calendar,
    ) -> StoreResult<BTreeMap<u32, i64>> {
        let records = self.snapshot()?;
        Ok(tally(
            Self::matching(&records, owner, range).map(|r| calendar.month_key(r.applied_date)),
        ))
    }

    async fn count_by_status(
        &self,
        owner: OwnerId,
    ) -> StoreResult<HashMap<ApplicationStatus, i64>> {
        let records = self.snapshot()?;
        let all = DateRange::all();
        let mut counts = HashMap::new();
        for record in Self::matching(&records, owner, &all) {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
