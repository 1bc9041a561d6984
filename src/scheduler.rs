use std::{sync::Arc, time::Duration};

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use log::{error, info};
use tokio::{task::JoinSet, time::interval};

use crate::documents::NonAccrualDays;
use crate::errors::LedgerError;
use crate::roi_engine::tick_all_active_purchases;
use crate::store::{decode, LedgerStore, NON_ACCRUAL_DAYS};

/// Weekday dates excluded from accrual each month, on top of the weekends.
pub const EXCLUDED_WEEKDAYS_PER_MONTH: usize = 2;

/// Periodic driver for the daily ROI update. Re-fires within the same day
/// are harmless: the engine skips purchases already accrued today.
pub struct DailyTick {
    period: Duration,
    store: Arc<dyn LedgerStore>,
    dry_run: bool,
    exec_set: JoinSet<()>,
}

impl DailyTick {
    pub fn new(period: Duration, store: Arc<dyn LedgerStore>, dry_run: bool) -> DailyTick {
        DailyTick {
            period,
            store,
            dry_run,
            exec_set: JoinSet::new(),
        }
    }

    pub async fn ticker(&mut self) {
        let mut delay = interval(self.period);
        loop {
            delay.tick().await;
            while self.exec_set.try_join_next().is_some() {}
            if self.dry_run {
                info!("Dry run mode, skipping the daily ROI update");
                continue;
            }
            let store = Arc::clone(&self.store);
            self.exec_set.spawn(async move {
                let today = Utc::now().date_naive();
                match tick_all_active_purchases(store.as_ref(), today) {
                    Ok(report) => {
                        if report.excluded_day {
                            info!("{} is a non-accrual day, nothing to tick", today);
                        } else {
                            info!(
                                "ROI update for {}: {} ticked, {} swept, {} completed, {} skipped, {} failed",
                                today,
                                report.ticked,
                                report.swept,
                                report.completed,
                                report.skipped,
                                report.failed
                            );
                        }
                    }
                    Err(err) => {
                        error!("Error running the ROI update for {}: {}", today, err);
                    }
                }
            });
        }
    }
}

/// Whether accrual runs on `date`: weekends never accrue, and neither do the
/// month's two persisted non-accrual weekdays.
pub fn is_accrual_day(store: &dyn LedgerStore, date: NaiveDate) -> Result<bool, LedgerError> {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return Ok(false);
    }
    let excluded = excluded_days_for_month(store, date.year(), date.month())?;
    Ok(!excluded.days.contains(&date.day()))
}

/// The month's exclusion set, computed once and persisted first-writer-wins
/// so repeated invocations and other process instances all see the same
/// days.
pub fn excluded_days_for_month(
    store: &dyn LedgerStore,
    year: i32,
    month: u32,
) -> Result<NonAccrualDays, LedgerError> {
    let key = month_key(year, month);
    if let Some(doc) = store.get_document(NON_ACCRUAL_DAYS, &key)? {
        return decode(doc);
    }
    let computed = derive_excluded_days(year, month);
    let mut stored = computed.clone();
    store.run_transaction(&mut |tx| {
        if let Some(doc) = tx.get(NON_ACCRUAL_DAYS, &key)? {
            stored = decode(doc)?;
            return Ok(());
        }
        stored = computed.clone();
        tx.set(NON_ACCRUAL_DAYS, &key, serde_json::to_value(&computed)?)
    })?;
    Ok(stored)
}

// The digest of the month key stands in for a random draw: every instance
// derives the same two weekdays for a given month.
fn derive_excluded_days(year: i32, month: u32) -> NonAccrualDays {
    let key = month_key(year, month);
    let last_day = days_in_month(year, month);
    let mut days: Vec<u32> = Vec::new();
    let mut digest = md5::compute(key.as_bytes());
    while days.len() < EXCLUDED_WEEKDAYS_PER_MONTH {
        for byte in digest.iter() {
            let day = u32::from(*byte) % last_day + 1;
            let date = match NaiveDate::from_ymd_opt(year, month, day) {
                Some(date) => date,
                None => continue,
            };
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || days.contains(&day) {
                continue;
            }
            days.push(day);
            if days.len() == EXCLUDED_WEEKDAYS_PER_MONTH {
                break;
            }
        }
        digest = md5::compute(digest.0);
    }
    days.sort_unstable();
    NonAccrualDays {
        year_month: key,
        days,
    }
}

fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|day| NaiveDate::from_ymd_opt(year, month, *day).is_some())
        .unwrap_or(28)
}
