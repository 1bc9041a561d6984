use std::sync::Arc;

use axum::{http::StatusCode, Json};
use chrono::{NaiveDate, Utc};
use log::{error, warn};
use serde::Serialize;
use serde_json::json;

use crate::bonus::apply_sweep_bonus;
use crate::documents::{Dashboard, Purchase, PurchaseStatus, User, ROI_DAYS_CAP, SWEEP_INTERVAL_DAYS};
use crate::errors::LedgerError;
use crate::scheduler::is_accrual_day;
use crate::sponsors::resolve_sponsor_chain;
use crate::store::{decode, require, LedgerStore, DASHBOARDS, PURCHASES, USERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Accrued { swept: bool, completed: bool },
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct TickReport {
    pub date: NaiveDate,
    pub excluded_day: bool,
    pub ticked: usize,
    pub swept: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TickReport {
    fn new(date: NaiveDate) -> TickReport {
        TickReport {
            date,
            excluded_day: false,
            ticked: 0,
            swept: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

/// Runs one accrual day over every active purchase. Each purchase's tick is
/// its own transaction; a failed tick is logged and left for the next
/// scheduled run instead of failing the batch.
pub fn tick_all_active_purchases(
    store: &dyn LedgerStore,
    today: NaiveDate,
) -> Result<TickReport, LedgerError> {
    let mut report = TickReport::new(today);
    if !is_accrual_day(store, today)? {
        report.excluded_day = true;
        return Ok(report);
    }
    for doc in store.query_equals(PURCHASES, "status", "active")? {
        let purchase: Purchase = match decode(doc) {
            Ok(purchase) => purchase,
            Err(err) => {
                error!("Error decoding an active purchase: {}", err);
                report.failed += 1;
                continue;
            }
        };
        match tick_purchase(store, &purchase, today) {
            Ok(TickOutcome::Accrued { swept, completed }) => {
                report.ticked += 1;
                if swept {
                    report.swept += 1;
                }
                if completed {
                    report.completed += 1;
                }
            }
            Ok(TickOutcome::Skipped) => report.skipped += 1,
            Err(err) => {
                error!("Error ticking purchase {}: {}", purchase.id, err);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Advances one purchase by one eligible day: accrue the daily income, sweep
/// the accumulator into the owner's wallet every `SWEEP_INTERVAL_DAYS`
/// accrued days (paying the level-1 sweep bonus), and complete the purchase
/// at the day cap. Everything commits in a single transaction; the state is
/// re-read inside it, so a concurrent run that already ticked today turns
/// this into a no-op.
pub fn tick_purchase(
    store: &dyn LedgerStore,
    purchase: &Purchase,
    today: NaiveDate,
) -> Result<TickOutcome, LedgerError> {
    if purchase.status != PurchaseStatus::Active
        || purchase.roi_updated_days >= ROI_DAYS_CAP
        || purchase.last_accrued_on == Some(today)
    {
        return Ok(TickOutcome::Skipped);
    }
    // The sponsor lookup scans by referral code, so it stays outside the
    // transaction body.
    let sweep_ahead = (purchase.roi_updated_days + 1) % SWEEP_INTERVAL_DAYS == 0;
    let sponsor = if sweep_ahead {
        sweep_sponsor(store, &purchase.user_id)?
    } else {
        None
    };
    let mut outcome = TickOutcome::Skipped;
    store.run_transaction(&mut |tx| {
        let current: Purchase = decode(require(tx, PURCHASES, &purchase.id)?)?;
        if current.status != PurchaseStatus::Active
            || current.roi_updated_days >= ROI_DAYS_CAP
            || current.last_accrued_on == Some(today)
        {
            outcome = TickOutcome::Skipped;
            return Ok(());
        }
        let dashboard: Dashboard = decode(require(tx, DASHBOARDS, &current.user_id)?)?;
        let days = current.roi_updated_days + 1;
        let accumulated = current.roi_accumulated + current.daily_income;
        let sweep = days % SWEEP_INTERVAL_DAYS == 0 && !current.wallet_updated;
        let completed = days == ROI_DAYS_CAP;
        let status = if completed {
            PurchaseStatus::Completed
        } else {
            PurchaseStatus::Active
        };
        if sweep {
            tx.update(
                DASHBOARDS,
                &current.user_id,
                json!({
                    "walletBalance": dashboard.wallet_balance + accumulated,
                    "roi": 0.0,
                }),
            )?;
            let mut bonus_credited = false;
            if let Some(sponsor) = &sponsor {
                apply_sweep_bonus(tx, &sponsor.user_id, accumulated)?;
                bonus_credited = true;
            }
            tx.update(
                PURCHASES,
                &current.id,
                json!({
                    "roiAccumulated": 0.0,
                    "roiUpdatedDays": days,
                    "lastAccruedOn": today,
                    "walletUpdated": true,
                    "roiWalletUpdated": bonus_credited,
                    "status": status,
                }),
            )?;
        } else {
            tx.update(
                DASHBOARDS,
                &current.user_id,
                json!({ "roi": dashboard.roi + current.daily_income }),
            )?;
            tx.update(
                PURCHASES,
                &current.id,
                json!({
                    "roiAccumulated": accumulated,
                    "roiUpdatedDays": days,
                    "lastAccruedOn": today,
                    "walletUpdated": false,
                    "roiWalletUpdated": false,
                    "status": status,
                }),
            )?;
        }
        outcome = TickOutcome::Accrued {
            swept: sweep,
            completed,
        };
        Ok(())
    })?;
    Ok(outcome)
}

/// Level-1 sponsor for the sweep bonus. Corrupted referral data cannot be
/// fixed by retrying, so the accrual proceeds without the bonus and the skip
/// is logged for manual remediation.
fn sweep_sponsor(store: &dyn LedgerStore, user_id: &str) -> Result<Option<User>, LedgerError> {
    let owner: User = decode(
        store
            .get_document(USERS, user_id)?
            .ok_or_else(|| LedgerError::not_found(USERS, user_id))?,
    )?;
    match resolve_sponsor_chain(store, &owner, 1) {
        Ok(mut chain) => Ok(chain.pop()),
        Err(LedgerError::Consistency(reason)) => {
            warn!("Skipping the sweep bonus for {}: {}", user_id, reason);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub async fn handle_trigger_roi_update(
    store: Arc<dyn LedgerStore>,
) -> Result<Json<TickReport>, StatusCode> {
    let today = Utc::now().date_naive();
    match tick_all_active_purchases(store.as_ref(), today) {
        Ok(report) => Ok(Json(report)),
        Err(err) => {
            error!("Error running the ROI update for {}: {}", today, err);
            Err(err.status_code())
        }
    }
}
