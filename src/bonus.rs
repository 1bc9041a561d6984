use std::sync::Arc;

use axum::{http::StatusCode, Json};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::documents::Dashboard;
use crate::errors::LedgerError;
use crate::sponsors::{resolve_sponsor_chain, MAX_SPONSOR_DEPTH};
use crate::store::{decode, require, LedgerStore, LedgerTx, DASHBOARDS, USERS};

/// Purchase-time referral rates for sponsor levels 1 through 3.
pub const PURCHASE_LEVEL_RATES: [f64; MAX_SPONSOR_DEPTH] = [0.05, 0.03, 0.01];

/// Swept ROI pays a level-1-only bonus at this rate.
pub const ROI_SWEEP_RATE: f64 = 0.10;

/// Distributes the purchase-time referral bonus for `base_amount` up the
/// owner's sponsor chain. All credited levels commit in one transaction; a
/// missing sponsor dashboard aborts the whole distribution with no level
/// credited. Returns the number of levels credited.
pub fn distribute_bonus(
    store: &dyn LedgerStore,
    user_id: &str,
    base_amount: f64,
) -> Result<usize, LedgerError> {
    if base_amount <= 0.0 || !base_amount.is_finite() {
        return Err(LedgerError::Validation(format!(
            "bonus base amount {} must be positive",
            base_amount
        )));
    }
    let owner = decode(
        store
            .get_document(USERS, user_id)?
            .ok_or_else(|| LedgerError::not_found(USERS, user_id))?,
    )?;
    let chain = resolve_sponsor_chain(store, &owner, MAX_SPONSOR_DEPTH)?;
    if chain.is_empty() {
        return Ok(0);
    }
    store.run_transaction(&mut |tx| {
        for (level, sponsor) in chain.iter().enumerate() {
            let dashboard: Dashboard = decode(require(tx, DASHBOARDS, &sponsor.user_id)?)?;
            let credit = base_amount * PURCHASE_LEVEL_RATES[level];
            tx.update(
                DASHBOARDS,
                &sponsor.user_id,
                json!({
                    "levelIncome": dashboard.level_income + credit,
                    "walletBalance": dashboard.wallet_balance + credit,
                }),
            )?;
        }
        Ok(())
    })?;
    Ok(chain.len())
}

/// Credits the level-1 sponsor for a swept ROI amount, inside the caller's
/// tick transaction. Returns the credited bonus.
pub fn apply_sweep_bonus(
    tx: &mut dyn LedgerTx,
    sponsor_user_id: &str,
    swept_amount: f64,
) -> Result<f64, LedgerError> {
    let dashboard: Dashboard = decode(require(tx, DASHBOARDS, sponsor_user_id)?)?;
    let credit = swept_amount * ROI_SWEEP_RATE;
    tx.update(
        DASHBOARDS,
        sponsor_user_id,
        json!({
            "roiWallet": dashboard.roi_wallet + credit,
            "walletBalance": dashboard.wallet_balance + credit,
        }),
    )?;
    Ok(credit)
}

#[derive(Debug, Deserialize)]
pub struct BonusInput {
    pub user_id: String,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct BonusReceipt {
    pub levels_credited: usize,
}

pub async fn handle_distribute_bonus(
    input: Json<BonusInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<Json<BonusReceipt>, StatusCode> {
    match distribute_bonus(store.as_ref(), &input.user_id, input.amount) {
        Ok(levels_credited) => Ok(Json(BonusReceipt { levels_credited })),
        Err(err) => {
            error!("Error distributing bonus for {}: {}", input.user_id, err);
            Err(err.status_code())
        }
    }
}
