use std::sync::Arc;

use axum::{http::StatusCode, Json};
use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::bonus::distribute_bonus;
use crate::documents::{Purchase, PurchaseStatus};
use crate::errors::LedgerError;
use crate::store::{decode, require, LedgerStore, PURCHASES, USERS};

#[derive(Debug, Deserialize)]
pub struct BuyPackageInput {
    pub user_id: String,
    pub package_name: String,
    pub amount: f64,
    pub daily_income: f64,
    pub duration: u32,
    pub total_revenue: f64,
}

/// Creates a pending purchase. Terms are validated here so the accrual
/// engine never sees an invalid purchase.
pub fn create_purchase(
    store: &dyn LedgerStore,
    input: &BuyPackageInput,
    now: DateTime<Utc>,
) -> Result<Purchase, LedgerError> {
    if input.package_name.is_empty() {
        return Err(LedgerError::Validation(
            "package_name is required".to_string(),
        ));
    }
    for (field, value) in [
        ("amount", input.amount),
        ("daily_income", input.daily_income),
        ("total_revenue", input.total_revenue),
    ] {
        if value <= 0.0 || !value.is_finite() {
            return Err(LedgerError::Validation(format!(
                "{} must be positive, got {}",
                field, value
            )));
        }
    }
    if input.duration == 0 {
        return Err(LedgerError::Validation(
            "duration must be positive".to_string(),
        ));
    }
    if store.get_document(USERS, &input.user_id)?.is_none() {
        return Err(LedgerError::not_found(USERS, &input.user_id));
    }
    let purchase = Purchase {
        id: Uuid::new_v4().to_string(),
        user_id: input.user_id.clone(),
        package_name: input.package_name.clone(),
        amount: input.amount,
        daily_income: input.daily_income,
        duration: input.duration,
        total_revenue: input.total_revenue,
        status: PurchaseStatus::Pending,
        created_at: now,
        start_date: None,
        roi_accumulated: 0.0,
        roi_updated_days: 0,
        last_accrued_on: None,
        wallet_updated: false,
        roi_wallet_updated: false,
    };
    store.set_document(PURCHASES, &purchase.id, serde_json::to_value(&purchase)?)?;
    Ok(purchase)
}

/// Admin activation: `pending -> active`, stamping the start date. Any other
/// source state is rejected.
pub fn activate_purchase(
    store: &dyn LedgerStore,
    purchase_id: &str,
    today: NaiveDate,
) -> Result<(), LedgerError> {
    store.run_transaction(&mut |tx| {
        let purchase: Purchase = decode(require(tx, PURCHASES, purchase_id)?)?;
        if purchase.status != PurchaseStatus::Pending {
            return Err(LedgerError::Validation(format!(
                "purchase {} is {}, not pending",
                purchase_id, purchase.status
            )));
        }
        tx.update(
            PURCHASES,
            purchase_id,
            json!({ "status": PurchaseStatus::Active, "startDate": today }),
        )
    })
}

pub async fn handle_buy_package(
    input: Json<BuyPackageInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<Json<Purchase>, StatusCode> {
    match create_purchase(store.as_ref(), &input, Utc::now()) {
        Ok(purchase) => {
            // The purchase stands even if the referral payout fails; the
            // failure is logged for remediation.
            if let Err(err) = distribute_bonus(store.as_ref(), &purchase.user_id, purchase.amount)
            {
                error!(
                    "Error distributing the referral bonus for purchase {}: {}",
                    purchase.id, err
                );
            }
            Ok(Json(purchase))
        }
        Err(err) => {
            error!("Error creating a purchase for {}: {}", input.user_id, err);
            Err(err.status_code())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivatePackageInput {
    pub purchase_id: String,
}

pub async fn handle_activate_package(
    input: Json<ActivatePackageInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<(), StatusCode> {
    match activate_purchase(store.as_ref(), &input.purchase_id, Utc::now().date_naive()) {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Error activating purchase {}: {}", input.purchase_id, err);
            Err(err.status_code())
        }
    }
}
