use std::sync::Arc;

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use log::error;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::documents::{Dashboard, Withdrawal, WithdrawalStatus};
use crate::errors::LedgerError;
use crate::store::{decode, require, LedgerStore, DASHBOARDS, WITHDRAWALS};

/// Share of a withdrawal kept as the service charge.
pub const SERVICE_CHARGE_RATE: f64 = 0.10;

/// Records a pending withdrawal with its service charge and net payable
/// amount. The balance is checked again, transactionally, at acceptance.
pub fn request_withdrawal(
    store: &dyn LedgerStore,
    user_id: &str,
    amount: f64,
    now: DateTime<Utc>,
) -> Result<Withdrawal, LedgerError> {
    if amount <= 0.0 || !amount.is_finite() {
        return Err(LedgerError::Validation(format!(
            "withdrawal amount must be positive, got {}",
            amount
        )));
    }
    let dashboard: Dashboard = decode(
        store
            .get_document(DASHBOARDS, user_id)?
            .ok_or_else(|| LedgerError::not_found(DASHBOARDS, user_id))?,
    )?;
    if amount > dashboard.wallet_balance {
        return Err(LedgerError::Validation(format!(
            "withdrawal of {} exceeds the wallet balance {}",
            amount, dashboard.wallet_balance
        )));
    }
    let service_charge = amount * SERVICE_CHARGE_RATE;
    let withdrawal = Withdrawal {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        amount,
        service_charge,
        net_amount: amount - service_charge,
        status: WithdrawalStatus::Pending,
        created_at: now,
    };
    store.set_document(
        WITHDRAWALS,
        &withdrawal.id,
        serde_json::to_value(&withdrawal)?,
    )?;
    Ok(withdrawal)
}

/// Admin acceptance: re-reads the balance and debits it in the same
/// transaction that flips the status, so a concurrent sweep cannot race the
/// debit and the wallet never goes negative.
pub fn accept_withdrawal(store: &dyn LedgerStore, withdrawal_id: &str) -> Result<(), LedgerError> {
    store.run_transaction(&mut |tx| {
        let withdrawal: Withdrawal = decode(require(tx, WITHDRAWALS, withdrawal_id)?)?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(LedgerError::Validation(format!(
                "withdrawal {} is {}, not pending",
                withdrawal_id, withdrawal.status
            )));
        }
        let dashboard: Dashboard = decode(require(tx, DASHBOARDS, &withdrawal.user_id)?)?;
        if dashboard.wallet_balance < withdrawal.amount {
            return Err(LedgerError::Validation(format!(
                "withdrawal of {} exceeds the wallet balance {}",
                withdrawal.amount, dashboard.wallet_balance
            )));
        }
        tx.update(
            DASHBOARDS,
            &withdrawal.user_id,
            json!({ "walletBalance": dashboard.wallet_balance - withdrawal.amount }),
        )?;
        tx.update(
            WITHDRAWALS,
            withdrawal_id,
            json!({ "status": WithdrawalStatus::Accepted }),
        )
    })
}

/// Admin removal of a pending withdrawal. Nothing is debited.
pub fn remove_withdrawal(store: &dyn LedgerStore, withdrawal_id: &str) -> Result<(), LedgerError> {
    store.run_transaction(&mut |tx| {
        let withdrawal: Withdrawal = decode(require(tx, WITHDRAWALS, withdrawal_id)?)?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(LedgerError::Validation(format!(
                "withdrawal {} is {}, not pending",
                withdrawal_id, withdrawal.status
            )));
        }
        tx.update(
            WITHDRAWALS,
            withdrawal_id,
            json!({ "status": WithdrawalStatus::Removed }),
        )
    })
}

#[derive(Debug, Deserialize)]
pub struct WithdrawInput {
    pub user_id: String,
    pub amount: f64,
}

pub async fn handle_withdraw(
    input: Json<WithdrawInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<Json<Withdrawal>, StatusCode> {
    match request_withdrawal(store.as_ref(), &input.user_id, input.amount, Utc::now()) {
        Ok(withdrawal) => Ok(Json(withdrawal)),
        Err(err) => {
            error!(
                "Error creating a withdrawal for {}: {}",
                input.user_id, err
            );
            Err(err.status_code())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalActionInput {
    pub withdrawal_id: String,
}

pub async fn handle_accept_withdrawal(
    input: Json<WithdrawalActionInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<(), StatusCode> {
    match accept_withdrawal(store.as_ref(), &input.withdrawal_id) {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(
                "Error accepting withdrawal {}: {}",
                input.withdrawal_id, err
            );
            Err(err.status_code())
        }
    }
}

pub async fn handle_remove_withdrawal(
    input: Json<WithdrawalActionInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<(), StatusCode> {
    match remove_withdrawal(store.as_ref(), &input.withdrawal_id) {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(
                "Error removing withdrawal {}: {}",
                input.withdrawal_id, err
            );
            Err(err.status_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::{read, seed_dashboard, MemoryLedger};

    fn fund_wallet(store: &MemoryLedger, user_id: &str, balance: f64) {
        seed_dashboard(store, user_id);
        store
            .update_document(DASHBOARDS, user_id, json!({ "walletBalance": balance }))
            .unwrap();
    }

    fn dashboard(store: &MemoryLedger, user_id: &str) -> Dashboard {
        read(store, DASHBOARDS, user_id)
    }

    #[test]
    fn test_request_computes_the_service_charge() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 1000.0);
        let withdrawal = request_withdrawal(&store, "u1", 1000.0, Utc::now()).unwrap();
        assert_eq!(withdrawal.service_charge, 100.0);
        assert_eq!(withdrawal.net_amount, 900.0);
        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
        // Nothing is debited until acceptance.
        assert_eq!(dashboard(&store, "u1").wallet_balance, 1000.0);
    }

    #[test]
    fn test_request_rejects_non_positive_amounts() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 1000.0);
        assert!(matches!(
            request_withdrawal(&store, "u1", 0.0, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            request_withdrawal(&store, "u1", -10.0, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_request_rejects_amounts_over_the_balance() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 500.0);
        let result = request_withdrawal(&store, "u1", 1000.0, Utc::now());
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_acceptance_debits_the_full_amount() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 1000.0);
        let withdrawal = request_withdrawal(&store, "u1", 1000.0, Utc::now()).unwrap();
        accept_withdrawal(&store, &withdrawal.id).unwrap();
        assert_eq!(dashboard(&store, "u1").wallet_balance, 0.0);
        let stored: Withdrawal = read(&store, WITHDRAWALS, &withdrawal.id);
        assert_eq!(stored.status, WithdrawalStatus::Accepted);
    }

    #[test]
    fn test_acceptance_never_drives_the_wallet_negative() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 1000.0);
        let withdrawal = request_withdrawal(&store, "u1", 800.0, Utc::now()).unwrap();
        // The balance dropped between request and acceptance.
        store
            .update_document(DASHBOARDS, "u1", json!({ "walletBalance": 500.0 }))
            .unwrap();
        let result = accept_withdrawal(&store, &withdrawal.id);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(dashboard(&store, "u1").wallet_balance, 500.0);
        let stored: Withdrawal = read(&store, WITHDRAWALS, &withdrawal.id);
        assert_eq!(stored.status, WithdrawalStatus::Pending);
    }

    #[test]
    fn test_acceptance_is_not_repeatable() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 1000.0);
        let withdrawal = request_withdrawal(&store, "u1", 400.0, Utc::now()).unwrap();
        accept_withdrawal(&store, &withdrawal.id).unwrap();
        let result = accept_withdrawal(&store, &withdrawal.id);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(dashboard(&store, "u1").wallet_balance, 600.0);
    }

    #[test]
    fn test_removal_keeps_the_balance() {
        let store = MemoryLedger::new();
        fund_wallet(&store, "u1", 1000.0);
        let withdrawal = request_withdrawal(&store, "u1", 400.0, Utc::now()).unwrap();
        remove_withdrawal(&store, &withdrawal.id).unwrap();
        assert_eq!(dashboard(&store, "u1").wallet_balance, 1000.0);
        let stored: Withdrawal = read(&store, WITHDRAWALS, &withdrawal.id);
        assert_eq!(stored.status, WithdrawalStatus::Removed);
    }
}
