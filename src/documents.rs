use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Accrual stops for good once a purchase has been ticked this many
/// eligible days.
pub const ROI_DAYS_CAP: u32 = 500;

/// Accrued ROI is swept into the wallet every time the day counter hits a
/// multiple of this.
pub const SWEEP_INTERVAL_DAYS: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    /// Public referral code, unique and immutable once issued.
    pub as_trader_id: String,
    /// Sponsor's `asTraderId`; root users have none.
    #[serde(default)]
    pub referred_by: Option<String>,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dashboard {
    pub user_id: String,
    /// Spendable funds. Never negative.
    pub wallet_balance: f64,
    /// Cumulative purchase-time referral-bonus earnings.
    pub level_income: f64,
    /// Running unswept ROI display accumulator, reset to 0 at each sweep.
    pub roi: f64,
    /// Cumulative sweep-time referral-bonus earnings.
    pub roi_wallet: f64,
}

impl Dashboard {
    pub fn new(user_id: &str) -> Dashboard {
        Dashboard {
            user_id: user_id.to_string(),
            ..Dashboard::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Active,
    Completed,
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseStatus::Pending => write!(f, "pending"),
            PurchaseStatus::Active => write!(f, "active"),
            PurchaseStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub package_name: String,
    pub amount: f64,
    pub daily_income: f64,
    pub duration: u32,
    pub total_revenue: f64,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
    /// Stamped by admin activation.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Unswept ROI since the last sweep or since creation.
    #[serde(default)]
    pub roi_accumulated: f64,
    /// Eligible days processed; monotone, capped at `ROI_DAYS_CAP`.
    #[serde(default)]
    pub roi_updated_days: u32,
    /// Day-level idempotency guard against intra-day re-runs.
    #[serde(default)]
    pub last_accrued_on: Option<NaiveDate>,
    /// Set by the sweep that credited the wallet, cleared on the next tick.
    #[serde(default)]
    pub wallet_updated: bool,
    /// Set when the sweep also credited the level-1 sponsor.
    #[serde(default)]
    pub roi_wallet_updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Accepted,
    Removed,
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawalStatus::Pending => write!(f, "pending"),
            WithdrawalStatus::Accepted => write!(f, "accepted"),
            WithdrawalStatus::Removed => write!(f, "removed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub service_charge: f64,
    pub net_amount: f64,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

/// Persisted month-scoped exclusion set, keyed `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonAccrualDays {
    pub year_month: String,
    pub days: Vec<u32>,
}
