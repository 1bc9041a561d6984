use std::{collections::HashMap, sync::Arc};

use axum::{extract::Query, http::StatusCode, Json};
use log::error;
use serde::Serialize;

use crate::documents::{Dashboard, User};
use crate::errors::LedgerError;
use crate::sponsors::downline_counts;
use crate::store::{decode, LedgerStore, DASHBOARDS, USERS};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    #[serde(flatten)]
    pub dashboard: Dashboard,
    pub as_trader_id: String,
    pub direct_members: u64,
    pub total_downline: u64,
}

/// The stored dashboard plus the downline counts, which are recomputed on
/// demand rather than maintained incrementally.
pub fn dashboard_summary(
    store: &dyn LedgerStore,
    user_id: &str,
) -> Result<DashboardSummary, LedgerError> {
    let user: User = decode(
        store
            .get_document(USERS, user_id)?
            .ok_or_else(|| LedgerError::not_found(USERS, user_id))?,
    )?;
    let dashboard: Dashboard = decode(
        store
            .get_document(DASHBOARDS, user_id)?
            .ok_or_else(|| LedgerError::not_found(DASHBOARDS, user_id))?,
    )?;
    let counts = downline_counts(store, &user.as_trader_id)?;
    Ok(DashboardSummary {
        dashboard,
        as_trader_id: user.as_trader_id,
        direct_members: counts.direct_members,
        total_downline: counts.total_downline,
    })
}

pub async fn handle_get_dashboard(
    params: Query<HashMap<String, String>>,
    store: Arc<dyn LedgerStore>,
) -> Result<Json<DashboardSummary>, StatusCode> {
    if let Some(user_id) = params.get("user_id") {
        match dashboard_summary(store.as_ref(), user_id) {
            Ok(summary) => return Ok(Json(summary)),
            Err(err) => {
                error!("Error reading the dashboard of {}: {}", user_id, err);
                return Err(err.status_code());
            }
        }
    }
    Err(StatusCode::BAD_REQUEST)
}
