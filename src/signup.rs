use std::sync::Arc;

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use log::error;
use serde::Deserialize;
use uuid::Uuid;

use crate::documents::{Dashboard, User};
use crate::errors::LedgerError;
use crate::sponsors::find_by_trader_id;
use crate::store::{LedgerStore, DASHBOARDS, USERS};

#[derive(Debug, Deserialize)]
pub struct SignupInput {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub sponsor_id: Option<String>,
}

/// Creates a user and its zeroed dashboard in one transaction. The referral
/// code is minted here and never changes; the sponsor code, when given, must
/// resolve to exactly one existing user.
pub fn signup_user(
    store: &dyn LedgerStore,
    input: &SignupInput,
    now: DateTime<Utc>,
) -> Result<User, LedgerError> {
    if input.user_id.is_empty() || input.email.is_empty() {
        return Err(LedgerError::Validation(
            "user_id and email are required".to_string(),
        ));
    }
    let referred_by = match &input.sponsor_id {
        Some(code) if !code.is_empty() => match find_by_trader_id(store, code)? {
            Some(sponsor) => Some(sponsor.as_trader_id),
            None => {
                return Err(LedgerError::Validation(format!(
                    "unknown sponsor code {}",
                    code
                )))
            }
        },
        _ => None,
    };
    let user = User {
        user_id: input.user_id.clone(),
        as_trader_id: mint_trader_id(),
        referred_by,
        name: input.name.clone(),
        email: input.email.clone(),
        created_at: now,
    };
    let user_doc = serde_json::to_value(&user)?;
    let dashboard_doc = serde_json::to_value(Dashboard::new(&user.user_id))?;
    store.run_transaction(&mut |tx| {
        if tx.get(USERS, &user.user_id)?.is_some() {
            return Err(LedgerError::Validation(format!(
                "user {} already exists",
                user.user_id
            )));
        }
        tx.set(USERS, &user.user_id, user_doc.clone())?;
        tx.set(DASHBOARDS, &user.user_id, dashboard_doc.clone())
    })?;
    Ok(user)
}

pub fn mint_trader_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("AST{}", hex[..10].to_uppercase())
}

pub async fn handle_signup(
    input: Json<SignupInput>,
    store: Arc<dyn LedgerStore>,
) -> Result<Json<User>, StatusCode> {
    match signup_user(store.as_ref(), &input, Utc::now()) {
        Ok(user) => Ok(Json(user)),
        Err(err) => {
            error!("Error signing up user {}: {}", input.user_id, err);
            Err(err.status_code())
        }
    }
}
