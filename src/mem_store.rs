use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::documents::{Dashboard, Purchase, PurchaseStatus, User};
use crate::errors::LedgerError;
use crate::store::{merge_fields, LedgerStore, LedgerTx, DASHBOARDS, PURCHASES, TX_RETRY_LIMIT, USERS};

type Collections = HashMap<String, HashMap<String, Value>>;

/// In-memory ledger double for tests. Transactions buffer their writes and
/// apply them under one lock; `inject_conflicts` makes the next N commits
/// fail with `Conflict` to exercise the bounded retry path.
#[derive(Default)]
pub struct MemoryLedger {
    data: Mutex<Collections>,
    conflicts_to_inject: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger {
        MemoryLedger::default()
    }

    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

enum PendingWrite {
    Set {
        collection: String,
        id: String,
        body: Value,
    },
    Update {
        collection: String,
        id: String,
        fields: Value,
    },
}

struct MemoryTx<'a> {
    data: &'a Collections,
    writes: Vec<PendingWrite>,
}

impl MemoryTx<'_> {
    fn staged(&self, collection: &str, id: &str) -> bool {
        self.writes.iter().any(|write| match write {
            PendingWrite::Set { collection: c, id: i, .. }
            | PendingWrite::Update { collection: c, id: i, .. } => c == collection && i == id,
        })
    }

    fn stored(&self, collection: &str, id: &str) -> Option<&Value> {
        self.data.get(collection).and_then(|docs| docs.get(id))
    }
}

impl LedgerTx for MemoryTx<'_> {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, LedgerError> {
        Ok(self.stored(collection, id).cloned())
    }

    fn set(&mut self, collection: &str, id: &str, body: Value) -> Result<(), LedgerError> {
        self.writes.push(PendingWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            body,
        });
        Ok(())
    }

    fn update(&mut self, collection: &str, id: &str, fields: Value) -> Result<(), LedgerError> {
        if self.stored(collection, id).is_none() && !self.staged(collection, id) {
            return Err(LedgerError::not_found(collection, id));
        }
        self.writes.push(PendingWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
        Ok(())
    }
}

impl LedgerStore for MemoryLedger {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>, LedgerError> {
        let data = self.data.lock().unwrap();
        Ok(data.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    fn query_equals(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, LedgerError> {
        let data = self.data.lock().unwrap();
        let matches = data
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| doc.get(field).and_then(Value::as_str) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(matches)
    }

    fn set_document(&self, collection: &str, id: &str, body: Value) -> Result<(), LedgerError> {
        let mut data = self.data.lock().unwrap();
        data.entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), body);
        Ok(())
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), LedgerError> {
        let mut data = self.data.lock().unwrap();
        let doc = data
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| LedgerError::not_found(collection, id))?;
        merge_fields(doc, &fields);
        Ok(())
    }

    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        for _attempt in 0..TX_RETRY_LIMIT {
            let mut data = self.data.lock().unwrap();
            let writes = {
                let mut tx = MemoryTx {
                    data: &*data,
                    writes: Vec::new(),
                };
                body(&mut tx)?;
                tx.writes
            };
            if self.take_injected_conflict() {
                continue;
            }
            for write in writes {
                match write {
                    PendingWrite::Set { collection, id, body } => {
                        data.entry(collection).or_default().insert(id, body);
                    }
                    PendingWrite::Update { collection, id, fields } => {
                        if let Some(doc) =
                            data.get_mut(&collection).and_then(|docs| docs.get_mut(&id))
                        {
                            merge_fields(doc, &fields);
                        }
                    }
                }
            }
            return Ok(());
        }
        Err(LedgerError::Conflict)
    }
}

pub fn read<T: DeserializeOwned>(store: &MemoryLedger, collection: &str, id: &str) -> T {
    let doc = store
        .get_document(collection, id)
        .unwrap()
        .unwrap_or_else(|| panic!("missing document {}/{}", collection, id));
    serde_json::from_value(doc).unwrap()
}

pub fn seed_user(store: &MemoryLedger, user_id: &str, as_trader_id: &str, referred_by: Option<&str>) {
    let user = User {
        user_id: user_id.to_string(),
        as_trader_id: as_trader_id.to_string(),
        referred_by: referred_by.map(str::to_string),
        name: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        created_at: Utc::now(),
    };
    store
        .set_document(USERS, user_id, serde_json::to_value(&user).unwrap())
        .unwrap();
}

pub fn seed_dashboard(store: &MemoryLedger, user_id: &str) {
    store
        .set_document(
            DASHBOARDS,
            user_id,
            serde_json::to_value(Dashboard::new(user_id)).unwrap(),
        )
        .unwrap();
}

pub fn seed_active_purchase(
    store: &MemoryLedger,
    id: &str,
    user_id: &str,
    daily_income: f64,
    roi_updated_days: u32,
) {
    let purchase = Purchase {
        id: id.to_string(),
        user_id: user_id.to_string(),
        package_name: "starter".to_string(),
        amount: 1000.0,
        daily_income,
        duration: 500,
        total_revenue: daily_income * 500.0,
        status: PurchaseStatus::Active,
        created_at: Utc::now(),
        start_date: None,
        roi_accumulated: daily_income * f64::from(roi_updated_days),
        roi_updated_days,
        last_accrued_on: None,
        wallet_updated: false,
        roi_wallet_updated: false,
    };
    store
        .set_document(PURCHASES, id, serde_json::to_value(&purchase).unwrap())
        .unwrap();
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::USERS;

    #[test]
    fn test_transaction_applies_all_writes() {
        let store = MemoryLedger::new();
        store
            .set_document(USERS, "u1", json!({"userId": "u1", "name": "one"}))
            .unwrap();
        store
            .run_transaction(&mut |tx| {
                tx.update(USERS, "u1", json!({"name": "renamed"}))?;
                tx.set(USERS, "u2", json!({"userId": "u2"}))
            })
            .unwrap();
        let u1 = store.get_document(USERS, "u1").unwrap().unwrap();
        assert_eq!(u1["name"], "renamed");
        assert!(store.get_document(USERS, "u2").unwrap().is_some());
    }

    #[test]
    fn test_failed_body_applies_nothing() {
        let store = MemoryLedger::new();
        store
            .set_document(USERS, "u1", json!({"userId": "u1", "name": "one"}))
            .unwrap();
        let result = store.run_transaction(&mut |tx| {
            tx.update(USERS, "u1", json!({"name": "renamed"}))?;
            tx.update(USERS, "missing", json!({"name": "x"}))
        });
        assert!(matches!(result, Err(LedgerError::NotFound { .. })));
        let u1 = store.get_document(USERS, "u1").unwrap().unwrap();
        assert_eq!(u1["name"], "one");
    }

    #[test]
    fn test_conflicts_are_retried_within_the_limit() {
        let store = MemoryLedger::new();
        store.inject_conflicts(TX_RETRY_LIMIT - 1);
        store
            .run_transaction(&mut |tx| tx.set(USERS, "u1", json!({"userId": "u1"})))
            .unwrap();
        assert!(store.get_document(USERS, "u1").unwrap().is_some());
    }

    #[test]
    fn test_conflicts_beyond_the_limit_surface() {
        let store = MemoryLedger::new();
        store.inject_conflicts(TX_RETRY_LIMIT);
        let result = store.run_transaction(&mut |tx| tx.set(USERS, "u1", json!({"userId": "u1"})));
        assert!(matches!(result, Err(LedgerError::Conflict)));
        assert!(store.get_document(USERS, "u1").unwrap().is_none());
    }

    #[test]
    fn test_query_equals_filters_by_field() {
        let store = MemoryLedger::new();
        store
            .set_document(USERS, "u1", json!({"userId": "u1", "referredBy": "AST1"}))
            .unwrap();
        store
            .set_document(USERS, "u2", json!({"userId": "u2", "referredBy": "AST2"}))
            .unwrap();
        let matches = store.query_equals(USERS, "referredBy", "AST1").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["userId"], "u1");
    }
}
