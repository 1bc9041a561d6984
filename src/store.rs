use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::LedgerError;

pub const USERS: &str = "users";
pub const DASHBOARDS: &str = "dashboard";
pub const PURCHASES: &str = "purchases";
pub const WITHDRAWALS: &str = "withdrawals";
pub const NON_ACCRUAL_DAYS: &str = "nonAccrualDays";

/// How many times a transaction body is re-run on a commit conflict before
/// the conflict is surfaced to the caller.
pub const TX_RETRY_LIMIT: usize = 3;

/// Reads and buffered writes inside one atomic transaction. Reads must come
/// before the writes they depend on; writes become visible all-or-nothing at
/// commit.
pub trait LedgerTx {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, LedgerError>;

    /// Full-document write, creating the document if absent.
    fn set(&mut self, collection: &str, id: &str, body: Value) -> Result<(), LedgerError>;

    /// Merge `fields` into an existing document. Commits fail with
    /// `NotFound` if the document is absent.
    fn update(&mut self, collection: &str, id: &str, fields: Value) -> Result<(), LedgerError>;
}

/// Minimum surface the core requires from the document store.
pub trait LedgerStore: Send + Sync {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>, LedgerError>;

    fn query_equals(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, LedgerError>;

    fn set_document(&self, collection: &str, id: &str, body: Value) -> Result<(), LedgerError>;

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), LedgerError>;

    /// Runs `body` against a transaction and commits its writes atomically.
    /// On a commit conflict the body is re-run, up to `TX_RETRY_LIMIT`
    /// attempts in total; any other error aborts with nothing applied.
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError>;
}

pub fn decode<T: DeserializeOwned>(doc: Value) -> Result<T, LedgerError> {
    Ok(serde_json::from_value(doc)?)
}

/// Transactional read of a document that must exist.
pub fn require(
    tx: &mut dyn LedgerTx,
    collection: &str,
    id: &str,
) -> Result<Value, LedgerError> {
    tx.get(collection, id)?
        .ok_or_else(|| LedgerError::not_found(collection, id))
}

/// Shallow top-level merge; all persisted documents are flat objects.
pub fn merge_fields(body: &mut Value, fields: &Value) {
    if let (Value::Object(dst), Value::Object(src)) = (body, fields) {
        for (key, value) in src {
            dst.insert(key.clone(), value.clone());
        }
    }
}
