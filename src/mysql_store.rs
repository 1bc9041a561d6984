use std::sync::Mutex;

use log::warn;
use mysql::{prelude::Queryable, Pool, PooledConn, TxOpts};
use serde_json::Value;

use crate::errors::LedgerError;
use crate::store::{merge_fields, LedgerStore, LedgerTx, TX_RETRY_LIMIT};

/// MySQL-backed document store. Every document lives as one row in the
/// `documents` table with a version counter; transactions record the
/// versions they read and commit only if none of them moved, so concurrent
/// writers resolve by optimistic retry.
pub struct MysqlLedger {
    conn: Mutex<PooledConn>,
}

impl MysqlLedger {
    pub fn connect(url: &str) -> Result<MysqlLedger, LedgerError> {
        let mut conn = Pool::new(url)?.get_conn()?;
        conn.query_drop(
            "CREATE TABLE IF NOT EXISTS documents (
                collection VARCHAR(64) NOT NULL,
                id VARCHAR(128) NOT NULL,
                version BIGINT UNSIGNED NOT NULL DEFAULT 1,
                body JSON NOT NULL,
                PRIMARY KEY (collection, id)
            )",
        )?;
        Ok(MysqlLedger {
            conn: Mutex::new(conn),
        })
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

struct DocumentTx<'a> {
    conn: &'a mut PooledConn,
    // (collection, id, version); version 0 marks a read of an absent document.
    reads: Vec<(String, String, u64)>,
    writes: Vec<PendingWrite>,
}

impl LedgerTx for DocumentTx<'_> {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, LedgerError> {
        let row: Option<(String, u64)> = self.conn.exec_first(
            "SELECT body, version FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
        )?;
        match row {
            Some((body, version)) => {
                self.reads
                    .push((collection.to_string(), id.to_string(), version));
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => {
                self.reads.push((collection.to_string(), id.to_string(), 0));
                Ok(None)
            }
        }
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
        self.writes.push(PendingWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
        Ok(())
    }
}

// Lock-wait and deadlock errors are retryable conflicts, not backend faults.
fn commit_error(err: mysql::Error) -> LedgerError {
    if let mysql::Error::MySqlError(ref server_err) = err {
        if server_err.code == 1213 || server_err.code == 1205 {
            return LedgerError::Conflict;
        }
    }
    LedgerError::from(err)
}

fn commit(
    conn: &mut PooledConn,
    reads: &[(String, String, u64)],
    writes: &[PendingWrite],
) -> Result<(), LedgerError> {
    let mut sql_tx = conn
        .start_transaction(TxOpts::default())
        .map_err(commit_error)?;
    for (collection, id, version) in reads {
        let current: Option<u64> = sql_tx
            .exec_first(
                "SELECT version FROM documents WHERE collection = ? AND id = ? FOR UPDATE",
                (collection, id),
            )
            .map_err(commit_error)?;
        if current.unwrap_or(0) != *version {
            return Err(LedgerError::Conflict);
        }
    }
    for write in writes {
        match write {
            PendingWrite::Set { collection, id, body } => {
                sql_tx
                    .exec_drop(
                        "INSERT INTO documents (collection, id, version, body)
                            VALUES (?, ?, 1, ?)
                            ON DUPLICATE KEY UPDATE body = VALUES(body), version = version + 1",
                        (collection, id, body.to_string()),
                    )
                    .map_err(commit_error)?;
            }
            PendingWrite::Update { collection, id, fields } => {
                let row: Option<String> = sql_tx
                    .exec_first(
                        "SELECT body FROM documents WHERE collection = ? AND id = ? FOR UPDATE",
                        (collection, id),
                    )
                    .map_err(commit_error)?;
                let body_text = row.ok_or_else(|| LedgerError::not_found(collection, id))?;
                let mut body: Value = serde_json::from_str(&body_text)?;
                merge_fields(&mut body, fields);
                sql_tx
                    .exec_drop(
                        "UPDATE documents SET body = ?, version = version + 1
                            WHERE collection = ? AND id = ?",
                        (body.to_string(), collection, id),
                    )
                    .map_err(commit_error)?;
            }
        }
    }
    sql_tx.commit().map_err(commit_error)?;
    Ok(())
}

impl LedgerStore for MysqlLedger {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let row: Option<String> = conn.exec_first(
            "SELECT body FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
        )?;
        match row {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn query_equals(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let rows: Vec<String> = conn.exec(
            "SELECT body FROM documents
                WHERE collection = ? AND JSON_UNQUOTE(JSON_EXTRACT(body, ?)) = ?",
            (collection, format!("$.{}", field), value),
        )?;
        rows.iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    fn set_document(&self, collection: &str, id: &str, body: Value) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        conn.exec_drop(
            "INSERT INTO documents (collection, id, version, body)
                VALUES (?, ?, 1, ?)
                ON DUPLICATE KEY UPDATE body = VALUES(body), version = version + 1",
            (collection, id, body.to_string()),
        )?;
        Ok(())
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), LedgerError> {
        self.run_transaction(&mut |tx| tx.update(collection, id, fields.clone()))
    }

    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        for attempt in 1..=TX_RETRY_LIMIT {
            let (reads, writes) = {
                let mut tx = DocumentTx {
                    conn: &mut *conn,
                    reads: Vec::new(),
                    writes: Vec::new(),
                };
                body(&mut tx)?;
                (tx.reads, tx.writes)
            };
            match commit(&mut conn, &reads, &writes) {
                Ok(()) => return Ok(()),
                Err(LedgerError::Conflict) if attempt < TX_RETRY_LIMIT => {
                    warn!(
                        "Transaction conflict on attempt {}, retrying ...",
                        attempt
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(LedgerError::Conflict)
    }
}
