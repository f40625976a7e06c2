use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gudang_core::{LocationCode, ProductId, StockKey};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    Inclusion, LedgerEntry, LedgerError, LedgerQuery, LedgerRepository, LedgerResult, SourceKind,
};

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_entries (
    id TEXT PRIMARY KEY,
    product INTEGER NOT NULL,
    location TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    quantity_in TEXT NOT NULL,
    quantity_out TEXT NOT NULL,
    running_balance TEXT NOT NULL,
    source_kind TEXT NOT NULL,
    source_reference TEXT NOT NULL,
    locked INTEGER NOT NULL DEFAULT 0,
    locked_by TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS ledger_idx_key_order
    ON ledger_entries(product, location, timestamp, sequence);
CREATE INDEX IF NOT EXISTS ledger_idx_source
    ON ledger_entries(source_reference);
CREATE INDEX IF NOT EXISTS ledger_idx_lock
    ON ledger_entries(locked_by);
"#;

const ENTRY_COLUMNS: &str = "id, product, location, timestamp, sequence, quantity_in, \
     quantity_out, running_balance, source_kind, source_reference, locked, locked_by";

/// SQLite-backed ledger repository used by the operational runtime.
#[derive(Clone, Debug)]
pub struct SqliteLedgerRepository {
    path: PathBuf,
}

impl SqliteLedgerRepository {
    pub fn new(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let repo = Self { path: path.into() };
        repo.initialize_schema()?;
        Ok(repo)
    }

    fn initialize_schema(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(())
    }

    fn connect(&self) -> LedgerResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }

    fn lock_state(conn: &Connection, id: Uuid) -> LedgerResult<(bool, Option<Uuid>)> {
        let row: Option<(bool, Option<String>)> = conn
            .query_row(
                "SELECT locked, locked_by FROM ledger_entries WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get::<_, i64>(0)? != 0, row.get(1)?)),
            )
            .optional()?;
        let (locked, lock_ref) = row.ok_or(LedgerError::EntryNotFound(id))?;
        let lock_ref = lock_ref
            .map(|raw| {
                Uuid::parse_str(&raw).map_err(|err| {
                    LedgerError::Serialization(format!("invalid lock reference {raw}: {err}"))
                })
            })
            .transpose()?;
        Ok((locked, lock_ref))
    }
}

impl LedgerRepository for SqliteLedgerRepository {
    fn append(&self, mut entry: LedgerEntry) -> LedgerResult<LedgerEntry> {
        if entry.quantity_in.is_sign_negative() || entry.quantity_out.is_sign_negative() {
            return Err(LedgerError::InvalidEntry(
                "movement quantities must be non-negative".into(),
            ));
        }
        if !entry.quantity_in.is_zero() && !entry.quantity_out.is_zero() {
            return Err(LedgerError::InvalidEntry(
                "an entry may move stock in or out, not both".into(),
            ));
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let next_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM ledger_entries
             WHERE product = ?1 AND location = ?2 AND timestamp = ?3",
            params![
                entry.product.raw() as i64,
                entry.location.as_str(),
                entry.timestamp.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        entry.sequence = next_sequence as u32;
        tx.execute(
            "INSERT INTO ledger_entries (
                id, product, location, timestamp, sequence, quantity_in, quantity_out,
                running_balance, source_kind, source_reference, locked, locked_by
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id.to_string(),
                entry.product.raw() as i64,
                entry.location.as_str(),
                entry.timestamp.to_rfc3339(),
                entry.sequence as i64,
                entry.quantity_in.to_string(),
                entry.quantity_out.to_string(),
                entry.running_balance.to_string(),
                entry.source_kind.as_str(),
                entry.source_reference,
                entry.locked as i64,
                entry.locked_by.map(|lock| lock.to_string()),
            ],
        )?;
        tx.commit()?;
        Ok(entry)
    }

    fn scan_from(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
        inclusion: Inclusion,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let conn = self.connect()?;
        let comparison = match inclusion {
            Inclusion::Inclusive => ">=",
            Inclusion::Exclusive => ">",
        };
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE product = ?1 AND location = ?2 AND timestamp {comparison} ?3
             ORDER BY timestamp ASC, sequence ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            key.product.raw() as i64,
            key.location.as_str(),
            timestamp.to_rfc3339(),
        ])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    fn entry_before(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE product = ?1 AND location = ?2 AND timestamp < ?3
             ORDER BY timestamp DESC, sequence DESC
             LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            key.product.raw() as i64,
            key.location.as_str(),
            timestamp.to_rfc3339(),
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_entry(row)?)),
            None => Ok(None),
        }
    }

    fn entries_at(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE product = ?1 AND location = ?2 AND timestamp = ?3
             ORDER BY sequence ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            key.product.raw() as i64,
            key.location.as_str(),
            timestamp.to_rfc3339(),
        ])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    fn update_balance(&self, id: Uuid, running_balance: Decimal) -> LedgerResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let (locked, lock_ref) = Self::lock_state(&tx, id)?;
        if locked {
            return Err(LedgerError::LockViolation {
                id,
                lock_ref: lock_ref.unwrap_or_default(),
            });
        }
        tx.execute(
            "UPDATE ledger_entries SET running_balance = ?2 WHERE id = ?1",
            params![id.to_string(), running_balance.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_locked(&self, id: Uuid, locked: bool, lock_ref: Option<Uuid>) -> LedgerResult<()> {
        if locked && lock_ref.is_none() {
            return Err(LedgerError::InvalidEntry(
                "locking an entry requires a lock reference".into(),
            ));
        }
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE ledger_entries SET locked = ?2, locked_by = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                locked as i64,
                if locked {
                    lock_ref.map(|lock| lock.to_string())
                } else {
                    None
                },
            ],
        )?;
        if changed == 0 {
            return Err(LedgerError::EntryNotFound(id));
        }
        Ok(())
    }

    fn delete_by_source(&self, source_reference: &str) -> LedgerResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let held: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT id, locked_by FROM ledger_entries
                 WHERE source_reference = ?1 AND locked = 1
                 LIMIT 1",
                params![source_reference],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((id, lock_ref)) = held {
            let id = Uuid::parse_str(&id)
                .map_err(|err| LedgerError::Serialization(format!("invalid entry id {id}: {err}")))?;
            let lock_ref = lock_ref
                .and_then(|raw| Uuid::parse_str(&raw).ok())
                .unwrap_or_default();
            return Err(LedgerError::LockViolation { id, lock_ref });
        }
        let deleted = tx.execute(
            "DELETE FROM ledger_entries WHERE source_reference = ?1",
            params![source_reference],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    fn query(&self, query: LedgerQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let conn = self.connect()?;
        let mut sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE (?1 IS NULL OR product = ?1)
               AND (?2 IS NULL OR location = ?2)
               AND (?3 IS NULL OR source_kind = ?3)
               AND (?4 IS NULL OR source_reference = ?4)
               AND (?5 IS NULL OR locked_by = ?5)
               AND (?6 IS NULL OR timestamp >= ?6)
               AND (?7 IS NULL OR timestamp <= ?7)"
        );
        sql.push_str(if query.ascending {
            " ORDER BY timestamp ASC, sequence ASC"
        } else {
            " ORDER BY timestamp DESC, sequence DESC"
        });
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?8");
        }

        let mut params: Vec<Value> = Vec::with_capacity(8);
        params.push(optional_int(query.product.map(|p| p.raw())));
        params.push(optional_text(
            query.location.map(|code| code.as_str().to_string()),
        ));
        params.push(optional_text(
            query.source_kind.map(|kind| kind.as_str().to_string()),
        ));
        params.push(optional_text(query.source_reference.clone()));
        params.push(optional_text(query.locked_by.map(|lock| lock.to_string())));
        params.push(optional_text(query.start_time.map(|ts| ts.to_rfc3339())));
        params.push(optional_text(query.end_time.map(|ts| ts.to_rfc3339())));
        if let Some(limit) = query.limit {
            params.push(Value::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    fn balance_as_of(&self, key: StockKey, as_of: DateTime<Utc>) -> LedgerResult<Decimal> {
        let conn = self.connect()?;
        let balance: Option<String> = conn
            .query_row(
                "SELECT running_balance FROM ledger_entries
                 WHERE product = ?1 AND location = ?2 AND timestamp <= ?3
                 ORDER BY timestamp DESC, sequence DESC
                 LIMIT 1",
                params![
                    key.product.raw() as i64,
                    key.location.as_str(),
                    as_of.to_rfc3339(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        match balance {
            Some(raw) => Decimal::from_str(&raw)
                .map_err(|err| LedgerError::Serialization(format!("invalid decimal {raw}: {err}"))),
            None => Ok(Decimal::ZERO),
        }
    }
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn optional_int(value: Option<u64>) -> Value {
    value
        .map(|v| Value::Integer(v as i64))
        .unwrap_or(Value::Null)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> LedgerResult<LedgerEntry> {
    let id: String = row.get(0)?;
    let product: i64 = row.get(1)?;
    let location: String = row.get(2)?;
    let timestamp_str: String = row.get(3)?;
    let sequence: i64 = row.get(4)?;
    let quantity_in_str: String = row.get(5)?;
    let quantity_out_str: String = row.get(6)?;
    let running_balance_str: String = row.get(7)?;
    let source_kind_str: String = row.get(8)?;
    let source_reference: String = row.get(9)?;
    let locked: i64 = row.get(10)?;
    let locked_by: Option<String> = row.get(11)?;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map_err(|err| {
            LedgerError::Serialization(format!("invalid timestamp {timestamp_str}: {err}"))
        })?
        .with_timezone(&Utc);
    let quantity_in = parse_decimal(&quantity_in_str)?;
    let quantity_out = parse_decimal(&quantity_out_str)?;
    let running_balance = parse_decimal(&running_balance_str)?;
    let source_kind = SourceKind::from_str(&source_kind_str).map_err(LedgerError::Serialization)?;
    let locked_by = locked_by
        .map(|raw| {
            Uuid::parse_str(&raw).map_err(|err| {
                LedgerError::Serialization(format!("invalid lock reference {raw}: {err}"))
            })
        })
        .transpose()?;

    Ok(LedgerEntry {
        id: Uuid::parse_str(&id)
            .map_err(|err| LedgerError::Serialization(format!("invalid entry id {id}: {err}")))?,
        product: ProductId::new(product as u64),
        location: LocationCode::new(&location),
        timestamp,
        sequence: sequence as u32,
        quantity_in,
        quantity_out,
        running_balance,
        source_kind,
        source_reference,
        locked: locked != 0,
        locked_by,
    })
}

fn parse_decimal(raw: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|err| LedgerError::Serialization(format!("invalid decimal {raw}: {err}")))
}
