use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gudang_core::{LocationCode, ProductId};
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{Opname, OpnameError, OpnameLine, OpnameResult, OpnameStatus};

/// An approved opname's claim over a stock key's history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpnameClaim {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Durable storage for opname records and their lines.
pub trait OpnameRepository: Send + Sync {
    fn insert(&self, opname: &Opname) -> OpnameResult<()>;

    fn fetch(&self, id: Uuid) -> OpnameResult<Option<Opname>>;

    /// Transition the stored status; `approved_at` is set on approval and
    /// cleared on revert.
    fn set_status(
        &self,
        id: Uuid,
        status: OpnameStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> OpnameResult<()>;

    /// Hard-delete the record and its lines.
    fn delete(&self, id: Uuid) -> OpnameResult<()>;

    /// Every approved opname containing a line for the product at the
    /// location; this is what the overlap guard checks.
    fn approved_covering(
        &self,
        product: ProductId,
        location: LocationCode,
    ) -> OpnameResult<Vec<OpnameClaim>>;

    fn list(&self, status: Option<OpnameStatus>) -> OpnameResult<Vec<Opname>>;
}

/// In-memory opname store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryOpnameRepository {
    records: RwLock<HashMap<Uuid, Opname>>,
}

impl MemoryOpnameRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpnameRepository for MemoryOpnameRepository {
    fn insert(&self, opname: &Opname) -> OpnameResult<()> {
        self.records.write().insert(opname.id, opname.clone());
        Ok(())
    }

    fn fetch(&self, id: Uuid) -> OpnameResult<Option<Opname>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn set_status(
        &self,
        id: Uuid,
        status: OpnameStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> OpnameResult<()> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(OpnameError::OpnameNotFound(id))?;
        record.status = status;
        record.approved_at = approved_at;
        Ok(())
    }

    fn delete(&self, id: Uuid) -> OpnameResult<()> {
        self.records
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(OpnameError::OpnameNotFound(id))
    }

    fn approved_covering(
        &self,
        product: ProductId,
        location: LocationCode,
    ) -> OpnameResult<Vec<OpnameClaim>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| record.status == OpnameStatus::Approved)
            .filter(|record| record.location == location)
            .filter(|record| record.lines.iter().any(|line| line.product == product))
            .map(|record| OpnameClaim {
                id: record.id,
                timestamp: record.timestamp,
            })
            .collect())
    }

    fn list(&self, status: Option<OpnameStatus>) -> OpnameResult<Vec<Opname>> {
        let mut records: Vec<Opname> = self
            .records
            .read()
            .values()
            .filter(|record| status.map_or(true, |wanted| record.status == wanted))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }
}

const OPNAME_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS opnames (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    location TEXT NOT NULL,
    responsible_party TEXT NOT NULL,
    notes TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    approved_at TEXT
);
CREATE TABLE IF NOT EXISTS opname_lines (
    opname_id TEXT NOT NULL,
    line_no INTEGER NOT NULL,
    product INTEGER NOT NULL,
    system_stock TEXT NOT NULL,
    physical_stock TEXT NOT NULL,
    unit TEXT NOT NULL,
    notes TEXT,
    PRIMARY KEY (opname_id, line_no)
);
CREATE INDEX IF NOT EXISTS opname_idx_status_location
    ON opnames(status, location);
CREATE INDEX IF NOT EXISTS opname_line_idx_product
    ON opname_lines(product);
"#;

/// SQLite-backed opname store used by the operational runtime.
#[derive(Clone, Debug)]
pub struct SqliteOpnameRepository {
    path: PathBuf,
}

impl SqliteOpnameRepository {
    pub fn new(path: impl Into<PathBuf>) -> OpnameResult<Self> {
        let repo = Self { path: path.into() };
        let conn = repo.connect()?;
        conn.execute_batch(OPNAME_SCHEMA)?;
        Ok(repo)
    }

    fn connect(&self) -> OpnameResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|err| OpnameError::Storage(err.to_string()))?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }

    fn fetch_lines(conn: &Connection, id: Uuid) -> OpnameResult<Vec<OpnameLine>> {
        let mut stmt = conn.prepare(
            "SELECT product, system_stock, physical_stock, unit, notes
             FROM opname_lines WHERE opname_id = ?1 ORDER BY line_no ASC",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let mut lines = Vec::new();
        while let Some(row) = rows.next()? {
            let product: i64 = row.get(0)?;
            let system_stock: String = row.get(1)?;
            let physical_stock: String = row.get(2)?;
            lines.push(OpnameLine {
                product: ProductId::new(product as u64),
                system_stock: parse_decimal(&system_stock)?,
                physical_stock: parse_decimal(&physical_stock)?,
                unit: row.get(3)?,
                notes: row.get(4)?,
            });
        }
        Ok(lines)
    }
}

impl OpnameRepository for SqliteOpnameRepository {
    fn insert(&self, opname: &Opname) -> OpnameResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO opnames (
                id, timestamp, location, responsible_party, notes, status, created_at, approved_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                opname.id.to_string(),
                opname.timestamp.to_rfc3339(),
                opname.location.as_str(),
                opname.responsible_party,
                opname.notes,
                opname.status.as_str(),
                opname.created_at.to_rfc3339(),
                opname.approved_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        for (line_no, line) in opname.lines.iter().enumerate() {
            tx.execute(
                "INSERT INTO opname_lines (
                    opname_id, line_no, product, system_stock, physical_stock, unit, notes
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    opname.id.to_string(),
                    line_no as i64,
                    line.product.raw() as i64,
                    line.system_stock.to_string(),
                    line.physical_stock.to_string(),
                    line.unit,
                    line.notes,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch(&self, id: Uuid) -> OpnameResult<Option<Opname>> {
        let conn = self.connect()?;
        let header: Option<(String, String, String, Option<String>, String, String, Option<String>)> =
            conn.query_row(
                "SELECT timestamp, location, responsible_party, notes, status, created_at, approved_at
                 FROM opnames WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((timestamp, location, responsible_party, notes, status, created_at, approved_at)) =
            header
        else {
            return Ok(None);
        };
        let lines = Self::fetch_lines(&conn, id)?;
        Ok(Some(Opname {
            id,
            timestamp: parse_timestamp(&timestamp)?,
            location: LocationCode::new(&location),
            responsible_party,
            notes,
            status: OpnameStatus::from_str(&status).map_err(OpnameError::Serialization)?,
            lines,
            created_at: parse_timestamp(&created_at)?,
            approved_at: approved_at.as_deref().map(parse_timestamp).transpose()?,
        }))
    }

    fn set_status(
        &self,
        id: Uuid,
        status: OpnameStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> OpnameResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE opnames SET status = ?2, approved_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                approved_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(OpnameError::OpnameNotFound(id));
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> OpnameResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM opname_lines WHERE opname_id = ?1",
            params![id.to_string()],
        )?;
        let deleted = tx.execute("DELETE FROM opnames WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        if deleted == 0 {
            return Err(OpnameError::OpnameNotFound(id));
        }
        Ok(())
    }

    fn approved_covering(
        &self,
        product: ProductId,
        location: LocationCode,
    ) -> OpnameResult<Vec<OpnameClaim>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT o.id, o.timestamp
             FROM opnames o
             JOIN opname_lines l ON l.opname_id = o.id
             WHERE o.status = 'approved' AND o.location = ?1 AND l.product = ?2",
        )?;
        let mut rows = stmt.query(params![location.as_str(), product.raw() as i64])?;
        let mut claims = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let timestamp: String = row.get(1)?;
            claims.push(OpnameClaim {
                id: Uuid::parse_str(&id).map_err(|err| {
                    OpnameError::Serialization(format!("invalid opname id {id}: {err}"))
                })?,
                timestamp: parse_timestamp(&timestamp)?,
            });
        }
        Ok(claims)
    }

    fn list(&self, status: Option<OpnameStatus>) -> OpnameResult<Vec<Opname>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM opnames
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query(params![status.map(|s| s.as_str())])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            ids.push(Uuid::parse_str(&id).map_err(|err| {
                OpnameError::Serialization(format!("invalid opname id {id}: {err}"))
            })?);
        }
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.fetch(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn parse_timestamp(raw: &str) -> OpnameResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| OpnameError::Serialization(format!("invalid timestamp {raw}: {err}")))
}

fn parse_decimal(raw: &str) -> OpnameResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|err| OpnameError::Serialization(format!("invalid decimal {raw}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn sample(location: &str) -> Opname {
        Opname {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 3, 9, 0, 0).unwrap(),
            location: LocationCode::new(location),
            responsible_party: "siti".into(),
            notes: Some("monthly count".into()),
            status: OpnameStatus::Pending,
            lines: vec![OpnameLine {
                product: ProductId::new(21),
                system_stock: dec!(100),
                physical_stock: dec!(120),
                unit: "kg".into(),
                notes: None,
            }],
            created_at: Utc.with_ymd_and_hms(2026, 1, 3, 10, 0, 0).unwrap(),
            approved_at: None,
        }
    }

    #[test]
    fn sqlite_round_trips_records_and_lines() {
        let dir = tempdir().unwrap();
        let repo = SqliteOpnameRepository::new(dir.path().join("opname.db")).unwrap();
        let opname = sample("WH1");
        repo.insert(&opname).unwrap();

        let loaded = repo.fetch(opname.id).unwrap().unwrap();
        assert_eq!(loaded, opname);
        assert!(repo.fetch(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn approved_covering_sees_only_approved_matching_claims() {
        let dir = tempdir().unwrap();
        let repo = SqliteOpnameRepository::new(dir.path().join("opname.db")).unwrap();
        let pending = sample("WH1");
        let mut approved = sample("WH1");
        approved.id = Uuid::new_v4();
        repo.insert(&pending).unwrap();
        repo.insert(&approved).unwrap();
        repo.set_status(approved.id, OpnameStatus::Approved, Some(Utc::now()))
            .unwrap();

        let claims = repo
            .approved_covering(ProductId::new(21), LocationCode::new("WH1"))
            .unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].id, approved.id);
        assert!(repo
            .approved_covering(ProductId::new(99), LocationCode::new("WH1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_removes_lines_with_the_record() {
        let dir = tempdir().unwrap();
        let repo = SqliteOpnameRepository::new(dir.path().join("opname.db")).unwrap();
        let opname = sample("WH2");
        repo.insert(&opname).unwrap();
        repo.delete(opname.id).unwrap();
        assert!(repo.fetch(opname.id).unwrap().is_none());
        assert!(matches!(
            repo.delete(opname.id),
            Err(OpnameError::OpnameNotFound(_))
        ));
        let conn = repo.connect().unwrap();
        let orphans: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM opname_lines WHERE opname_id = ?1",
                params![opname.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
