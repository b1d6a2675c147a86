//! SQLite-backed audit store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ToSql};

use super::{AuditError, AuditFilter, AuditRecord, AuditStore, Severity};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        severity INTEGER NOT NULL,
        item_id TEXT,
        lineage TEXT,
        stage TEXT,
        ticket_seq INTEGER,
        actor TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_item_seq ON audit_events(item_id, ticket_seq);
    CREATE INDEX IF NOT EXISTS idx_audit_events_lineage ON audit_events(lineage, timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_severity ON audit_events(severity, timestamp);
"#;

const RECORD_COLUMNS: &str =
    "id, timestamp, event_type, severity, item_id, lineage, stage, ticket_seq, actor, data";

/// Timestamps are stored fixed-width so text order is time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Conditions and bound values for one [`AuditFilter`].
#[derive(Default)]
struct WhereClause {
    conditions: Vec<&'static str>,
    values: Vec<Box<dyn ToSql>>,
}

impl WhereClause {
    fn from_filter(filter: &AuditFilter) -> Self {
        let mut clause = Self::default();
        let columns = [
            ("item_id = ?", &filter.item_id),
            ("lineage = ?", &filter.lineage),
            ("stage = ?", &filter.stage),
            ("event_type = ?", &filter.event_type),
            ("actor = ?", &filter.actor),
        ];
        for (condition, value) in columns {
            if let Some(value) = value {
                clause.push(condition, value.clone());
            }
        }
        if let Some(severity) = filter.min_severity {
            clause.push("severity >= ?", severity.rank());
        }
        if let Some(ref from) = filter.from {
            clause.push("timestamp >= ?", format_timestamp(from));
        }
        if let Some(ref to) = filter.to {
            clause.push("timestamp <= ?", format_timestamp(to));
        }
        clause
    }

    fn push(&mut self, condition: &'static str, value: impl ToSql + 'static) {
        self.conditions.push(condition);
        self.values.push(Box::new(value));
    }

    fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn params(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v.as_ref()).collect()
    }
}

fn conversion_error(
    idx: usize,
    ty: Type,
    e: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, e)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
    let raw_ts: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(1, Type::Text, Box::new(e)))?;

    let rank: i64 = row.get(3)?;
    let severity = Severity::from_rank(rank).ok_or_else(|| {
        conversion_error(3, Type::Integer, format!("unknown severity rank {rank}").into())
    })?;

    let raw_data: String = row.get(9)?;
    let data = serde_json::from_str(&raw_data)
        .map_err(|e| conversion_error(9, Type::Text, Box::new(e)))?;

    Ok(AuditRecord {
        id: row.get(0)?,
        timestamp,
        event_type: row.get(2)?,
        severity,
        item_id: row.get(4)?,
        lineage: row.get(5)?,
        stage: row.get(6)?,
        ticket_seq: row.get(7)?,
        actor: row.get(8)?,
        data,
    })
}

pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Open (or create) the audit table in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("audit connection lock poisoned".to_string()))
    }

    fn select(
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, records: &[AuditRecord]) -> Result<usize, AuditError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO audit_events \
                 (timestamp, event_type, severity, item_id, lineage, stage, ticket_seq, actor, data) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for record in records {
                stmt.execute(params![
                    format_timestamp(&record.timestamp),
                    record.event_type,
                    record.severity.rank(),
                    record.item_id,
                    record.lineage,
                    record.stage,
                    record.ticket_seq,
                    record.actor,
                    serde_json::to_string(&record.data)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;
        let clause = WhereClause::from_filter(filter);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM audit_events {} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            clause.sql()
        );
        let mut params = clause.params();
        params.push(&filter.limit);
        params.push(&filter.offset);
        Self::select(&conn, &sql, &params)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.lock()?;
        let clause = WhereClause::from_filter(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", clause.sql());
        let count: i64 = conn.query_row(&sql, clause.params().as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn item_trail(&self, item_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM audit_events WHERE item_id = ? \
             ORDER BY ticket_seq ASC, id ASC"
        );
        Self::select(&conn, &sql, &[&item_id as &dyn ToSql])
    }
}
