//! SQLite-backed item store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{HistoryEntry, Item, ItemFilter, ItemStatus, ItemStore, ItemStoreError};

const ITEM_COLUMNS: &str = "id, kind, lineage, job, position, attempts, held, dispatched, \
     failed_stage, payload, created_at, updated_at, stage_entered_at";

/// SQLite-backed item store.
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, ItemStoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite item store (useful for testing).
    pub fn in_memory() -> Result<Self, ItemStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ItemStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                lineage TEXT NOT NULL,
                job TEXT,
                position TEXT NOT NULL,
                stage TEXT,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                held INTEGER NOT NULL DEFAULT 0,
                dispatched INTEGER NOT NULL DEFAULT 0,
                failed_stage TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                stage_entered_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
            CREATE INDEX IF NOT EXISTS idx_items_stage ON items(stage);
            CREATE INDEX IF NOT EXISTS idx_items_lineage ON items(lineage);

            CREATE TABLE IF NOT EXISTS item_history (
                item_id TEXT NOT NULL REFERENCES items(id),
                seq INTEGER NOT NULL,
                from_position TEXT NOT NULL,
                outcome TEXT NOT NULL,
                to_position TEXT NOT NULL,
                at TEXT NOT NULL,
                actor TEXT NOT NULL,
                note TEXT,
                PRIMARY KEY (item_id, seq)
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ItemStoreError> {
        self.conn
            .lock()
            .map_err(|_| ItemStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &ItemFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(ref lineage) = filter.lineage {
            conditions.push("lineage = ?");
            params.push(Box::new(lineage.clone()));
        }
        if let Some(ref stage) = filter.stage {
            conditions.push("stage = ?");
            params.push(Box::new(stage.clone()));
        }
        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }
        if let Some(ref job) = filter.job {
            conditions.push("job = ?");
            params.push(Box::new(job.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Item> {
        let kind: String = row.get(1)?;
        let position: String = row.get(4)?;
        let payload: String = row.get(9)?;

        Ok(Item {
            id: row.get(0)?,
            kind: kind.parse().map_err(|e: String| conversion_error(1, e.into()))?,
            lineage: row.get(2)?,
            job: row.get(3)?,
            position: serde_json::from_str(&position)
                .map_err(|e| conversion_error(4, Box::new(e)))?,
            attempts: row.get(5)?,
            held: row.get(6)?,
            dispatched: row.get(7)?,
            failed_stage: row.get(8)?,
            payload: serde_json::from_str(&payload).map_err(|e| conversion_error(9, Box::new(e)))?,
            history: Vec::new(),
            created_at: parse_timestamp(row, 10)?,
            updated_at: parse_timestamp(row, 11)?,
            stage_entered_at: parse_timestamp(row, 12)?,
        })
    }

    fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
        let from: String = row.get(1)?;
        let outcome: String = row.get(2)?;
        let to: String = row.get(3)?;

        Ok(HistoryEntry {
            seq: row.get(0)?,
            from: serde_json::from_str(&from).map_err(|e| conversion_error(1, Box::new(e)))?,
            outcome: serde_json::from_value(serde_json::Value::String(outcome))
                .map_err(|e| conversion_error(2, Box::new(e)))?,
            to: serde_json::from_str(&to).map_err(|e| conversion_error(3, Box::new(e)))?,
            at: parse_timestamp(row, 4)?,
            actor: row.get(5)?,
            note: row.get(6)?,
        })
    }

    fn load_history(conn: &Connection, item_id: &str) -> Result<Vec<HistoryEntry>, ItemStoreError> {
        let mut stmt = conn.prepare(
            "SELECT seq, from_position, outcome, to_position, at, actor, note \
             FROM item_history WHERE item_id = ? ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![item_id], Self::row_to_history)?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }

    fn query_items(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Item>, ItemStoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            let mut item = row?;
            item.history = Self::load_history(conn, &item.id)?;
            items.push(item);
        }
        Ok(items)
    }

    fn write_item(conn: &Connection, item: &Item) -> Result<usize, ItemStoreError> {
        let updated = conn.execute(
            "UPDATE items SET position = ?, stage = ?, status = ?, attempts = ?, held = ?, \
             dispatched = ?, failed_stage = ?, payload = ?, updated_at = ?, stage_entered_at = ? \
             WHERE id = ?",
            params![
                serde_json::to_string(&item.position)?,
                item.current_stage(),
                item.status().as_str(),
                item.attempts,
                item.held,
                item.dispatched,
                item.failed_stage,
                serde_json::to_string(&item.payload)?,
                item.updated_at.to_rfc3339(),
                item.stage_entered_at.to_rfc3339(),
                item.id,
            ],
        )?;
        Ok(updated)
    }

    fn insert_history(
        conn: &Connection,
        item_id: &str,
        entry: &HistoryEntry,
    ) -> Result<(), ItemStoreError> {
        conn.execute(
            "INSERT INTO item_history (item_id, seq, from_position, outcome, to_position, at, actor, note) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item_id,
                entry.seq,
                serde_json::to_string(&entry.from)?,
                entry.outcome.as_str(),
                serde_json::to_string(&entry.to)?,
                entry.at.to_rfc3339(),
                entry.actor,
                entry.note,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ItemStoreError::AlreadyExists(format!("{}#{}", item_id, entry.seq))
            }
            other => other.into(),
        })?;
        Ok(())
    }
}

fn conversion_error(idx: usize, e: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e)
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Box::new(e)))
}

impl ItemStore for SqliteItemStore {
    fn create(&self, item: &Item) -> Result<(), ItemStoreError> {
        let conn = self.lock()?;

        let result = conn.execute(
            &format!(
                "INSERT INTO items ({}, stage, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ITEM_COLUMNS
            ),
            params![
                item.id,
                item.kind.as_str(),
                item.lineage,
                item.job,
                serde_json::to_string(&item.position)?,
                item.attempts,
                item.held,
                item.dispatched,
                item.failed_stage,
                serde_json::to_string(&item.payload)?,
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
                item.stage_entered_at.to_rfc3339(),
                item.current_stage(),
                item.status().as_str(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ItemStoreError::AlreadyExists(item.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Item>, ItemStoreError> {
        let conn = self.lock()?;

        let item = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS),
                params![id],
                Self::row_to_item,
            )
            .optional()?;

        match item {
            Some(mut item) => {
                item.history = Self::load_history(&conn, id)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>, ItemStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM items {} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            ITEM_COLUMNS, where_clause
        );

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        Self::query_items(&conn, &sql, param_refs.as_slice())
    }

    fn count(&self, filter: &ItemFilter) -> Result<i64, ItemStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM items {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn save(&self, item: &Item) -> Result<(), ItemStoreError> {
        let conn = self.lock()?;
        if Self::write_item(&conn, item)? == 0 {
            return Err(ItemStoreError::NotFound(item.id.clone()));
        }
        Ok(())
    }

    fn append_history(&self, item_id: &str, entry: &HistoryEntry) -> Result<(), ItemStoreError> {
        let conn = self.lock()?;
        Self::insert_history(&conn, item_id, entry)
    }

    fn record_transition(&self, item: &Item, entry: &HistoryEntry) -> Result<(), ItemStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        Self::insert_history(&tx, &item.id, entry)?;
        if Self::write_item(&tx, item)? == 0 {
            return Err(ItemStoreError::NotFound(item.id.clone()));
        }

        tx.commit()?;
        Ok(())
    }

    fn list_in_flight(&self) -> Result<Vec<Item>, ItemStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM items WHERE status = ? ORDER BY created_at ASC, id ASC",
            ITEM_COLUMNS
        );
        let status = ItemStatus::InFlight.as_str();
        Self::query_items(&conn, &sql, &[&status as &dyn rusqlite::ToSql])
    }
}
