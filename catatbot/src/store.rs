use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use tokio::sync::Mutex;

use crate::error::StoreError;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    price INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS senders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    phone TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);
";

/// One persisted expense. `created_at` is the canonical UTC instant in
/// RFC 3339; it is parsed back into a timestamp only at display boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseRecord {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub amount: i64,
    pub created_at: String,
}

/// Per-category aggregate row.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTotal {
    pub category: String,
    pub total: i64,
    pub count: i64,
}

/// Render an instant the way `created_at` stores it. Fixed-width UTC
/// RFC 3339, so string comparison and instant comparison agree.
pub fn format_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Durable CRUD over the `expenses` and `senders` tables. The connection
/// sits behind one async mutex; that lock is what serializes writes across
/// concurrently handled conversations.
#[derive(Clone)]
pub struct ExpenseStore {
    conn: Arc<Mutex<Connection>>,
}

impl ExpenseStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist one expense and return its id. Non-positive amounts are
    /// rejected at this boundary before they reach the database.
    pub async fn insert(
        &self,
        name: &str,
        category: &str,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount(amount));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO expenses (name, category, price, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, category, amount, format_instant(created_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Delete the record with the given id. The delete flow resolves its
    /// snapshot index to an id and calls this.
    pub async fn delete_by_id(&self, id: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn.execute("DELETE FROM expenses WHERE id = ?1", params![id])?)
    }

    /// Legacy deletion by value tuple. Ambiguous when two identical
    /// expenses exist (every match is removed); prefer `delete_by_id`.
    pub async fn delete_exact(
        &self,
        name: &str,
        category: &str,
        amount: i64,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn.execute(
            "DELETE FROM expenses WHERE name = ?1 AND category = ?2 AND price = ?3",
            params![name, category, amount],
        )?)
    }

    /// Records created in `[start, end)`, largest amounts first.
    pub async fn list_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExpenseRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, category, price, created_at FROM expenses \
             WHERE created_at >= ?1 AND created_at < ?2 ORDER BY price DESC",
        )?;
        let rows = stmt.query_map(
            params![format_instant(start), format_instant(end)],
            row_to_record,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every record, newest first. Export order.
    pub async fn list_all(&self) -> Result<Vec<ExpenseRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, category, price, created_at FROM expenses \
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-category totals over all records, largest total first.
    pub async fn aggregate_by_category(&self) -> Result<Vec<CategoryTotal>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT category, SUM(price), COUNT(*) FROM expenses \
             GROUP BY category ORDER BY SUM(price) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CategoryTotal {
                category: row.get(0)?,
                total: row.get(1)?,
                count: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Remember who talks to the bot. Idempotent on the phone identifier;
    /// callers treat failures as log-only.
    pub async fn upsert_sender(&self, name: &str, phone: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO senders (name, phone, created_at) VALUES (?1, ?2, ?3)",
            params![name, phone, format_instant(Utc::now())],
        )?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExpenseRecord> {
    Ok(ExpenseRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        amount: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn test_store() -> ExpenseStore {
        ExpenseStore::open_in_memory().expect("in-memory store")
    }

    #[tokio::test]
    async fn test_insert_and_list_orders_by_amount() {
        let store = test_store();
        let now = Utc::now();
        store.insert("makan", "Makanan", 100, now).await.unwrap();
        store.insert("bensin", "Transport", 300, now).await.unwrap();
        store.insert("kuota", "Komunikasi", 200, now).await.unwrap();

        let records = store
            .list_between(now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        let amounts: Vec<i64> = records.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_insert_rejects_non_positive_amounts() {
        let store = test_store();
        let err = store.insert("makan", "Makanan", 0, Utc::now()).await;
        assert!(matches!(err, Err(StoreError::InvalidAmount(0))));
        let err = store.insert("makan", "Makanan", -5, Utc::now()).await;
        assert!(matches!(err, Err(StoreError::InvalidAmount(-5))));
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let store = test_store();
        let start = Utc::now();
        let end = start + Duration::days(1);
        store.insert("inside", "Makanan", 10, start).await.unwrap();
        store.insert("at-end", "Makanan", 20, end).await.unwrap();
        store
            .insert("before", "Makanan", 30, start - Duration::seconds(1))
            .await
            .unwrap();

        let records = store.list_between(start, end).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "inside");
    }

    #[tokio::test]
    async fn test_delete_by_id_removes_exactly_one() {
        let store = test_store();
        let now = Utc::now();
        let first = store.insert("makan", "Makanan", 100, now).await.unwrap();
        store.insert("makan", "Makanan", 100, now).await.unwrap();

        let affected = store.delete_by_id(first).await.unwrap();
        assert_eq!(affected, 1);
        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);

        // A second delete of the same id is a no-op.
        assert_eq!(store.delete_by_id(first).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_exact_hits_every_duplicate() {
        let store = test_store();
        let now = Utc::now();
        store.insert("makan", "Makanan", 100, now).await.unwrap();
        store.insert("makan", "Makanan", 100, now).await.unwrap();

        let affected = store.delete_exact("makan", "Makanan", 100).await.unwrap();
        assert_eq!(affected, 2);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_orders_by_total() {
        let store = test_store();
        let now = Utc::now();
        store.insert("makan", "Makanan", 100, now).await.unwrap();
        store.insert("minum", "Makanan", 50, now).await.unwrap();
        store.insert("bensin", "Transport", 500, now).await.unwrap();

        let rows = store.aggregate_by_category().await.unwrap();
        assert_eq!(
            rows,
            vec![
                CategoryTotal {
                    category: "Transport".to_string(),
                    total: 500,
                    count: 1,
                },
                CategoryTotal {
                    category: "Makanan".to_string(),
                    total: 150,
                    count: 2,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_upsert_sender_is_idempotent() {
        let store = test_store();
        store.upsert_sender("Budi", "628123").await.unwrap();
        store.upsert_sender("Budi", "628123").await.unwrap();

        let conn = store.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM senders", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_instant_round_trip() {
        let now = Utc::now();
        let text = format_instant(now);
        let parsed = parse_instant(&text).unwrap();
        assert_eq!(format_instant(parsed), text);
        assert_eq!(parse_instant("yesterday afternoon"), None);
    }
}
