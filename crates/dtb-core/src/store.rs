use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, Pool, Sqlite,
};

use crate::{
    domain::{EntryId, UserId},
    errors::Error,
    Result,
};

/// Default number of entries returned by the browse flow.
pub const DEFAULT_LIST_LIMIT: u32 = 10;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    username TEXT,
    first_name TEXT,
    last_name TEXT,
    reg_date TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(user_id)
);
";

/// Identity fields delivered by the transport at first contact.
#[derive(Clone, Debug)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A persisted diary entry.
#[derive(Clone, Debug)]
pub struct Entry {
    pub id: EntryId,
    pub user_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Listing view of an entry (browse flow).
#[derive(Clone, Debug)]
pub struct EntrySummary {
    pub id: EntryId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Stats snapshot derived from store queries at request time.
#[derive(Clone, Debug)]
pub struct UserStats {
    pub entry_count: u64,
    pub total_chars: u64,
    pub registered_at: DateTime<Utc>,
}

impl UserStats {
    /// Average entry length in characters; 0 when there are no entries.
    pub fn average_len(&self) -> u64 {
        if self.entry_count == 0 {
            return 0;
        }
        self.total_chars / self.entry_count
    }

    pub fn usage_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.registered_at)
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    user_id: i64,
    text: String,
    created: String,
}

impl EntryRow {
    fn into_entry(self) -> Entry {
        Entry {
            id: EntryId(self.id),
            user_id: UserId(self.user_id),
            created_at: parse_timestamp(&self.created),
            text: self.text,
        }
    }
}

#[derive(Debug, FromRow)]
struct EntrySummaryRow {
    id: i64,
    text: String,
    created: String,
}

impl EntrySummaryRow {
    fn into_summary(self) -> EntrySummary {
        EntrySummary {
            id: EntryId(self.id),
            created_at: parse_timestamp(&self.created),
            text: self.text,
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    // Rows written by the earlier deployment carry CURRENT_TIMESTAMP text.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&naive);
    }
    tracing::warn!(raw, "unparseable stored timestamp");
    Utc::now()
}

/// Durable persistence for users and entries.
///
/// Every write is a single committed statement, so an acknowledged entry
/// survives a crash between operations; id assignment is left to SQLite
/// and stays unique and monotonic under concurrent sessions.
pub struct DiaryStore {
    pool: Pool<Sqlite>,
}

impl DiaryStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        // Saving an entry must not require a users row: the deployed data
        // has entries from users who never completed registration, so the
        // entries -> users reference stays declarative.
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests and throwaway runs.
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(false);
        // A pool of one: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Register a user if absent. Re-registration is a silent no-op and
    /// never overwrites the name fields from the first contact.
    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO users (user_id, username, first_name, last_name, reg_date)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(profile.user_id.0)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a new entry and return its id.
    ///
    /// The body is stored verbatim but must be non-empty after trimming.
    pub async fn add_entry(&self, user_id: UserId, text: &str) -> Result<EntryId> {
        if text.trim().is_empty() {
            return Err(Error::Validation("entry text must not be empty".to_string()));
        }

        let res = sqlx::query("INSERT INTO entries (user_id, text, created) VALUES (?, ?, ?)")
            .bind(user_id.0)
            .bind(text)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(EntryId(res.last_insert_rowid()))
    }

    /// Most recent entries first, truncated to `limit`.
    pub async fn list_entries(&self, user_id: UserId, limit: u32) -> Result<Vec<EntrySummary>> {
        let rows: Vec<EntrySummaryRow> = sqlx::query_as(
            "SELECT id, text, created FROM entries
             WHERE user_id = ?
             ORDER BY created DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntrySummaryRow::into_summary).collect())
    }

    /// Lookup by id regardless of owner; entry ids are globally unique and
    /// the caller only exposes ids it previously handed to that user.
    pub async fn get_entry(&self, entry_id: EntryId) -> Result<Entry> {
        let row: Option<EntryRow> =
            sqlx::query_as("SELECT id, user_id, text, created FROM entries WHERE id = ?")
                .bind(entry_id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(EntryRow::into_entry)
            .ok_or_else(|| Error::NotFound(format!("entry #{entry_id}")))
    }

    pub async fn stats(&self, user_id: UserId) -> Result<UserStats> {
        let reg: Option<(String,)> = sqlx::query_as("SELECT reg_date FROM users WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some((reg_date,)) = reg else {
            return Err(Error::NotFound(format!("user {}", user_id.0)));
        };

        // LENGTH() on SQLite TEXT counts characters, matching the counts
        // reported when an entry is saved.
        let (count, chars): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(text)), 0) FROM entries WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserStats {
            entry_count: count.max(0) as u64,
            total_chars: chars.max(0) as u64,
            registered_at: parse_timestamp(&reg_date),
        })
    }
}
