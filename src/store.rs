//! SQLite persistence: inventories, catching channels, achievement claims
//! and DogBoard reposts.
//!
//! The schema is versioned with `PRAGMA user_version` and migrated forward
//! on open. The connection sits behind a synchronous mutex; every method is
//! one short critical section and never awaits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::spawn::Scope;
use crate::types::Snowflake;

/// Newest schema this build knows how to produce.
pub const SCHEMA_VERSION: i64 = 1;

/// How many owners a guild leaderboard lists.
pub const GUILD_TOP_LIMIT: usize = 15;
/// How many owners the global leaderboard lists.
pub const GLOBAL_TOP_LIMIT: usize = 25;
/// Minimum summed total to appear on the global leaderboard.
pub const GLOBAL_MIN_TOTAL: u64 = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} must be a non-zero id")]
    InvalidId(&'static str),
    #[error("achievement already claimed")]
    AlreadyClaimed,
    #[error("database schema version {0} is newer than supported ({SCHEMA_VERSION})")]
    FutureSchema(i64),
}

/// Aggregate inventory view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Leaderboard {
    /// Entity with the smallest summed count, and that count.
    pub rarest: Option<(String, u64)>,
    /// Owners by summed count, highest first.
    pub top: Vec<(Snowflake, u64)>,
}

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS inventory (
        entity TEXT NOT NULL,
        user_id TEXT NOT NULL,
        guild_id TEXT NOT NULL,
        amount INTEGER NOT NULL,
        PRIMARY KEY (entity, user_id, guild_id)
    );

    CREATE INDEX IF NOT EXISTS inventory_by_guild ON inventory (guild_id);

    CREATE TABLE IF NOT EXISTS scope_channels (
        guild_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        PRIMARY KEY (guild_id, channel_id)
    );

    CREATE TABLE IF NOT EXISTS achievement_claims (
        guild_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        achievement_id TEXT NOT NULL,
        PRIMARY KEY (guild_id, user_id, achievement_id)
    );

    CREATE TABLE IF NOT EXISTS board_posts (
        message_id TEXT PRIMARY KEY
    );
";

#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    // -- inventory ---------------------------------------------------------

    /// Add `delta` to a counter, creating it if absent. Returns the new count.
    pub fn increment(
        &self,
        user_id: &str,
        guild_id: &str,
        entity: &str,
        delta: u64,
    ) -> Result<u64, StoreError> {
        check_id("user_id", user_id)?;
        check_id("guild_id", guild_id)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO inventory (entity, user_id, guild_id, amount)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (entity, user_id, guild_id)
             DO UPDATE SET amount = amount + excluded.amount",
            params![entity, user_id, guild_id, to_sql(delta)],
        )?;
        let total: i64 = tx.query_row(
            "SELECT amount FROM inventory
             WHERE entity = ?1 AND user_id = ?2 AND guild_id = ?3",
            params![entity, user_id, guild_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(from_sql(total))
    }

    /// Subtract `delta`, clamping at zero; empty counters are removed.
    /// Returns how many counters were touched.
    pub fn decrement(
        &self,
        user_id: &str,
        guild_id: &str,
        entity: &str,
        delta: u64,
    ) -> Result<usize, StoreError> {
        check_id("user_id", user_id)?;
        check_id("guild_id", guild_id)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "UPDATE inventory SET amount = MAX(amount - ?4, 0)
             WHERE entity = ?1 AND user_id = ?2 AND guild_id = ?3",
            params![entity, user_id, guild_id, to_sql(delta)],
        )?;
        tx.execute(
            "DELETE FROM inventory
             WHERE entity = ?1 AND user_id = ?2 AND guild_id = ?3 AND amount <= 0",
            params![entity, user_id, guild_id],
        )?;
        tx.commit()?;
        Ok(affected)
    }

    /// Every counter an owner holds in a guild, by entity name.
    pub fn list(&self, user_id: &str, guild_id: &str) -> Result<Vec<(String, u64)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity, amount FROM inventory
             WHERE user_id = ?1 AND guild_id = ?2 AND amount > 0
             ORDER BY entity ASC",
        )?;
        let rows = stmt.query_map(params![user_id, guild_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entity, amount) = row?;
            out.push((entity, from_sql(amount)));
        }
        Ok(out)
    }

    pub fn count(&self, user_id: &str, guild_id: &str, entity: &str) -> Result<u64, StoreError> {
        let amount: Option<i64> = self
            .conn()
            .query_row(
                "SELECT amount FROM inventory
                 WHERE entity = ?1 AND user_id = ?2 AND guild_id = ?3",
                params![entity, user_id, guild_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(amount.map(from_sql).unwrap_or(0))
    }

    /// Rarest entity and top owners within one guild.
    pub fn aggregate_leaderboard(&self, guild_id: &str) -> Result<Leaderboard, StoreError> {
        let conn = self.conn();
        let rarest = conn
            .query_row(
                "SELECT entity, SUM(amount) AS total FROM inventory
                 WHERE guild_id = ?1
                 GROUP BY entity
                 HAVING total > 0
                 ORDER BY total ASC, entity ASC
                 LIMIT 1",
                params![guild_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
            .map(|(entity, total)| (entity, from_sql(total)));

        let mut stmt = conn.prepare(
            "SELECT user_id, SUM(amount) AS total FROM inventory
             WHERE guild_id = ?1
             GROUP BY user_id
             HAVING total > 0
             ORDER BY total DESC, user_id ASC
             LIMIT ?2",
        )?;
        let top = collect_owners(stmt.query_map(params![guild_id, GUILD_TOP_LIMIT as i64], owner_row)?)?;

        Ok(Leaderboard { rarest, top })
    }

    /// Rarest entity across all guilds and owners whose summed total is at
    /// least [`GLOBAL_MIN_TOTAL`].
    pub fn global_leaderboard(&self) -> Result<Leaderboard, StoreError> {
        let conn = self.conn();
        let rarest = conn
            .query_row(
                "SELECT entity, SUM(amount) AS total FROM inventory
                 GROUP BY entity
                 HAVING total > 0
                 ORDER BY total ASC, entity ASC
                 LIMIT 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
            .map(|(entity, total)| (entity, from_sql(total)));

        let mut stmt = conn.prepare(
            "SELECT user_id, SUM(amount) AS total FROM inventory
             GROUP BY user_id
             HAVING total >= ?1
             ORDER BY total DESC, user_id ASC
             LIMIT ?2",
        )?;
        let top = collect_owners(stmt.query_map(
            params![to_sql(GLOBAL_MIN_TOTAL), GLOBAL_TOP_LIMIT as i64],
            owner_row,
        )?)?;

        Ok(Leaderboard { rarest, top })
    }

    /// Total dogs caught everywhere.
    pub fn total_caught(&self) -> Result<u64, StoreError> {
        let total: Option<i64> = self.conn().query_row(
            "SELECT SUM(amount) FROM inventory",
            [],
            |row| row.get(0),
        )?;
        Ok(total.map(from_sql).unwrap_or(0))
    }

    // -- catching channels -------------------------------------------------

    /// Register a catching channel. `false` if it already was.
    pub fn add_channel(&self, guild_id: &str, channel_id: &str) -> Result<bool, StoreError> {
        check_id("guild_id", guild_id)?;
        check_id("channel_id", channel_id)?;
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO scope_channels (guild_id, channel_id) VALUES (?1, ?2)",
            params![guild_id, channel_id],
        )?;
        Ok(inserted > 0)
    }

    /// Deregister a catching channel. `false` if it was not registered.
    pub fn remove_channel(&self, guild_id: &str, channel_id: &str) -> Result<bool, StoreError> {
        let removed = self.conn().execute(
            "DELETE FROM scope_channels WHERE guild_id = ?1 AND channel_id = ?2",
            params![guild_id, channel_id],
        )?;
        Ok(removed > 0)
    }

    pub fn list_channels(&self, guild_id: &str) -> Result<Vec<Snowflake>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id FROM scope_channels WHERE guild_id = ?1 ORDER BY channel_id",
        )?;
        let rows = stmt.query_map(params![guild_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn has_channel(&self, guild_id: &str, channel_id: &str) -> Result<bool, StoreError> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM scope_channels WHERE guild_id = ?1 AND channel_id = ?2",
                params![guild_id, channel_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Deregister every catching channel of a guild. Returns how many.
    pub fn clear_channels(&self, guild_id: &str) -> Result<usize, StoreError> {
        Ok(self.conn().execute(
            "DELETE FROM scope_channels WHERE guild_id = ?1",
            params![guild_id],
        )?)
    }

    /// Every registered scope, ordered by guild then channel.
    pub fn all_scopes(&self) -> Result<Vec<Scope>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT guild_id, channel_id FROM scope_channels ORDER BY guild_id, channel_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Scope::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- achievements ------------------------------------------------------

    /// Record a claim. Fails with [`StoreError::AlreadyClaimed`] on repeats.
    pub fn claim_achievement(
        &self,
        guild_id: &str,
        user_id: &str,
        achievement_id: &str,
    ) -> Result<(), StoreError> {
        check_id("guild_id", guild_id)?;
        check_id("user_id", user_id)?;
        check_id("achievement_id", achievement_id)?;

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO achievement_claims (guild_id, user_id, achievement_id)
             VALUES (?1, ?2, ?3)",
            params![guild_id, user_id, achievement_id],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyClaimed);
        }
        Ok(())
    }

    /// Claimed achievement ids, in claim order.
    pub fn achievement_ids(&self, guild_id: &str, user_id: &str) -> Result<Vec<String>, StoreError> {
        check_id("guild_id", guild_id)?;
        check_id("user_id", user_id)?;

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT achievement_id FROM achievement_claims
             WHERE guild_id = ?1 AND user_id = ?2
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![guild_id, user_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- board -------------------------------------------------------------

    /// Remember that a message was reposted. `true` the first time only.
    pub fn mark_board_posted(&self, message_id: &str) -> Result<bool, StoreError> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO board_posts (message_id) VALUES (?1)",
            params![message_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn is_board_posted(&self, message_id: &str) -> Result<bool, StoreError> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM board_posts WHERE message_id = ?1",
                params![message_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::FutureSchema(version));
    }
    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

/// Snowflakes are never empty or zero.
fn check_id(what: &'static str, id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id == "0" {
        return Err(StoreError::InvalidId(what));
    }
    Ok(())
}

fn owner_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn collect_owners(
    rows: impl Iterator<Item = rusqlite::Result<(String, i64)>>,
) -> Result<Vec<(Snowflake, u64)>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        let (user_id, total) = row?;
        out.push((user_id, from_sql(total)));
    }
    Ok(out)
}

fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
