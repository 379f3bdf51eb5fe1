//! Last-seen tracking: one SQLite row per normalized nick, overwritten on
//! every message from that nick. Records are never expired or deleted.

use std::path::Path;

use anyhow::{Context as _, Result};
use sqlx::{Row as _, SqlitePool, sqlite::SqliteConnectOptions};
use tracing::debug;

/// When a nick was last observed speaking, and what they said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRecord {
    pub nick: String,
    pub message: String,
    pub channel: String,
    /// Unix timestamp, seconds.
    pub at: i64,
}

#[derive(Debug, Clone)]
pub struct SeenStore {
    pool: SqlitePool,
}

impl SeenStore {
    /// Opens (creating if missing) the store at `path` and ensures the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("opening seen db at {}", path.display()))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS seen (
                nick TEXT PRIMARY KEY,
                message TEXT NOT NULL,
                channel TEXT NOT NULL,
                at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .context("creating seen table")?;
        Ok(Self { pool })
    }

    /// Upserts the record for `nick` (case-insensitive key).
    pub async fn record(&self, nick: &str, message: &str, channel: &str, at: i64) -> Result<()> {
        let nick = nick.to_lowercase();
        debug!(nick = %nick, channel = %channel, "Recording seen");
        sqlx::query(
            "INSERT INTO seen (nick, message, channel, at) VALUES (?, ?, ?, ?)
             ON CONFLICT(nick) DO UPDATE SET
                 message = excluded.message,
                 channel = excluded.channel,
                 at = excluded.at",
        )
        .bind(&nick)
        .bind(message)
        .bind(channel)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("upserting seen record")?;
        Ok(())
    }

    pub async fn lookup(&self, nick: &str) -> Result<Option<SeenRecord>> {
        let nick = nick.to_lowercase();
        let row = sqlx::query("SELECT nick, message, channel, at FROM seen WHERE nick = ?")
            .bind(&nick)
            .fetch_optional(&self.pool)
            .await
            .context("looking up seen record")?;
        Ok(row.map(|r| SeenRecord {
            nick: r.get("nick"),
            message: r.get("message"),
            channel: r.get("channel"),
            at: r.get("at"),
        }))
    }
}
