use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite handle
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id  TEXT UNIQUE NOT NULL,
                channel_id  TEXT NOT NULL,
                instrument  TEXT NOT NULL,
                direction   TEXT NOT NULL,
                stop_loss   TEXT NOT NULL,
                expiry_type TEXT DEFAULT 'no_expiry',
                expiry_time TEXT,
                status      TEXT DEFAULT 'active',

                first_limit_hit_time TEXT,
                closed_at            TEXT,
                closed_reason        TEXT,

                total_limits INTEGER DEFAULT 0,
                limits_hit   INTEGER DEFAULT 0,
                scalp        INTEGER DEFAULT 0,

                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,

                CONSTRAINT signals_status_check
                    CHECK (status IN ('active', 'hit', 'profit', 'breakeven', 'stop_loss', 'cancelled')),
                CONSTRAINT signals_direction_check
                    CHECK (direction IN ('long', 'short'))
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS limits (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id       INTEGER NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
                price_level     TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,

                status    TEXT DEFAULT 'pending',
                hit_time  TEXT,
                hit_price TEXT,

                approaching_alert_sent INTEGER DEFAULT 0,
                hit_alert_sent         INTEGER DEFAULT 0,

                created_at TEXT NOT NULL,

                CONSTRAINT limits_status_check
                    CHECK (status IN ('pending', 'hit', 'cancelled')),
                CONSTRAINT limits_signal_seq_unique
                    UNIQUE (signal_id, sequence_number)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create limits table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS status_changes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id   INTEGER NOT NULL REFERENCES signals(id) ON DELETE CASCADE,
                old_status  TEXT,
                new_status  TEXT NOT NULL,
                change_type TEXT NOT NULL,
                reason      TEXT,
                changed_at  TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create status_changes table")?;

        // Migration: add the scalp column to databases created before it existed.
        // The error is ignored when the column is already present.
        let _ = sqlx::query("ALTER TABLE signals ADD COLUMN scalp INTEGER DEFAULT 0")
            .execute(&mut *conn)
            .await;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_signals_status ON signals (status)",
            "CREATE INDEX IF NOT EXISTS idx_signals_message ON signals (message_id)",
            "CREATE INDEX IF NOT EXISTS idx_signals_instrument ON signals (instrument)",
            "CREATE INDEX IF NOT EXISTS idx_signals_expiry ON signals (expiry_time)",
            "CREATE INDEX IF NOT EXISTS idx_limits_signal ON limits (signal_id)",
            "CREATE INDEX IF NOT EXISTS idx_limits_status ON limits (status)",
            "CREATE INDEX IF NOT EXISTS idx_status_changes_signal ON status_changes (signal_id)",
        ] {
            sqlx::query(index)
                .execute(&mut *conn)
                .await
                .context("Failed to create index")?;
        }

        info!("Database schema initialized.");
        Ok(())
    }
}
