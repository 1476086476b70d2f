// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! SQL-based lease store (SQLite).
//!
//! Each token is one row, so appends from different processes never contend on
//! a shared row and a slug's record is simply the set of rows carrying it:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS mutex_tokens (
//!   id INTEGER PRIMARY KEY AUTOINCREMENT,
//!   slug TEXT NOT NULL,
//!   token TEXT NOT NULL
//! );
//! ```
//!
//! SQLite serialises writers, so a read issued after a committed append on the
//! same database always observes it. PostgreSQL can be added by following the
//! same pattern with a `PgPool`.

use crate::store::{LeaseRecord, LeaseStore};
use crate::{MutexError, MutexResult};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// SQLite-based lease store.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    /// Create a new SQLite lease store.
    ///
    /// `database_url` is any valid `sqlx` SQLite URL, e.g.:
    /// - `sqlite::memory:` (in-memory, single connection)
    /// - `sqlite://mutex.db?mode=rwc`
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> MutexResult<Self> {
        // Every connection to `:memory:` opens a private database, so the pool
        // must pin exactly one connection for the lifetime of the store.
        let in_memory = database_url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| MutexError::Storage(format!("failed to connect SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mutex_tokens (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              slug TEXT NOT NULL,
              token TEXT NOT NULL
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| MutexError::Storage(format!("failed to create mutex_tokens table: {e}")))?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_mutex_tokens_slug ON mutex_tokens(slug);"#)
            .execute(&pool)
            .await
            .map_err(|e| MutexError::Storage(format!("failed to create index: {e}")))?;

        debug!(in_memory, "SQLite lease store initialized");
        Ok(Self { pool })
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    #[instrument(skip(self, token), fields(slug = %slug))]
    async fn append_token(&self, slug: &str, token: &str) -> MutexResult<()> {
        sqlx::query(r#"INSERT INTO mutex_tokens (slug, token) VALUES (?1, ?2)"#)
            .bind(slug)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(slug = %slug))]
    async fn read_tokens(&self, slug: &str) -> MutexResult<Vec<String>> {
        let tokens = self.select_tokens(slug).await?;
        if tokens.is_empty() {
            return Err(MutexError::Storage(format!("record for '{}' not found", slug)));
        }
        Ok(tokens)
    }

    #[instrument(skip(self, tokens), fields(slug = %slug, count = tokens.len()))]
    async fn remove_tokens(&self, slug: &str, tokens: &[String]) -> MutexResult<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for token in tokens {
            sqlx::query(r#"DELETE FROM mutex_tokens WHERE slug = ?1 AND token = ?2"#)
                .bind(slug)
                .bind(token)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(slug = %slug))]
    async fn get_record(&self, slug: &str) -> MutexResult<Option<LeaseRecord>> {
        let tokens = self.select_tokens(slug).await?;
        if tokens.is_empty() {
            return Ok(None);
        }
        Ok(Some(LeaseRecord {
            slug: slug.to_string(),
            tokens,
        }))
    }
}

impl SqliteLeaseStore {
    async fn select_tokens(&self, slug: &str) -> MutexResult<Vec<String>> {
        let rows = sqlx::query(r#"SELECT token FROM mutex_tokens WHERE slug = ?1 ORDER BY id"#)
            .bind(slug)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get::<String, _>("token")).collect())
    }
}
