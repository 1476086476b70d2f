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

//! Redis-based lease store.
//!
//! A slug's record is a Redis list at `<prefix>:<slug>`:
//! - append: `RPUSH` (creates the list when absent)
//! - read: `LRANGE 0 -1`
//! - remove: `MULTI` + one `LREM key 0 token` per token + `EXEC`
//!
//! Redis deletes a list once its last element is removed, and a single Redis
//! primary gives read-your-writes on one connection. Do not point this store at
//! a replica.

use crate::store::{LeaseRecord, LeaseStore};
use crate::{MutexError, MutexResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::instrument;

/// Redis-backed lease store.
///
/// ## Design Decisions
/// - **Why ConnectionManager**: Automatic reconnection, cheap to clone per call
/// - **Why a key prefix**: Lets several applications share one Redis instance
#[derive(Clone)]
pub struct RedisLeaseStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisLeaseStore {
    /// Connect to Redis.
    ///
    /// ## Arguments
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Key prefix for isolation (e.g., "plexspaces:mutex")
    pub async fn new(url: &str, prefix: &str) -> MutexResult<Self> {
        let client = Client::open(url)
            .map_err(|e| MutexError::Storage(format!("failed to create redis client: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| MutexError::Storage(format!("failed to connect redis: {e}")))?;

        Ok(Self {
            manager,
            prefix: prefix.trim_end_matches(':').to_string(),
        })
    }

    fn record_key(&self, slug: &str) -> String {
        format!("{}:{}", self.prefix, slug)
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    #[instrument(skip(self, token), fields(slug = %slug))]
    async fn append_token(&self, slug: &str, token: &str) -> MutexResult<()> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(self.record_key(slug), token).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(slug = %slug))]
    async fn read_tokens(&self, slug: &str) -> MutexResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let tokens: Vec<String> = conn.lrange(self.record_key(slug), 0, -1).await?;

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

        let key = self.record_key(slug);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for token in tokens {
            pipe.lrem(&key, 0, token).ignore();
        }

        let mut conn = self.manager.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(slug = %slug))]
    async fn get_record(&self, slug: &str) -> MutexResult<Option<LeaseRecord>> {
        let mut conn = self.manager.clone();
        let tokens: Vec<String> = conn.lrange(self.record_key(slug), 0, -1).await?;

        if tokens.is_empty() {
            return Ok(None);
        }
        Ok(Some(LeaseRecord {
            slug: slug.to_string(),
            tokens,
        }))
    }
}
