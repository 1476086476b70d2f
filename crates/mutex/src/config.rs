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

//! Mutex configuration.
//!
//! ## Explicit Configuration
//! [`MutexConfig`] carries the three recognised options. Its `Default` is the
//! immutable baseline:
//!
//! | field | default |
//! |---|---|
//! | `store` | `None` (falls back to the process-wide default store) |
//! | `idle` | `false` (the constructor starts a claim immediately) |
//! | `lease_duration` | 15000 ms |
//!
//! ## Process-Wide Default Store
//! [`set_default_store`] installs a store used by every mutex whose config has
//! no explicit store. It is meant to be set once during process start-up;
//! [`clear_default_store`] exists for test isolation. A mutex resolves its store
//! once, at construction, so later changes never affect existing instances.
//!
//! ## Environment Variables
//! - `PLEXSPACES_MUTEX_LEASE_DURATION_MS`: lease lifetime (default: 15000)
//! - `PLEXSPACES_MUTEX_IDLE`: `true`/`false` (default: false)
//! - `PLEXSPACES_MUTEX_BACKEND`: store type (default: "in-memory")
//!   - "in-memory" | "memory" → MemoryLeaseStore
//!   - "sqlite" → SqliteLeaseStore (feature `sqlite-backend`)
//!   - "redis" → RedisLeaseStore (feature `redis-backend`)
//! - `PLEXSPACES_MUTEX_SQLITE_URL`: sqlx URL (default: "sqlite::memory:")
//! - `PLEXSPACES_MUTEX_REDIS_URL`: Redis URL (default: "redis://localhost:6379")
//! - `PLEXSPACES_MUTEX_REDIS_PREFIX`: key prefix (default: "plexspaces:mutex")

use crate::memory::MemoryLeaseStore;
use crate::store::LeaseStore;
use crate::{MutexError, MutexResult};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default lease lifetime before a held lock counts as abandoned.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_millis(15_000);

static DEFAULT_STORE: RwLock<Option<Arc<dyn LeaseStore>>> = RwLock::new(None);

/// Install the process-wide default store.
pub fn set_default_store(store: Arc<dyn LeaseStore>) {
    let mut slot = DEFAULT_STORE.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(store);
}

/// The process-wide default store, if one is installed.
pub fn default_store() -> Option<Arc<dyn LeaseStore>> {
    DEFAULT_STORE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Remove the process-wide default store. Intended for tests.
pub fn clear_default_store() {
    let mut slot = DEFAULT_STORE.write().unwrap_or_else(|e| e.into_inner());
    *slot = None;
}

/// Mutex configuration.
#[derive(Clone)]
pub struct MutexConfig {
    /// Store handle; `None` defers to the process-wide default store
    pub store: Option<Arc<dyn LeaseStore>>,
    /// Start unclaimed (`true`) or claim right away (`false`)
    pub idle: bool,
    /// Lease lifetime
    pub lease_duration: Duration,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            store: None,
            idle: false,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }
}

impl MutexConfig {
    pub fn with_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_idle(mut self, idle: bool) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// Build configuration from environment variables, starting from defaults.
    ///
    /// The store is left unset; pair with [`create_store_from_env`] or the
    /// process-wide default store.
    pub fn from_env() -> MutexResult<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("PLEXSPACES_MUTEX_LEASE_DURATION_MS") {
            let millis: u64 = value.trim().parse().map_err(|_| {
                MutexError::Config(format!(
                    "PLEXSPACES_MUTEX_LEASE_DURATION_MS must be a whole number of milliseconds, got '{}'",
                    value
                ))
            })?;
            config.lease_duration = Duration::from_millis(millis);
        }

        if let Ok(value) = std::env::var("PLEXSPACES_MUTEX_IDLE") {
            config.idle = match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(MutexError::Config(format!(
                        "PLEXSPACES_MUTEX_IDLE must be true or false, got '{}'",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Resolve the store: explicit handle first, then the process-wide default.
    pub(crate) fn resolve_store(&self) -> MutexResult<Arc<dyn LeaseStore>> {
        self.store
            .clone()
            .or_else(default_store)
            .ok_or_else(|| MutexError::Config("No lease store connection".to_string()))
    }
}

/// Store backend selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendType {
    /// In-memory HashMap backend (default, always available)
    InMemory,
    /// SQLite backend (requires sqlite-backend feature)
    Sqlite {
        /// sqlx database URL
        url: String,
    },
    /// Redis backend (requires redis-backend feature)
    Redis {
        /// Redis server URL
        url: String,
        /// Key prefix
        prefix: String,
    },
}

/// Lease store configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendType,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::InMemory,
        }
    }
}

impl StoreConfig {
    pub fn new(backend: BackendType) -> Self {
        Self { backend }
    }

    /// Create store configuration from environment variables.
    pub fn from_env() -> MutexResult<Self> {
        let backend_str = std::env::var("PLEXSPACES_MUTEX_BACKEND")
            .unwrap_or_else(|_| "in-memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "in-memory" | "memory" => BackendType::InMemory,
            "sqlite" => BackendType::Sqlite {
                url: std::env::var("PLEXSPACES_MUTEX_SQLITE_URL")
                    .unwrap_or_else(|_| "sqlite::memory:".to_string()),
            },
            "redis" => BackendType::Redis {
                url: std::env::var("PLEXSPACES_MUTEX_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                prefix: std::env::var("PLEXSPACES_MUTEX_REDIS_PREFIX")
                    .unwrap_or_else(|_| "plexspaces:mutex".to_string()),
            },
            other => {
                return Err(MutexError::Config(format!(
                    "Unknown backend type: {}. Valid options: in-memory, sqlite, redis",
                    other
                )))
            }
        };

        Ok(Self { backend })
    }
}

/// Create a lease store from environment configuration.
pub async fn create_store_from_env() -> MutexResult<Arc<dyn LeaseStore>> {
    create_store_from_config(StoreConfig::from_env()?).await
}

/// Create a lease store from explicit configuration.
pub async fn create_store_from_config(config: StoreConfig) -> MutexResult<Arc<dyn LeaseStore>> {
    match config.backend {
        BackendType::InMemory => Ok(Arc::new(MemoryLeaseStore::new())),

        #[cfg(feature = "sqlite-backend")]
        BackendType::Sqlite { url } => {
            use crate::sql::SqliteLeaseStore;
            Ok(Arc::new(SqliteLeaseStore::new(&url).await?))
        }

        #[cfg(not(feature = "sqlite-backend"))]
        BackendType::Sqlite { .. } => Err(MutexError::Config(
            "SQLite backend requires 'sqlite-backend' feature".to_string(),
        )),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url, prefix } => {
            use crate::redis::RedisLeaseStore;
            Ok(Arc::new(RedisLeaseStore::new(&url, &prefix).await?))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(MutexError::Config(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),
    }
}
