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

//! Error types for mutex operations.
//!
//! Errors fall into two groups that never mix:
//! - **Synchronous**: [`MutexError::Config`] and [`MutexError::Programming`] are
//!   returned directly from `LeaseMutex::new`, `claim()` and `free()`.
//! - **Asynchronous**: [`MutexError::Storage`] and [`MutexError::Contention`] are
//!   only ever produced by the futures those calls return.

use thiserror::Error;

/// Result type for mutex operations.
pub type MutexResult<T> = Result<T, MutexError>;

/// Errors that can occur during mutex operations.
///
/// `Clone` so a single claim outcome can be observed by every party awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutexError {
    /// Bad constructor arguments (empty slug, no store handle, bad env values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle misuse (claim while claimed, free while idle)
    #[error("Programming error: {0}")]
    Programming(String),

    /// Backend failure or inconsistent backend state
    #[error("Storage error: {0}")]
    Storage(String),

    /// Another live lease already holds the slug
    #[error("Failed to acquire mutual exclusion on '{slug}'")]
    Contention { slug: String },
}

impl MutexError {
    /// True for the expected, retryable "someone else holds it" outcome.
    pub fn is_contention(&self) -> bool {
        matches!(self, MutexError::Contention { .. })
    }

    /// True when the backend failed rather than the lease being held.
    pub fn is_storage(&self) -> bool {
        matches!(self, MutexError::Storage(_))
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for MutexError {
    fn from(err: sqlx::Error) -> Self {
        MutexError::Storage(format!("SQL error: {}", err))
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for MutexError {
    fn from(err: redis::RedisError) -> Self {
        MutexError::Storage(format!("Redis error: {}", err))
    }
}
