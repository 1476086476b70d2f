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

//! Lease store trait: the shared record keeper behind every mutex.

use crate::MutexResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persisted record for one slug.
///
/// Serialized shape: `{ "slug": "jobs", "tokens": ["83412-1735689600000"] }`.
/// `tokens` is a multiset: the same string may appear more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub slug: String,
    pub tokens: Vec<String>,
}

/// Trait for the shared store backing the claim/release protocol.
///
/// ## Consistency
/// A `read_tokens` issued right after this process's own `append_token` on the
/// same slug MUST observe that append. Backends with relaxed read-after-write
/// consistency break mutual exclusion. The mutex detects a missing own token
/// and fails the claim with [`MutexError::Storage`](crate::MutexError::Storage)
/// rather than papering over it.
///
/// ## Atomicity
/// - `append_token` must never lose a concurrent append from another process.
/// - `remove_tokens` removes every listed token in one indivisible step.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create the record for `slug` if absent and add `token` to it, atomically.
    async fn append_token(&self, slug: &str, token: &str) -> MutexResult<()>;

    /// Current token multiset for `slug`.
    ///
    /// ## Returns
    /// - `Err(MutexError::Storage)`: the record does not exist
    async fn read_tokens(&self, slug: &str) -> MutexResult<Vec<String>>;

    /// Remove every occurrence of each given token from `slug`'s record.
    ///
    /// Removing the last token may delete the record. Removing tokens from a
    /// missing record is a no-op.
    async fn remove_tokens(&self, slug: &str, tokens: &[String]) -> MutexResult<()>;

    /// Inspect the record for `slug` without failing when it is absent.
    async fn get_record(&self, slug: &str) -> MutexResult<Option<LeaseRecord>>;
}
