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

//! In-memory lease store implementation (for testing and single-process use).

use crate::store::{LeaseRecord, LeaseStore};
use crate::{MutexError, MutexResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory lease store.
///
/// ## Purpose
/// Provides a simple in-memory implementation of `LeaseStore` for tests and
/// for coordinating tasks inside one process. Clones share the same records.
///
/// ## Limitations
/// - Not persistent (records lost on restart)
/// - Not distributed (single process only)
#[derive(Clone)]
pub struct MemoryLeaseStore {
    records: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl MemoryLeaseStore {
    /// Create a new, empty in-memory lease store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn append_token(&self, slug: &str, token: &str) -> MutexResult<()> {
        let mut records = self.records.write().await;
        records
            .entry(slug.to_string())
            .or_default()
            .push(token.to_string());
        Ok(())
    }

    async fn read_tokens(&self, slug: &str) -> MutexResult<Vec<String>> {
        let records = self.records.read().await;
        records
            .get(slug)
            .cloned()
            .ok_or_else(|| MutexError::Storage(format!("record for '{}' not found", slug)))
    }

    async fn remove_tokens(&self, slug: &str, tokens: &[String]) -> MutexResult<()> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get_mut(slug) {
            existing.retain(|t| !tokens.contains(t));
            if existing.is_empty() {
                records.remove(slug);
            }
        }
        Ok(())
    }

    async fn get_record(&self, slug: &str) -> MutexResult<Option<LeaseRecord>> {
        let records = self.records.read().await;
        Ok(records.get(slug).map(|tokens| LeaseRecord {
            slug: slug.to_string(),
            tokens: tokens.clone(),
        }))
    }
}
