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

//! Lease mutex integration tests (in-memory store).
//!
//! These tests verify:
//! - Mutual exclusion on one slug, independence across slugs
//! - Record cleanup after free and after rejection
//! - Expired leases never block and are collected by the winner
//! - The idle flag and lifecycle misuse errors
//! - Storage failures and read-your-writes violations

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use plexspaces_mutex::{
    clear_default_store, set_default_store, FreeHandle, LeaseMutex, LeaseRecord, LeaseStore,
    LeaseToken, MemoryLeaseStore, MutexConfig, MutexError, MutexResult,
};
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("plexspaces_mutex=debug")
        .with_test_writer()
        .try_init();
}

fn config(store: &Arc<dyn LeaseStore>) -> MutexConfig {
    MutexConfig::default().with_store(store.clone())
}

fn memory_store() -> Arc<dyn LeaseStore> {
    Arc::new(MemoryLeaseStore::new())
}

async fn record(store: &Arc<dyn LeaseStore>, slug: &str) -> Option<LeaseRecord> {
    store.get_record(slug).await.unwrap()
}

#[tokio::test]
async fn test_mutual_exclusion_under_same_slug() {
    init_tracing();
    let store = memory_store();

    let mutexes: Vec<LeaseMutex> = (0..4)
        .map(|_| LeaseMutex::new("mutexTest", config(&store)).unwrap())
        .collect();
    let claims = mutexes.iter().map(|m| m.pending_claim().unwrap());
    let results = join_all(claims).await;

    let handles: Vec<FreeHandle> = results
        .into_iter()
        .filter_map(|r| match r {
            Ok(handle) => Some(handle),
            Err(e) => {
                assert!(e.is_contention(), "unexpected error: {e}");
                None
            }
        })
        .collect();
    assert_eq!(handles.len(), 1);

    // Losers are idle again, the winner is not.
    assert_eq!(mutexes.iter().filter(|m| m.is_idle()).count(), 3);

    handles[0].free().unwrap().await.unwrap();
    assert!(record(&store, "mutexTest").await.is_none());
}

#[tokio::test]
async fn test_different_slugs_do_not_lock_each_other() {
    let store = memory_store();

    let mutexes: Vec<LeaseMutex> = (0..4)
        .map(|i| LeaseMutex::new(format!("dontLockTest{}", i), config(&store)).unwrap())
        .collect();
    let results = join_all(mutexes.iter().map(|m| m.pending_claim().unwrap())).await;

    for result in results {
        result.unwrap().free().unwrap().await.unwrap();
    }
    assert!(mutexes.iter().all(|m| m.is_idle()));
}

#[tokio::test]
async fn test_claim_creates_single_well_formed_token() {
    let store = memory_store();
    let before = Utc::now();

    let mutex = LeaseMutex::new(
        "createTest",
        config(&store).with_lease_duration(Duration::from_millis(1000)),
    )
    .unwrap();
    let handle = mutex.pending_claim().unwrap().await.unwrap();
    let after = Utc::now();

    let record = record(&store, "createTest").await.unwrap();
    assert_eq!(record.tokens.len(), 1);

    let (nonce, _) = record.tokens[0].split_once('-').unwrap();
    assert!(nonce.parse::<u64>().is_ok());

    let token: LeaseToken = record.tokens[0].parse().unwrap();
    assert!(token.expires_at() > before);
    assert!(token.expires_at() <= after + TimeDelta::milliseconds(1000));
    assert_eq!(Some(token), mutex.own_token());

    handle.free().unwrap().await.unwrap();
    let tokens = record_tokens(&store, "createTest").await;
    assert!(tokens.is_empty());
}

async fn record_tokens(store: &Arc<dyn LeaseStore>, slug: &str) -> Vec<String> {
    record(store, slug).await.map(|r| r.tokens).unwrap_or_default()
}

#[tokio::test]
async fn test_free_removes_token() {
    let store = memory_store();
    let mutex = LeaseMutex::new("removeTest", config(&store)).unwrap();

    let handle = mutex.pending_claim().unwrap().await.unwrap();
    assert_eq!(record_tokens(&store, "removeTest").await.len(), 1);

    handle.free().unwrap().await.unwrap();
    assert!(record_tokens(&store, "removeTest").await.is_empty());
}

#[tokio::test]
async fn test_rejected_claims_leave_holder_token_untouched() {
    let store = memory_store();
    let holder = LeaseMutex::new("failRemoveTest", config(&store)).unwrap();
    let handle = holder.pending_claim().unwrap().await.unwrap();
    let holder_token = holder.own_token().unwrap().to_string();

    let contenders: Vec<LeaseMutex> = (0..3)
        .map(|_| LeaseMutex::new("failRemoveTest", config(&store)).unwrap())
        .collect();
    let results = join_all(contenders.iter().map(|m| m.pending_claim().unwrap())).await;

    for result in results {
        let err = result.unwrap_err();
        assert_eq!(
            err,
            MutexError::Contention {
                slug: "failRemoveTest".to_string()
            }
        );
    }
    assert!(contenders.iter().all(|m| m.is_idle()));
    assert_eq!(record_tokens(&store, "failRemoveTest").await, vec![holder_token]);

    handle.free().unwrap().await.unwrap();
}

#[tokio::test]
async fn test_expired_lease_is_collected_by_next_claim() {
    let store = memory_store();
    let abandoned = LeaseToken::new(42, Utc::now() - TimeDelta::seconds(5)).to_string();
    store.append_token("expiryTest", &abandoned).await.unwrap();

    let mutex = LeaseMutex::new("expiryTest", config(&store)).unwrap();
    let handle = mutex.pending_claim().unwrap().await.unwrap();

    let own = mutex.own_token().unwrap().to_string();
    assert_eq!(record_tokens(&store, "expiryTest").await, vec![own]);

    handle.free().unwrap().await.unwrap();
}

#[tokio::test]
async fn test_lease_expires_without_free() {
    let store = memory_store();
    let crashed = LeaseMutex::new(
        "crashTest",
        config(&store).with_lease_duration(Duration::from_millis(50)),
    )
    .unwrap();
    let _never_freed = crashed.pending_claim().unwrap().await.unwrap();

    let successor = LeaseMutex::new("crashTest", config(&store).with_idle(true)).unwrap();
    let err = successor.claim().unwrap().await.unwrap_err();
    assert!(err.is_contention());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let handle = successor.claim().unwrap().await.unwrap();
    assert_eq!(record_tokens(&store, "crashTest").await.len(), 1);
    handle.free().unwrap().await.unwrap();
}

#[tokio::test]
async fn test_rejection_leaves_stale_tokens_for_the_winner() {
    let store = memory_store();
    let stale = LeaseToken::new(7, Utc::now() - TimeDelta::seconds(5)).to_string();
    let live = LeaseToken::new(8, Utc::now() + TimeDelta::seconds(60)).to_string();
    store.append_token("staleTest", &stale).await.unwrap();
    store.append_token("staleTest", &live).await.unwrap();

    let mutex = LeaseMutex::new("staleTest", config(&store)).unwrap();
    let err = mutex.pending_claim().unwrap().await.unwrap_err();
    assert!(err.is_contention());

    assert_eq!(record_tokens(&store, "staleTest").await, vec![stale, live]);
}

#[tokio::test]
async fn test_malformed_token_blocks_claim() {
    let store = memory_store();
    store.append_token("foreignTest", "written-by-someone-else").await.unwrap();

    let mutex = LeaseMutex::new("foreignTest", config(&store)).unwrap();
    let err = mutex.pending_claim().unwrap().await.unwrap_err();
    assert!(err.is_contention());
    assert_eq!(
        record_tokens(&store, "foreignTest").await,
        vec!["written-by-someone-else".to_string()]
    );
}

#[tokio::test]
async fn test_idle_flag_lifecycle() {
    let store = memory_store();
    let mutex = LeaseMutex::new("idleTest", config(&store).with_idle(true)).unwrap();
    assert!(mutex.is_idle());

    let claim = mutex.claim().unwrap();
    assert!(!mutex.is_idle());

    let handle = claim.await.unwrap();
    assert!(!mutex.is_idle());

    let free = handle.free().unwrap();
    assert!(!mutex.is_idle());
    free.await.unwrap();
    assert!(mutex.is_idle());
}

#[tokio::test]
async fn test_eager_mutex_is_not_idle() {
    let store = memory_store();
    let mutex = LeaseMutex::new("eagerTest", config(&store)).unwrap();
    assert!(!mutex.is_idle());

    let handle = mutex.pending_claim().unwrap().await.unwrap();
    assert!(!mutex.is_idle());
    handle.free().unwrap().await.unwrap();
    assert!(mutex.is_idle());
}

#[tokio::test]
async fn test_misuse_errors_are_synchronous_and_side_effect_free() {
    let store = memory_store();
    let mutex = LeaseMutex::new("misuseTest", config(&store).with_idle(true)).unwrap();

    assert!(matches!(mutex.free(), Err(MutexError::Programming(_))));

    let handle = mutex.claim().unwrap().await.unwrap();
    let tokens = record_tokens(&store, "misuseTest").await;

    assert!(matches!(mutex.claim(), Err(MutexError::Programming(_))));
    assert_eq!(record_tokens(&store, "misuseTest").await, tokens);
    assert!(!mutex.is_idle());

    handle.free().unwrap().await.unwrap();
    assert!(matches!(handle.free(), Err(MutexError::Programming(_))));
}

#[test]
#[serial]
fn test_missing_store_is_config_error() {
    clear_default_store();
    let result = LeaseMutex::new("n/a", MutexConfig::default().with_idle(true));
    assert!(matches!(result, Err(MutexError::Config(_))));
}

#[tokio::test]
#[serial]
async fn test_process_default_store_is_used() {
    let store = memory_store();
    set_default_store(store.clone());

    let mutex = LeaseMutex::new("defaultStoreTest", MutexConfig::default()).unwrap();
    let handle = mutex.pending_claim().unwrap().await.unwrap();
    assert_eq!(record_tokens(&store, "defaultStoreTest").await.len(), 1);
    handle.free().unwrap().await.unwrap();

    clear_default_store();
}

/// Store that can be told to fail removals or appends.
struct FlakyStore {
    inner: MemoryLeaseStore,
    fail_append: AtomicBool,
    fail_remove: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryLeaseStore::new(),
            fail_append: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    async fn append_token(&self, slug: &str, token: &str) -> MutexResult<()> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(MutexError::Storage("append refused".to_string()));
        }
        self.inner.append_token(slug, token).await
    }

    async fn read_tokens(&self, slug: &str) -> MutexResult<Vec<String>> {
        self.inner.read_tokens(slug).await
    }

    async fn remove_tokens(&self, slug: &str, tokens: &[String]) -> MutexResult<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(MutexError::Storage("remove refused".to_string()));
        }
        self.inner.remove_tokens(slug, tokens).await
    }

    async fn get_record(&self, slug: &str) -> MutexResult<Option<LeaseRecord>> {
        self.inner.get_record(slug).await
    }
}

#[tokio::test]
async fn test_append_failure_is_storage_error_and_resets() {
    let flaky = Arc::new(FlakyStore::new());
    flaky.fail_append.store(true, Ordering::SeqCst);
    let store: Arc<dyn LeaseStore> = flaky.clone();

    let mutex = LeaseMutex::new("appendFailTest", config(&store)).unwrap();
    let err = mutex.pending_claim().unwrap().await.unwrap_err();
    assert!(err.is_storage());
    assert!(mutex.is_idle());

    flaky.fail_append.store(false, Ordering::SeqCst);
    let handle = mutex.claim().unwrap().await.unwrap();
    handle.free().unwrap().await.unwrap();
}

#[tokio::test]
async fn test_failed_free_still_resets_to_idle() {
    let flaky = Arc::new(FlakyStore::new());
    let store: Arc<dyn LeaseStore> = flaky.clone();

    let mutex = LeaseMutex::new("freeFailTest", config(&store)).unwrap();
    let handle = mutex.pending_claim().unwrap().await.unwrap();

    flaky.fail_remove.store(true, Ordering::SeqCst);
    let err = handle.free().unwrap().await.unwrap_err();
    assert!(err.is_storage());
    assert!(mutex.is_idle());
    assert_eq!(record_tokens(&store, "freeFailTest").await.len(), 1);
}

#[tokio::test]
async fn test_failed_cleanup_does_not_mask_contention() {
    let flaky = Arc::new(FlakyStore::new());
    let store: Arc<dyn LeaseStore> = flaky.clone();

    let holder = LeaseMutex::new("cleanupTest", config(&store)).unwrap();
    let _handle = holder.pending_claim().unwrap().await.unwrap();

    flaky.fail_remove.store(true, Ordering::SeqCst);
    let contender = LeaseMutex::new("cleanupTest", config(&store)).unwrap();
    let err = contender.pending_claim().unwrap().await.unwrap_err();
    assert!(err.is_contention());
    assert!(contender.is_idle());
}

/// Store whose reads never show appends: violates read-your-writes.
struct ForgetfulStore {
    inner: MemoryLeaseStore,
}

#[async_trait]
impl LeaseStore for ForgetfulStore {
    async fn append_token(&self, slug: &str, _token: &str) -> MutexResult<()> {
        self.inner
            .append_token(slug, &LeaseToken::new(0, Utc::now() - TimeDelta::seconds(1)).to_string())
            .await
    }

    async fn read_tokens(&self, slug: &str) -> MutexResult<Vec<String>> {
        self.inner.read_tokens(slug).await
    }

    async fn remove_tokens(&self, slug: &str, tokens: &[String]) -> MutexResult<()> {
        self.inner.remove_tokens(slug, tokens).await
    }

    async fn get_record(&self, slug: &str) -> MutexResult<Option<LeaseRecord>> {
        self.inner.get_record(slug).await
    }
}

#[tokio::test]
async fn test_stale_read_is_storage_error_not_acceptance() {
    let store: Arc<dyn LeaseStore> = Arc::new(ForgetfulStore {
        inner: MemoryLeaseStore::new(),
    });

    let mutex = LeaseMutex::new("staleReadTest", config(&store)).unwrap();
    let err = mutex.pending_claim().unwrap().await.unwrap_err();
    assert!(err.is_storage());
    assert!(err.to_string().contains("read-your-writes"));
    assert!(mutex.is_idle());
}
