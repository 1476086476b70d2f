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

//! Lease mutex state machine.
//!
//! ## Lifecycle
//! ```text
//!   Idle --claim()--> Claimed --free()--> Idle
//!                        |
//!                        +--(claim rejected or failed)--> Idle
//! ```
//!
//! `claim()` flips the mutex to `Claimed` before any I/O starts, then spawns
//! the append/read/resolve round-trip onto the ambient tokio runtime. The work
//! always runs to settlement, even if the returned future is dropped. `free()`
//! chains on the in-flight claim instead of racing it.

use crate::config::MutexConfig;
use crate::resolver::{resolve, ResolveError, Verdict};
use crate::store::LeaseStore;
use crate::token::{truncate_to_millis, LeaseToken};
use crate::{MutexError, MutexResult};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Future returned by [`LeaseMutex::claim`].
pub type ClaimFuture = BoxFuture<'static, MutexResult<FreeHandle>>;

/// Future returned by [`LeaseMutex::free`].
pub type FreeFuture = BoxFuture<'static, MutexResult<()>>;

type PendingClaim = Shared<BoxFuture<'static, MutexResult<()>>>;

/// Lifecycle state of a [`LeaseMutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    Idle,
    Claimed,
}

struct State {
    phase: MutexState,
    // Bumped on every claim so a late free continuation cannot reset a newer claim.
    epoch: u64,
    own_token: Option<LeaseToken>,
    pending: Option<PendingClaim>,
}

struct Inner {
    slug: String,
    lease_duration: Duration,
    store: Arc<dyn LeaseStore>,
    state: Mutex<State>,
}

/// Distributed try-once mutex over a named slug.
///
/// Cheap to clone; clones share one state machine. Independent instances on
/// the same slug, in this process or others, coordinate only through the
/// store's record for that slug.
///
/// ## Example
/// ```rust,no_run
/// use plexspaces_mutex::{LeaseMutex, MemoryLeaseStore, MutexConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MutexConfig::default()
///     .with_store(Arc::new(MemoryLeaseStore::new()))
///     .with_idle(true);
/// let mutex = LeaseMutex::new("nightly-report", config)?;
///
/// match mutex.claim()?.await {
///     Ok(handle) => {
///         // ... exclusive work ...
///         handle.free()?.await?;
///     }
///     Err(e) if e.is_contention() => { /* someone else holds it; retry later */ }
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LeaseMutex {
    inner: Arc<Inner>,
}

/// Capability to release a successful claim, bound to the mutex that made it.
#[derive(Clone, Debug)]
pub struct FreeHandle {
    mutex: LeaseMutex,
}

impl FreeHandle {
    /// Release the lease. Same contract as [`LeaseMutex::free`].
    pub fn free(&self) -> MutexResult<FreeFuture> {
        self.mutex.free()
    }

    pub fn mutex(&self) -> &LeaseMutex {
        &self.mutex
    }
}

impl LeaseMutex {
    /// Create a mutex for `slug`.
    ///
    /// ## Errors
    /// - `MutexError::Config`: empty slug, no store (explicit or process
    ///   default), or `idle == false` outside a tokio runtime
    ///
    /// With `idle == false` a claim is started before returning; observe it
    /// through [`pending_claim`](Self::pending_claim).
    pub fn new(slug: impl Into<String>, config: MutexConfig) -> MutexResult<Self> {
        let slug = slug.into();
        if slug.is_empty() {
            return Err(MutexError::Config(
                "A non-empty slug must be provided".to_string(),
            ));
        }
        let store = config.resolve_store()?;

        let mutex = Self {
            inner: Arc::new(Inner {
                slug,
                lease_duration: config.lease_duration,
                store,
                state: Mutex::new(State {
                    phase: MutexState::Idle,
                    epoch: 0,
                    own_token: None,
                    pending: None,
                }),
            }),
        };

        if !config.idle {
            if Handle::try_current().is_err() {
                return Err(MutexError::Config(
                    "idle = false requires a running tokio runtime".to_string(),
                ));
            }
            // Dropping the future does not cancel the claim; callers observe it
            // through `pending_claim()`.
            let _ = mutex.claim()?;
        }

        Ok(mutex)
    }

    pub fn slug(&self) -> &str {
        &self.inner.slug
    }

    pub fn lease_duration(&self) -> Duration {
        self.inner.lease_duration
    }

    pub fn state(&self) -> MutexState {
        self.inner.lock_state().phase
    }

    /// True when no claim is outstanding or held.
    pub fn is_idle(&self) -> bool {
        self.state() == MutexState::Idle
    }

    /// Token written by the current claim, if any.
    pub fn own_token(&self) -> Option<LeaseToken> {
        self.inner.lock_state().own_token
    }

    /// The outstanding claim, if the mutex is claimed.
    pub fn pending_claim(&self) -> Option<ClaimFuture> {
        let pending = self.inner.lock_state().pending.clone();
        pending.map(|p| self.bind_claim(p))
    }

    /// Try once to take the lease.
    ///
    /// ## Errors (synchronous)
    /// - `MutexError::Programming`: not idle, or no tokio runtime
    ///
    /// ## Future
    /// - `Ok(FreeHandle)`: lease held
    /// - `Err(MutexError::Contention)`: another live lease holds the slug
    /// - `Err(MutexError::Storage)`: store failure or inconsistency
    ///
    /// On any error the mutex is back to idle before the future settles.
    pub fn claim(&self) -> MutexResult<ClaimFuture> {
        let runtime = Handle::try_current().map_err(|_| {
            MutexError::Programming("claim requires a tokio runtime".to_string())
        })?;

        let mut state = self.inner.lock_state();
        if state.phase != MutexState::Idle {
            return Err(MutexError::Programming(
                "cannot claim when not idle".to_string(),
            ));
        }

        let issued_at = truncate_to_millis(Utc::now());
        let token = LeaseToken::issue(issued_at, self.inner.lease_duration);
        state.phase = MutexState::Claimed;
        state.epoch += 1;
        state.own_token = Some(token);
        let epoch = state.epoch;

        let inner = self.inner.clone();
        let task = runtime.spawn(async move { inner.run_claim(epoch, token, issued_at).await });
        let pending = settle(task).boxed().shared();
        state.pending = Some(pending.clone());
        drop(state);

        Ok(self.bind_claim(pending))
    }

    /// Release the lease.
    ///
    /// ## Errors (synchronous)
    /// - `MutexError::Programming`: the mutex is idle, or no tokio runtime
    ///
    /// ## Future
    /// Waits for the outstanding claim first. If that claim did not succeed
    /// there is nothing to release and the future fails with the claim's
    /// error; the mutex is already idle by then. Otherwise the own token is
    /// removed; a store failure surfaces as `MutexError::Storage`, but the
    /// mutex is idle again either way.
    pub fn free(&self) -> MutexResult<FreeFuture> {
        let runtime = Handle::try_current().map_err(|_| {
            MutexError::Programming("free requires a tokio runtime".to_string())
        })?;

        let state = self.inner.lock_state();
        if state.phase == MutexState::Idle {
            return Err(MutexError::Programming(
                "cannot free idle mutex".to_string(),
            ));
        }
        let epoch = state.epoch;
        let pending = state.pending.clone();
        drop(state);

        let inner = self.inner.clone();
        let task = runtime.spawn(async move { inner.run_free(epoch, pending).await });
        Ok(settle(task).boxed())
    }

    fn bind_claim(&self, pending: PendingClaim) -> ClaimFuture {
        let handle = FreeHandle {
            mutex: self.clone(),
        };
        async move { pending.await.map(|()| handle) }.boxed()
    }
}

impl fmt::Debug for LeaseMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseMutex")
            .field("slug", &self.inner.slug)
            .field("lease_duration", &self.inner.lease_duration)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return to idle, unless a newer claim has started since `epoch`.
    fn reset_if_current(&self, epoch: u64) {
        let mut state = self.lock_state();
        if state.epoch == epoch && state.phase == MutexState::Claimed {
            state.phase = MutexState::Idle;
            state.own_token = None;
            state.pending = None;
        }
    }

    async fn run_claim(
        &self,
        epoch: u64,
        token: LeaseToken,
        issued_at: DateTime<Utc>,
    ) -> MutexResult<()> {
        let start = Instant::now();
        let result = self.contend(&token, issued_at).await;

        let outcome = match &result {
            Ok(()) => "accepted",
            Err(MutexError::Contention { .. }) => "contended",
            Err(_) => "storage_error",
        };
        metrics::counter!("plexspaces_mutex_claims_total", "outcome" => outcome).increment(1);
        metrics::histogram!("plexspaces_mutex_claim_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        if result.is_err() {
            self.reset_if_current(epoch);
        }
        result
    }

    /// Append, read back, resolve, apply the removal set.
    #[instrument(skip(self, token, issued_at), fields(slug = %self.slug, token = %token))]
    async fn contend(&self, token: &LeaseToken, issued_at: DateTime<Utc>) -> MutexResult<()> {
        let own = token.to_string();
        self.store.append_token(&self.slug, &own).await?;

        let tokens = match self.store.read_tokens(&self.slug).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.discard_own_token(&own).await;
                return Err(e);
            }
        };

        let resolution = match resolve(&tokens, token, issued_at) {
            Ok(resolution) => resolution,
            Err(ResolveError::OwnTokenMissing) => {
                self.discard_own_token(&own).await;
                return Err(MutexError::Storage(format!(
                    "lease token for '{}' not visible right after append; the store must provide read-your-writes",
                    self.slug
                )));
            }
        };

        match resolution.verdict {
            Verdict::Accept => {
                if !resolution.remove.is_empty() {
                    match self.store.remove_tokens(&self.slug, &resolution.remove).await {
                        Ok(()) => {
                            metrics::counter!("plexspaces_mutex_stale_tokens_collected_total")
                                .increment(resolution.remove.len() as u64);
                            debug!(collected = resolution.remove.len(), "Collected stale lease tokens");
                        }
                        Err(e) => warn!(error = %e, "Failed to collect stale lease tokens"),
                    }
                }
                debug!(competitors = tokens.len() - 1, "Mutual exclusion acquired");
                Ok(())
            }
            Verdict::Reject => {
                if let Err(e) = self.store.remove_tokens(&self.slug, &resolution.remove).await {
                    warn!(error = %e, "Failed to remove own lease token after contention");
                }
                debug!(competitors = tokens.len() - 1, "Mutual exclusion contended");
                Err(MutexError::Contention {
                    slug: self.slug.clone(),
                })
            }
        }
    }

    /// Best-effort removal of this claim's token; failures are logged only.
    async fn discard_own_token(&self, own: &str) {
        if let Err(e) = self.store.remove_tokens(&self.slug, &[own.to_string()]).await {
            warn!(slug = %self.slug, error = %e, "Failed to discard own lease token");
        }
    }

    #[instrument(skip(self, pending), fields(slug = %self.slug))]
    async fn run_free(&self, epoch: u64, pending: Option<PendingClaim>) -> MutexResult<()> {
        if let Some(pending) = pending {
            if let Err(e) = pending.await {
                debug!(error = %e, "Claim did not succeed, nothing to free");
                return Err(e);
            }
        }

        let own_token = {
            let state = self.lock_state();
            if state.epoch != epoch {
                return Ok(());
            }
            state.own_token
        };

        let result = match own_token {
            Some(token) => {
                self.store
                    .remove_tokens(&self.slug, &[token.to_string()])
                    .await
            }
            None => Ok(()),
        };
        self.reset_if_current(epoch);

        let outcome = if result.is_ok() { "released" } else { "storage_error" };
        metrics::counter!("plexspaces_mutex_frees_total", "outcome" => outcome).increment(1);
        if let Err(e) = &result {
            warn!(error = %e, "Failed to remove lease token on free");
        }
        result
    }
}

async fn settle<T>(task: JoinHandle<MutexResult<T>>) -> MutexResult<T> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(MutexError::Storage(format!("mutex task failed: {e}"))),
    }
}
