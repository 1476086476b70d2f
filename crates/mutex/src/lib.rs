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

//! # PlexSpaces Lease Mutex
//!
//! ## Purpose
//! A try-once distributed mutex coordinated entirely through a shared record
//! store. Contenders race to append a uniquely-tokened, time-bounded lease to
//! the record for a named slug; exactly one contender at a time wins, and a
//! crashed holder's lease expires on its own.
//!
//! ## Protocol
//! 1. `claim()` issues a [`LeaseToken`] (`<nonce>-<expiresAtEpochMillis>`) and
//!    appends it to the slug's record.
//! 2. The record is read back and handed to the [`resolver`].
//! 3. Any other unexpired token means contention: the caller removes its own
//!    token and gets [`MutexError::Contention`].
//! 4. Otherwise the caller holds the lease and garbage-collects expired tokens.
//! 5. `free()` removes the caller's token.
//!
//! ## Design Decisions
//! - **No lock service**: mutual exclusion comes from the store's atomic
//!   append/remove primitives, never from in-process locking
//! - **Try-once**: no queueing, no internal retries; retry policy belongs to callers
//! - **Read-your-writes required**: a store that cannot show a process its own
//!   append fails the claim with [`MutexError::Storage`]
//! - **Clock assumption**: expiry comparisons assume roughly synchronised clocks
//!
//! ## Backend Support
//!
//! - **InMemory**: HashMap-based (always available)
//! - **SQLite**: Persistent, row per token (feature: `sqlite-backend`)
//! - **Redis**: List per slug (feature: `redis-backend`)
//!
//! ## Examples
//!
//! ```rust,no_run
//! use plexspaces_mutex::{LeaseMutex, MemoryLeaseStore, MutexConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! plexspaces_mutex::set_default_store(Arc::new(MemoryLeaseStore::new()));
//!
//! // Starts claiming immediately (idle = false is the default).
//! let mutex = LeaseMutex::new(
//!     "scheduler:background",
//!     MutexConfig::default().with_lease_duration(Duration::from_secs(30)),
//! )?;
//!
//! let handle = mutex.pending_claim().expect("claim in flight").await?;
//! // ... exclusive work ...
//! handle.free()?.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod mutex;
pub mod resolver;
pub mod store;
pub mod token;

#[cfg(feature = "sqlite-backend")]
pub mod sql;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use config::{
    clear_default_store, create_store_from_config, create_store_from_env, default_store,
    set_default_store, BackendType, MutexConfig, StoreConfig, DEFAULT_LEASE_DURATION,
};
pub use error::{MutexError, MutexResult};
pub use memory::MemoryLeaseStore;
pub use mutex::{ClaimFuture, FreeFuture, FreeHandle, LeaseMutex, MutexState};
pub use store::{LeaseRecord, LeaseStore};
pub use token::{InvalidToken, LeaseToken};
