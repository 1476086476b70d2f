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

//! Contention resolution.
//!
//! Pure decision logic run after a contender has appended its own token and
//! read the slug's record back. No I/O; time is an explicit parameter.
//!
//! ## Rules
//! - The first occurrence of the caller's own token string is "self"; every
//!   other entry is an "other", including further copies of the caller's own
//!   string (a nonce collision with another contender).
//! - Any other that is not yet expired (`expires_at >= now`) forces [`Verdict::Reject`].
//! - Others that do not parse as tokens are treated as live strangers. Their
//!   expiry is unknown, so they force a reject and are never garbage collected.
//! - On reject only the caller's own token is removed. Stale others are left for
//!   a winner to collect, since their writers may still be resolving.
//! - On accept every expired other is removed; the caller's own token stays.
//!
//! The verdict does not depend on scan order and the removal set is derived
//! from the final verdict only.

use crate::token::LeaseToken;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Verdict plus the token strings that must be removed from the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,
    pub remove: Vec<String>,
}

/// Errors the resolver reports instead of a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The caller's own token is missing from the record it just appended to.
    OwnTokenMissing,
}

/// Decide a claim given the full token multiset read back from the store.
pub fn resolve(
    tokens: &[String],
    own: &LeaseToken,
    now: DateTime<Utc>,
) -> Result<Resolution, ResolveError> {
    let own_str = own.to_string();
    let mut seen_self = false;
    let mut contended = false;
    let mut expired = Vec::new();

    for entry in tokens {
        if !seen_self && *entry == own_str {
            seen_self = true;
            continue;
        }

        match entry.parse::<LeaseToken>() {
            Ok(other) if other.is_expired_at(now) => expired.push(entry.clone()),
            Ok(_) => contended = true,
            Err(e) => {
                warn!(token = %entry, error = %e, "Unparseable lease token treated as live");
                contended = true;
            }
        }
    }

    if !seen_self {
        return Err(ResolveError::OwnTokenMissing);
    }

    if contended {
        return Ok(Resolution {
            verdict: Verdict::Reject,
            remove: vec![own_str],
        });
    }

    expired.sort();
    expired.dedup();
    Ok(Resolution {
        verdict: Verdict::Accept,
        remove: expired,
    })
}
