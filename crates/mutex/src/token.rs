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

//! Lease tokens.
//!
//! A token is the claim marker a contender writes into a slug's record. Its
//! string form is `"<nonce>-<expiresAtEpochMillis>"`, e.g. `"83412-1735689600000"`.
//! The nonce only has to tell apart two tokens issued in the same millisecond;
//! collisions are possible and are handled by the resolver, not prevented here.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A string that does not follow the `<nonce>-<millis>` token layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid lease token '{token}': {reason}")]
pub struct InvalidToken {
    pub token: String,
    pub reason: &'static str,
}

/// Unique, time-bounded claim marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    nonce: u64,
    expires_at: DateTime<Utc>,
}

impl LeaseToken {
    /// Build a token from its parts. Expiry is truncated to millisecond precision
    /// so a token always equals its own decoded string form.
    pub fn new(nonce: u64, expires_at: DateTime<Utc>) -> Self {
        Self {
            nonce,
            expires_at: truncate_to_millis(expires_at),
        }
    }

    /// Issue a fresh token with a random nonce expiring `lease_duration` after `now`.
    pub fn issue(now: DateTime<Utc>, lease_duration: Duration) -> Self {
        let nonce = rand::thread_rng().gen::<u64>();
        let expires_at = TimeDelta::from_std(lease_duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(nonce, expires_at)
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// A token still counts as live throughout the millisecond of its expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < truncate_to_millis(now)
    }
}

pub(crate) fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.nonce, self.expires_at.timestamp_millis())
    }
}

impl FromStr for LeaseToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidToken {
            token: s.to_string(),
            reason,
        };

        let (nonce, millis) = s.split_once('-').ok_or_else(|| invalid("missing '-' separator"))?;
        let nonce = nonce.parse::<u64>().map_err(|_| invalid("nonce is not an unsigned integer"))?;
        let millis = millis.parse::<i64>().map_err(|_| invalid("expiry is not an integer"))?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| invalid("expiry out of range"))?;

        Ok(Self { nonce, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_sets_expiry_from_lease_duration() {
        let now = Utc::now();
        let token = LeaseToken::issue(now, Duration::from_millis(1000));

        let expected = (now + TimeDelta::milliseconds(1000)).timestamp_millis();
        assert_eq!(token.expires_at().timestamp_millis(), expected);
        assert!(token.expires_at() > now);
    }

    #[test]
    fn test_string_form() {
        let expires_at = DateTime::<Utc>::from_timestamp_millis(1_735_689_600_123).unwrap();
        let token = LeaseToken::new(83412, expires_at);

        assert_eq!(token.to_string(), "83412-1735689600123");
        assert_eq!("83412-1735689600123".parse::<LeaseToken>().unwrap(), token);
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let now = Utc::now();
        let token = LeaseToken::issue(now, Duration::from_secs(15));
        let decoded: LeaseToken = token.to_string().parse().unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for bad in ["", "12345", "abc-1735689600000", "12345-soon", "-1735689600000", "12345-"] {
            let err = bad.parse::<LeaseToken>().unwrap_err();
            assert_eq!(err.token, bad);
        }
    }

    #[test]
    fn test_expiry_boundary_is_live() {
        let expires_at = DateTime::<Utc>::from_timestamp_millis(1_000).unwrap();
        let token = LeaseToken::new(1, expires_at);

        assert!(!token.is_expired_at(expires_at));
        assert!(token.is_expired_at(expires_at + TimeDelta::milliseconds(1)));
        assert!(!token.is_expired_at(expires_at - TimeDelta::milliseconds(1)));
        assert!(!token.is_expired_at(expires_at + TimeDelta::microseconds(999)));
    }

    #[test]
    fn test_issued_nonces_differ() {
        let now = Utc::now();
        let a = LeaseToken::issue(now, Duration::from_secs(15));
        let b = LeaseToken::issue(now, Duration::from_secs(15));
        // Probabilistic: a 64-bit collision here would be astronomically unlikely.
        assert_ne!(a, b);
    }
}
