//! Single-use challenge storage
//!
//! Challenges are short-lived and held in memory. Each one may be consumed
//! exactly once before it expires; consumed entries stay in the map until the
//! periodic sweep removes them so a replay reports `AlreadyConsumed` rather than
//! `NotFound`. The store holds at most `capacity` entries; once full, expired
//! entries are purged and issuance fails if that frees nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};

use crate::clock::{add_saturating, to_delta, Clock};
use crate::error::ChallengeError;

/// Default upper bound on outstanding challenges.
pub const DEFAULT_CHALLENGE_CAPACITY: usize = 100_000;

/// Random draws per issuance before giving up on finding an unused value.
const MAX_ISSUE_ATTEMPTS: usize = 16;

/// A freshly issued challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge {
    value: Vec<u8>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Base64url without padding, the form handed to clients.
    pub fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.value)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Challenge")
            .field("length", &self.value.len())
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct ChallengeEntry {
    expires_at: DateTime<Utc>,
    consumed: AtomicBool,
}

/// In-memory store of outstanding challenges.
pub struct ChallengeStore {
    entries: DashMap<Vec<u8>, ChallengeEntry>,
    length: usize,
    validity: TimeDelta,
    capacity: usize,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl ChallengeStore {
    /// Create a store issuing `length`-byte challenges valid for `validity`.
    pub fn new(length: usize, validity: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            length,
            validity: to_delta(validity),
            capacity: DEFAULT_CHALLENGE_CAPACITY,
            clock,
            rng: SystemRandom::new(),
        }
    }

    /// Caps the number of entries held at once.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Issue a challenge with the configured length and validity.
    pub fn issue(&self) -> Result<Challenge, ChallengeError> {
        self.issue_with(self.length, self.validity)
    }

    /// Issue a challenge with explicit parameters.
    ///
    /// Fails with `StoreFull` when the store is at capacity after purging, or
    /// when no unused value turns up within a bounded number of draws.
    pub fn issue_with(&self, length: usize, validity: TimeDelta) -> Result<Challenge, ChallengeError> {
        if self.entries.len() >= self.capacity {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                tracing::warn!(capacity = self.capacity, "Challenge store full");
                return Err(ChallengeError::StoreFull);
            }
        }

        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let mut value = vec![0u8; length];
            self.rng
                .fill(&mut value)
                .map_err(|_| ChallengeError::RandomnessUnavailable)?;

            let issued_at = self.clock.now();
            let expires_at = add_saturating(issued_at, validity);

            // An existing entry is never overwritten.
            if let Entry::Vacant(slot) = self.entries.entry(value.clone()) {
                slot.insert(ChallengeEntry {
                    expires_at,
                    consumed: AtomicBool::new(false),
                });
                tracing::debug!(length, expires_at = %expires_at, "Issued challenge");
                return Ok(Challenge {
                    value,
                    issued_at,
                    expires_at,
                });
            }
        }

        tracing::warn!(length, attempts = MAX_ISSUE_ATTEMPTS, "No unused challenge value found");
        Err(ChallengeError::StoreFull)
    }

    /// Atomically mark a challenge as used.
    ///
    /// Checks run in order: unknown value, expiry, prior consumption. Of any
    /// number of concurrent callers with the same value, at most one succeeds.
    pub fn consume(&self, value: &[u8]) -> Result<(), ChallengeError> {
        let entry = self.entries.get(value).ok_or(ChallengeError::NotFound)?;
        if self.clock.now() > entry.expires_at {
            return Err(ChallengeError::Expired);
        }
        entry
            .consumed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ChallengeError::AlreadyConsumed)
    }

    /// Drop every expired entry, consumed or not. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at >= now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired challenges");
        }
        removed
    }

    /// Number of entries currently held, including consumed ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("entries", &self.entries.len())
            .field("length", &self.length)
            .field("validity", &self.validity)
            .field("capacity", &self.capacity)
            .finish()
    }
}
