//! Spread Tracking and Alert Decisions
//!
//! Decides, across polling cycles, when a spread has been open long enough
//! to report and suppresses repeat reports for the same exchange pair.
//!
//! # Cycle
//!
//! ```text
//! batch ──► merge ──► older_than(now) ──► minus cooldown ──► ready_to_send
//!                                                               │
//!                       mark_alerted(batch, now) ◄── dispatch ◄─┘
//! ```
//!
//! - `merge` keeps the earliest `sell_to_ts` seen per key; an entry already
//!   tracked is never overwritten.
//! - A tracked spread is *older than* the window when
//!   `open_for <= now - first_seen < dont_email_newer_than`.
//! - Alerted keys stay in cooldown while `0 <= now - alerted_at <
//!   dont_email_newer_than`.
//! - After an alert the tracking map is reset, fully by default.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::spread::{Spread, SpreadKey};

// =============================================================================
// Configuration
// =============================================================================

/// What to forget after an alert has been dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingReset {
    /// Clear every tracked spread, including ones that were not reported.
    #[default]
    All,
    /// Forget only the spreads that were just reported.
    AlertedOnly,
}

impl TrackingReset {
    /// Parse from a configuration string (`all` | `alerted`).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alerted" | "alerted_only" | "per_key" => Self::AlertedOnly,
            _ => Self::All,
        }
    }

    /// Configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::AlertedOnly => "alerted",
        }
    }
}

/// Age window a spread must fall in to be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingWindow {
    open_for: TimeDelta,
    dont_email_newer_than: TimeDelta,
    reset: TrackingReset,
}

impl TrackingWindow {
    /// Build a window.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::InvalidWindow`] unless
    /// `open_for < dont_email_newer_than`, and
    /// [`TrackingError::OutOfRange`] if either duration does not fit.
    pub fn new(
        open_for: Duration,
        dont_email_newer_than: Duration,
        reset: TrackingReset,
    ) -> Result<Self, TrackingError> {
        let open = TimeDelta::from_std(open_for).map_err(|_| TrackingError::OutOfRange)?;
        let cooldown =
            TimeDelta::from_std(dont_email_newer_than).map_err(|_| TrackingError::OutOfRange)?;
        if open >= cooldown {
            return Err(TrackingError::InvalidWindow {
                open_for,
                dont_email_newer_than,
            });
        }
        Ok(Self {
            open_for: open,
            dont_email_newer_than: cooldown,
            reset,
        })
    }

    /// Minimum age before a spread is reported.
    #[must_use]
    pub const fn open_for(&self) -> TimeDelta {
        self.open_for
    }

    /// Upper age bound and cooldown length.
    #[must_use]
    pub const fn dont_email_newer_than(&self) -> TimeDelta {
        self.dont_email_newer_than
    }

    /// Reset strategy.
    #[must_use]
    pub const fn reset(&self) -> TrackingReset {
        self.reset
    }
}

/// Tracking configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    /// `open_for` must be strictly shorter than `dont_email_newer_than`.
    #[error("open_for ({open_for:?}) must be shorter than dont_email_newer_than ({dont_email_newer_than:?})")]
    InvalidWindow {
        /// Configured minimum age.
        open_for: Duration,
        /// Configured cooldown.
        dont_email_newer_than: Duration,
    },
    /// Duration too large to represent.
    #[error("tracking duration out of range")]
    OutOfRange,
}

// =============================================================================
// Entries
// =============================================================================

/// A spread under observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSpread {
    /// Earliest `sell_to_ts` seen since the map was last reset.
    pub first_seen_candidate: DateTime<Utc>,
    /// Spread as first seen.
    pub spread: Spread,
}

/// Keys ready to be reported, in deterministic order.
pub type AlertBatch = BTreeMap<SpreadKey, Spread>;

// =============================================================================
// Tracker
// =============================================================================

/// Owns the tracking map and the cooldown map.
///
/// All mutation goes through [`merge`](Self::merge),
/// [`prune_cooldowns`](Self::prune_cooldowns) and
/// [`mark_alerted`](Self::mark_alerted).
#[derive(Debug)]
pub struct SpreadTracker {
    window: TrackingWindow,
    tracked: HashMap<SpreadKey, TrackedSpread>,
    last_alerted_at: HashMap<SpreadKey, DateTime<Utc>>,
}

impl SpreadTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(window: TrackingWindow) -> Self {
        Self {
            window,
            tracked: HashMap::new(),
            last_alerted_at: HashMap::new(),
        }
    }

    /// Tracking window in use.
    #[must_use]
    pub const fn window(&self) -> &TrackingWindow {
        &self.window
    }

    /// Merge a freshly queried batch.
    ///
    /// Within the batch the earliest `sell_to_ts` per key wins; against the
    /// map, existing entries win. Merging the same batch twice is the same
    /// as merging it once.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = Spread>) {
        let mut earliest: HashMap<SpreadKey, Spread> = HashMap::new();
        for spread in batch {
            match earliest.get(&spread.key) {
                Some(current) if current.sell_to_ts <= spread.sell_to_ts => {}
                _ => {
                    earliest.insert(spread.key.clone(), spread);
                }
            }
        }

        for (key, spread) in earliest {
            self.tracked.entry(key).or_insert_with(|| TrackedSpread {
                first_seen_candidate: spread.sell_to_ts,
                spread,
            });
        }
    }

    /// Tracked spreads whose age lies in `[open_for, dont_email_newer_than)`.
    #[must_use]
    pub fn older_than(&self, now: DateTime<Utc>) -> Vec<&TrackedSpread> {
        self.tracked
            .values()
            .filter(|entry| {
                let age = now - entry.first_seen_candidate;
                age >= self.window.open_for && age < self.window.dont_email_newer_than
            })
            .collect()
    }

    /// Drop cooldown entries whose alert is outside `[0, dont_email_newer_than)`.
    pub fn prune_cooldowns(&mut self, now: DateTime<Utc>) {
        let cooldown = self.window.dont_email_newer_than;
        self.last_alerted_at.retain(|_, alerted_at| {
            let age = now - *alerted_at;
            age >= TimeDelta::zero() && age < cooldown
        });
    }

    /// Whether a key is currently suppressed.
    #[must_use]
    pub fn in_cooldown(&self, key: &SpreadKey) -> bool {
        self.last_alerted_at.contains_key(key)
    }

    /// Prune cooldowns, then collect spreads old enough and not suppressed.
    pub fn ready_to_send(&mut self, now: DateTime<Utc>) -> AlertBatch {
        self.prune_cooldowns(now);
        self.older_than(now)
            .into_iter()
            .filter(|entry| !self.in_cooldown(&entry.spread.key))
            .map(|entry| (entry.spread.key.clone(), entry.spread.clone()))
            .collect()
    }

    /// Record that a batch was dispatched at `now` and reset tracking.
    pub fn mark_alerted(&mut self, batch: &AlertBatch, now: DateTime<Utc>) {
        for key in batch.keys() {
            self.last_alerted_at.insert(key.clone(), now);
        }
        match self.window.reset {
            TrackingReset::All => self.tracked.clear(),
            TrackingReset::AlertedOnly => {
                for key in batch.keys() {
                    self.tracked.remove(key);
                }
            }
        }
    }

    /// Lookup a tracked entry.
    #[must_use]
    pub fn tracked(&self, key: &SpreadKey) -> Option<&TrackedSpread> {
        self.tracked.get(key)
    }

    /// Number of tracked spreads.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Number of keys in cooldown.
    #[must_use]
    pub fn cooldown_len(&self) -> usize {
        self.last_alerted_at.len()
    }
}
