//! Per-parameter manual-override bookkeeping.
//!
//! A manual edit made while audio modulation runs gives the user ownership of that
//! parameter for [`OVERRIDE_WINDOW`]. Ownership is an expiry timestamp checked against
//! the caller's monotonic clock, so an expired record reads as "not overridden" without
//! anyone having to clear it.

use crate::params::ParamKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

pub const OVERRIDE_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
pub struct OverrideArbiter {
    expiry: HashMap<ParamKey, Instant>,
}

impl OverrideArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arms the override window for `key`. Any earlier expiry for the same key is
    /// replaced, so at most one deadline per key is ever pending.
    pub fn mark_overridden(&mut self, key: ParamKey, now: Instant) {
        self.expiry.insert(key, now + OVERRIDE_WINDOW);
    }

    pub fn is_overridden(&self, key: ParamKey, now: Instant) -> bool {
        self.expiry.get(&key).is_some_and(|deadline| now < *deadline)
    }

    pub fn any_overridden(&self, keys: &[ParamKey], now: Instant) -> bool {
        keys.iter().any(|k| self.is_overridden(*k, now))
    }

    /// Time left on the override for `key`, if any.
    pub fn remaining(&self, key: ParamKey, now: Instant) -> Option<Duration> {
        let deadline = self.expiry.get(&key)?;
        let left = deadline.saturating_duration_since(now);
        (!left.is_zero()).then_some(left)
    }

    /// Drops records whose window has elapsed. Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.expiry.len();
        self.expiry.retain(|_, deadline| now < *deadline);
        before - self.expiry.len()
    }

    /// Cancels every pending expiry. Used when modulation stops or the audio source goes
    /// away; nothing armed before this call can report overridden afterwards.
    pub fn clear_all(&mut self) {
        if !self.expiry.is_empty() {
            debug!(count = self.expiry.len(), "clearing manual overrides");
        }
        self.expiry.clear();
    }

    pub fn pending(&self) -> usize {
        self.expiry.len()
    }
}
