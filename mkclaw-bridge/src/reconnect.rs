// ABOUTME: Exponential backoff for respawning the stream process after it exits.
// ABOUTME: 2s, 4s, 8s... capped at 60s, no jitter; resets once the stream is healthy again.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for stream respawns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first respawn
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: u32,
    /// Give up after this many consecutive attempts (0 = never)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            max_attempts: 0,
        }
    }
}

/// Attempt counter and the delay the next attempt will wait
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt_count: u32,
    pending_delay: Duration,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let pending_delay = policy.initial_delay;
        Self {
            policy,
            attempt_count: 0,
            pending_delay,
        }
    }

    /// Claim the next attempt: returns its number and how long to wait first,
    /// or None when `max_attempts` is used up.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.policy.max_attempts > 0 && self.attempt_count >= self.policy.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.pending_delay;
        self.pending_delay = self
            .pending_delay
            .saturating_mul(self.policy.multiplier.max(1))
            .min(self.policy.max_delay);

        Some((self.attempt_count, delay))
    }

    /// The stream is healthy again; start over from the initial delay
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.pending_delay = self.policy.initial_delay;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn pending_delay(&self) -> Duration {
        self.pending_delay
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
