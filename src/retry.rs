//! Delay policy for the reconnect loop

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay between open attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Delay between failed open attempts.
///
/// No variant carries an attempt budget: the reconnect loop retries until
/// the device comes back or shutdown is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay after every failure
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Doubling delay, capped at `max`
    Exponential {
        #[serde(with = "millis")]
        initial: Duration,
        #[serde(with = "millis")]
        max: Duration,
    },
}

impl RetryPolicy {
    pub const fn fixed(delay: Duration) -> Self {
        RetryPolicy::Fixed { delay }
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay_after(&self, failures: u64) -> Duration {
        match *self {
            RetryPolicy::Fixed { delay } => delay,
            RetryPolicy::Exponential { initial, max } => {
                let shift = failures.saturating_sub(1).min(16) as u32;
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::fixed(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
