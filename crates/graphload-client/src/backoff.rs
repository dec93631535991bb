//! Exponential backoff with randomization.
//!
//! Delays are a pure function of `(policy, attempt, seed)` so retry timing is
//! reproducible in tests; [`Backoff`] only carries the attempt counter and a
//! per-schedule seed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shape of a backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry, before randomization.
    pub initial_interval: Duration,
    /// Cap on the un-randomized delay.
    pub max_interval: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Delays are spread over `[d * (1 - f), d * (1 + f)]`.
    pub randomization_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}

impl BackoffPolicy {
    pub fn with_initial_interval(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32, seed: u64) -> Duration {
        backoff_delay(self, attempt, seed)
    }
}

/// Compute the randomized delay for `attempt` under `policy`.
pub fn backoff_delay(policy: &BackoffPolicy, attempt: u32, seed: u64) -> Duration {
    if policy.initial_interval.is_zero() {
        return Duration::ZERO;
    }

    let initial = policy.initial_interval.as_secs_f64();
    let max = policy.max_interval.as_secs_f64().max(initial);
    let grown = initial * policy.multiplier.max(1.0).powi(attempt.min(128) as i32);
    let base = if grown.is_finite() { grown.min(max) } else { max };

    let factor = policy.randomization_factor.clamp(0.0, 1.0);
    let unit = unit_interval(seed, attempt);
    let delay = base * (1.0 - factor + 2.0 * factor * unit);

    Duration::from_secs_f64(delay.max(0.0))
}

/// Deterministic value in `[0, 1)` derived from `(seed, attempt)`.
fn unit_interval(seed: u64, attempt: u32) -> f64 {
    let mixed = splitmix64(seed ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One running backoff schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    seed: u64,
    attempt: u32,
}

impl Backoff {
    /// New schedule with a random seed, so concurrent workers don't retry in lockstep.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_seed(policy, random_seed())
    }

    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self {
            policy,
            seed,
            attempt: 0,
        }
    }

    /// Delay to sleep before the next retry; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = backoff_delay(&self.policy, self.attempt, self.seed);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn random_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
            randomization_factor: 0.5,
        }
    }

    #[test]
    fn policy_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(30));
        assert_eq!(policy.multiplier, 1.5);
        assert_eq!(policy.randomization_factor, 0.5);
    }

    #[test]
    fn same_inputs_same_delay() {
        let p = policy();
        for attempt in 0..10 {
            assert_eq!(p.delay(attempt, 42), p.delay(attempt, 42));
        }
    }

    #[test]
    fn different_seeds_spread_delays() {
        let p = policy();
        let delays: std::collections::HashSet<Duration> =
            (0..16u64).map(|seed| p.delay(3, seed)).collect();
        assert!(delays.len() > 1, "jitter should vary with the seed");
    }

    #[test]
    fn delay_stays_inside_randomization_window() {
        let p = policy();
        for seed in 0..64u64 {
            for attempt in 0..12 {
                let base = (0.1 * 2f64.powi(attempt as i32)).min(2.0);
                let delay = p.delay(attempt, seed).as_secs_f64();
                assert!(delay >= base * 0.5 - 1e-9, "attempt {attempt}: {delay} < {}", base * 0.5);
                assert!(delay <= base * 1.5 + 1e-9, "attempt {attempt}: {delay} > {}", base * 1.5);
            }
        }
    }

    #[test]
    fn delay_never_exceeds_randomized_max() {
        let p = policy();
        for seed in 0..32u64 {
            assert!(p.delay(u32::MAX, seed) <= Duration::from_secs(3));
        }
    }

    #[test]
    fn no_randomization_is_exact() {
        let p = BackoffPolicy {
            randomization_factor: 0.0,
            ..policy()
        };
        assert_eq!(p.delay(0, 7), Duration::from_millis(100));
        assert_eq!(p.delay(1, 7), Duration::from_millis(200));
        assert_eq!(p.delay(2, 7), Duration::from_millis(400));
        assert_eq!(p.delay(10, 7), Duration::from_secs(2));
    }

    #[test]
    fn zero_initial_interval_never_sleeps() {
        let p = BackoffPolicy::with_initial_interval(Duration::ZERO);
        assert_eq!(p.delay(0, 1), Duration::ZERO);
        assert_eq!(p.delay(50, 1), Duration::ZERO);
    }

    #[test]
    fn schedule_advances_and_resets() {
        let p = BackoffPolicy {
            randomization_factor: 0.0,
            ..policy()
        };
        let mut backoff = Backoff::with_seed(p, 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
