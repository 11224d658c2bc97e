use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const MIN_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    #[default]
    None,
    Equal,
    Full,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrySettings {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: JitterMode,
}

impl RetrySettings {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.max(MIN_DELAY);
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.clamp(1.1, 10.0),
            jitter: JitterMode::None,
        }
    }

    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter(&self) -> JitterMode {
        self.jitter
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(30), 2.0)
    }
}

/// Exponential backoff between reconcile attempts.
#[derive(Debug)]
pub struct RetryBackoff {
    policy: RetrySettings,
    current: Duration,
    failures: u32,
}

impl RetryBackoff {
    pub fn new(policy: RetrySettings) -> Self {
        let current = policy.initial;
        Self {
            policy,
            current,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn on_success(&mut self) {
        self.current = self.policy.initial;
        self.failures = 0;
    }

    /// Returns the delay before the next attempt and advances the schedule.
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.current.max(MIN_DELAY);
        let next = (delay.as_millis() as f64 * self.policy.multiplier)
            .round()
            .max(self.policy.initial.as_millis() as f64);
        let capped = next.min(self.policy.max.as_millis() as f64);
        self.current = Duration::from_millis(capped as u64).min(self.policy.max);

        match self.policy.jitter {
            JitterMode::None => delay,
            JitterMode::Equal => {
                let half = delay / 2;
                jitter_between(half, delay)
            }
            JitterMode::Full => jitter_between(MIN_DELAY.min(delay), delay),
        }
    }
}

pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let settings = RetrySettings::new(Duration::from_millis(200), Duration::from_secs(1), 2.0);
        let mut backoff = RetryBackoff::new(settings);
        let delays: Vec<u128> = (0..5).map(|_| backoff.on_failure().as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.failures(), 5);

        backoff.on_success();
        assert_eq!(backoff.on_failure(), Duration::from_millis(200));
    }

    #[test]
    fn settings_are_clamped() {
        let settings = RetrySettings::new(Duration::from_millis(1), Duration::ZERO, 50.0);
        assert_eq!(settings.initial(), MIN_DELAY);
        assert_eq!(settings.max(), MIN_DELAY);
        assert_eq!(settings.multiplier(), 10.0);
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let settings = RetrySettings::new(Duration::from_secs(1), Duration::from_secs(8), 2.0)
            .with_jitter(JitterMode::Equal);
        let mut backoff = RetryBackoff::new(settings);
        for expected in [1_000u128, 2_000, 4_000] {
            let delay = backoff.on_failure().as_millis();
            assert!(delay >= expected / 2 && delay <= expected, "{delay} vs {expected}");
        }
    }

    #[test]
    fn jitter_between_handles_inverted_bounds() {
        let value = jitter_between(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(value, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_aborts_on_shutdown() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(sleep_with_shutdown(Duration::from_secs(60), &token).await);
        assert!(!sleep_with_shutdown(Duration::from_millis(10), &CancellationToken::new()).await);
    }
}
