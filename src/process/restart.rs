use crate::config::LaunchConfig;
use std::time::{Duration, Instant};

/// Window in which restarts count against `max_restarts`
const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound for the exponential backoff
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Restart policy for one process lineage
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of restarts within the window
    pub max_restarts: usize,
    /// Window for counting restarts
    pub window: Duration,
    /// Delay before the second restart; the first one is immediate
    pub initial_delay: Duration,
    pub backoff_strategy: BackoffStrategy,
}

impl RestartPolicy {
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_restarts: 10,
            window: DEFAULT_RESTART_WINDOW,
            initial_delay: Duration::from_secs(1),
            backoff_strategy: BackoffStrategy::Exponential {
                max_delay: DEFAULT_MAX_DELAY,
            },
        }
    }

    /// Build the policy a launch config asks for
    pub fn from_launch_config(config: &LaunchConfig) -> Self {
        Self {
            enabled: config.auto_restart,
            max_restarts: config.max_restarts,
            initial_delay: config.restart_delay(),
            ..Self::new()
        }
    }

    /// Whether the restart budget still allows another attempt
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        if !self.enabled {
            return false;
        }

        tracker.count_recent_restarts(self.window) < self.max_restarts
    }

    /// Delay required between the previous restart and the next one
    pub fn calculate_delay(&self, tracker: &RestartTracker) -> Duration {
        match tracker.restart_count() {
            0 => Duration::ZERO,
            n => self.backoff_strategy.calculate_delay(self.initial_delay, n - 1),
        }
    }

    /// Earliest instant the next restart may happen, if it must wait at all
    pub fn not_before(&self, tracker: &RestartTracker) -> Option<Instant> {
        tracker
            .last_restart_time()
            .map(|last| last + self.calculate_delay(tracker))
    }

    /// Whether the backoff delay has elapsed at `now`
    pub fn is_due(&self, tracker: &RestartTracker, now: Instant) -> bool {
        self.not_before(tracker).map_or(true, |at| now >= at)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff strategy for restart delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    Fixed,
    /// `initial * 2^attempt`, capped at `max_delay`
    Exponential { max_delay: Duration },
}

impl BackoffStrategy {
    pub fn calculate_delay(&self, initial_delay: Duration, attempt: usize) -> Duration {
        match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Exponential { max_delay } => {
                let factor = 2_u32.saturating_pow(attempt.min(31) as u32);
                initial_delay.saturating_mul(factor).min(*max_delay)
            }
        }
    }
}

/// Restart history of one process lineage
///
/// Moves from identity to identity with the lineage, so the budget and the
/// backoff survive restarts.
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    restart_times: Vec<Instant>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_restart(&mut self) {
        self.record_restart_at(Instant::now());
    }

    fn record_restart_at(&mut self, at: Instant) {
        self.restart_times.push(at);
    }

    pub fn restart_count(&self) -> usize {
        self.restart_times.len()
    }

    pub fn count_recent_restarts(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.restart_times
            .iter()
            .filter(|&&time| now.duration_since(time) < window)
            .count()
    }

    pub fn last_restart_time(&self) -> Option<Instant> {
        self.restart_times.last().copied()
    }

    /// Drop restarts older than `window`
    pub fn prune_old_restarts(&mut self, window: Duration) {
        let now = Instant::now();
        self.restart_times
            .retain(|&time| now.duration_since(time) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_restart_policy_new() {
        let policy = RestartPolicy::new();
        assert!(policy.enabled);
        assert_eq!(policy.max_restarts, 10);
        assert_eq!(policy.window, Duration::from_secs(60));
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_restart_policy_from_launch_config() {
        let mut config = LaunchConfig::new("main:app");
        config.max_restarts = 5;
        config.restart_delay_ms = 200;

        let policy = RestartPolicy::from_launch_config(&config);
        assert!(policy.enabled);
        assert_eq!(policy.max_restarts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(200));

        config.auto_restart = false;
        let policy = RestartPolicy::from_launch_config(&config);
        assert!(!policy.should_restart(&RestartTracker::new()));
    }

    #[test]
    fn test_restart_budget() {
        let policy = RestartPolicy {
            max_restarts: 3,
            ..RestartPolicy::new()
        };
        let mut tracker = RestartTracker::new();

        for _ in 0..3 {
            assert!(policy.should_restart(&tracker));
            tracker.record_restart();
        }
        assert!(!policy.should_restart(&tracker));
    }

    #[test]
    fn test_backoff_fixed() {
        let strategy = BackoffStrategy::Fixed;
        let initial = Duration::from_millis(500);
        assert_eq!(strategy.calculate_delay(initial, 0), initial);
        assert_eq!(strategy.calculate_delay(initial, 10), initial);
    }

    #[test]
    fn test_backoff_exponential_capped() {
        let strategy = BackoffStrategy::Exponential {
            max_delay: Duration::from_secs(60),
        };
        let initial = Duration::from_secs(1);

        assert_eq!(strategy.calculate_delay(initial, 0), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(initial, 1), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(initial, 3), Duration::from_secs(8));
        assert_eq!(strategy.calculate_delay(initial, 6), Duration::from_secs(60));
        assert_eq!(strategy.calculate_delay(initial, 500), Duration::from_secs(60));
    }

    #[test]
    fn test_first_restart_is_immediate() {
        let policy = RestartPolicy::new();
        let tracker = RestartTracker::new();

        assert_eq!(policy.calculate_delay(&tracker), Duration::ZERO);
        assert!(policy.not_before(&tracker).is_none());
        assert!(policy.is_due(&tracker, Instant::now()));
    }

    #[test]
    fn test_later_restarts_wait_for_backoff() {
        let policy = RestartPolicy::new();
        let mut tracker = RestartTracker::new();
        let start = Instant::now();

        tracker.record_restart_at(start);
        assert_eq!(policy.calculate_delay(&tracker), Duration::from_secs(1));
        assert!(!policy.is_due(&tracker, start + Duration::from_millis(500)));
        assert!(policy.is_due(&tracker, start + Duration::from_secs(1)));

        tracker.record_restart_at(start + Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(&tracker), Duration::from_secs(2));
        assert_eq!(policy.not_before(&tracker), Some(start + Duration::from_secs(3)));
    }

    #[test]
    fn test_restart_tracker_count_recent() {
        let mut tracker = RestartTracker::new();

        tracker.record_restart();
        thread::sleep(Duration::from_millis(50));
        tracker.record_restart();

        assert_eq!(tracker.count_recent_restarts(Duration::from_secs(10)), 2);
        assert_eq!(tracker.count_recent_restarts(Duration::ZERO), 0);
    }

    #[test]
    fn test_restart_tracker_prune() {
        let mut tracker = RestartTracker::new();
        tracker.record_restart();
        tracker.record_restart();
        assert_eq!(tracker.restart_count(), 2);

        tracker.prune_old_restarts(Duration::from_secs(60));
        assert_eq!(tracker.restart_count(), 2);

        tracker.prune_old_restarts(Duration::ZERO);
        assert_eq!(tracker.restart_count(), 0);
        assert!(tracker.last_restart_time().is_none());
    }
}
