//! Bounded rebuild policy for the Verify phase
//!
//! Verification is the only phase that retries. A failed verification asks
//! the build collaborator for a fresh wheel and verifies again, at most
//! `MAX_REBUILDS` times, with an exponential pause between rebuilds.

use std::time::Duration;
use tokio::time::sleep;

/// Hard upper bound on rebuild attempts per artifact
pub const MAX_REBUILDS: u32 = 2;

/// Options for rebuild behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildPolicy {
    /// Rebuilds after the first failed verification (never above `MAX_REBUILDS`)
    max_rebuilds: u32,
    /// Pause before the first rebuild
    pub initial_delay: Duration,
    /// Maximum pause between rebuilds
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RebuildPolicy {
    fn default() -> Self {
        Self {
            max_rebuilds: MAX_REBUILDS,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RebuildPolicy {
    /// Policy with the given rebuild count, clamped to `MAX_REBUILDS`
    pub fn new(max_rebuilds: u32) -> Self {
        Self {
            max_rebuilds: max_rebuilds.min(MAX_REBUILDS),
            ..Self::default()
        }
    }

    /// Policy without pauses, for tests and dry runs
    pub fn immediate(max_rebuilds: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::new(max_rebuilds)
        }
    }

    pub fn max_rebuilds(&self) -> u32 {
        self.max_rebuilds
    }

    /// Total verify calls: the first one plus one per rebuild
    pub fn max_verify_attempts(&self) -> u32 {
        self.max_rebuilds + 1
    }

    /// Whether another rebuild is allowed after `rebuilds_done` rebuilds
    pub fn can_rebuild(&self, rebuilds_done: u32) -> bool {
        rebuilds_done < self.max_rebuilds
    }

    /// Pause before rebuild number `rebuild` (1-based)
    pub fn delay_for(&self, rebuild: u32) -> Duration {
        let exponent = rebuild.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }

    /// Wait before rebuild number `rebuild`
    pub async fn pause(&self, rebuild: u32) {
        let delay = self.delay_for(rebuild);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_policy_default() {
        let policy = RebuildPolicy::default();

        assert_eq!(policy.max_rebuilds(), 2);
        assert_eq!(policy.max_verify_attempts(), 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_rebuilds_are_clamped() {
        assert_eq!(RebuildPolicy::new(10).max_rebuilds(), MAX_REBUILDS);
        assert_eq!(RebuildPolicy::new(1).max_rebuilds(), 1);
        assert_eq!(RebuildPolicy::new(0).max_verify_attempts(), 1);
    }

    #[test]
    fn test_can_rebuild() {
        let policy = RebuildPolicy::new(2);

        assert!(policy.can_rebuild(0));
        assert!(policy.can_rebuild(1));
        assert!(!policy.can_rebuild(2));
        assert!(!policy.can_rebuild(3));
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = RebuildPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            ..RebuildPolicy::new(2)
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_immediate_policy_does_not_sleep() {
        let policy = RebuildPolicy::immediate(2);
        let start = std::time::Instant::now();

        policy.pause(1).await;
        policy.pause(2).await;

        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
