//! Retry scheduler: turns per-token delivery results into a job decision.

use chrono::{DateTime, Duration, Utc};

use herald_common::types::{DeliveryResult, DeliveryStatus, JobOutcome};

/// Default first backoff step (doubled before use: 60 s after the first failure).
pub const DEFAULT_BACKOFF_BASE_SECS: i64 = 30;

/// Default upper bound on the backoff delay (10 minutes).
pub const DEFAULT_BACKOFF_CAP_SECS: i64 = 600;

/// Exponent ceiling; far past the cap for any sane base.
const MAX_BACKOFF_EXPONENT: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: i32,
}

impl RetryPolicy {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            base: Duration::seconds(DEFAULT_BACKOFF_BASE_SECS),
            cap: Duration::seconds(DEFAULT_BACKOFF_CAP_SECS),
            max_attempts,
        }
    }

    /// `min(base * 2^(attempts + 1), cap)`.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = (attempts.max(0) + 1).min(MAX_BACKOFF_EXPONENT);
        self.base
            .checked_mul(1 << exponent)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    pub fn exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }

    /// Decision for a transient failure of a job currently at `attempts`.
    pub fn on_failure(&self, attempts: i32, now: DateTime<Utc>) -> RetryDecision {
        let next = attempts + 1;
        if self.exhausted(next) {
            RetryDecision::GiveUp { attempts: next }
        } else {
            RetryDecision::Reschedule {
                attempts: next,
                until: now + self.backoff(attempts),
            }
        }
    }

    /// Judge one delivery attempt.
    ///
    /// The job is retried when fewer results than targeted tokens came back or
    /// any result is transient. Unregistered tokens are reported for purging;
    /// a job whose every token turned out unregistered is finalized as not
    /// delivered.
    pub fn on_delivery_result(
        &self,
        attempts: i32,
        targeted: usize,
        results: &[DeliveryResult],
        now: DateTime<Utc>,
    ) -> DeliveryAssessment {
        let stale_tokens: Vec<String> = results
            .iter()
            .filter(|r| r.status == DeliveryStatus::DeviceNotRegistered)
            .map(|r| r.token.clone())
            .collect();

        let any_transient = results
            .iter()
            .any(|r| matches!(r.status, DeliveryStatus::Transient(_)));
        let complete = results.len() == targeted;
        let reached = results
            .iter()
            .any(|r| matches!(r.status, DeliveryStatus::Ok { .. }));

        let decision = if complete && !any_transient {
            RetryDecision::Finalize {
                attempts: attempts + 1,
                delivered: reached,
            }
        } else {
            self.on_failure(attempts, now)
        };

        DeliveryAssessment {
            decision,
            stale_tokens,
        }
    }
}

/// What happens to a job after a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Terminal after a complete attempt. `delivered` is false when no device
    /// accepted the push.
    Finalize { attempts: i32, delivered: bool },
    Reschedule { attempts: i32, until: DateTime<Utc> },
    /// Out of attempts: `Processed(false)`.
    GiveUp { attempts: i32 },
}

impl RetryDecision {
    pub fn outcome(self) -> JobOutcome {
        match self {
            RetryDecision::Finalize {
                attempts,
                delivered,
            } => JobOutcome::Processed {
                delivered,
                attempts,
            },
            RetryDecision::Reschedule { attempts, until } => {
                JobOutcome::Rescheduled { attempts, until }
            }
            RetryDecision::GiveUp { attempts } => JobOutcome::Processed {
                delivered: false,
                attempts,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAssessment {
    pub decision: RetryDecision,
    /// Tokens the provider reported as no longer registered.
    pub stale_tokens: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.backoff(0), Duration::seconds(60));
        assert_eq!(policy.backoff(1), Duration::seconds(120));
        assert_eq!(policy.backoff(2), Duration::seconds(240));
        assert_eq!(policy.backoff(3), Duration::seconds(480));
        assert_eq!(policy.backoff(4), Duration::seconds(600));
        assert_eq!(policy.backoff(1_000), Duration::seconds(600));
    }

    #[test]
    fn test_backoff_non_decreasing_and_bounded() {
        let policy = RetryPolicy::new(5);
        let delays: Vec<Duration> = (0..3).map(|a| policy.backoff(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.cap));
    }

    #[test]
    fn test_all_ok_finalizes() {
        let policy = RetryPolicy::new(5);
        let results = vec![DeliveryResult::ok("a"), DeliveryResult::ok("b")];
        let assessment = policy.on_delivery_result(0, 2, &results, now());
        assert_eq!(
            assessment.decision,
            RetryDecision::Finalize {
                attempts: 1,
                delivered: true
            }
        );
        assert!(assessment.stale_tokens.is_empty());
    }

    #[test]
    fn test_not_registered_does_not_force_retry() {
        let policy = RetryPolicy::new(5);
        let results = vec![
            DeliveryResult::ok("a"),
            DeliveryResult::not_registered("b"),
            DeliveryResult::ok("c"),
        ];
        let assessment = policy.on_delivery_result(0, 3, &results, now());
        assert_eq!(
            assessment.decision,
            RetryDecision::Finalize {
                attempts: 1,
                delivered: true
            }
        );
        assert_eq!(assessment.stale_tokens, vec!["b".to_string()]);
    }

    #[test]
    fn test_all_unregistered_finalizes_undelivered() {
        let policy = RetryPolicy::new(5);
        let results = vec![
            DeliveryResult::not_registered("a"),
            DeliveryResult::not_registered("b"),
        ];
        let assessment = policy.on_delivery_result(0, 2, &results, now());
        assert_eq!(
            assessment.decision,
            RetryDecision::Finalize {
                attempts: 1,
                delivered: false
            }
        );
        assert_eq!(
            assessment.decision.outcome(),
            JobOutcome::Processed {
                delivered: false,
                attempts: 1
            }
        );
        assert_eq!(assessment.stale_tokens.len(), 2);
    }

    #[test]
    fn test_transient_reschedules_with_backoff() {
        let policy = RetryPolicy::new(5);
        let results = vec![
            DeliveryResult::not_registered("a"),
            DeliveryResult::transient("b", "MessageRateExceeded"),
        ];
        let assessment = policy.on_delivery_result(1, 2, &results, now());
        assert_eq!(
            assessment.decision,
            RetryDecision::Reschedule {
                attempts: 2,
                until: now() + Duration::seconds(120),
            }
        );
        assert_eq!(assessment.stale_tokens, vec!["a".to_string()]);
    }

    #[test]
    fn test_missing_results_reschedule() {
        let policy = RetryPolicy::new(5);
        let results = vec![DeliveryResult::ok("a")];
        let assessment = policy.on_delivery_result(0, 2, &results, now());
        assert!(matches!(
            assessment.decision,
            RetryDecision::Reschedule { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_last_attempt_gives_up() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.on_failure(2, now()), RetryDecision::GiveUp { attempts: 3 });
        assert_eq!(
            RetryDecision::GiveUp { attempts: 3 }.outcome(),
            JobOutcome::Processed {
                delivered: false,
                attempts: 3
            }
        );
    }
}
