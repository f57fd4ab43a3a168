//! Exponential backoff with jitter, shared by every session's reconnect
//! loop: base 1s, multiplier 2, capped at 300s (spec's unlimited-attempt
//! reconnect policy).

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub multiplier: u32,
    pub max: Duration,
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(300),
            jitter: Duration::from_millis(250),
        }
    }
}

impl ReconnectPolicy {
    pub fn into_state(self) -> ReconnectState {
        ReconnectState {
            current: self.initial,
            attempts: 0,
            policy: self,
        }
    }
}

/// Per-session mutable reconnect counter; reset on every successful
/// connect, doubled (capped) on every failure.
#[derive(Debug)]
pub struct ReconnectState {
    current: Duration,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl ReconnectState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial;
        self.attempts = 0;
    }

    /// Compute the next sleep duration and advance the backoff state; each
    /// call counts as one reconnect attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        let delay = self.current;

        let next = self.current.saturating_mul(self.policy.multiplier);
        self.current = std::cmp::min(next, self.policy.max);

        let jitter_ms = self.policy.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        delay + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut state = ReconnectPolicy {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(4),
            jitter: Duration::ZERO,
        }
        .into_state();

        assert_eq!(state.next_delay(), Duration::from_secs(1));
        assert_eq!(state.next_delay(), Duration::from_secs(2));
        assert_eq!(state.next_delay(), Duration::from_secs(4));
        assert_eq!(state.next_delay(), Duration::from_secs(4));
        assert_eq!(state.attempts(), 4);
    }

    #[test]
    fn reset_returns_to_initial_backoff() {
        let mut state = ReconnectPolicy::default().into_state();
        state.next_delay();
        state.next_delay();
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_never_shrinks_the_base_delay() {
        let mut state = ReconnectPolicy {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(300),
            jitter: Duration::from_millis(500),
        }
        .into_state();

        for _ in 0..5 {
            let delay = state.next_delay();
            assert!(delay >= Duration::from_secs(1));
        }
    }
}
