//! Circuit breaker: escalate to a supervisor-level stage instead of
//! retrying further, once the same agent id fails three times within a
//! plan's execution window. Grounded on the shape of
//! `AgentRetryPolicy::should_retry`, applied at the agent-id level across a
//! whole plan rather than within a single stage's retry loop.

use dashmap::DashMap;

const TRIP_THRESHOLD: u32 = 3;

pub struct CircuitBreaker {
    failures: DashMap<String, u32>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            failures: DashMap::new(),
        }
    }

    /// Records a failure for `agent_id`, returning the new failure count.
    pub fn record_failure(&self, agent_id: &str) -> u32 {
        let mut count = self.failures.entry(agent_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&self, agent_id: &str) {
        self.failures.remove(agent_id);
    }

    pub fn is_tripped(&self, agent_id: &str) -> bool {
        self.failures.get(agent_id).map(|c| *c >= TRIP_THRESHOLD).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_three_failures() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure("bunker_agent");
        breaker.record_failure("bunker_agent");
        assert!(!breaker.is_tripped("bunker_agent"));
        breaker.record_failure("bunker_agent");
        assert!(breaker.is_tripped("bunker_agent"));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure("bunker_agent");
        breaker.record_failure("bunker_agent");
        breaker.record_success("bunker_agent");
        assert!(!breaker.is_tripped("bunker_agent"));
    }
}
