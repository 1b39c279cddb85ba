//! Integration tests for capped exponential backoff.

use std::time::Duration;

use access_gate_core::RetryPolicy;

#[test]
fn retry_policy_tests_follows_capped_exponential_sequence() {
    let policy = RetryPolicy::default();
    let delays: Vec<u64> = (1..=9)
        .map(|attempt| policy.delay_for_attempt(attempt).as_secs())
        .collect();
    assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30, 30, 30]);
}

#[test]
fn retry_policy_tests_exponent_cap_applies_before_delay_cap() {
    let policy = RetryPolicy {
        max_exponent: 6,
        max_delay: Duration::from_secs(3_600),
    };
    assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(64));
    assert_eq!(policy.delay_for_attempt(50), Duration::from_secs(64));
}
