//! Circuit breaker behavior under concurrency and across the full
//! open → half-open → closed cycle driven by real dispatches

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use switchboard::metrics::DispatchOutcome;
use switchboard::providers::{BreakerSettings, CircuitBreaker, CircuitState, ProviderId};
use switchboard::router::Category;
use switchboard::specialists::{SpecialistResolver, SpecialistTask};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_not_lost() {
    let breaker = Arc::new(CircuitBreaker::new(
        ProviderId::Primary,
        BreakerSettings {
            failure_threshold: 1000,
            ..BreakerSettings::default()
        },
    ));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let breaker = breaker.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                breaker.record_failure().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = breaker.snapshot().await;
    assert_eq!(snapshot.consecutive_failures, 500);
    assert_eq!(snapshot.state, CircuitState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_caller_observes_the_open_transition() {
    let breaker = Arc::new(CircuitBreaker::new(
        ProviderId::Secondary,
        BreakerSettings {
            failure_threshold: 20,
            ..BreakerSettings::default()
        },
    ));

    let mut handles = Vec::new();
    for _ in 0..40 {
        let breaker = breaker.clone();
        handles.push(tokio::spawn(async move { breaker.record_failure().await }));
    }

    let mut transitions = 0;
    for handle in handles {
        if handle.await.unwrap() == Some(CircuitState::Open) {
            transitions += 1;
        }
    }

    assert_eq!(transitions, 1);
    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(!breaker.is_call_permitted().await);
}

#[tokio::test(start_paused = true)]
async fn test_dispatches_drive_full_recovery_cycle() {
    // SCENARIO: provider fails until the breaker opens, then recovers
    // EXPECTED: skipped while open, one half-open probe after the window, closed again
    let metrics = metrics();
    let primary = ScriptedProvider::answering(ProviderId::Primary, "recovered")
        .then(Err(unauthorized(ProviderId::Primary)))
        .then(Err(unauthorized(ProviderId::Primary)))
        .arc();
    let primary_breaker = Arc::new(CircuitBreaker::new(
        ProviderId::Primary,
        BreakerSettings {
            failure_threshold: 2,
            open_duration: Duration::from_secs(60),
            half_open_successes_required: 1,
        },
    ));
    let resolver = SpecialistResolver::builder(metrics.clone())
        .primary(primary.clone(), primary_breaker.clone(), CALL_TIMEOUT)
        .local(
            ScriptedProvider::answering(ProviderId::Local, "local").arc(),
            CALL_TIMEOUT,
        )
        .build();
    let task = SpecialistTask::new(Category::GeneralChat, "hello");

    // Two failures open the breaker
    for _ in 0..2 {
        let dispatched = resolver.execute(&task).await.unwrap();
        assert_eq!(dispatched.provider, ProviderId::Local);
    }
    assert_eq!(primary_breaker.state().await, CircuitState::Open);

    // While open the provider is not called at all
    let dispatched = resolver.execute(&task).await.unwrap();
    assert_eq!(dispatched.provider, ProviderId::Local);
    assert_eq!(primary.calls(), 2);
    assert_eq!(
        metrics.dispatch_count(ProviderId::Primary, DispatchOutcome::Skipped),
        1
    );

    // After the window a probe goes through and closes the breaker
    tokio::time::advance(Duration::from_secs(61)).await;
    let dispatched = resolver.execute(&task).await.unwrap();
    assert_eq!(dispatched.provider, ProviderId::Primary);
    assert_eq!(dispatched.text, "recovered");
    assert_eq!(primary_breaker.state().await, CircuitState::Closed);
    assert_eq!(primary.calls(), 3);

    // Every step of the cycle is counted once
    for to in [CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed] {
        assert_eq!(
            metrics.transition_count(ProviderId::Primary, to),
            1,
            "transitions to {:?}",
            to
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_admin_reset_reopens_provider_immediately() {
    let primary = ScriptedProvider::answering(ProviderId::Primary, "back").arc();
    let primary_breaker = breaker(ProviderId::Primary);
    trip(&primary_breaker).await;
    let resolver = SpecialistResolver::builder(metrics())
        .primary(primary.clone(), primary_breaker.clone(), CALL_TIMEOUT)
        .build();

    assert!(resolver.reset_breaker(ProviderId::Primary).await);
    assert!(!resolver.reset_breaker(ProviderId::Local).await);

    let dispatched = resolver
        .execute(&SpecialistTask::new(Category::GeneralChat, "hi"))
        .await
        .unwrap();
    assert_eq!(dispatched.provider, ProviderId::Primary);
    assert_eq!(primary.calls(), 1);
}
