//! Tests for provider-priority fallback in the specialist resolver
//!
//! Order is primary → secondary → local. Open breakers are skipped without
//! an attempt, failures fall through to the next provider, and the local
//! model is the last resort whose error propagates.

mod common;

use common::*;
use std::sync::Arc;
use switchboard::error::{DispatchError, ProviderError, Unavailability};
use switchboard::metrics::DispatchOutcome;
use switchboard::providers::{
    CircuitState, LazyProvider, ProviderId, ProviderLoader,
};
use switchboard::router::Category;
use switchboard::specialists::{SpecialistResolver, SpecialistTask};

fn task(category: Category) -> SpecialistTask {
    SpecialistTask::new(category, "write a function that reverses a list")
}

#[tokio::test]
async fn test_open_primary_is_never_attempted() {
    // ARRANGE: primary's breaker forced open, secondary healthy
    let primary = ScriptedProvider::answering(ProviderId::Primary, "from A").arc();
    let secondary = ScriptedProvider::answering(ProviderId::Secondary, "from B").arc();
    let primary_breaker = breaker(ProviderId::Primary);
    trip(&primary_breaker).await;
    let metrics = metrics();

    let resolver = SpecialistResolver::builder(metrics.clone())
        .primary(primary.clone(), primary_breaker.clone(), CALL_TIMEOUT)
        .secondary(secondary.clone(), breaker(ProviderId::Secondary), CALL_TIMEOUT)
        .build();

    // ACT
    let dispatched = resolver
        .execute(&task(Category::CodeGeneration))
        .await
        .expect("secondary should answer");

    // ASSERT
    assert_eq!(dispatched.provider, ProviderId::Secondary);
    assert_eq!(dispatched.text, "from B");
    assert_eq!(primary.calls(), 0, "open provider must not be attempted");
    assert_eq!(secondary.calls(), 1);
    assert_eq!(
        metrics.dispatch_count(ProviderId::Primary, DispatchOutcome::Skipped),
        1
    );
    assert_eq!(primary_breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_all_breakers_open_and_no_local_is_descriptive_error() {
    let primary_breaker = breaker(ProviderId::Primary);
    let secondary_breaker = breaker(ProviderId::Secondary);
    trip(&primary_breaker).await;
    trip(&secondary_breaker).await;

    let resolver = SpecialistResolver::builder(metrics())
        .primary(
            ScriptedProvider::answering(ProviderId::Primary, "a").arc(),
            primary_breaker,
            CALL_TIMEOUT,
        )
        .secondary(
            ScriptedProvider::answering(ProviderId::Secondary, "b").arc(),
            secondary_breaker,
            CALL_TIMEOUT,
        )
        .build();

    let err = resolver
        .execute(&task(Category::CodeAnalysis))
        .await
        .expect_err("no provider can answer");

    match &err {
        DispatchError::NoSpecialistAvailable {
            category,
            unavailable,
        } => {
            assert_eq!(*category, Category::CodeAnalysis);
            let reasons: Vec<_> = unavailable
                .iter()
                .map(|u| (u.provider, u.reason.clone()))
                .collect();
            assert_eq!(
                reasons,
                vec![
                    (ProviderId::Primary, Unavailability::BreakerOpen),
                    (ProviderId::Secondary, Unavailability::BreakerOpen),
                    (ProviderId::Local, Unavailability::NotConfigured),
                ]
            );
        }
        other => panic!("expected NoSpecialistAvailable, got {:?}", other),
    }

    let message = err.to_string();
    assert!(message.contains("code_analysis"), "{}", message);
    assert!(message.contains("primary (circuit breaker open)"), "{}", message);
    assert!(message.contains("local (not configured)"), "{}", message);
}

#[tokio::test]
async fn test_failures_cascade_down_to_local_model() {
    let primary = ScriptedProvider::failing(ProviderId::Primary, unauthorized(ProviderId::Primary)).arc();
    let secondary =
        ScriptedProvider::failing(ProviderId::Secondary, transport(ProviderId::Secondary)).arc();
    let local = ScriptedProvider::answering(ProviderId::Local, "from local").arc();
    let primary_breaker = breaker(ProviderId::Primary);
    let secondary_breaker = breaker(ProviderId::Secondary);

    let resolver = SpecialistResolver::builder(metrics())
        .primary(primary.clone(), primary_breaker.clone(), CALL_TIMEOUT)
        .secondary(secondary.clone(), secondary_breaker.clone(), CALL_TIMEOUT)
        .local(local.clone(), CALL_TIMEOUT)
        .build();

    let dispatched = resolver
        .execute(&task(Category::GeneralChat))
        .await
        .expect("local should answer");

    assert_eq!(dispatched.provider, ProviderId::Local);
    assert_eq!(dispatched.text, "from local");
    assert_eq!(primary_breaker.snapshot().await.consecutive_failures, 1);
    assert_eq!(secondary_breaker.snapshot().await.consecutive_failures, 1);
    assert_eq!(local.calls(), 1);
}

#[tokio::test]
async fn test_local_error_propagates() {
    let local = ScriptedProvider::failing(
        ProviderId::Local,
        ProviderError::Upstream {
            provider: "local".to_string(),
            status: 500,
            message: "out of memory".to_string(),
        },
    )
    .arc();

    let resolver = SpecialistResolver::builder(metrics())
        .local(local.clone(), CALL_TIMEOUT)
        .build();

    let err = resolver
        .execute(&task(Category::GeneralChat))
        .await
        .expect_err("local failure should propagate");

    assert!(matches!(
        err,
        DispatchError::LocalModel(ProviderError::Upstream { status: 500, .. })
    ));
    assert_eq!(local.calls(), 1, "local model is attempted exactly once");
}

#[tokio::test]
async fn test_local_rate_limit_is_not_retried() {
    let local = ScriptedProvider::failing(ProviderId::Local, rate_limited(ProviderId::Local)).arc();
    let resolver = SpecialistResolver::builder(metrics())
        .local(local.clone(), CALL_TIMEOUT)
        .build();

    let err = resolver.execute(&task(Category::GeneralChat)).await;
    assert!(matches!(err, Err(DispatchError::LocalModel(_))));
    assert_eq!(local.calls(), 1);
}

struct BrokenLoader;

#[async_trait::async_trait]
impl ProviderLoader for BrokenLoader {
    async fn load(
        &self,
    ) -> Result<Arc<dyn switchboard::providers::ChatProvider>, ProviderError> {
        Err(ProviderError::LoadFailed {
            provider: "local".to_string(),
            message: "model weights not found".to_string(),
        })
    }
}

#[tokio::test]
async fn test_local_load_failure_is_fatal_and_sticky() {
    let lazy = Arc::new(LazyProvider::new(ProviderId::Local, Box::new(BrokenLoader)));
    let resolver = SpecialistResolver::builder(metrics())
        .local(lazy.clone(), CALL_TIMEOUT)
        .build();

    for _ in 0..2 {
        let err = resolver
            .execute(&task(Category::GeneralChat))
            .await
            .expect_err("load failure should surface");
        assert!(matches!(
            err,
            DispatchError::LocalModel(ProviderError::LoadFailed { .. })
        ));
    }
    assert!(lazy.is_initialized());
}

#[tokio::test]
async fn test_success_resets_partial_failure_count() {
    let primary = ScriptedProvider::answering(ProviderId::Primary, "ok")
        .then(Err(unauthorized(ProviderId::Primary)))
        .arc();
    let primary_breaker = breaker(ProviderId::Primary);
    let resolver = SpecialistResolver::builder(metrics())
        .primary(primary, primary_breaker.clone(), CALL_TIMEOUT)
        .local(
            ScriptedProvider::answering(ProviderId::Local, "local").arc(),
            CALL_TIMEOUT,
        )
        .build();

    let first = resolver.execute(&task(Category::GeneralChat)).await.unwrap();
    assert_eq!(first.provider, ProviderId::Local);
    assert_eq!(primary_breaker.snapshot().await.consecutive_failures, 1);

    let second = resolver.execute(&task(Category::GeneralChat)).await.unwrap();
    assert_eq!(second.provider, ProviderId::Primary);
    assert_eq!(primary_breaker.snapshot().await.consecutive_failures, 0);
}

#[tokio::test]
async fn test_timeout_override_applies_to_every_provider() {
    tokio::time::pause();
    let primary = ScriptedProvider::answering(ProviderId::Primary, "slow")
        .delayed(std::time::Duration::from_secs(10))
        .arc();
    let local = ScriptedProvider::answering(ProviderId::Local, "fast").arc();
    let resolver = SpecialistResolver::builder(metrics())
        .primary(primary.clone(), breaker(ProviderId::Primary), CALL_TIMEOUT)
        .local(local, CALL_TIMEOUT)
        .retry(switchboard::specialists::RetryPolicy::new(1, 1000).unwrap())
        .build();

    let dispatched = resolver
        .execute(
            &task(Category::GeneralChat).with_timeout(Some(std::time::Duration::from_secs(2))),
        )
        .await
        .unwrap();

    assert_eq!(dispatched.provider, ProviderId::Local);
    assert_eq!(primary.calls(), 1);
}
