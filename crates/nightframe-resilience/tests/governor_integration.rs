//! Integration tests for the resource governor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nightframe_resilience::{
    BreakerConfig, CircuitState, GovernorConfig, GovernorEvent, PoolConfig, ResourceClass,
    ResourceGovernor, RetryPolicy,
};

fn flaky_governor() -> ResourceGovernor {
    ResourceGovernor::new(
        GovernorConfig::default()
            .with_name("chunk-server")
            .with_breaker(
                BreakerConfig::default()
                    .with_failure_threshold(3)
                    .with_cool_down(Duration::from_millis(50)),
            )
            .with_pool(PoolConfig::default().with_network(2)),
    )
}

#[tokio::test]
async fn test_breaker_recovers_through_half_open_trial() {
    let governor = flaky_governor();
    let mut events = governor.subscribe();
    let policy = RetryPolicy::default().with_base_delay(Duration::ZERO);

    let failed: Option<()> = governor
        .execute(|| async { Err("connection reset") }, &policy)
        .await;
    assert_eq!(failed, None);
    assert_eq!(governor.breaker().state(), CircuitState::Open);

    // Still cooling down: the operation is never invoked.
    let invoked = AtomicUsize::new(0);
    let refused = governor
        .execute(
            || {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(()) }
            },
            &RetryPolicy::no_retry(),
        )
        .await;
    assert_eq!(refused, None);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let recovered = governor
        .execute(|| async { Ok::<_, String>(7) }, &RetryPolicy::no_retry())
        .await;
    assert_eq!(recovered, Some(7));
    assert_eq!(governor.breaker().state(), CircuitState::Closed);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let GovernorEvent::CircuitStateChanged { to, .. } = event {
            transitions.push(to);
        }
    }
    assert_eq!(
        transitions,
        vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_network_pool_bounds_concurrency() {
    let governor = Arc::new(flaky_governor());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let governor = Arc::clone(&governor);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            governor
                .guard(ResourceClass::Network, || async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.expect("task"), Ok(()));
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(governor.pool().available(ResourceClass::Network), 2);
}

#[tokio::test]
async fn test_shutdown_rejects_pool_work() {
    let governor = flaky_governor();
    governor.shutdown();

    let result = governor
        .guard(ResourceClass::File, || async { Ok::<_, String>(()) })
        .await;
    assert!(result.is_err());
}
