use std::sync::Arc;
use std::time::Duration;

use jobgate_config::DispatcherConfig;
use jobgate_core::{DispatcherError, Provider, ReconcileReport, SidecarArgs, WorkloadState};
use jobgate_dispatcher::{
    DispatchLoop, ProviderSettings, ReconcileLoop, RetryPolicy, ShutdownManager, WorkloadProvider,
};
use jobgate_testing_utils::{
    test_app_config, EventPayloadBuilder, InMemoryWorkloadBackend, MockMessage, MockProvider,
    ScriptedQueueListener, ScriptedReceive,
};

fn offsets(calls: &[tokio::time::Instant]) -> Vec<Duration> {
    calls.iter().map(|t| *t - calls[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn test_passes_run_immediately_then_every_interval() {
    let provider = Arc::new(MockProvider::new());
    let shutdown = ShutdownManager::new();
    let reconcile = ReconcileLoop::new(provider.clone(), &DispatcherConfig::default());

    let handle = tokio::spawn(reconcile.run(shutdown.subscribe().await));
    tokio::time::sleep(Duration::from_secs(50)).await;
    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();

    assert_eq!(
        offsets(&provider.reconcile_calls()),
        vec![
            Duration::ZERO,
            Duration::from_secs(15),
            Duration::from_secs(30),
            Duration::from_secs(45),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cadence_holds_while_dispatch_is_busy() {
    let config = test_app_config();
    let provider = Arc::new(MockProvider::new().with_dispatch_delay(Duration::from_millis(100)));
    let script = (0..1000)
        .map(|i| {
            ScriptedReceive::Message(MockMessage::new(
                &format!("m-{i}"),
                EventPayloadBuilder::new("ingest").build(),
            ))
        })
        .collect();
    let listener = Arc::new(ScriptedQueueListener::new(script));
    let shutdown = ShutdownManager::new();

    let dispatch = DispatchLoop::new(
        listener,
        provider.clone(),
        Arc::new(SidecarArgs::new()),
        RetryPolicy::from_config(&config.dispatcher.receive_retry),
    );
    let reconcile = ReconcileLoop::new(provider.clone(), &config.dispatcher);
    let dispatch_handle = tokio::spawn(dispatch.run(shutdown.subscribe().await));
    let reconcile_handle = tokio::spawn(reconcile.run(shutdown.subscribe().await));

    tokio::time::sleep(Duration::from_secs(50)).await;
    shutdown.shutdown().await;
    reconcile_handle.await.unwrap().unwrap();
    dispatch_handle.await.unwrap().unwrap();

    // Dispatch never went idle during the window.
    assert!(provider.dispatched().len() >= 450, "{}", provider.dispatched().len());
    assert_eq!(
        offsets(&provider.reconcile_calls()),
        vec![
            Duration::ZERO,
            Duration::from_secs(15),
            Duration::from_secs(30),
            Duration::from_secs(45),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_passes_never_overlap() {
    let provider = Arc::new(MockProvider::new().with_reconcile_delay(Duration::from_secs(20)));
    let shutdown = ShutdownManager::new();
    let reconcile = ReconcileLoop::new(provider.clone(), &DispatcherConfig::default());

    let handle = tokio::spawn(reconcile.run(shutdown.subscribe().await));
    tokio::time::sleep(Duration::from_secs(70)).await;
    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();

    let calls = offsets(&provider.reconcile_calls());
    assert!(calls.len() >= 3, "{calls:?}");
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(20), "{calls:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_escalate() {
    let provider = Arc::new(MockProvider::new());
    for _ in 0..5 {
        provider.push_reconcile_result(Err(DispatcherError::Backend("503".to_string())));
    }
    let reconcile = ReconcileLoop::new(provider.clone(), &DispatcherConfig::default());

    let result = reconcile.run(ShutdownManager::new().subscribe().await).await;

    match result {
        Err(err @ DispatcherError::ReconcileRetriesExhausted { attempts: 5, .. }) => {
            assert!(err.is_fatal());
        }
        other => panic!("expected escalation, got {other:?}"),
    }
    assert_eq!(provider.reconcile_calls().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let provider = Arc::new(MockProvider::new());
    for _ in 0..4 {
        provider.push_reconcile_result(Err(DispatcherError::Backend("503".to_string())));
    }
    provider.push_reconcile_result(Ok(ReconcileReport::default()));
    for _ in 0..4 {
        provider.push_reconcile_result(Err(DispatcherError::Backend("503".to_string())));
    }
    let shutdown = ShutdownManager::new();
    let reconcile = ReconcileLoop::new(provider.clone(), &DispatcherConfig::default());

    let handle = tokio::spawn(reconcile.run(shutdown.subscribe().await));
    tokio::time::sleep(Duration::from_secs(15 * 10)).await;
    assert!(!handle.is_finished());

    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();
    assert!(provider.reconcile_calls().len() >= 10);
}

#[tokio::test(start_paused = true)]
async fn test_pass_exceeding_timeout_counts_as_failure() {
    let provider = Arc::new(MockProvider::new().with_reconcile_delay(Duration::from_secs(600)));
    let config = DispatcherConfig {
        max_consecutive_reconcile_failures: 2,
        ..Default::default()
    };
    let reconcile = ReconcileLoop::new(provider.clone(), &config);

    let result = reconcile.run(ShutdownManager::new().subscribe().await).await;

    assert!(matches!(
        result,
        Err(DispatcherError::ReconcileRetriesExhausted { attempts: 2, .. })
    ));
    let calls = offsets(&provider.reconcile_calls());
    // 120s ceiling (60s budget + 2 x 30s call bound), then the delayed tick
    // fires immediately.
    assert_eq!(calls, vec![Duration::ZERO, Duration::from_secs(120)]);
}

#[tokio::test(start_paused = true)]
async fn test_large_backlog_on_slow_backend_drains_without_escalating() {
    const BACKLOG: usize = 400;

    let config = test_app_config();
    let backend = InMemoryWorkloadBackend::new();
    let provider = Arc::new(WorkloadProvider::new(
        backend.clone(),
        ProviderSettings::from_config(&config),
    ));
    for i in 0..BACKLOG {
        let message = MockMessage::new(
            &format!("m-{i}"),
            EventPayloadBuilder::new("ingest")
                .with_event_id(&format!("evt-{i}"))
                .build(),
        );
        provider.dispatch(&message, &SidecarArgs::new()).await.unwrap();
    }
    for id in backend.workload_ids() {
        backend.set_state(&id, WorkloadState::Succeeded);
    }
    // Healthy but slow: 400 deletes take 200s, far past one pass ceiling.
    backend.set_remove_delay(Some(Duration::from_millis(500)));

    let shutdown = ShutdownManager::new();
    let reconcile = ReconcileLoop::new(provider.clone(), &config.dispatcher);
    let handle = tokio::spawn(reconcile.run(shutdown.subscribe().await));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(!handle.is_finished(), "loop escalated on a healthy backend");
    assert!(backend.workload_ids().is_empty());
    assert_eq!(backend.removed().len(), BACKLOG);
    assert!(provider.in_flight().await.is_empty());

    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();
}
