use std::sync::Arc;
use std::time::Duration;

use jobgate_core::{DispatcherError, Provider, Resolution, WorkloadId, WorkloadState};
use jobgate_dispatcher::{Orchestrator, ProviderSettings, ShutdownManager, WorkloadProvider};
use jobgate_infrastructure::QueueListenerFactory;
use jobgate_testing_utils::{
    test_app_config, EventPayloadBuilder, InMemoryWorkloadBackend, MockMessage, MockProvider,
    ScriptedQueueListener, ScriptedReceive, TestEnv,
};

async fn wait_for_in_flight(
    provider: &Arc<WorkloadProvider<InMemoryWorkloadBackend>>,
    expected: usize,
) -> bool {
    TestEnv::wait_for(
        || {
            let provider = Arc::clone(provider);
            async move { provider.in_flight().await.len() == expected }
        },
        Duration::from_secs(5),
    )
    .await
}

#[tokio::test]
async fn test_closed_queue_stops_both_loops() {
    let listener = Arc::new(ScriptedQueueListener::new(vec![ScriptedReceive::Closed]));
    let provider = Arc::new(MockProvider::new());
    let orchestrator =
        Orchestrator::from_parts(test_app_config(), listener, provider, ShutdownManager::new());

    let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("orchestrator should stop");

    assert!(matches!(result, Err(DispatcherError::QueueClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_escalation_stops_dispatch() {
    let mut config = test_app_config();
    config.dispatcher.max_consecutive_reconcile_failures = 2;
    let listener = Arc::new(ScriptedQueueListener::new(Vec::new()));
    let provider = Arc::new(MockProvider::new());
    for _ in 0..2 {
        provider.push_reconcile_result(Err(DispatcherError::Backend("503".to_string())));
    }
    let shutdown = ShutdownManager::new();
    let orchestrator =
        Orchestrator::from_parts(config, listener, provider.clone(), shutdown.clone());

    let result = orchestrator.run().await;

    assert!(matches!(
        result,
        Err(DispatcherError::ReconcileRetriesExhausted { attempts: 2, .. })
    ));
    assert!(shutdown.is_shutdown().await);
    assert_eq!(provider.reconcile_calls().len(), 2);
}

#[tokio::test]
async fn test_external_shutdown_is_clean() {
    let message = MockMessage::new("m-1", EventPayloadBuilder::new("ingest").build());
    let probe = message.probe();
    let listener = Arc::new(ScriptedQueueListener::new(vec![ScriptedReceive::Message(message)]));
    let provider = Arc::new(MockProvider::new());
    let shutdown = ShutdownManager::new();
    let orchestrator =
        Orchestrator::from_parts(test_app_config(), listener, provider.clone(), shutdown.clone());
    assert_eq!(orchestrator.provider().name(), "mock");
    assert_eq!(
        orchestrator.sidecar_args().get("messaging.keyname"),
        Some("dispatch")
    );

    let handle = tokio::spawn(orchestrator.run());
    assert!(
        TestEnv::wait_for(
            || std::future::ready(provider.dispatched().len() == 1),
            Duration::from_secs(2)
        )
        .await
    );

    shutdown.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("orchestrator should stop");
    assert!(result.unwrap().is_ok());
    assert_eq!(probe.applied(), vec![Resolution::Acknowledged]);
}

#[tokio::test]
async fn test_completed_workload_is_cleaned_up() {
    let mut config = test_app_config();
    config.dispatcher.reconcile_interval_seconds = 1;
    let listener = QueueListenerFactory::in_memory(&config.message_queue);
    let backend = InMemoryWorkloadBackend::new();
    let provider = Arc::new(WorkloadProvider::new(
        backend.clone(),
        ProviderSettings::from_config(&config),
    ));
    let shutdown = ShutdownManager::new();
    let orchestrator = Orchestrator::from_parts(
        config,
        Arc::new(listener.clone()),
        provider.clone(),
        shutdown.clone(),
    );
    let handle = tokio::spawn(orchestrator.run());

    let message_id = listener
        .publish(
            EventPayloadBuilder::new("ingest")
                .with_files("a.png")
                .with_event_id("evt-1")
                .build(),
        )
        .await;
    assert!(wait_for_in_flight(&provider, 1).await);
    let workload = WorkloadId::new(backend.submitted()[0].name.clone());

    backend.set_state(&workload, WorkloadState::Succeeded);
    assert!(
        TestEnv::wait_for(
            || std::future::ready(backend.removed() == vec![workload.clone()]),
            Duration::from_secs(5)
        )
        .await
    );
    assert!(wait_for_in_flight(&provider, 0).await);
    assert_eq!(listener.acknowledged().await, vec![message_id]);

    shutdown.shutdown().await;
    assert!(handle.await.unwrap().is_ok());
}
