use std::sync::Arc;
use std::time::Duration;

use jobgate_core::{DispatcherError, Resolution, SidecarArgs};
use jobgate_dispatcher::{DispatchLoop, RetryPolicy, ShutdownManager};
use jobgate_testing_utils::{
    test_app_config, DispatchBehavior, EventPayloadBuilder, MockMessage, MockProvider,
    ScriptedQueueListener, ScriptedReceive, TestEnv,
};

async fn eventually(condition: impl Fn() -> bool) -> bool {
    TestEnv::wait_for(|| std::future::ready(condition()), Duration::from_secs(2)).await
}

fn ingest(id: &str) -> MockMessage {
    MockMessage::new(id, EventPayloadBuilder::new("ingest").with_files("a.png").build())
}

fn dispatch_loop(listener: Arc<ScriptedQueueListener>, provider: Arc<MockProvider>) -> DispatchLoop {
    let retry = RetryPolicy::from_config(&test_app_config().dispatcher.receive_retry);
    DispatchLoop::new(
        listener,
        provider,
        Arc::new(SidecarArgs::new().with("context.name", "thumbnailer")),
        retry,
    )
}

#[tokio::test]
async fn test_ingest_message_is_dispatched_and_acknowledged() {
    let message = ingest("m-1");
    let probe = message.probe();
    let listener = Arc::new(ScriptedQueueListener::new(vec![ScriptedReceive::Message(message)]));
    let provider = Arc::new(MockProvider::new());
    let shutdown = ShutdownManager::new();

    let handle = tokio::spawn(
        dispatch_loop(Arc::clone(&listener), Arc::clone(&provider)).run(shutdown.subscribe().await),
    );

    assert!(eventually(|| provider.dispatched().len() == 1).await);

    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();

    assert_eq!(provider.dispatched(), vec!["m-1"]);
    assert_eq!(probe.applied(), vec![Resolution::Acknowledged]);
    assert_eq!(
        provider.sidecar_seen()[0].get("context.name"),
        Some("thumbnailer")
    );
}

#[tokio::test]
async fn test_dispatch_failure_does_not_stop_the_loop() {
    let first = ingest("m-1");
    let second = ingest("m-2");
    let probes = [first.probe(), second.probe()];
    let listener = Arc::new(ScriptedQueueListener::new(vec![
        ScriptedReceive::Message(first),
        ScriptedReceive::Message(second),
    ]));
    let provider = Arc::new(MockProvider::new().with_behavior(DispatchBehavior::ReleaseAndFail));
    let shutdown = ShutdownManager::new();

    let handle = tokio::spawn(
        dispatch_loop(Arc::clone(&listener), Arc::clone(&provider)).run(shutdown.subscribe().await),
    );

    assert!(eventually(|| provider.dispatched().len() == 2).await);
    assert!(!handle.is_finished());

    shutdown.shutdown().await;
    assert!(handle.await.unwrap().is_ok());
    for probe in &probes {
        assert_eq!(probe.applied(), vec![Resolution::Released]);
    }
}

#[tokio::test]
async fn test_unresolved_message_is_released() {
    let message = ingest("m-1");
    let probe = message.probe();
    let listener = Arc::new(ScriptedQueueListener::new(vec![ScriptedReceive::Message(message)]));
    let provider = Arc::new(MockProvider::new().with_behavior(DispatchBehavior::FailUnresolved));
    let shutdown = ShutdownManager::new();

    let handle = tokio::spawn(
        dispatch_loop(Arc::clone(&listener), Arc::clone(&provider)).run(shutdown.subscribe().await),
    );

    assert!(eventually(|| !probe.applied().is_empty()).await);
    shutdown.shutdown().await;
    handle.await.unwrap().unwrap();

    assert_eq!(probe.applied(), vec![Resolution::Released]);
}

#[tokio::test]
async fn test_resolved_message_is_not_resolved_twice() {
    let message = ingest("m-1");
    let probe = message.probe();
    let listener = Arc::new(
        ScriptedQueueListener::new(vec![ScriptedReceive::Message(message)]).close_when_exhausted(),
    );
    let provider = Arc::new(MockProvider::new().with_behavior(DispatchBehavior::RejectAndFail));

    let result = dispatch_loop(listener, provider)
        .run(ShutdownManager::new().subscribe().await)
        .await;

    assert!(matches!(result, Err(DispatcherError::QueueClosed)));
    assert_eq!(probe.attempts(), vec![Resolution::Rejected]);
}

#[tokio::test]
async fn test_empty_payload_is_rejected_without_dispatch() {
    let message = MockMessage::new("m-empty", "   ");
    let probe = message.probe();
    let listener = Arc::new(
        ScriptedQueueListener::new(vec![ScriptedReceive::Message(message)]).close_when_exhausted(),
    );
    let provider = Arc::new(MockProvider::new());

    let result = dispatch_loop(listener, Arc::clone(&provider))
        .run(ShutdownManager::new().subscribe().await)
        .await;

    assert!(matches!(result, Err(DispatcherError::QueueClosed)));
    assert!(provider.dispatched().is_empty());
    assert_eq!(probe.applied(), vec![Resolution::Rejected]);
    assert_eq!(probe.reject_reasons(), vec!["empty payload"]);
}

#[tokio::test]
async fn test_transient_receive_errors_are_retried() {
    let message = ingest("m-1");
    let listener = Arc::new(ScriptedQueueListener::new(vec![
        ScriptedReceive::TransportError("connection reset".to_string()),
        ScriptedReceive::TransportError("connection reset".to_string()),
        ScriptedReceive::Message(message),
        ScriptedReceive::TransportError("connection reset".to_string()),
        ScriptedReceive::TransportError("connection reset".to_string()),
        ScriptedReceive::Closed,
    ]));
    let provider = Arc::new(MockProvider::new());

    let result = dispatch_loop(Arc::clone(&listener), Arc::clone(&provider))
        .run(ShutdownManager::new().subscribe().await)
        .await;

    // Two failures in a row stay under the limit of three, and the
    // successful receive in between resets the count.
    assert!(matches!(result, Err(DispatcherError::QueueClosed)));
    assert_eq!(provider.dispatched(), vec!["m-1"]);
    assert_eq!(listener.receive_calls(), 6);
}

#[tokio::test]
async fn test_persistent_receive_errors_escalate() {
    let listener = Arc::new(ScriptedQueueListener::new(
        (0..5)
            .map(|i| ScriptedReceive::TransportError(format!("broker down #{i}")))
            .collect(),
    ));
    let provider = Arc::new(MockProvider::new());

    let result = dispatch_loop(Arc::clone(&listener), provider)
        .run(ShutdownManager::new().subscribe().await)
        .await;

    match result {
        Err(DispatcherError::ReceiveRetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error, "broker down #2");
        }
        other => panic!("expected escalation, got {other:?}"),
    }
    assert_eq!(listener.receive_calls(), 3);
}

#[tokio::test]
async fn test_closed_stream_is_fatal() {
    let listener = Arc::new(ScriptedQueueListener::new(vec![ScriptedReceive::Closed]));
    let provider = Arc::new(MockProvider::new());

    let result = dispatch_loop(listener, Arc::clone(&provider))
        .run(ShutdownManager::new().subscribe().await)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, DispatcherError::QueueClosed));
    assert!(err.is_fatal());
    assert!(provider.dispatched().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_blocked_receive() {
    let listener = Arc::new(ScriptedQueueListener::new(Vec::new()));
    let provider = Arc::new(MockProvider::new());
    let shutdown = ShutdownManager::new();

    let handle = tokio::spawn(
        dispatch_loop(Arc::clone(&listener), provider).run(shutdown.subscribe().await),
    );
    assert!(eventually(|| listener.receive_calls() == 1).await);

    shutdown.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop should stop promptly");
    assert!(result.unwrap().is_ok());
}
