use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobgate_config::{AppConfig, ProviderKind};
use jobgate_core::{Provider, Resolution, SidecarArgs, WorkloadId, WorkloadState};
use jobgate_dispatcher::{
    build_provider, compose_sidecar_args, select_provider_kind, ProviderSettings, WorkloadProvider,
};
use jobgate_testing_utils::{
    test_app_config, with_azure_batch, with_kubernetes, EventPayloadBuilder,
    InMemoryWorkloadBackend, MockMessage,
};

#[test]
fn test_provider_selection() {
    let cases: Vec<(&str, AppConfig, ProviderKind)> = vec![
        ("no provider block", test_app_config(), ProviderKind::Kubernetes),
        ("kubernetes block", with_kubernetes(test_app_config()), ProviderKind::Kubernetes),
        ("azure batch block", with_azure_batch(test_app_config()), ProviderKind::AzureBatch),
        (
            "both blocks",
            with_azure_batch(with_kubernetes(test_app_config())),
            ProviderKind::AzureBatch,
        ),
    ];

    for (name, config, expected) in cases {
        assert_eq!(select_provider_kind(&config), expected, "case: {name}");
    }
}

#[tokio::test]
async fn test_unreachable_batch_account_fails_provider_init() {
    let mut config = with_azure_batch(test_app_config());
    if let Some(batch) = config.azure_batch.as_mut() {
        batch.account_url = "http://127.0.0.1:9".to_string();
    }

    let err = match build_provider(&config).await {
        Ok(_) => panic!("provider should not initialize"),
        Err(err) => err,
    };
    assert!(err.is_fatal(), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_and_reconcile_keep_bookkeeping_consistent() {
    const DISPATCHES: usize = 40;
    const RECONCILERS: usize = 4;

    let config = test_app_config();
    let backend = InMemoryWorkloadBackend::new();
    backend.set_submit_delay(Some(Duration::from_millis(2)));
    let provider = Arc::new(WorkloadProvider::new(
        backend.clone(),
        ProviderSettings::from_config(&config),
    ));
    let sidecar = Arc::new(SidecarArgs::new().with("context.name", "thumbnailer"));
    let dispatching = Arc::new(AtomicBool::new(true));

    // Finishes every other workload while submissions are still arriving.
    let completer = {
        let backend = backend.clone();
        let dispatching = Arc::clone(&dispatching);
        tokio::spawn(async move {
            while dispatching.load(Ordering::SeqCst) {
                for id in backend.workload_ids().iter().step_by(2) {
                    backend.set_state(id, WorkloadState::Succeeded);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };
    let mut reconcilers = Vec::new();
    for _ in 0..RECONCILERS {
        let provider = Arc::clone(&provider);
        let dispatching = Arc::clone(&dispatching);
        reconcilers.push(tokio::spawn(async move {
            while dispatching.load(Ordering::SeqCst) {
                provider.reconcile().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }

    let mut probes = Vec::new();
    let mut handles = Vec::new();
    for i in 0..DISPATCHES {
        let message = MockMessage::new(
            &format!("m-{i}"),
            EventPayloadBuilder::new("ingest")
                .with_event_id(&format!("evt-{i}"))
                .build(),
        );
        probes.push(message.probe());
        let provider = Arc::clone(&provider);
        let sidecar = Arc::clone(&sidecar);
        handles.push(tokio::spawn(async move {
            provider.dispatch(&message, &sidecar).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    dispatching.store(false, Ordering::SeqCst);
    completer.await.unwrap();
    for handle in reconcilers {
        handle.await.unwrap();
    }

    for probe in &probes {
        assert_eq!(probe.applied(), vec![Resolution::Acknowledged]);
    }
    // Every workload is either still tracked and present, or gone from both.
    let tracked: HashSet<WorkloadId> = provider
        .in_flight()
        .await
        .into_iter()
        .map(|r| r.workload_id)
        .collect();
    let present: HashSet<WorkloadId> = backend.workload_ids().into_iter().collect();
    assert_eq!(tracked, present);
    let removed: HashSet<WorkloadId> = backend.removed().into_iter().collect();
    assert!(removed.is_disjoint(&present));
    assert_eq!(removed.len() + present.len(), DISPATCHES);

    for id in &present {
        backend.set_state(id, WorkloadState::Succeeded);
    }
    let report = provider.reconcile().await.unwrap();
    assert_eq!(report.completed.len(), present.len());
    assert!(provider.in_flight().await.is_empty());
    assert!(backend.workload_ids().is_empty());
}

#[tokio::test]
async fn test_workload_carries_composed_sidecar_args() {
    let config = test_app_config();
    let backend = InMemoryWorkloadBackend::new();
    let provider = WorkloadProvider::new(backend.clone(), ProviderSettings::from_config(&config));
    let keys = jobgate_core::AccessKeys {
        key_name: "dispatch".to_string(),
        key: "test-key".to_string(),
        endpoint: "amqp://broker:5672/".to_string(),
        queue: "jobgate.work".to_string(),
    };
    let sidecar = compose_sidecar_args(&config, &keys);
    let message = MockMessage::new(
        "m-1",
        EventPayloadBuilder::new("ingest")
            .with_event_id("evt-1")
            .with_correlation_id("corr-1")
            .build(),
    );

    provider.dispatch(&message, &sidecar).await.unwrap();

    let spec = &backend.submitted()[0];
    let args = &spec.sidecar_args;
    assert!(args.contains(&"--messaging.keyname=dispatch".to_string()));
    assert!(args.contains(&"--context.eventid=evt-1".to_string()));
    assert!(args.contains(&"--context.correlationid=corr-1".to_string()));
    assert!(args.contains(&"--context.eventtype=ingest".to_string()));
    assert_eq!(spec.module_image, config.module.image);
    assert_eq!(spec.sidecar_image, config.module.sidecar_image);
}
