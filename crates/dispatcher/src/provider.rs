use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobgate_config::AppConfig;
use jobgate_core::{
    sanitize_label_value, DispatchEvent, DispatcherError, DispatcherResult, InFlightRecord,
    Provider, QueueMessage, ReconcileReport, SidecarArgs, WorkloadBackend, WorkloadId,
    WorkloadSpec, WorkloadState, LABEL_CORRELATION_ID, LABEL_EVENT_ID, LABEL_MANAGED_BY,
    LABEL_MODULE, MANAGED_BY_VALUE,
};
use jobgate_infrastructure::{AzureBatchBackend, KubernetesBackend};
use metrics::{counter, gauge};
use rand::{distr::Alphanumeric, Rng};
use tracing::{debug, info, warn};

use crate::in_flight::InFlightStore;
use crate::telemetry::{MESSAGES_REJECTED, WORKLOADS_CLEANED, WORKLOADS_IN_FLIGHT};

pub type KubernetesProvider = WorkloadProvider<KubernetesBackend>;
pub type AzureBatchProvider = WorkloadProvider<AzureBatchBackend>;

const NAME_SUFFIX_LEN: usize = 6;

/// The knobs of [`WorkloadProvider`] that come from configuration.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub module: String,
    pub module_image: String,
    pub sidecar_image: String,
    pub max_running_minutes: u64,
    pub max_delivery_count: u32,
    pub submit_timeout: Duration,
    /// Bound on each list / remove call made during reconciliation.
    pub backend_call_timeout: Duration,
    /// Removal time one pass may spend before deferring the rest.
    pub reconcile_budget: Duration,
    pub orphan_grace: Duration,
}

impl ProviderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            module: config.module.name.clone(),
            module_image: config.module.image.clone(),
            sidecar_image: config.module.sidecar_image.clone(),
            max_running_minutes: config.module.max_running_minutes,
            max_delivery_count: config.dispatcher.max_delivery_count,
            submit_timeout: Duration::from_secs(config.dispatcher.submit_timeout_seconds),
            backend_call_timeout: Duration::from_secs(config.dispatcher.reconcile_timeout_seconds),
            reconcile_budget: Duration::from_secs(config.dispatcher.reconcile_budget_seconds),
            orphan_grace: Duration::from_secs(config.dispatcher.orphan_grace_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cleanup {
    Completed,
    Failed,
    Expired,
}

/// Dispatch and reconciliation over any [`WorkloadBackend`].
///
/// The provider owns the in-flight bookkeeping; the backend only
/// translates. The Kubernetes and Azure Batch providers are this type with a
/// different backend plugged in.
pub struct WorkloadProvider<B> {
    backend: B,
    settings: ProviderSettings,
    in_flight: InFlightStore,
}

impl<B: WorkloadBackend> WorkloadProvider<B> {
    pub fn new(backend: B, settings: ProviderSettings) -> Self {
        Self {
            backend,
            settings,
            in_flight: InFlightStore::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// `<module>-<short event id>-<random>`, lowercase and DNS safe.
    fn workload_name(&self, event: &DispatchEvent) -> String {
        let mut short_id = event.short_event_id();
        if short_id.is_empty() {
            short_id = "evt".to_string();
        }
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NAME_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("{}-{}-{}", self.settings.module, short_id, suffix)
    }

    pub fn build_spec(&self, event: &DispatchEvent, sidecar: &SidecarArgs) -> WorkloadSpec {
        let context = &event.context;

        let mut env = BTreeMap::new();
        env.insert("JOBGATE_MODULE".to_string(), self.settings.module.clone());
        env.insert("JOBGATE_EVENT_TYPE".to_string(), event.event_type.clone());
        env.insert("JOBGATE_EVENT_ID".to_string(), context.event_id.clone());
        env.insert("JOBGATE_CORRELATION_ID".to_string(), context.correlation_id.clone());
        if !context.parent_event_id.is_empty() {
            env.insert("JOBGATE_PARENT_EVENT_ID".to_string(), context.parent_event_id.clone());
        }
        if !event.files.is_empty() {
            env.insert("JOBGATE_FILES".to_string(), event.files.join(","));
        }
        if !event.data.is_empty() {
            if let Ok(data) = serde_json::to_string(&event.data) {
                env.insert("JOBGATE_EVENT_DATA".to_string(), data);
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
        labels.insert(LABEL_MODULE.to_string(), self.settings.module.clone());
        for (label, value) in [
            (LABEL_EVENT_ID, &context.event_id),
            (LABEL_CORRELATION_ID, &context.correlation_id),
        ] {
            let value = sanitize_label_value(value);
            if !value.is_empty() {
                labels.insert(label.to_string(), value);
            }
        }

        WorkloadSpec {
            name: self.workload_name(event),
            module: self.settings.module.clone(),
            module_image: self.settings.module_image.clone(),
            sidecar_image: self.settings.sidecar_image.clone(),
            sidecar_args: sidecar.for_event(event),
            env,
            labels,
            event_id: context.event_id.clone(),
            correlation_id: context.correlation_id.clone(),
            max_running_minutes: self.settings.max_running_minutes,
        }
    }

    async fn reject(&self, message: &dyn QueueMessage, cause: &DispatcherError) {
        counter!(MESSAGES_REJECTED).increment(1);
        if let Err(e) = message.reject(&cause.to_string()).await {
            warn!(message_id = message.id(), error = %e, "拒绝消息失败");
        }
    }

    async fn release(&self, message: &dyn QueueMessage) {
        if let Err(e) = message.release().await {
            warn!(message_id = message.id(), error = %e, "释放消息失败");
        }
    }

    async fn remove_workload(&self, id: &WorkloadId) -> DispatcherResult<()> {
        match tokio::time::timeout(self.settings.backend_call_timeout, self.backend.remove(id)).await
        {
            Ok(result) => result,
            Err(_) => Err(DispatcherError::BackendTimeout {
                operation: format!("remove {id}"),
                seconds: self.settings.backend_call_timeout.as_secs(),
            }),
        }
    }

    fn cleanup_for(&self, state: WorkloadState, age: chrono::Duration) -> Option<Cleanup> {
        let max_age = chrono::Duration::minutes(
            i64::try_from(self.settings.max_running_minutes).unwrap_or(i64::MAX / 60_000),
        );
        match state {
            WorkloadState::Succeeded => Some(Cleanup::Completed),
            WorkloadState::Failed => Some(Cleanup::Failed),
            WorkloadState::Pending | WorkloadState::Running if age > max_age => {
                Some(Cleanup::Expired)
            }
            WorkloadState::Pending | WorkloadState::Running => None,
        }
    }
}

#[async_trait]
impl<B: WorkloadBackend> Provider for WorkloadProvider<B> {
    fn name(&self) -> &'static str {
        self.backend.kind()
    }

    async fn dispatch(&self, message: &dyn QueueMessage, sidecar: &SidecarArgs) -> DispatcherResult<()> {
        if message.delivery_count() > self.settings.max_delivery_count {
            let err = DispatcherError::DeliveryLimitExceeded {
                id: message.id().to_string(),
                delivery_count: message.delivery_count(),
                max: self.settings.max_delivery_count,
            };
            self.reject(message, &err).await;
            return Err(err);
        }

        let event = match DispatchEvent::from_payload(message.payload()) {
            Ok(event) => event,
            Err(err) => {
                self.reject(message, &err).await;
                return Err(err);
            }
        };

        let spec = self.build_spec(&event, sidecar);
        let submitted =
            tokio::time::timeout(self.settings.submit_timeout, self.backend.submit(&spec)).await;
        let workload_id = match submitted {
            Ok(Ok(id)) => id,
            Ok(Err(err)) => {
                self.release(message).await;
                return Err(err);
            }
            Err(_) => {
                self.release(message).await;
                return Err(DispatcherError::BackendTimeout {
                    operation: format!("submit {}", spec.name),
                    seconds: self.settings.submit_timeout.as_secs(),
                });
            }
        };

        let tracked = self
            .in_flight
            .insert(InFlightRecord {
                workload_id: workload_id.clone(),
                message_id: message.id().to_string(),
                event_id: event.context.event_id.clone(),
                correlation_id: event.context.correlation_id.clone(),
                dispatched_at: Utc::now(),
            })
            .await;
        if !tracked {
            debug!(workload = %workload_id, "工作负载在登记前已被清理");
        }
        gauge!(WORKLOADS_IN_FLIGHT).set(self.in_flight.len().await as f64);

        message.acknowledge().await?;

        info!(
            message_id = message.id(),
            workload = %workload_id,
            event_type = %event.event_type,
            correlation_id = %event.context.correlation_id,
            "已提交{}工作负载",
            self.backend.kind()
        );
        Ok(())
    }

    async fn reconcile(&self) -> DispatcherResult<ReconcileReport> {
        let started = tokio::time::Instant::now();
        let observed = match tokio::time::timeout(
            self.settings.backend_call_timeout,
            self.backend.list_owned(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(DispatcherError::BackendTimeout {
                    operation: "list".to_string(),
                    seconds: self.settings.backend_call_timeout.as_secs(),
                })
            }
        };

        let now = Utc::now();
        let mut report = ReconcileReport {
            observed: observed.len(),
            ..Default::default()
        };
        let mut seen = HashSet::with_capacity(observed.len());

        for workload in observed {
            seen.insert(workload.id.clone());
            let Some(cleanup) = self.cleanup_for(workload.state, now - workload.created_at) else {
                continue;
            };
            if started.elapsed() >= self.settings.reconcile_budget {
                report.deferred += 1;
                continue;
            }

            match self.remove_workload(&workload.id).await {
                Ok(()) => {
                    self.in_flight.remove(&workload.id).await;
                    debug!(workload = %workload.id, ?cleanup, "已清理工作负载");
                    match cleanup {
                        Cleanup::Completed => report.completed.push(workload.id),
                        Cleanup::Failed => report.failed.push(workload.id),
                        Cleanup::Expired => report.expired.push(workload.id),
                    }
                }
                Err(e) => {
                    warn!(workload = %workload.id, error = %e, "清理工作负载失败，下一轮重试");
                    report.removal_failures += 1;
                }
            }
        }

        if report.deferred > 0 {
            info!(
                deferred = report.deferred,
                budget = self.settings.reconcile_budget.as_secs(),
                "本轮协调时间用尽，剩余清理留待下一轮"
            );
        }

        let grace = chrono::Duration::from_std(self.settings.orphan_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        report.orphaned = self.in_flight.drop_unobserved(&seen, now - grace).await;
        for id in &report.orphaned {
            warn!(workload = %id, "后端已不存在该工作负载，移出在途记录");
        }

        counter!(WORKLOADS_CLEANED).increment(report.cleaned_up() as u64);
        gauge!(WORKLOADS_IN_FLIGHT).set(self.in_flight.len().await as f64);
        Ok(report)
    }

    async fn in_flight(&self) -> Vec<InFlightRecord> {
        self.in_flight.snapshot().await
    }
}
