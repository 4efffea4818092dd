//! In-memory test doubles for the queue, provider and backend traits.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobgate_core::{
    AccessKeys, DispatcherError, DispatcherResult, InFlightRecord, ObservedWorkload, Provider,
    QueueListener, QueueMessage, ReceiveError, ReconcileReport, Resolution, ResolutionGuard,
    SidecarArgs, WorkloadBackend, WorkloadId, WorkloadSpec, WorkloadState,
};

#[derive(Debug, Default)]
struct MessageLog {
    attempts: Vec<Resolution>,
    applied: Vec<Resolution>,
    reject_reasons: Vec<String>,
}

/// Handle for inspecting a [`MockMessage`] after it has been boxed and
/// handed to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MessageProbe {
    log: Arc<Mutex<MessageLog>>,
}

impl MessageProbe {
    /// Every resolution call, including refused ones.
    pub fn attempts(&self) -> Vec<Resolution> {
        self.log.lock().unwrap().attempts.clone()
    }

    /// Resolutions that actually reached the "transport".
    pub fn applied(&self) -> Vec<Resolution> {
        self.log.lock().unwrap().applied.clone()
    }

    pub fn reject_reasons(&self) -> Vec<String> {
        self.log.lock().unwrap().reject_reasons.clone()
    }
}

/// Mock queue message that records resolution calls
#[derive(Debug)]
pub struct MockMessage {
    id: String,
    payload: Vec<u8>,
    delivery_count: u32,
    lock_token: Option<String>,
    guard: ResolutionGuard,
    log: Arc<Mutex<MessageLog>>,
}

impl MockMessage {
    pub fn new(id: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.to_string(),
            payload: payload.into(),
            delivery_count: 1,
            lock_token: None,
            guard: ResolutionGuard::new(),
            log: Arc::default(),
        }
    }

    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    pub fn with_lock_token(mut self, token: &str) -> Self {
        self.lock_token = Some(token.to_string());
        self
    }

    pub fn probe(&self) -> MessageProbe {
        MessageProbe {
            log: Arc::clone(&self.log),
        }
    }

    fn resolve(&self, resolution: Resolution) -> DispatcherResult<()> {
        self.log.lock().unwrap().attempts.push(resolution);
        self.guard.claim(&self.id, resolution)?;
        self.log.lock().unwrap().applied.push(resolution);
        Ok(())
    }
}

#[async_trait]
impl QueueMessage for MockMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    fn lock_token(&self) -> Option<&str> {
        self.lock_token.as_deref()
    }

    fn resolution(&self) -> Option<Resolution> {
        self.guard.current()
    }

    async fn acknowledge(&self) -> DispatcherResult<()> {
        self.resolve(Resolution::Acknowledged)
    }

    async fn release(&self) -> DispatcherResult<()> {
        self.resolve(Resolution::Released)
    }

    async fn reject(&self, reason: &str) -> DispatcherResult<()> {
        self.resolve(Resolution::Rejected)?;
        self.log
            .lock()
            .unwrap()
            .reject_reasons
            .push(reason.to_string());
        Ok(())
    }
}

/// One scripted outcome of `receive`.
pub enum ScriptedReceive {
    Message(MockMessage),
    TransportError(String),
    Closed,
}

/// Queue listener that replays a script, then either blocks forever or
/// reports the stream closed.
pub struct ScriptedQueueListener {
    script: tokio::sync::Mutex<VecDeque<ScriptedReceive>>,
    close_when_exhausted: bool,
    receive_calls: AtomicUsize,
    access_keys: AccessKeys,
}

impl ScriptedQueueListener {
    pub fn new(script: Vec<ScriptedReceive>) -> Self {
        Self {
            script: tokio::sync::Mutex::new(script.into()),
            close_when_exhausted: false,
            receive_calls: AtomicUsize::new(0),
            access_keys: AccessKeys {
                key_name: "dispatch".to_string(),
                key: "test-key".to_string(),
                endpoint: "amqp://localhost:5672/%2f".to_string(),
                queue: "jobgate.work".to_string(),
            },
        }
    }

    pub fn close_when_exhausted(mut self) -> Self {
        self.close_when_exhausted = true;
        self
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueListener for ScriptedQueueListener {
    async fn receive(&self) -> Result<Box<dyn QueueMessage>, ReceiveError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();
        match next {
            Some(ScriptedReceive::Message(message)) => {
                Ok(Box::new(message) as Box<dyn QueueMessage>)
            }
            Some(ScriptedReceive::TransportError(reason)) => Err(ReceiveError::Transport(reason)),
            Some(ScriptedReceive::Closed) => Err(ReceiveError::Closed),
            None if self.close_when_exhausted => Err(ReceiveError::Closed),
            None => std::future::pending().await,
        }
    }

    fn access_keys(&self) -> &AccessKeys {
        &self.access_keys
    }
}

/// How [`MockProvider::dispatch`] treats each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchBehavior {
    Acknowledge,
    ReleaseAndFail,
    RejectAndFail,
    /// Returns an error without resolving the message.
    FailUnresolved,
}

/// Mock provider that records calls
pub struct MockProvider {
    behavior: Mutex<DispatchBehavior>,
    dispatched: Mutex<Vec<String>>,
    sidecar_seen: Mutex<Vec<SidecarArgs>>,
    reconcile_script: Mutex<VecDeque<DispatcherResult<ReconcileReport>>>,
    reconcile_calls: Mutex<Vec<tokio::time::Instant>>,
    reconcile_delay: Mutex<Option<Duration>>,
    dispatch_delay: Mutex<Option<Duration>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(DispatchBehavior::Acknowledge),
            dispatched: Mutex::default(),
            sidecar_seen: Mutex::default(),
            reconcile_script: Mutex::default(),
            reconcile_calls: Mutex::default(),
            reconcile_delay: Mutex::default(),
            dispatch_delay: Mutex::default(),
        }
    }

    pub fn with_behavior(self, behavior: DispatchBehavior) -> Self {
        *self.behavior.lock().unwrap() = behavior;
        self
    }

    pub fn with_reconcile_delay(self, delay: Duration) -> Self {
        *self.reconcile_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Makes every dispatch take `delay` before resolving the message.
    pub fn with_dispatch_delay(self, delay: Duration) -> Self {
        *self.dispatch_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Queues reconcile outcomes; once drained every pass succeeds.
    pub fn push_reconcile_result(&self, result: DispatcherResult<ReconcileReport>) {
        self.reconcile_script.lock().unwrap().push_back(result);
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn sidecar_seen(&self) -> Vec<SidecarArgs> {
        self.sidecar_seen.lock().unwrap().clone()
    }

    pub fn reconcile_calls(&self) -> Vec<tokio::time::Instant> {
        self.reconcile_calls.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn dispatch(
        &self,
        message: &dyn QueueMessage,
        sidecar: &SidecarArgs,
    ) -> DispatcherResult<()> {
        self.dispatched.lock().unwrap().push(message.id().to_string());
        self.sidecar_seen.lock().unwrap().push(sidecar.clone());

        let delay = *self.dispatch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            DispatchBehavior::Acknowledge => message.acknowledge().await,
            DispatchBehavior::ReleaseAndFail => {
                message.release().await?;
                Err(DispatcherError::Backend("quota exceeded".to_string()))
            }
            DispatchBehavior::RejectAndFail => {
                message.reject("unprocessable").await?;
                Err(DispatcherError::InvalidPayload("unprocessable".to_string()))
            }
            DispatchBehavior::FailUnresolved => {
                Err(DispatcherError::Backend("connection reset".to_string()))
            }
        }
    }

    async fn reconcile(&self) -> DispatcherResult<ReconcileReport> {
        self.reconcile_calls
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let delay = *self.reconcile_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.reconcile_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(ReconcileReport::default()))
    }

    async fn in_flight(&self) -> Vec<InFlightRecord> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
struct StoredWorkload {
    spec: WorkloadSpec,
    state: WorkloadState,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BackendState {
    workloads: BTreeMap<WorkloadId, StoredWorkload>,
    submitted: Vec<WorkloadSpec>,
    removed: Vec<WorkloadId>,
}

/// Compute backend kept in memory. Clones share state, so a test can keep
/// one handle while the provider owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkloadBackend {
    state: Arc<Mutex<BackendState>>,
    fail_submit: Arc<AtomicBool>,
    fail_list: Arc<AtomicBool>,
    fail_remove: Arc<AtomicBool>,
    submit_delay: Arc<Mutex<Option<Duration>>>,
    remove_delay: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryWorkloadBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    pub fn set_remove_delay(&self, delay: Option<Duration>) {
        *self.remove_delay.lock().unwrap() = delay;
    }

    pub fn set_state(&self, id: &WorkloadId, state: WorkloadState) {
        if let Some(workload) = self.state.lock().unwrap().workloads.get_mut(id) {
            workload.state = state;
        }
    }

    pub fn set_created_at(&self, id: &WorkloadId, created_at: DateTime<Utc>) {
        if let Some(workload) = self.state.lock().unwrap().workloads.get_mut(id) {
            workload.created_at = created_at;
        }
    }

    /// Simulates the workload vanishing without the dispatcher's help.
    pub fn forget(&self, id: &WorkloadId) {
        self.state.lock().unwrap().workloads.remove(id);
    }

    pub fn workload_ids(&self) -> Vec<WorkloadId> {
        self.state.lock().unwrap().workloads.keys().cloned().collect()
    }

    pub fn submitted(&self) -> Vec<WorkloadSpec> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn removed(&self) -> Vec<WorkloadId> {
        self.state.lock().unwrap().removed.clone()
    }
}

#[async_trait]
impl WorkloadBackend for InMemoryWorkloadBackend {
    fn kind(&self) -> &'static str {
        "in_memory"
    }

    async fn submit(&self, spec: &WorkloadSpec) -> DispatcherResult<WorkloadId> {
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(DispatcherError::Backend("submit refused".to_string()));
        }

        let id = WorkloadId::new(spec.name.clone());
        let mut state = self.state.lock().unwrap();
        state.submitted.push(spec.clone());
        state.workloads.insert(
            id.clone(),
            StoredWorkload {
                spec: spec.clone(),
                state: WorkloadState::Running,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn list_owned(&self) -> DispatcherResult<Vec<ObservedWorkload>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(DispatcherError::Backend("control plane unavailable".to_string()));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .workloads
            .iter()
            .map(|(id, w)| ObservedWorkload {
                id: id.clone(),
                state: w.state,
                created_at: w.created_at,
            })
            .collect())
    }

    async fn remove(&self, id: &WorkloadId) -> DispatcherResult<()> {
        let delay = *self.remove_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(DispatcherError::Backend("delete refused".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.workloads.remove(id);
        state.removed.push(id.clone());
        Ok(())
    }
}

impl InMemoryWorkloadBackend {
    pub fn spec_of(&self, id: &WorkloadId) -> Option<WorkloadSpec> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(id)
            .map(|w| w.spec.clone())
    }
}
