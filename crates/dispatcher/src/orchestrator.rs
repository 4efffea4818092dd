use std::sync::Arc;
use std::time::Duration;

use jobgate_config::AppConfig;
use jobgate_core::{DispatcherError, DispatcherResult, Provider, QueueListener, SidecarArgs};
use jobgate_infrastructure::QueueListenerFactory;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backoff::RetryPolicy;
use crate::dispatch_loop::DispatchLoop;
use crate::provider_factory::build_provider;
use crate::reconcile_loop::ReconcileLoop;
use crate::shutdown::ShutdownManager;
use crate::sidecar::compose_sidecar_args;

enum FirstExit {
    Dispatch(DispatcherResult<()>),
    Reconcile(DispatcherResult<()>),
}

/// Composition root: one listener, one provider, both loops.
pub struct Orchestrator {
    config: AppConfig,
    listener: Arc<dyn QueueListener>,
    provider: Arc<dyn Provider>,
    sidecar: Arc<SidecarArgs>,
    shutdown: ShutdownManager,
}

impl Orchestrator {
    /// Builds the queue listener, derives the sidecar args from its access
    /// keys, then constructs the provider. Any failure aborts startup.
    pub async fn bootstrap(config: AppConfig, shutdown: ShutdownManager) -> DispatcherResult<Self> {
        let listener = QueueListenerFactory::create(&config.message_queue).await?;
        let provider = build_provider(&config).await.map_err(|e| match e {
            DispatcherError::ProviderInit(_) => e,
            other => DispatcherError::ProviderInit(other.to_string()),
        })?;
        Ok(Self::from_parts(config, listener, provider, shutdown))
    }

    pub fn from_parts(
        config: AppConfig,
        listener: Arc<dyn QueueListener>,
        provider: Arc<dyn Provider>,
        shutdown: ShutdownManager,
    ) -> Self {
        let sidecar = Arc::new(compose_sidecar_args(&config, listener.access_keys()));
        info!(
            "Provider: {}, 队列: {}, sidecar参数 {} 项",
            provider.name(),
            listener.access_keys().queue,
            sidecar.len()
        );
        Self {
            config,
            listener,
            provider,
            sidecar,
            shutdown,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn sidecar_args(&self) -> &SidecarArgs {
        &self.sidecar
    }

    /// Runs both loops until shutdown is requested or one of them fails.
    ///
    /// A failing loop triggers shutdown of the other; its error is returned.
    pub async fn run(self) -> DispatcherResult<()> {
        let dispatch = DispatchLoop::new(
            Arc::clone(&self.listener),
            Arc::clone(&self.provider),
            Arc::clone(&self.sidecar),
            RetryPolicy::from_config(&self.config.dispatcher.receive_retry),
        );
        let reconcile = ReconcileLoop::new(Arc::clone(&self.provider), &self.config.dispatcher);

        let mut dispatch_task = tokio::spawn(dispatch.run(self.shutdown.subscribe().await));
        let mut reconcile_task = tokio::spawn(reconcile.run(self.shutdown.subscribe().await));

        let first = tokio::select! {
            result = &mut dispatch_task => FirstExit::Dispatch(flatten("dispatch", result)),
            result = &mut reconcile_task => FirstExit::Reconcile(flatten("reconcile", result)),
        };

        let (first_result, remaining_name, remaining) = match first {
            FirstExit::Dispatch(result) => (result, "reconcile", reconcile_task),
            FirstExit::Reconcile(result) => (result, "dispatch", dispatch_task),
        };

        if let Err(e) = &first_result {
            error!("循环异常退出，停止其余循环: {}", e);
        }
        self.shutdown.shutdown().await;

        let grace = Duration::from_secs(self.config.dispatcher.shutdown_timeout_seconds);
        let remaining_result = join_with_timeout(remaining_name, remaining, grace).await;

        info!("分发服务已停止");
        first_result.and(remaining_result)
    }
}

fn flatten(
    name: &str,
    joined: Result<DispatcherResult<()>, tokio::task::JoinError>,
) -> DispatcherResult<()> {
    joined.unwrap_or_else(|e| Err(DispatcherError::Internal(format!("{name} 循环异常终止: {e}"))))
}

async fn join_with_timeout(
    name: &str,
    mut handle: JoinHandle<DispatcherResult<()>>,
    grace: Duration,
) -> DispatcherResult<()> {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => flatten(name, joined),
        Err(_) => {
            warn!("{} 循环未在 {}s 内停止，强制中止", name, grace.as_secs());
            handle.abort();
            Ok(())
        }
    }
}
