use anyhow::{Context, Result};
use jobgate_config::AppConfig;
use jobgate_dispatcher::{Orchestrator, ShutdownManager};
use tracing::{error, info};

use crate::common::wait_for_shutdown_signal;

/// 主应用程序
pub struct Application {
    orchestrator: Orchestrator,
    shutdown: ShutdownManager,
}

impl Application {
    /// 创建新的应用实例：连接消息队列并初始化Provider
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化应用程序，模块: {}, provider: {}",
            config.module.name,
            config.provider_kind()
        );

        let shutdown = ShutdownManager::new();
        let orchestrator = Orchestrator::bootstrap(config, shutdown.clone())
            .await
            .context("初始化分发服务失败")?;

        Ok(Self {
            orchestrator,
            shutdown,
        })
    }

    /// Runs until a termination signal arrives or a loop fails.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let mut run = tokio::spawn(self.orchestrator.run());

        let result = tokio::select! {
            result = &mut run => result,
            _ = wait_for_shutdown_signal() => {
                info!("收到关闭信号，开始优雅关闭...");
                shutdown.shutdown().await;
                run.await
            }
        };

        match result {
            Ok(Ok(())) => {
                info!("应用已优雅关闭");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("应用运行失败: {e}");
                Err(e.into())
            }
            Err(e) => Err(anyhow::anyhow!("分发服务任务异常终止: {e}")),
        }
    }
}
