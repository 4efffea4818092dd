use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobgate_config::AzureBatchConfig;
use jobgate_core::{
    DispatcherError, DispatcherResult, ObservedWorkload, WorkloadBackend, WorkloadId,
    WorkloadSpec, WorkloadState,
};
use reqwest::{header::CONTENT_TYPE, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const BATCH_CONTENT_TYPE: &str = "application/json; odata=minimalmetadata";
pub const MODULE_IMAGE_ENV: &str = "JOBGATE_MODULE_IMAGE";
/// Environment setting that marks which module owns a task.
pub const OWNER_ENV: &str = "JOBGATE_MODULE";

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(default)]
    value: Vec<BatchTask>,
    #[serde(rename = "odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchTask {
    id: String,
    #[serde(default)]
    state: String,
    creation_time: Option<DateTime<Utc>>,
    execution_info: Option<ExecutionInfo>,
    #[serde(default)]
    environment_settings: Vec<EnvironmentSetting>,
}

impl BatchTask {
    fn owner(&self) -> Option<&str> {
        self.environment_settings
            .iter()
            .find(|setting| setting.name == OWNER_ENV)
            .and_then(|setting| setting.value.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct EnvironmentSetting {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionInfo {
    result: Option<String>,
    exit_code: Option<i32>,
}

/// Azure Batch计算后端
///
/// Talks to the Batch REST API directly. Every dispatched event becomes one
/// task in a long-lived job bound to the configured pool; the task runs the
/// sidecar image, which starts the module image named in
/// `JOBGATE_MODULE_IMAGE` on the node. Tasks are owned by the module named in
/// their `JOBGATE_MODULE` environment setting, since several modules may
/// share one job.
pub struct AzureBatchBackend {
    client: reqwest::Client,
    config: AzureBatchConfig,
    module: String,
}

impl AzureBatchBackend {
    /// Builds the client and makes sure the configured job exists.
    pub async fn connect(config: &AzureBatchConfig, module: &str) -> DispatcherResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DispatcherError::ProviderInit(format!("创建HTTP客户端失败: {e}")))?;

        let backend = Self {
            client,
            config: config.clone(),
            module: module.to_string(),
        };
        backend
            .ensure_job()
            .await
            .map_err(|e| DispatcherError::ProviderInit(e.to_string()))?;

        info!(
            "已连接Azure Batch账户 {}, 作业: {}, 池: {}",
            config.account_url, config.job_id, config.pool_id
        );
        Ok(backend)
    }

    fn url(&self, path: &str) -> String {
        batch_url(&self.config, path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.access_token)
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
    }

    async fn ensure_job(&self) -> DispatcherResult<()> {
        let job_url = self.url(&format!("jobs/{}", self.config.job_id));
        let response = self
            .request(Method::GET, &job_url)
            .send()
            .await
            .map_err(|e| DispatcherError::Network(format!("查询Batch作业失败: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                debug!("Batch作业 {} 已存在", self.config.job_id);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let body = json!({
                    "id": self.config.job_id,
                    "poolInfo": { "poolId": self.config.pool_id },
                });
                let response = self
                    .request(Method::POST, &self.url("jobs"))
                    .body(body.to_string())
                    .send()
                    .await
                    .map_err(|e| DispatcherError::Network(format!("创建Batch作业失败: {e}")))?;
                // 409 means another dispatcher created it first
                if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                    info!("已创建Batch作业 {}", self.config.job_id);
                    Ok(())
                } else {
                    Err(status_error("创建Batch作业", response).await)
                }
            }
            _ => Err(status_error("查询Batch作业", response).await),
        }
    }
}

#[async_trait]
impl WorkloadBackend for AzureBatchBackend {
    fn kind(&self) -> &'static str {
        "azure_batch"
    }

    async fn submit(&self, spec: &WorkloadSpec) -> DispatcherResult<WorkloadId> {
        let tasks_url = self.url(&format!("jobs/{}/tasks", self.config.job_id));
        let response = self
            .request(Method::POST, &tasks_url)
            .body(task_body(spec).to_string())
            .send()
            .await
            .map_err(|e| DispatcherError::Network(format!("提交Batch任务失败: {e}")))?;

        if !response.status().is_success() {
            return Err(status_error(&format!("提交Batch任务 {}", spec.name), response).await);
        }
        debug!("Batch任务 {} 已提交到作业 {}", spec.name, self.config.job_id);
        Ok(WorkloadId::new(spec.name.clone()))
    }

    async fn list_owned(&self) -> DispatcherResult<Vec<ObservedWorkload>> {
        let mut next = Some(format!(
            "{}&$select=id,state,creationTime,executionInfo,environmentSettings",
            self.url(&format!("jobs/{}/tasks", self.config.job_id))
        ));
        let mut observed = Vec::new();

        while let Some(page_url) = next.take() {
            let response = self
                .request(Method::GET, &page_url)
                .send()
                .await
                .map_err(|e| DispatcherError::Network(format!("列出Batch任务失败: {e}")))?;
            if !response.status().is_success() {
                return Err(status_error("列出Batch任务", response).await);
            }
            let page: TaskList = response
                .json()
                .await
                .map_err(|e| DispatcherError::Serialization(format!("解析Batch任务列表失败: {e}")))?;

            observed.extend(owned_tasks(page.value, &self.module));
            next = page.next_link;
        }

        Ok(observed)
    }

    async fn remove(&self, id: &WorkloadId) -> DispatcherResult<()> {
        let task_url = self.url(&format!("jobs/{}/tasks/{}", self.config.job_id, id));
        let response = self
            .request(Method::DELETE, &task_url)
            .send()
            .await
            .map_err(|e| DispatcherError::Network(format!("删除Batch任务失败: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("Batch任务 {} 已不存在", id);
                Ok(())
            }
            _ => Err(status_error(&format!("删除Batch任务 {id}"), response).await),
        }
    }
}

async fn status_error(operation: &str, response: reqwest::Response) -> DispatcherError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    DispatcherError::Backend(format!("{operation}失败: HTTP {status} - {body}"))
}

fn batch_url(config: &AzureBatchConfig, path: &str) -> String {
    format!(
        "{}/{}?api-version={}",
        config.account_url.trim_end_matches('/'),
        path,
        config.api_version
    )
}

/// Request body for `POST /jobs/{job}/tasks`.
fn task_body(spec: &WorkloadSpec) -> Value {
    let mut environment: Vec<Value> = spec
        .env
        .iter()
        .filter(|(name, _)| name.as_str() != OWNER_ENV && name.as_str() != MODULE_IMAGE_ENV)
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    environment.push(json!({ "name": OWNER_ENV, "value": spec.module }));
    environment.push(json!({ "name": MODULE_IMAGE_ENV, "value": spec.module_image }));

    json!({
        "id": spec.name,
        "displayName": format!("{} {}", spec.module, spec.event_id),
        "commandLine": shell_join(&spec.sidecar_args),
        "containerSettings": {
            "imageName": spec.sidecar_image,
            "containerRunOptions": "--rm",
        },
        "environmentSettings": environment,
        "constraints": {
            "maxWallClockTime": format!("PT{}M", spec.max_running_minutes),
            "maxTaskRetryCount": 0,
        },
    })
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn owned_tasks(tasks: Vec<BatchTask>, module: &str) -> Vec<ObservedWorkload> {
    tasks
        .into_iter()
        .filter(|task| task.owner() == Some(module))
        .map(|task| ObservedWorkload {
            state: task_state(&task.state, task.execution_info.as_ref()),
            created_at: task.creation_time.unwrap_or_else(Utc::now),
            id: WorkloadId::new(task.id),
        })
        .collect()
}

fn task_state(state: &str, execution: Option<&ExecutionInfo>) -> WorkloadState {
    match state {
        "running" => WorkloadState::Running,
        "completed" => {
            let result = execution.and_then(|e| e.result.as_deref());
            let exit_code = execution.and_then(|e| e.exit_code);
            match (result, exit_code) {
                (Some("success"), _) => WorkloadState::Succeeded,
                (Some(_), _) => WorkloadState::Failed,
                (None, Some(0)) => WorkloadState::Succeeded,
                (None, _) => WorkloadState::Failed,
            }
        }
        _ => WorkloadState::Pending,
    }
}
