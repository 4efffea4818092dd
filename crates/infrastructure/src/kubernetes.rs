use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use jobgate_config::KubernetesConfig;
use jobgate_core::{
    ownership_selector, DispatcherError, DispatcherResult, ObservedWorkload, WorkloadBackend,
    WorkloadId, WorkloadSpec, WorkloadState,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, LocalObjectReference, PodSpec, PodTemplateSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use tracing::{debug, info};

pub const WORKSPACE_VOLUME: &str = "workspace";
/// Shared by both containers; the module writes `out/blobs`, `out/meta.json`
/// and `out/events` here for the sidecar to commit.
pub const WORKSPACE_MOUNT_PATH: &str = "/workspace";
pub const SIDECAR_CONTAINER: &str = "sidecar";
pub const MODULE_CONTAINER: &str = "module";

/// Runs each dispatched event as a `batch/v1` Job in one namespace.
pub struct KubernetesBackend {
    jobs: Api<Job>,
    config: KubernetesConfig,
    selector: String,
}

impl KubernetesBackend {
    /// Connects with the in-cluster service account or the local kubeconfig.
    pub async fn connect(config: &KubernetesConfig, module: &str) -> DispatcherResult<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| DispatcherError::ProviderInit(format!("无法创建Kubernetes客户端: {e}")))?;
        info!(
            "已连接Kubernetes集群，命名空间: {}, 模块: {}",
            config.namespace, module
        );
        Ok(Self::with_client(client, config, module))
    }

    pub fn with_client(client: kube::Client, config: &KubernetesConfig, module: &str) -> Self {
        Self {
            jobs: Api::namespaced(client, &config.namespace),
            config: config.clone(),
            selector: ownership_selector(module),
        }
    }
}

#[async_trait]
impl WorkloadBackend for KubernetesBackend {
    fn kind(&self) -> &'static str {
        "kubernetes"
    }

    async fn submit(&self, spec: &WorkloadSpec) -> DispatcherResult<WorkloadId> {
        let job = build_job(spec, &self.config);
        let created = self
            .jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| DispatcherError::Backend(format!("创建Job {} 失败: {e}", spec.name)))?;

        let name = created.metadata.name.unwrap_or_else(|| spec.name.clone());
        debug!("Job {} 已提交到命名空间 {}", name, self.config.namespace);
        Ok(WorkloadId::new(name))
    }

    async fn list_owned(&self) -> DispatcherResult<Vec<ObservedWorkload>> {
        let jobs = self
            .jobs
            .list(&ListParams::default().labels(&self.selector))
            .await
            .map_err(|e| DispatcherError::Backend(format!("列出Job失败: {e}")))?;

        Ok(jobs
            .items
            .iter()
            .filter_map(|job| {
                let name = job.metadata.name.clone()?;
                Some(ObservedWorkload {
                    id: WorkloadId::new(name),
                    state: job_state(job),
                    created_at: job
                        .metadata
                        .creation_timestamp
                        .as_ref()
                        .map(|t| t.0)
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect())
    }

    async fn remove(&self, id: &WorkloadId) -> DispatcherResult<()> {
        match self.jobs.delete(id.as_str(), &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!("Job {} 已不存在", id);
                Ok(())
            }
            Err(e) => Err(DispatcherError::Backend(format!("删除Job {id} 失败: {e}"))),
        }
    }
}

/// Translates a workload spec into the Job manifest submitted to the cluster.
pub fn build_job(spec: &WorkloadSpec, config: &KubernetesConfig) -> Job {
    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect();

    let workspace_mount = VolumeMount {
        name: WORKSPACE_VOLUME.to_string(),
        mount_path: WORKSPACE_MOUNT_PATH.to_string(),
        ..Default::default()
    };

    let mut limits = BTreeMap::new();
    if let Some(cpu) = &config.cpu_limit {
        limits.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &config.memory_limit {
        limits.insert("memory".to_string(), Quantity(memory.clone()));
    }
    let resources = (!limits.is_empty()).then(|| ResourceRequirements {
        limits: Some(limits),
        ..Default::default()
    });

    let sidecar = Container {
        name: SIDECAR_CONTAINER.to_string(),
        image: Some(spec.sidecar_image.clone()),
        args: Some(spec.sidecar_args.clone()),
        env: Some(env.clone()),
        volume_mounts: Some(vec![workspace_mount.clone()]),
        ..Default::default()
    };

    let module = Container {
        name: MODULE_CONTAINER.to_string(),
        image: Some(spec.module_image.clone()),
        env: Some(env),
        volume_mounts: Some(vec![workspace_mount]),
        resources,
        ..Default::default()
    };

    let deadline_seconds = i64::try_from(spec.max_running_minutes.saturating_mul(60)).ok();

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: deadline_seconds,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![sidecar, module],
                    restart_policy: Some("Never".to_string()),
                    volumes: Some(vec![Volume {
                        name: WORKSPACE_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    image_pull_secrets: config.image_pull_secret.as_ref().map(|secret| {
                        vec![LocalObjectReference {
                            name: secret.clone(),
                        }]
                    }),
                    service_account_name: config.service_account.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Job conditions win over counters; a Job with no pods yet is pending.
pub fn job_state(job: &Job) -> WorkloadState {
    let Some(status) = job.status.as_ref() else {
        return WorkloadState::Pending;
    };

    let condition_true = |kind: &str| {
        status.conditions.as_ref().is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == kind && c.status == "True")
        })
    };

    if condition_true("Complete") {
        WorkloadState::Succeeded
    } else if condition_true("Failed") {
        WorkloadState::Failed
    } else if status.succeeded.unwrap_or(0) > 0 {
        WorkloadState::Succeeded
    } else if status.failed.unwrap_or(0) > 0 {
        WorkloadState::Failed
    } else if status.active.unwrap_or(0) > 0 {
        WorkloadState::Running
    } else {
        WorkloadState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgate_core::{LABEL_MANAGED_BY, LABEL_MODULE};
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn spec() -> WorkloadSpec {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), "jobgate".to_string());
        labels.insert(LABEL_MODULE.to_string(), "thumbnailer".to_string());
        let mut env = BTreeMap::new();
        env.insert("JOBGATE_EVENT_TYPE".to_string(), "ingest".to_string());

        WorkloadSpec {
            name: "thumbnailer-9f1c2a7e-k3x9qa".to_string(),
            module: "thumbnailer".to_string(),
            module_image: "registry.local/thumbnailer:1.2".to_string(),
            sidecar_image: "registry.local/sidecar:1.0".to_string(),
            sidecar_args: vec!["--context.eventid=9f1c2a7e".to_string()],
            env,
            labels,
            event_id: "9f1c2a7e".to_string(),
            correlation_id: "c1".to_string(),
            max_running_minutes: 30,
        }
    }

    #[test]
    fn test_build_job_layout() {
        let config = KubernetesConfig {
            namespace: "media".to_string(),
            image_pull_secret: Some("regcred".to_string()),
            service_account: Some("jobgate-runner".to_string()),
            cpu_limit: Some("500m".to_string()),
            memory_limit: None,
        };
        let job = build_job(&spec(), &config);

        assert_eq!(job.metadata.name.as_deref(), Some("thumbnailer-9f1c2a7e-k3x9qa"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("media"));
        assert_eq!(
            job.metadata.labels.as_ref().and_then(|l| l.get(LABEL_MODULE)),
            Some(&"thumbnailer".to_string())
        );

        let job_spec = job.spec.unwrap();
        assert_eq!(job_spec.backoff_limit, Some(0));
        assert_eq!(job_spec.active_deadline_seconds, Some(1800));

        let pod = job_spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("jobgate-runner"));
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "regcred");

        let names: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![SIDECAR_CONTAINER, MODULE_CONTAINER]);

        let sidecar = &pod.containers[0];
        assert_eq!(sidecar.image.as_deref(), Some("registry.local/sidecar:1.0"));
        assert_eq!(
            sidecar.args.as_deref(),
            Some(&["--context.eventid=9f1c2a7e".to_string()][..])
        );

        let module = &pod.containers[1];
        let limits = module.resources.as_ref().and_then(|r| r.limits.as_ref()).unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("500m".to_string())));
        assert!(limits.get("memory").is_none());

        for container in &pod.containers {
            let mounts = container.volume_mounts.as_ref().unwrap();
            assert_eq!(mounts[0].mount_path, WORKSPACE_MOUNT_PATH);
        }
        let volumes = pod.volumes.unwrap();
        assert!(volumes[0].empty_dir.is_some());
    }

    #[test]
    fn test_build_job_without_optional_settings() {
        let job = build_job(&spec(), &KubernetesConfig::default());
        let pod = job.spec.unwrap().template.spec.unwrap();

        assert!(pod.image_pull_secrets.is_none());
        assert!(pod.service_account_name.is_none());
        assert!(pod.containers[1].resources.is_none());
    }

    fn job_with(status: JobStatus) -> Job {
        Job {
            status: Some(status),
            ..Default::default()
        }
    }

    fn condition(kind: &str, status: &str) -> JobCondition {
        JobCondition {
            type_: kind.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_state_mapping() {
        let cases = vec![
            (Job::default(), WorkloadState::Pending),
            (job_with(JobStatus::default()), WorkloadState::Pending),
            (
                job_with(JobStatus {
                    active: Some(1),
                    ..Default::default()
                }),
                WorkloadState::Running,
            ),
            (
                job_with(JobStatus {
                    succeeded: Some(1),
                    ..Default::default()
                }),
                WorkloadState::Succeeded,
            ),
            (
                job_with(JobStatus {
                    failed: Some(1),
                    ..Default::default()
                }),
                WorkloadState::Failed,
            ),
            (
                job_with(JobStatus {
                    active: Some(1),
                    conditions: Some(vec![condition("Failed", "True")]),
                    ..Default::default()
                }),
                WorkloadState::Failed,
            ),
            (
                job_with(JobStatus {
                    conditions: Some(vec![
                        condition("Failed", "False"),
                        condition("Complete", "True"),
                    ]),
                    ..Default::default()
                }),
                WorkloadState::Succeeded,
            ),
        ];

        for (job, expected) in cases {
            assert_eq!(job_state(&job), expected, "status: {:?}", job.status);
        }
    }
}
