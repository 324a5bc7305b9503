//! In-process platform and network implementations.
//!
//! `MemoryPlatform` keeps service and task state in memory and records every
//! call, so the manage server can run without a platform SDK and tests can
//! assert on exactly what was asked of the platform.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{ContainerPlatform, NetworkAllocator};
use crate::types::*;

/// Record of a platform call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CreateService { service_name: String, replicas: u64 },
    StopService { service_name: String },
    ScaleService { service_name: String, replicas: u64 },
    RunTask { service_name: String, task_type: String },
    DeleteTask { service_name: String, task_type: String },
}

#[derive(Debug, Clone)]
struct MemService {
    options: CreateServiceOptions,
    status: ServiceRunStatus,
}

#[derive(Debug, Clone)]
struct MemTask {
    service_name: String,
    task_type: String,
    state: TaskState,
}

#[derive(Debug, Default)]
struct Inner {
    services: HashMap<(String, String), MemService>,
    tasks: HashMap<String, MemTask>,
    calls: Vec<PlatformCall>,
    unavailable: HashSet<&'static str>,
    hold_convergence: bool,
    task_outcome: Option<TaskState>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, in order.
    pub async fn calls(&self) -> Vec<PlatformCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Options the service was created with.
    pub async fn service_options(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Option<CreateServiceOptions> {
        self.inner
            .lock()
            .await
            .services
            .get(&key(cluster, service_name))
            .map(|s| s.options.clone())
    }

    /// Make `operation` fail with `Unavailable` until cleared.
    pub async fn set_unavailable(&self, operation: &'static str, unavailable: bool) {
        let mut inner = self.inner.lock().await;
        if unavailable {
            inner.unavailable.insert(operation);
        } else {
            inner.unavailable.remove(operation);
        }
    }

    /// When held, new or rescaled services report zero running replicas
    /// until [`set_running`](Self::set_running) is called.
    pub async fn hold_convergence(&self, hold: bool) {
        self.inner.lock().await.hold_convergence = hold;
    }

    pub async fn set_running(&self, cluster: &str, service_name: &str, running: u64) {
        if let Some(svc) = self
            .inner
            .lock()
            .await
            .services
            .get_mut(&key(cluster, service_name))
        {
            svc.status.running_count = running;
        }
    }

    /// Final state of tasks started from now on. Defaults to `Succeeded`.
    pub async fn set_task_outcome(&self, outcome: TaskState) {
        self.inner.lock().await.task_outcome = Some(outcome);
    }
}

fn key(cluster: &str, service_name: &str) -> (String, String) {
    (cluster.to_string(), service_name.to_string())
}

impl Inner {
    fn check(&self, operation: &'static str) -> PlatformResult<()> {
        if self.unavailable.contains(operation) {
            return Err(PlatformError::Unavailable(format!("{operation} is unavailable")));
        }
        Ok(())
    }

    fn service_mut(&mut self, cluster: &str, service_name: &str) -> PlatformResult<&mut MemService> {
        self.services
            .get_mut(&key(cluster, service_name))
            .ok_or_else(|| PlatformError::ServiceNotFound(service_name.to_string()))
    }
}

#[async_trait]
impl ContainerPlatform for MemoryPlatform {
    async fn create_service(&self, opts: &CreateServiceOptions) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check("create_service")?;
        let k = key(&opts.cluster, &opts.service_name);
        if inner.services.contains_key(&k) {
            return Err(PlatformError::ServiceExists(opts.service_name.clone()));
        }
        let running = if inner.hold_convergence { 0 } else { opts.replicas };
        inner.services.insert(
            k,
            MemService {
                options: opts.clone(),
                status: ServiceRunStatus {
                    running_count: running,
                    desired_count: opts.replicas,
                },
            },
        );
        inner.calls.push(PlatformCall::CreateService {
            service_name: opts.service_name.clone(),
            replicas: opts.replicas,
        });
        info!(service = %opts.service_name, replicas = opts.replicas, "service created");
        Ok(())
    }

    async fn is_service_exist(&self, cluster: &str, service_name: &str) -> PlatformResult<bool> {
        let inner = self.inner.lock().await;
        inner.check("is_service_exist")?;
        Ok(inner.services.contains_key(&key(cluster, service_name)))
    }

    async fn get_service_status(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> PlatformResult<ServiceRunStatus> {
        let mut inner = self.inner.lock().await;
        inner.check("get_service_status")?;
        Ok(inner.service_mut(cluster, service_name)?.status)
    }

    async fn stop_service(&self, cluster: &str, service_name: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check("stop_service")?;
        let svc = inner.service_mut(cluster, service_name)?;
        svc.status = ServiceRunStatus::default();
        inner.calls.push(PlatformCall::StopService {
            service_name: service_name.to_string(),
        });
        debug!(service = %service_name, "service stopped");
        Ok(())
    }

    async fn scale_service(
        &self,
        cluster: &str,
        service_name: &str,
        replicas: u64,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check("scale_service")?;
        let hold = inner.hold_convergence;
        let svc = inner.service_mut(cluster, service_name)?;
        svc.status.desired_count = replicas;
        if !hold {
            svc.status.running_count = replicas;
        }
        inner.calls.push(PlatformCall::ScaleService {
            service_name: service_name.to_string(),
            replicas,
        });
        debug!(service = %service_name, replicas, "service scaled");
        Ok(())
    }

    async fn run_task(&self, opts: &RunTaskOptions) -> PlatformResult<String> {
        let mut inner = self.inner.lock().await;
        inner.check("run_task")?;
        inner.service_mut(&opts.cluster, &opts.service_name)?;
        let task_id = Uuid::new_v4().to_string();
        let state = inner.task_outcome.clone().unwrap_or(TaskState::Succeeded);
        inner.tasks.insert(
            task_id.clone(),
            MemTask {
                service_name: opts.service_name.clone(),
                task_type: opts.task_type.clone(),
                state,
            },
        );
        inner.calls.push(PlatformCall::RunTask {
            service_name: opts.service_name.clone(),
            task_type: opts.task_type.clone(),
        });
        debug!(service = %opts.service_name, task_type = %opts.task_type, %task_id, "task started");
        Ok(task_id)
    }

    async fn get_task_status(&self, _cluster: &str, task_id: &str) -> PlatformResult<TaskState> {
        let inner = self.inner.lock().await;
        inner.check("get_task_status")?;
        inner
            .tasks
            .get(task_id)
            .map(|t| t.state.clone())
            .ok_or_else(|| PlatformError::TaskNotFound(task_id.to_string()))
    }

    async fn delete_task(
        &self,
        _cluster: &str,
        service_name: &str,
        task_type: &str,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check("delete_task")?;
        inner
            .tasks
            .retain(|_, t| !(t.service_name == service_name && t.task_type == task_type));
        inner.calls.push(PlatformCall::DeleteTask {
            service_name: service_name.to_string(),
            task_type: task_type.to_string(),
        });
        Ok(())
    }
}

/// Hands out sequential private addresses per zone.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    next: AtomicU32,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkAllocator for MemoryNetwork {
    async fn allocate_static_ip(&self, _cluster: &str, zone: &str) -> PlatformResult<AllocatedIp> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        if n > 250 * 250 {
            return Err(PlatformError::NoCapacity(zone.to_string()));
        }
        Ok(AllocatedIp {
            ip: format!("10.0.{}.{}", n / 250, n % 250 + 1),
            network_interface_id: format!("eni-{zone}-{n}"),
        })
    }
}
