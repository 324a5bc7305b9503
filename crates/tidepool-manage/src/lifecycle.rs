//! Create, update and initialize services.
//!
//! Creation persists metadata in a fixed order (devices, service record,
//! attr, members with config files and static IPs), applies the module's
//! pre-create mutations, then asks the platform for the service. Every step
//! tolerates finding its own earlier output, so a failed create is finished
//! by sending the same request again. Nothing is rolled back.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tidepool_catalog::{
    CatalogModule, CatalogRegistry, CreateContext, MonitoredService, ReplicaConfig,
    ServiceCreationPlan, ServiceIdentity,
};
use tidepool_core::{PlatformKind, epoch_millis};
use tidepool_platform::{ContainerPlatform, CreateServiceOptions, NetworkAllocator, PlatformError};
use tidepool_state::{
    CompareOptions, ConfigFile, Device, MemberStatus, MemberVolumes, MetadataStore, ServiceAttr,
    ServiceMember, ServiceRecord, ServiceStaticIP, ServiceStatus, ServiceVolumes, StateError,
    config_file_id, equal_attr, equal_config_file,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config_update::{ConfigUpdateEngine, UpdateRewrite};
use crate::error::{ManageError, ManageResult};
use crate::init_phase::InitPhase;
use crate::init_task::{InitTask, InitTaskTracker};
use crate::request::{CreateRequest, ServiceInitStatus, SetInitRequest, UpdateRequest};
use crate::waiter::ReadinessWaiter;

/// The cluster this manage server is responsible for.
#[derive(Debug, Clone)]
pub struct ManageContext {
    pub region: String,
    pub cluster: String,
    pub platform: PlatformKind,
    pub zones: Vec<String>,
    pub domain_name: String,
    pub manage_url: String,
    pub hosted_zone_id: String,
}

#[derive(Clone)]
pub struct ServiceLifecycle {
    ctx: Arc<ManageContext>,
    store: Arc<dyn MetadataStore>,
    platform: Arc<dyn ContainerPlatform>,
    network: Arc<dyn NetworkAllocator>,
    catalog: CatalogRegistry,
    tracker: InitTaskTracker,
    engine: ConfigUpdateEngine,
    init: InitPhase,
}

impl ServiceLifecycle {
    pub fn new(
        ctx: ManageContext,
        store: Arc<dyn MetadataStore>,
        platform: Arc<dyn ContainerPlatform>,
        network: Arc<dyn NetworkAllocator>,
        catalog: CatalogRegistry,
        tracker: InitTaskTracker,
        waiter: ReadinessWaiter,
    ) -> Self {
        let init = InitPhase::new(
            store.clone(),
            platform.clone(),
            catalog.clone(),
            tracker.clone(),
            ctx.cluster.clone(),
            waiter,
        );
        Self {
            ctx: Arc::new(ctx),
            engine: ConfigUpdateEngine::new(store.clone()),
            store,
            platform,
            network,
            catalog,
            tracker,
            init,
        }
    }

    pub fn context(&self) -> &ManageContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &InitTaskTracker {
        &self.tracker
    }

    // ── Create ─────────────────────────────────────────────────────

    pub async fn create_service(&self, service_type: &str, req: CreateRequest) -> ManageResult<()> {
        let module = self.catalog.get(service_type)?;
        req.service.validate(&self.ctx.region, &self.ctx.cluster)?;
        req.resource.validate().map_err(ManageError::InvalidRequest)?;
        module.validate_create(&req.options)?;

        let name = req.service.service_name.as_str();
        let monitored = match module.monitored_service(&req.options)? {
            Some(target) => Some(self.load_monitored(&target).await?),
            None => None,
        };

        let identity = ServiceIdentity {
            region: self.ctx.region.clone(),
            cluster: self.ctx.cluster.clone(),
            service_name: name.to_string(),
            platform: self.ctx.platform,
            zones: self.ctx.zones.clone(),
            domain_name: self.ctx.domain_name.clone(),
            manage_url: self.ctx.manage_url.clone(),
        };
        let plan = module.generate_create_plan(&CreateContext {
            identity: &identity,
            resource: req.resource,
            options: &req.options,
            monitored,
        })?;

        let service_uuid = self.resolve_service_uuid(name).await?;
        info!(service = %name, %service_uuid, service_type, replicas = plan.replicas, "creating service");

        let volumes = self.assign_devices(name, &plan.volumes).await?;
        self.persist_service(name, &service_uuid, service_type, &plan, &volumes)
            .await?;
        self.persist_members(&service_uuid, &plan, &volumes).await?;

        for mutation in module.pre_create_mutations(&plan.user_attr)? {
            self.engine
                .apply(&service_uuid, module.as_ref(), mutation.as_ref())
                .await?;
        }

        self.create_platform_service(name, &service_uuid, &plan, &volumes)
            .await?;
        self.finish_create(name, &service_uuid, service_type, &plan).await
    }

    /// UUID of a new service, or of an unfinished earlier attempt at it.
    async fn resolve_service_uuid(&self, name: &str) -> ManageResult<String> {
        let record = match self.store.get_service(&self.ctx.cluster, name).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(Uuid::new_v4().to_string()),
            Err(e) => return Err(e.into()),
        };
        match self.store.get_service_attr(&record.service_uuid).await {
            Ok(attr) => match attr.status {
                ServiceStatus::Active => return Err(ManageError::ServiceExists(name.to_string())),
                ServiceStatus::Deleting => {
                    return Err(StateError::Conflict(format!("service {name} is being deleted")).into());
                }
                ServiceStatus::Creating | ServiceStatus::Initializing => {
                    info!(service = %name, service_uuid = %record.service_uuid, status = %attr.status, "resuming service creation");
                }
            },
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(record.service_uuid)
    }

    /// Reserve block device names for the service's volumes, reusing any the
    /// service already holds.
    async fn assign_devices(&self, name: &str, spec: &ServiceVolumes) -> ManageResult<ServiceVolumes> {
        let mut volumes = spec.clone();
        let wanted = match (spec.primary.size_gb > 0, spec.journal.is_some()) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        };
        if wanted == 0 {
            return Ok(volumes);
        }

        let devices = self.store.list_devices(&self.ctx.cluster).await?;
        let mut owned: Vec<String> = devices
            .iter()
            .filter(|d| d.service_name == name)
            .map(|d| d.device_name.clone())
            .collect();
        owned.sort_by(|a, b| device_order(a).cmp(&device_order(b)));
        let mut used: HashSet<String> = devices.into_iter().map(|d| d.device_name).collect();

        while owned.len() < wanted {
            let device_name = next_free_device(&used)
                .ok_or_else(|| StateError::Conflict("no free device name".to_string()))?;
            used.insert(device_name.clone());
            let dev = Device {
                cluster_name: self.ctx.cluster.clone(),
                device_name: device_name.clone(),
                service_name: name.to_string(),
            };
            match self.store.create_device(&dev).await {
                Ok(()) => {
                    debug!(service = %name, device = %device_name, "device assigned");
                    owned.push(device_name);
                }
                // Taken by a concurrent create; try the next name.
                Err(StateError::RecordExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        volumes.primary_device_name = owned[0].clone();
        if wanted == 2 {
            volumes.journal_device_name = owned[1].clone();
        }
        Ok(volumes)
    }

    async fn persist_service(
        &self,
        name: &str,
        service_uuid: &str,
        service_type: &str,
        plan: &ServiceCreationPlan,
        volumes: &ServiceVolumes,
    ) -> ManageResult<()> {
        let record = ServiceRecord {
            cluster_name: self.ctx.cluster.clone(),
            service_name: name.to_string(),
            service_uuid: service_uuid.to_string(),
        };
        match self.store.create_service(&record).await {
            Ok(()) => {}
            Err(StateError::RecordExists(_)) => {
                // A concurrent create claimed the name first. Nothing may be
                // written under our UUID.
                let existing = self.store.get_service(&self.ctx.cluster, name).await?;
                if existing.service_uuid != service_uuid {
                    warn!(service = %name, %service_uuid, winner = %existing.service_uuid, "lost create race");
                    return Err(ManageError::ServiceExists(name.to_string()));
                }
            }
            Err(e) => return Err(e.into()),
        }

        let attr = ServiceAttr {
            service_uuid: service_uuid.to_string(),
            status: ServiceStatus::Creating,
            last_modified: epoch_millis(),
            replicas: plan.replicas,
            cluster_name: self.ctx.cluster.clone(),
            service_name: name.to_string(),
            volumes: volumes.clone(),
            register_dns: plan.register_dns,
            domain_name: self.ctx.domain_name.clone(),
            hosted_zone_id: self.ctx.hosted_zone_id.clone(),
            require_static_ip: plan.require_static_ip,
            resource: plan.resource,
            service_type: service_type.to_string(),
            user_attr: plan.user_attr.clone(),
        };
        match self.store.create_service_attr(&attr).await {
            Ok(()) => Ok(()),
            Err(StateError::RecordExists(_)) => {
                let existing = self.store.get_service_attr(service_uuid).await?;
                let expected = ServiceAttr {
                    status: existing.status,
                    ..attr
                };
                if equal_attr(&existing, &expected, CompareOptions::SKIP_MTIME) {
                    Ok(())
                } else {
                    warn!(service = %name, %service_uuid, "existing service attr differs from request");
                    Err(ManageError::ServiceExists(name.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_members(
        &self,
        service_uuid: &str,
        plan: &ServiceCreationPlan,
        volumes: &ServiceVolumes,
    ) -> ManageResult<()> {
        let members = self.store.list_service_members(service_uuid).await?;
        let existing: HashSet<&str> = members.iter().map(|m| m.member_name.as_str()).collect();

        // Static IPs allocated by an interrupted attempt but never bound.
        let mut spare_ips = Vec::new();
        if plan.require_static_ip {
            let bound: HashSet<&str> = members.iter().map(|m| m.static_ip.as_str()).collect();
            spare_ips = self
                .store
                .list_service_static_ips(service_uuid)
                .await?
                .into_iter()
                .filter(|ip| !bound.contains(ip.static_ip.as_str()))
                .collect();
        }

        for (index, replica) in plan.replica_configs.iter().enumerate() {
            if existing.contains(replica.member_name.as_str()) {
                continue;
            }
            let static_ip = if plan.require_static_ip {
                self.static_ip_for(service_uuid, &replica.zone, &mut spare_ips)
                    .await
                    .map_err(|e| ManageError::for_member(&replica.member_name, e))?
            } else {
                String::new()
            };
            self.create_member(service_uuid, index as u64, replica, volumes, static_ip)
                .await
                .map_err(|e| ManageError::for_member(&replica.member_name, e))?;
        }
        Ok(())
    }

    async fn static_ip_for(
        &self,
        service_uuid: &str,
        zone: &str,
        spare: &mut Vec<ServiceStaticIP>,
    ) -> ManageResult<String> {
        if let Some(pos) = spare.iter().position(|ip| ip.available_zone == zone) {
            let reused = spare.remove(pos);
            debug!(%service_uuid, static_ip = %reused.static_ip, "reusing unbound static ip");
            return Ok(reused.static_ip);
        }
        let allocated = self
            .network
            .allocate_static_ip(&self.ctx.cluster, zone)
            .await?;
        let record = ServiceStaticIP {
            static_ip: allocated.ip.clone(),
            service_uuid: service_uuid.to_string(),
            available_zone: zone.to_string(),
            server_instance_id: String::new(),
            network_interface_id: allocated.network_interface_id,
        };
        self.store.create_service_static_ip(&record).await?;
        debug!(%service_uuid, static_ip = %allocated.ip, zone, "static ip allocated");
        Ok(allocated.ip)
    }

    async fn create_member(
        &self,
        service_uuid: &str,
        index: u64,
        replica: &ReplicaConfig,
        volumes: &ServiceVolumes,
        static_ip: String,
    ) -> ManageResult<()> {
        let mut configs = Vec::with_capacity(replica.configs.len());
        for file in &replica.configs {
            let cfg = ConfigFile::new(
                service_uuid,
                config_file_id(&replica.member_name, &file.file_name, 0),
                file.file_name.clone(),
                file.file_mode,
                file.content.clone(),
            );
            match self.store.create_config_file(&cfg).await {
                Ok(()) => {}
                Err(StateError::RecordExists(_)) => {
                    let existing = self.store.get_config_file(service_uuid, &cfg.file_id).await?;
                    if !equal_config_file(&existing, &cfg, CompareOptions::SKIP_MTIME) {
                        return Err(StateError::Conflict(format!(
                            "config file {} exists with different content",
                            cfg.file_id
                        ))
                        .into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
            configs.push(cfg.member_config());
        }

        let member = ServiceMember {
            service_uuid: service_uuid.to_string(),
            member_index: index,
            status: MemberStatus::Pending,
            member_name: replica.member_name.clone(),
            available_zone: replica.zone.clone(),
            task_id: String::new(),
            container_instance_id: String::new(),
            server_instance_id: String::new(),
            last_modified: epoch_millis(),
            volumes: MemberVolumes {
                primary_volume_id: String::new(),
                primary_device_name: volumes.primary_device_name.clone(),
                journal_volume_id: String::new(),
                journal_device_name: volumes.journal_device_name.clone(),
            },
            static_ip,
            configs,
        };
        match self.store.create_service_member(&member).await {
            Ok(()) | Err(StateError::RecordExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_platform_service(
        &self,
        name: &str,
        service_uuid: &str,
        plan: &ServiceCreationPlan,
        volumes: &ServiceVolumes,
    ) -> ManageResult<()> {
        let journal = (!volumes.journal_device_name.is_empty())
            .then(|| volumes.journal_device_name.clone());
        let opts = CreateServiceOptions {
            cluster: self.ctx.cluster.clone(),
            service_name: name.to_string(),
            service_uuid: service_uuid.to_string(),
            container_image: plan.container_image.clone(),
            resource: plan.resource,
            replicas: plan.replicas,
            port_mappings: plan.port_mappings.clone(),
            envs: plan.envs.clone(),
            register_dns: plan.register_dns,
            domain_name: self.ctx.domain_name.clone(),
            require_static_ip: plan.require_static_ip,
            primary_device_name: volumes.primary_device_name.clone(),
            journal_device_name: journal,
        };
        match self.platform.create_service(&opts).await {
            Ok(()) => Ok(()),
            Err(PlatformError::ServiceExists(_)) => {
                debug!(service = %name, "platform service already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_create(
        &self,
        name: &str,
        service_uuid: &str,
        service_type: &str,
        plan: &ServiceCreationPlan,
    ) -> ManageResult<()> {
        let attr = self.store.get_service_attr(service_uuid).await?;
        let Some(spec) = plan.init_task.clone() else {
            if attr.status != ServiceStatus::Active {
                self.store
                    .update_service_attr(&attr, &attr.with_status(ServiceStatus::Active))
                    .await?;
            }
            info!(service = %name, %service_uuid, "service created");
            return Ok(());
        };

        if attr.status == ServiceStatus::Creating {
            self.store
                .update_service_attr(&attr, &attr.with_status(ServiceStatus::Initializing))
                .await?;
        }

        let task = InitTask {
            service_uuid: service_uuid.to_string(),
            service_name: name.to_string(),
            service_type: service_type.to_string(),
            spec,
        };
        match self.tracker.add_init_task(&task).await {
            Ok(()) => {
                let init = self.init.clone();
                tokio::spawn(async move { init.run_task(task).await });
                info!(service = %name, %service_uuid, "service created, initializing");
                Ok(())
            }
            Err(ManageError::InitInProgress(_)) => {
                debug!(service = %name, "init task already running");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_monitored(&self, target: &str) -> ManageResult<MonitoredService> {
        let attr = self.get_service_attr(target).await?;
        let members = self.store.list_service_members(&attr.service_uuid).await?;
        let module = self.catalog.get(&attr.service_type)?;
        let envs = module.monitor_envs(&attr.user_attr)?;
        Ok(MonitoredService { attr, members, envs })
    }

    // ── Update ─────────────────────────────────────────────────────

    pub async fn update_service(&self, service_type: &str, req: UpdateRequest) -> ManageResult<()> {
        let module = self.catalog.get(service_type)?;
        req.service.validate(&self.ctx.region, &self.ctx.cluster)?;
        module.validate_update(&req.options)?;

        let name = req.service.service_name.as_str();
        let attr = self.get_service_attr(name).await?;
        if attr.service_type != service_type {
            return Err(ManageError::InvalidRequest(format!(
                "service {name} is a {} service, not {service_type}",
                attr.service_type
            )));
        }
        match attr.status {
            ServiceStatus::Active => {}
            ServiceStatus::Initializing => return Err(ManageError::InitInProgress(name.to_string())),
            other => {
                return Err(ManageError::InvalidRequest(format!(
                    "service {name} is {other}"
                )));
            }
        }

        if !module.is_config_changed(&attr.user_attr, &req.options)? {
            info!(service = %name, "config unchanged, nothing to update");
            return Ok(());
        }

        self.apply_update(module.as_ref(), &attr, &req).await?;

        let user_attr = module.update_user_attr(&attr.user_attr, &req.options)?;
        self.store
            .update_service_attr(&attr, &attr.with_user_attr(user_attr))
            .await?;
        info!(service = %name, service_uuid = %attr.service_uuid, "service config updated");
        Ok(())
    }

    async fn apply_update(
        &self,
        module: &dyn CatalogModule,
        attr: &ServiceAttr,
        req: &UpdateRequest,
    ) -> ManageResult<()> {
        let rewrite = UpdateRewrite {
            module,
            user_attr: &attr.user_attr,
            options: &req.options,
        };
        self.engine
            .apply(&attr.service_uuid, module, &rewrite)
            .await
            .map(|_| ())
    }

    // ── Init ───────────────────────────────────────────────────────

    pub async fn set_service_init(&self, req: SetInitRequest) -> ManageResult<()> {
        req.validate(&self.ctx.region, &self.ctx.cluster)?;
        self.init.complete_init(&req.service_name).await
    }

    pub async fn check_service_init(&self, service_name: &str) -> ManageResult<ServiceInitStatus> {
        let attr = self.get_service_attr(service_name).await?;
        let status_message = self
            .tracker
            .get_task_status(&attr.service_uuid)
            .await
            .map(|t| t.status_message)
            .unwrap_or_default();
        Ok(ServiceInitStatus {
            initialized: attr.status == ServiceStatus::Active,
            status_message,
        })
    }

    // ── Read ───────────────────────────────────────────────────────

    /// The service's attributes with its module's user attributes decoded
    /// and credentials masked.
    pub async fn describe_service(&self, service_name: &str) -> ManageResult<(ServiceAttr, Value)> {
        let attr = self.get_service_attr(service_name).await?;
        let module = self.catalog.get(&attr.service_type)?;
        let user_attr = module.public_user_attr(&attr.user_attr)?;
        Ok((attr, user_attr))
    }

    pub async fn get_service_attr(&self, service_name: &str) -> ManageResult<ServiceAttr> {
        let record = match self.store.get_service(&self.ctx.cluster, service_name).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                return Err(ManageError::ServiceNotFound(service_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        match self.store.get_service_attr(&record.service_uuid).await {
            Ok(attr) => Ok(attr),
            Err(e) if e.is_not_found() => Err(ManageError::ServiceNotFound(service_name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sort key of a device name: shorter suffixes come first.
fn device_order(name: &str) -> (usize, &str) {
    (name.len(), name)
}

/// First device name not in `used`: `/dev/xvdf` to `/dev/xvdz`, then
/// `/dev/xvdba` onwards.
fn next_free_device(used: &HashSet<String>) -> Option<String> {
    let single = ('f'..='z').map(|c| format!("/dev/xvd{c}"));
    let double = ('b'..='z').flat_map(|a| ('a'..='z').map(move |b| format!("/dev/xvd{a}{b}")));
    single.chain(double).find(|name| !used.contains(name))
}
