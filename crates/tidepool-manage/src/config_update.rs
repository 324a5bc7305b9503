//! Rewrites one config file role across every member of a service.
//!
//! Members are processed in index order. For each one the role's config file
//! is read, the mutation decides whether it still has work to do, and if so a
//! new file version is written before the member is switched to it with a
//! conditional update. Config files are never modified in place.

use std::sync::Arc;

use serde_json::Value;
use tidepool_catalog::{CatalogModule, CatalogResult, ConfigMutation};
use tidepool_state::{
    CompareOptions, ConfigFile, MetadataStore, ServiceMember, StateError, equal_config_file,
};
use tracing::{debug, info, warn};

use crate::error::{ManageError, ManageResult};

const MAX_VERSION_ATTEMPTS: usize = 16;

/// Which members a pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberUpdateReport {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Clone)]
pub struct ConfigUpdateEngine {
    store: Arc<dyn MetadataStore>,
}

impl ConfigUpdateEngine {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Run `mutation` over the primary config file of every member.
    ///
    /// Stops at the first failing member. Members already updated by an
    /// earlier pass are skipped without any write.
    pub async fn apply(
        &self,
        service_uuid: &str,
        module: &dyn CatalogModule,
        mutation: &dyn ConfigMutation,
    ) -> ManageResult<MemberUpdateReport> {
        let members = self.store.list_service_members(service_uuid).await?;
        let mut report = MemberUpdateReport::default();

        for member in &members {
            let name = member.member_name.clone();
            let changed = self
                .apply_member(member, module, mutation)
                .await
                .map_err(|e| ManageError::for_member(&name, e))?;
            if changed {
                report.updated.push(name);
            } else {
                report.skipped.push(name);
            }
        }

        info!(
            %service_uuid,
            mutation = mutation.name(),
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            "config mutation applied"
        );
        Ok(report)
    }

    async fn apply_member(
        &self,
        member: &ServiceMember,
        module: &dyn CatalogModule,
        mutation: &dyn ConfigMutation,
    ) -> ManageResult<bool> {
        let (index, current) = member
            .find_config(|file_name| module.is_primary_config(file_name))
            .ok_or_else(|| ManageError::ConfigNotFound(member.member_name.clone()))?;

        let file = self
            .store
            .get_config_file(&member.service_uuid, &current.file_id)
            .await?;

        if !mutation.needs_apply(&file.content, member) {
            debug!(member = %member.member_name, mutation = mutation.name(), "already applied");
            return Ok(false);
        }

        let content = mutation.apply(&file.content, member)?;
        let next = self.write_next_version(member, file.next_version(content)).await?;

        let updated = member.with_config(index, next.member_config());
        self.store.update_service_member(member, &updated).await?;

        if let Err(e) = self
            .store
            .delete_config_file(&file.service_uuid, &file.file_id)
            .await
        {
            warn!(member = %member.member_name, file_id = %file.file_id, error = %e, "failed to delete old config file");
        }

        debug!(member = %member.member_name, file_id = %next.file_id, "member config updated");
        Ok(true)
    }

    /// Store `next`, moving past versions left by interrupted passes.
    ///
    /// An existing file with the same content is reused. One with other
    /// content is never referenced by the member, which still points at the
    /// old version, and is skipped for the following id.
    async fn write_next_version(
        &self,
        member: &ServiceMember,
        mut next: ConfigFile,
    ) -> ManageResult<ConfigFile> {
        for _ in 0..MAX_VERSION_ATTEMPTS {
            match self.store.create_config_file(&next).await {
                Ok(()) => return Ok(next),
                Err(StateError::RecordExists(_)) => {
                    let existing = self
                        .store
                        .get_config_file(&next.service_uuid, &next.file_id)
                        .await?;
                    if equal_config_file(&existing, &next, CompareOptions::SKIP_MTIME) {
                        return Ok(next);
                    }
                    warn!(member = %member.member_name, file_id = %next.file_id, "skipping stale config file version");
                    next = next.next_version(next.content.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StateError::Conflict(format!(
            "no free config file version after {}",
            next.file_id
        ))
        .into())
    }
}

/// Applies an update request's options through the module's content rewrite.
pub struct UpdateRewrite<'a> {
    pub module: &'a dyn CatalogModule,
    pub user_attr: &'a [u8],
    pub options: &'a Value,
}

impl ConfigMutation for UpdateRewrite<'_> {
    fn name(&self) -> &str {
        "update config"
    }

    fn needs_apply(&self, content: &str, _member: &ServiceMember) -> bool {
        match self.module.update_config_content(content, self.user_attr, self.options) {
            Ok(rewritten) => rewritten != content,
            // Let apply surface the error.
            Err(_) => true,
        }
    }

    fn apply(&self, content: &str, _member: &ServiceMember) -> CatalogResult<String> {
        self.module
            .update_config_content(content, self.user_attr, self.options)
    }
}
