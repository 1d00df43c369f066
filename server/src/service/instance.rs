//! Instance service

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::account::{AccountRegistry, AccountType};
use crate::domain::instance::{InstanceParams, InstanceStatus, ProjectEntry, ServerInstance};
use crate::domain::quota::AccountSnapshot;
use crate::error::{Error, Result};
use crate::infra::config_store::ConfigStore;
use crate::service::credential::CredentialManager;
use crate::service::project::ProjectResolver;
use crate::service::quota::QuotaAggregator;
use crate::service::supervisor::{ProcessSupervisor, StartedWorker, StopOutcome};

/// Instance record with its derived run status
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: ServerInstance,
    pub status: InstanceStatus,
}

/// Quota snapshot decorated with the instance it was fetched for
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaReport {
    #[serde(flatten)]
    pub snapshot: AccountSnapshot,
    pub config_name: String,
}

/// Instance service tying the stored fleet to the running workers
pub struct InstanceService {
    store: Arc<ConfigStore>,
    credentials: Arc<CredentialManager>,
    accounts: Arc<AccountRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    quota: Arc<QuotaAggregator>,
    projects: Arc<ProjectResolver>,
    /// Serializes read-modify-write cycles on the store
    write_lock: Mutex<()>,
}

impl InstanceService {
    /// Create a new instance service
    pub fn new(
        store: Arc<ConfigStore>,
        credentials: Arc<CredentialManager>,
        accounts: Arc<AccountRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        quota: Arc<QuotaAggregator>,
        projects: Arc<ProjectResolver>,
    ) -> Self {
        Self {
            store,
            credentials,
            accounts,
            supervisor,
            quota,
            projects,
            write_lock: Mutex::new(()),
        }
    }

    /// List instances in stored order with their run status
    pub async fn list(&self) -> Vec<InstanceView> {
        let statuses: HashMap<String, InstanceStatus> =
            self.supervisor.reconcile().await.into_iter().collect();

        self.store
            .load()
            .await
            .into_iter()
            .map(|instance| {
                let status = statuses
                    .get(&instance.id)
                    .copied()
                    .unwrap_or(InstanceStatus::Stopped);
                InstanceView { instance, status }
            })
            .collect()
    }

    /// Get one instance
    pub async fn get(&self, id: &str) -> Result<ServerInstance> {
        self.store
            .load()
            .await
            .into_iter()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// Create an instance and schedule an entitlement re-check
    pub async fn create(self: &Arc<Self>, params: InstanceParams) -> Result<ServerInstance> {
        params.validate().map_err(Error::InvalidParameter)?;

        let instance = {
            let _guard = self.write_lock.lock().await;
            let mut instances = self.store.load().await;
            let instance = ServerInstance::new(Uuid::new_v4().to_string(), params);
            instances.push(instance.clone());
            self.store.save(&instances).await?;
            instance
        };

        info!("Created instance {} ({})", instance.id, instance.name);
        self.schedule_entitlement_check(&instance.id);
        Ok(instance)
    }

    /// Replace an instance's settings, keeping its id
    pub async fn update(self: &Arc<Self>, id: &str, params: InstanceParams) -> Result<ServerInstance> {
        params.validate().map_err(Error::InvalidParameter)?;

        let instance = {
            let _guard = self.write_lock.lock().await;
            let mut instances = self.store.load().await;
            let instance = instances
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| Error::InstanceNotFound(id.to_string()))?;
            instance.apply(params);
            let updated = instance.clone();
            self.store.save(&instances).await?;
            updated
        };

        info!("Updated instance {} ({})", instance.id, instance.name);
        self.schedule_entitlement_check(&instance.id);
        Ok(instance)
    }

    /// Delete an instance and stop its worker. The record is removed first,
    /// so a failed save leaves the worker running.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut instances = self.store.load().await;
        let before = instances.len();
        instances.retain(|i| i.id != id);
        if instances.len() == before {
            return Err(Error::InstanceNotFound(id.to_string()));
        }

        self.store.save(&instances).await?;
        if self.supervisor.stop(id).await == StopOutcome::Stopped {
            info!("Stopped worker of deleted instance {}", id);
        }

        info!("Deleted instance {}", id);
        Ok(())
    }

    /// Reorder instances: listed ids first in the given order, then the
    /// remaining ones in their existing order. Unknown ids are ignored.
    pub async fn reorder(&self, ids: &[String]) -> Result<Vec<ServerInstance>> {
        let _guard = self.write_lock.lock().await;
        let instances = self.store.load().await;
        let ordered = reorder_instances(instances, ids);
        self.store.save(&ordered).await?;
        Ok(ordered)
    }

    /// Number of live workers
    pub async fn running_count(&self) -> usize {
        self.supervisor.running_count().await
    }

    /// Start the instance's worker
    pub async fn start(&self, id: &str) -> Result<StartedWorker> {
        self.supervisor.start(id).await
    }

    /// Stop the instance's worker. Unknown instances are an error; a known
    /// instance without a worker is not.
    pub async fn stop(&self, id: &str) -> Result<StopOutcome> {
        self.get(id).await?;
        Ok(self.supervisor.stop(id).await)
    }

    /// Fetch a quota snapshot, writing back the entitlement flag on success.
    /// A failed fetch reports the cached flag.
    pub async fn quota(&self, id: &str) -> Result<QuotaReport> {
        let instance = self.get(id).await?;
        let profile = self.accounts.get(instance.account_type);

        let mut snapshot = self
            .quota
            .fetch_account_data(&instance.token_file, &instance.project_id, profile)
            .await;

        if !snapshot.is_success() {
            snapshot.is_pro = instance.is_pro;
        } else if snapshot.is_pro != instance.is_pro {
            if let Err(e) = self.store_entitlement(&instance, snapshot.is_pro).await {
                warn!("Failed to persist entitlement for {}: {}", id, e);
            }
        }

        Ok(QuotaReport {
            snapshot,
            config_name: instance.name,
        })
    }

    /// List credential files available for an account type
    pub async fn list_credentials(&self, account_type: AccountType) -> Result<Vec<String>> {
        self.credentials
            .list_token_files(self.accounts.get(account_type))
            .await
    }

    /// Candidate projects for a credential file
    pub async fn resolve_projects(
        &self,
        account_type: AccountType,
        token_file: &str,
    ) -> Result<Vec<ProjectEntry>> {
        self.projects
            .resolve(token_file, self.accounts.get(account_type))
            .await
    }

    /// Re-evaluate the entitlement of one instance and persist a change
    pub async fn recheck_entitlement(&self, id: &str) {
        let Ok(instance) = self.get(id).await else {
            return;
        };
        let profile = self.accounts.get(instance.account_type);

        let Some(is_pro) = self
            .quota
            .check_entitlement(&instance.token_file, &instance.project_id, profile)
            .await
        else {
            return;
        };

        if is_pro == instance.is_pro {
            debug!("Entitlement of {} unchanged", id);
            return;
        }
        if let Err(e) = self.store_entitlement(&instance, is_pro).await {
            warn!("Failed to persist entitlement for {}: {}", id, e);
        }
    }

    fn schedule_entitlement_check(self: &Arc<Self>, id: &str) {
        let service = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            service.recheck_entitlement(&id).await;
        });
    }

    /// Persist `is_pro` unless the record changed account in the meantime
    async fn store_entitlement(&self, seen: &ServerInstance, is_pro: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut instances = self.store.load().await;
        let Some(current) = instances.iter_mut().find(|i| i.id == seen.id) else {
            return Ok(());
        };
        if current.token_file != seen.token_file || current.account_type != seen.account_type {
            debug!("Instance {} changed account, dropping entitlement result", seen.id);
            return Ok(());
        }

        current.is_pro = is_pro;
        self.store.save(&instances).await?;
        info!("Instance {} entitlement is now is_pro={}", seen.id, is_pro);
        Ok(())
    }
}

fn reorder_instances(instances: Vec<ServerInstance>, ids: &[String]) -> Vec<ServerInstance> {
    let mut remaining: Vec<Option<ServerInstance>> = instances.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    for id in ids {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|i| &i.id == id))
        {
            ordered.extend(slot.take());
        }
    }
    ordered.extend(remaining.into_iter().flatten());
    ordered
}
