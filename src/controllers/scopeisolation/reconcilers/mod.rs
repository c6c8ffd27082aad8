use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::events::Recorder;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::controllers::Settings;
use crate::resources::commonservices::IsolationPhase;
use crate::{Error, Metrics, Result};

use super::machine::ScopeOperations;

mod fleet;
mod licensing;

/// Field manager of every object written during isolation
const FIELD_MANAGER: &str = "common-service-isolation";

/// Isolation side effects against the Kubernetes API
pub struct KubeScopeOperations {
    client: Client,
    /// Publishes isolation failures on the master CommonService
    recorder: Recorder,
    settings: Settings,
    metrics: Metrics,
}

impl KubeScopeOperations {
    pub fn new(client: Client, settings: Settings, metrics: Metrics) -> Self {
        Self {
            recorder: Recorder::new(client.clone(), FIELD_MANAGER.into()),
            client,
            settings,
            metrics,
        }
    }
}

async fn apply<K>(api: &Api<K>, name: &str, object: &K) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    debug!("Applying {} {}", std::any::type_name::<K>(), name);
    api.patch(name, &params, &Patch::Apply(object)).await?;
    Ok(())
}

async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    debug!(
        "Ensuring {} {} does not exist",
        std::any::type_name::<K>(),
        name
    );
    match api.delete(name, &DeleteParams::default()).await {
        Err(kube::Error::Api(kube::error::ErrorResponse { code: 404, .. })) => Ok(()),
        Err(err) => Err(err.into()),
        Ok(_) => Ok(()),
    }
}

#[async_trait]
impl ScopeOperations for KubeScopeOperations {
    async fn scale_fleet_controller(&self, replicas: i32) -> Result<()> {
        fleet::scale_fleet_controller(&self.client, &self.settings, replicas).await
    }

    async fn persist_phase(&self, phase: IsolationPhase) -> Result<()> {
        fleet::persist_phase(&self.client, &self.settings, phase).await?;
        self.metrics.isolation_transition(phase.as_str());
        Ok(())
    }

    async fn delete_operand_objects(&self) -> Result<()> {
        fleet::delete_operand_objects(&self.client, &self.settings).await
    }

    async fn restore_operand_registry(&self) -> Result<()> {
        fleet::restore_operand_registry(&self.client, &self.settings).await
    }

    async fn delete_namespace_scopes(&self) -> Result<()> {
        fleet::delete_namespace_scopes(&self.client, &self.settings).await
    }

    async fn update_scope_members(&self, members: &[String]) -> Result<()> {
        fleet::update_scope_members(&self.client, &self.settings, members).await
    }

    async fn update_fleet_subscription(&self, members: &[String]) -> Result<()> {
        fleet::update_fleet_subscription(&self.client, &self.settings, members).await
    }

    async fn migrate_licensing_state(&self, control_namespace: &str) -> Result<()> {
        licensing::migrate_licensing_state(&self.client, &self.settings, control_namespace).await
    }

    async fn migrate_cert_manager_state(&self, control_namespace: &str) -> Result<()> {
        licensing::migrate_cert_manager_state(&self.client, &self.settings, control_namespace)
            .await
    }

    async fn delete_orphaned_workloads(&self) -> Result<()> {
        fleet::delete_orphaned_workloads(&self.client, &self.settings).await
    }

    async fn delete_scope_bindings(&self) -> Result<()> {
        fleet::delete_scope_bindings(&self.client).await
    }

    async fn licensing_deployment_exists(&self, control_namespace: &str) -> Result<bool> {
        licensing::licensing_deployment_exists(&self.client, control_namespace).await
    }

    async fn restore_licensing_from_backup(&self, control_namespace: &str) -> Result<()> {
        licensing::restore_licensing_from_backup(&self.client, control_namespace).await
    }

    async fn update_licensing_scope_fields(&self, control_namespace: &str) -> Result<()> {
        licensing::update_licensing_scope_fields(&self.client, control_namespace).await
    }

    async fn write_scope_mapping(&self, members: &[String]) -> Result<()> {
        fleet::write_scope_mapping(&self.client, &self.settings, members).await
    }

    async fn report_failure(&self, phase: IsolationPhase, message: &str) -> Result<()> {
        fleet::report_failure(&self.client, &self.recorder, &self.settings, phase, message).await
    }
}
