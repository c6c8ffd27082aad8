//! Scope isolation: `Normal -> Isolating -> Migrating -> Restoring -> Normal`.
//!
//! Every phase persists the next one only after its own steps committed, so a restart
//! resumes at the last persisted phase. Each step is idempotent on its own.

use std::collections::BTreeSet;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::*;

use crate::controllers::Settings;
use crate::resources::commonservices::IsolationPhase;
use crate::resources::scopemapping::ScopeMapping;
use crate::Result;

/// Namespace membership change worked towards by one isolation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IsolationPlan {
    /// Namespaces of the scope once isolation completes
    pub members: Vec<String>,
    pub included: Vec<String>,
    pub excluded: Vec<String>,
    /// Where cluster-scoped state moves to
    pub control_namespace: String,
    /// The scope mapping already has an entry for this scope
    pub had_explicit_mapping: bool,
}

impl IsolationPlan {
    /// Compares the mapping's entry for the services namespace against the current members.
    /// Without an entry the current membership is kept.
    pub fn compute(mapping: &ScopeMapping, current: &[String], settings: &Settings) -> Self {
        let entry = mapping.entry_for(&settings.services_namespace);
        let current: BTreeSet<&str> = current.iter().map(String::as_str).collect();

        let mut desired: BTreeSet<&str> = match entry {
            Some(entry) => entry.requested_from_namespace.iter().map(String::as_str).collect(),
            None => current.clone(),
        };
        desired.insert(settings.services_namespace.as_str());
        desired.insert(settings.operator_namespace.as_str());

        Self {
            members: owned(desired.iter()),
            included: owned(desired.difference(&current)),
            excluded: owned(current.difference(&desired)),
            control_namespace: mapping
                .control_namespace
                .clone()
                .unwrap_or_else(|| settings.control_namespace.clone()),
            had_explicit_mapping: entry.is_some(),
        }
    }
}

fn owned<S: ToString>(names: impl Iterator<Item = S>) -> Vec<String> {
    names.map(|name| name.to_string()).collect()
}

/// Cluster side effects of scope isolation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScopeOperations: Send + Sync {
    /// Scale the fleet-management controller deployment
    async fn scale_fleet_controller(&self, replicas: i32) -> Result<()>;

    /// Persist the isolation phase on the master CommonService
    async fn persist_phase(&self, phase: IsolationPhase) -> Result<()>;

    /// Delete the OperandRegistry and OperandConfig of the scope, backing up the registry
    async fn delete_operand_objects(&self) -> Result<()>;

    /// Recreate the OperandRegistry from its backup when it is missing
    async fn restore_operand_registry(&self) -> Result<()>;

    /// Delete the NamespaceScope objects that define the scope
    async fn delete_namespace_scopes(&self) -> Result<()>;

    /// Create or update the scope's NamespaceScope with these members
    async fn update_scope_members(&self, members: &[String]) -> Result<()>;

    /// Point the fleet controller's subscription at these namespaces only
    async fn update_fleet_subscription(&self, members: &[String]) -> Result<()>;

    /// Move licensing ConfigMaps and back up the licensing instance into the control namespace
    async fn migrate_licensing_state(&self, control_namespace: &str) -> Result<()>;

    /// Recreate the certificate manager configuration in the control namespace
    async fn migrate_cert_manager_state(&self, control_namespace: &str) -> Result<()>;

    /// Delete shared deployments that belonged to the old scope
    async fn delete_orphaned_workloads(&self) -> Result<()>;

    /// Delete cluster-scoped webhook configurations tied to the old scope
    async fn delete_scope_bindings(&self) -> Result<()>;

    async fn licensing_deployment_exists(&self, control_namespace: &str) -> Result<bool>;

    /// Recreate the licensing instance from its backup and drop the backup
    async fn restore_licensing_from_backup(&self, control_namespace: &str) -> Result<()>;

    /// Update the licensing instance's cluster-wide fields for its new namespace
    async fn update_licensing_scope_fields(&self, control_namespace: &str) -> Result<()>;

    /// Record the resolved members in the scope mapping ConfigMap
    async fn write_scope_mapping(&self, members: &[String]) -> Result<()>;

    /// Surface a failed isolation on the master CommonService
    async fn report_failure(&self, phase: IsolationPhase, message: &str) -> Result<()>;
}

/// Drives the machine and reports a failure on the master CommonService before returning it.
/// The persisted phase is left as is so the next pass resumes from it.
pub async fn isolate(
    ops: &dyn ScopeOperations,
    phase: IsolationPhase,
    plan: &IsolationPlan,
) -> Result<IsolationPhase> {
    match drive(ops, phase, plan).await {
        Ok(phase) => Ok(phase),
        Err(err) => {
            if let Err(report) = ops.report_failure(phase, &err.to_string()).await {
                warn!("failed to report isolation failure: {report:?}");
            }
            Err(err)
        }
    }
}

/// Runs the state machine from `phase` until it is back at Normal
pub async fn drive(
    ops: &dyn ScopeOperations,
    phase: IsolationPhase,
    plan: &IsolationPlan,
) -> Result<IsolationPhase> {
    if phase == IsolationPhase::Normal && plan.excluded.is_empty() {
        if !plan.included.is_empty() {
            info!("Adding {:?} to the scope", plan.included);
            ops.update_scope_members(&plan.members).await?;
            if !plan.had_explicit_mapping {
                ops.write_scope_mapping(&plan.members).await?;
            }
        }
        return Ok(IsolationPhase::Normal);
    }

    let mut phase = phase;
    loop {
        info!("Scope isolation in phase {phase}");
        phase = match phase {
            IsolationPhase::Normal => {
                info!("Isolating {:?} from the scope", plan.excluded);
                ops.scale_fleet_controller(0).await?;
                ops.persist_phase(IsolationPhase::Isolating).await?;
                IsolationPhase::Isolating
            }
            IsolationPhase::Isolating => {
                ops.persist_phase(IsolationPhase::Migrating).await?;
                IsolationPhase::Migrating
            }
            IsolationPhase::Migrating => {
                ops.delete_operand_objects().await?;
                ops.delete_namespace_scopes().await?;
                ops.update_scope_members(&plan.members).await?;
                ops.update_fleet_subscription(&plan.members).await?;
                ops.migrate_licensing_state(&plan.control_namespace).await?;
                ops.migrate_cert_manager_state(&plan.control_namespace).await?;
                ops.delete_orphaned_workloads().await?;
                ops.delete_scope_bindings().await?;
                ops.persist_phase(IsolationPhase::Restoring).await?;
                IsolationPhase::Restoring
            }
            IsolationPhase::Restoring => {
                if !ops
                    .licensing_deployment_exists(&plan.control_namespace)
                    .await?
                {
                    ops.restore_licensing_from_backup(&plan.control_namespace)
                        .await?;
                }
                ops.update_licensing_scope_fields(&plan.control_namespace)
                    .await?;
                ops.restore_operand_registry().await?;
                ops.scale_fleet_controller(1).await?;
                // mapping before marker: once Normal is persisted the plan comes back empty
                if !plan.had_explicit_mapping {
                    ops.write_scope_mapping(&plan.members).await?;
                }
                ops.persist_phase(IsolationPhase::Normal).await?;
                info!("Scope isolation complete");
                return Ok(IsolationPhase::Normal);
            }
        };
    }
}
