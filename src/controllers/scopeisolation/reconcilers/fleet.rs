use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::client::Client;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::Resource;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::controllers::{Settings, COMMON_SERVICE_NAME};
use crate::resources::commonservices::{CommonService, IsolationPhase, ServicePhase};
use crate::resources::fleet::{
    NamespaceScope, NamespaceScopeSpec, OperandRegistry, OperandRegistrySpec, Subscription,
    SubscriptionConfig,
};
use crate::resources::operandconfigs::OperandConfig;
use crate::resources::scopemapping::ScopeMapping;
use crate::{Error, Result};

use super::{apply, delete_if_exists, FIELD_MANAGER};

/// NamespaceScopes regenerated by the fleet controller once it is scaled back up
const NAMESPACE_SCOPES: [&str; 4] = [
    COMMON_SERVICE_NAME,
    "nss-managedby-odlm",
    "odlm-scope-managedby-odlm",
    "nss-odlm-scope",
];

/// Shared deployments bound to the old scope
const ORPHANED_DEPLOYMENTS: [&str; 2] = ["secretshare", "ibm-common-service-webhook"];

/// Holds the OperandRegistry while the scope is rebuilt
const REGISTRY_BACKUP: &str = "common-service-registry-backup";
const REGISTRY_BACKUP_KEY: &str = "registry.yaml";

const MUTATING_WEBHOOK: &str = "ibm-common-service-webhook-configuration";
const VALIDATING_WEBHOOK: &str = "ibm-cs-ns-mapping-webhook-configuration";

/// Environment variable the fleet controller reads its watched namespaces from
const WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";

pub(super) async fn scale_fleet_controller(
    client: &Client,
    settings: &Settings,
    replicas: i32,
) -> Result<()> {
    let deployments: Api<Deployment> =
        Api::namespaced(client.clone(), &settings.operator_namespace);
    info!(
        "Scaling {} to {replicas} replicas",
        settings.fleet_controller
    );
    match deployments
        .patch_scale(
            &settings.fleet_controller,
            &PatchParams::default(),
            &Patch::Merge(json!({"spec": {"replicas": replicas}})),
        )
        .await
    {
        Err(kube::Error::Api(kube::error::ErrorResponse { code: 404, .. })) => {
            debug!("{} is not installed", settings.fleet_controller);
            Ok(())
        }
        Err(err) => Err(err.into()),
        Ok(_) => Ok(()),
    }
}

pub(super) async fn persist_phase(
    client: &Client,
    settings: &Settings,
    phase: IsolationPhase,
) -> Result<()> {
    let css: Api<CommonService> = Api::namespaced(client.clone(), &settings.operator_namespace);
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    };
    info!("Persisting isolation phase {phase}");
    css.patch_status(
        COMMON_SERVICE_NAME,
        &params,
        &Patch::Merge(json!({"status": {"isolationPhase": phase}})),
    )
    .await?;
    Ok(())
}

/// Publishes a `FailedIsolation` event on the master CommonService and marks it Failed.
/// The isolation phase is left untouched.
pub(super) async fn report_failure(
    client: &Client,
    recorder: &Recorder,
    settings: &Settings,
    phase: IsolationPhase,
    message: &str,
) -> Result<()> {
    let css: Api<CommonService> = Api::namespaced(client.clone(), &settings.operator_namespace);
    let Some(master) = css.get_opt(COMMON_SERVICE_NAME).await? else {
        warn!("No master CommonService to report the failed isolation on");
        return Ok(());
    };

    recorder
        .publish(
            &Event {
                type_: EventType::Warning,
                reason: "FailedIsolation".into(),
                note: Some(format!("Scope isolation failed in phase {phase}: {message}")),
                action: "Isolate".into(),
                secondary: None,
            },
            &master.object_ref(&()),
        )
        .await?;

    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    };
    css.patch_status(
        COMMON_SERVICE_NAME,
        &params,
        &Patch::Merge(json!({"status": {"phase": ServicePhase::Failed}})),
    )
    .await?;
    Ok(())
}

/// The OperandConfig is republished by the next CommonService reconcile. Nothing regenerates
/// the OperandRegistry, so it is parked in a ConfigMap until `restore_operand_registry`.
pub(super) async fn delete_operand_objects(client: &Client, settings: &Settings) -> Result<()> {
    let registries: Api<OperandRegistry> =
        Api::namespaced(client.clone(), &settings.services_namespace);
    let configs: Api<OperandConfig> = Api::namespaced(client.clone(), &settings.services_namespace);

    if let Some(registry) = registries.get_opt(COMMON_SERVICE_NAME).await? {
        let cms: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.services_namespace);
        let backup = registry_backup(&settings.services_namespace, &registry.spec)?;
        info!("Backing up OperandRegistry {COMMON_SERVICE_NAME} to {REGISTRY_BACKUP}");
        apply(&cms, REGISTRY_BACKUP, &backup).await?;
        delete_if_exists(&registries, COMMON_SERVICE_NAME).await?;
    }
    delete_if_exists(&configs, COMMON_SERVICE_NAME).await
}

fn registry_backup(namespace: &str, spec: &OperandRegistrySpec) -> Result<ConfigMap> {
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(REGISTRY_BACKUP.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            REGISTRY_BACKUP_KEY.into(),
            serde_yaml::to_string(spec)?,
        )])),
        ..Default::default()
    })
}

fn registry_from_backup(namespace: &str, backup: &ConfigMap) -> Result<OperandRegistry> {
    let Some(document) = backup
        .data
        .as_ref()
        .and_then(|data| data.get(REGISTRY_BACKUP_KEY))
    else {
        return Err(Error::InvalidBackup(
            REGISTRY_BACKUP.into(),
            format!("missing key {REGISTRY_BACKUP_KEY}"),
        ));
    };
    let spec: OperandRegistrySpec = serde_yaml::from_str(document)
        .map_err(|err| Error::InvalidBackup(REGISTRY_BACKUP.into(), err.to_string()))?;
    let mut registry = OperandRegistry::new(COMMON_SERVICE_NAME, spec);
    registry.metadata.namespace = Some(namespace.into());
    Ok(registry)
}

/// Recreates the OperandRegistry from its backup unless it already exists, then drops the backup
pub(super) async fn restore_operand_registry(client: &Client, settings: &Settings) -> Result<()> {
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.services_namespace);
    let Some(backup) = cms.get_opt(REGISTRY_BACKUP).await? else {
        debug!("No OperandRegistry backup to restore");
        return Ok(());
    };

    let registries: Api<OperandRegistry> =
        Api::namespaced(client.clone(), &settings.services_namespace);
    if registries.get_opt(COMMON_SERVICE_NAME).await?.is_none() {
        let registry = registry_from_backup(&settings.services_namespace, &backup)?;
        info!("Restoring OperandRegistry {COMMON_SERVICE_NAME}");
        apply(&registries, COMMON_SERVICE_NAME, &registry).await?;
    }
    delete_if_exists(&cms, REGISTRY_BACKUP).await
}

pub(super) async fn delete_namespace_scopes(client: &Client, settings: &Settings) -> Result<()> {
    let scopes: Api<NamespaceScope> = Api::namespaced(client.clone(), &settings.services_namespace);
    for name in NAMESPACE_SCOPES {
        delete_if_exists(&scopes, name).await?;
    }
    Ok(())
}

pub(super) async fn update_scope_members(
    client: &Client,
    settings: &Settings,
    members: &[String],
) -> Result<()> {
    let scopes: Api<NamespaceScope> = Api::namespaced(client.clone(), &settings.services_namespace);
    let mut scope = NamespaceScope::new(
        COMMON_SERVICE_NAME,
        NamespaceScopeSpec {
            namespace_members: members.to_vec(),
            config_map_name: Some("namespace-scope".into()),
            restart_labels: None,
        },
    );
    scope.metadata.namespace = Some(settings.services_namespace.clone());
    info!("Setting scope members to {members:?}");
    apply(&scopes, COMMON_SERVICE_NAME, &scope).await
}

pub(super) async fn update_fleet_subscription(
    client: &Client,
    settings: &Settings,
    members: &[String],
) -> Result<()> {
    let subscriptions: Api<Subscription> =
        Api::namespaced(client.clone(), &settings.operator_namespace);
    let Some(mut subscription) = subscriptions.get_opt(&settings.fleet_subscription).await? else {
        info!(
            "Subscription {} not found, nothing to update",
            settings.fleet_subscription
        );
        return Ok(());
    };

    let watched = members.join(",");
    let env = subscription
        .spec
        .config
        .get_or_insert_with(SubscriptionConfig::default)
        .env
        .get_or_insert_with(Vec::new);
    match env.iter_mut().find(|var| var.name == WATCH_NAMESPACE) {
        Some(var) if var.value.as_deref() == Some(watched.as_str()) => return Ok(()),
        Some(var) => var.value = Some(watched),
        None => env.push(EnvVar {
            name: WATCH_NAMESPACE.into(),
            value: Some(watched),
            ..Default::default()
        }),
    }

    info!("Updating Subscription {}", settings.fleet_subscription);
    subscriptions
        .replace(
            &settings.fleet_subscription,
            &PostParams::default(),
            &subscription,
        )
        .await?;
    Ok(())
}

pub(super) async fn delete_orphaned_workloads(client: &Client, settings: &Settings) -> Result<()> {
    let deployments: Api<Deployment> =
        Api::namespaced(client.clone(), &settings.services_namespace);
    for name in ORPHANED_DEPLOYMENTS {
        delete_if_exists(&deployments, name).await?;
    }
    Ok(())
}

pub(super) async fn delete_scope_bindings(client: &Client) -> Result<()> {
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    delete_if_exists(&mutating, MUTATING_WEBHOOK).await?;
    delete_if_exists(&validating, VALIDATING_WEBHOOK).await
}

pub(super) async fn write_scope_mapping(
    client: &Client,
    settings: &Settings,
    members: &[String],
) -> Result<()> {
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.scope_mapping_namespace);
    let existing = cms.get_opt(&settings.scope_mapping_name).await?;
    let mut cm = existing.clone().unwrap_or_else(|| ConfigMap {
        metadata: ObjectMeta {
            name: Some(settings.scope_mapping_name.clone()),
            namespace: Some(settings.scope_mapping_namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    });

    let mut mapping = ScopeMapping::from_config_map(&cm)?;
    mapping.upsert(&settings.services_namespace, members.to_vec());
    mapping.write_to(&mut cm)?;

    info!(
        "Recording scope {} in {}/{}",
        settings.services_namespace, settings.scope_mapping_namespace, settings.scope_mapping_name
    );
    match existing {
        Some(_) => {
            cms.replace(&settings.scope_mapping_name, &PostParams::default(), &cm)
                .await?;
        }
        None => {
            cms.create(&PostParams::default(), &cm).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_survives_its_backup() {
        let spec: OperandRegistrySpec = serde_json::from_value(json!({
            "operators": [{
                "name": "ibm-im-operator",
                "namespace": "cs",
                "channel": "v4.0",
                "packageName": "ibm-iam-operator"
            }]
        }))
        .unwrap();

        let backup = registry_backup("cs", &spec).unwrap();
        assert_eq!(backup.metadata.name.as_deref(), Some(REGISTRY_BACKUP));

        let registry = registry_from_backup("cs", &backup).unwrap();
        assert_eq!(registry.metadata.name.as_deref(), Some(COMMON_SERVICE_NAME));
        assert_eq!(registry.metadata.namespace.as_deref(), Some("cs"));
        assert_eq!(
            serde_json::to_value(&registry.spec).unwrap(),
            serde_json::to_value(&spec).unwrap()
        );
    }

    #[test]
    fn backup_without_document_is_rejected() {
        let backup = ConfigMap {
            metadata: ObjectMeta {
                name: Some(REGISTRY_BACKUP.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = registry_from_backup("cs", &backup).unwrap_err();
        assert!(matches!(err, Error::InvalidBackup(name, _) if name == REGISTRY_BACKUP));
    }
}
