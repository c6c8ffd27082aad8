use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::controllers::Settings;
use crate::resources::fleet::{CertManagerConfig, IBMLicensing, IBMLicensingSpec};
use crate::{Error, Result};

use super::{apply, delete_if_exists, FIELD_MANAGER};

const LICENSING_INSTANCE: &str = "instance";
const LICENSING_DEPLOYMENT: &str = "ibm-licensing-service-instance";
const LICENSING_BACKUP: &str = "ibm-licensing-instance-backup";
const LICENSING_BACKUP_KEY: &str = "instance.yaml";
const CERT_MANAGER_CONFIG: &str = "default";

const LICENSING_CONFIG_MAPS: [&str; 7] = [
    "ibm-licensing-config",
    "ibm-licensing-annotations",
    "ibm-licensing-products",
    "ibm-licensing-products-vpc-hour",
    "ibm-licensing-cloudpak-config",
    "ibm-licensing-products-groups",
    "ibm-licensing-cloudpak-groups",
];

fn relocated(metadata: &ObjectMeta, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: metadata.name.clone(),
        namespace: Some(namespace.into()),
        labels: metadata.labels.clone(),
        annotations: metadata.annotations.clone(),
        ..Default::default()
    }
}

/// Moves the licensing configuration out of the services namespace and parks the licensing
/// instance in a backup until the scope is restored
pub(super) async fn migrate_licensing_state(
    client: &Client,
    settings: &Settings,
    control_namespace: &str,
) -> Result<()> {
    let source: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.services_namespace);
    let target: Api<ConfigMap> = Api::namespaced(client.clone(), control_namespace);

    for name in LICENSING_CONFIG_MAPS {
        let Some(cm) = source.get_opt(name).await? else {
            continue;
        };
        let copy = ConfigMap {
            metadata: relocated(&cm.metadata, control_namespace),
            data: cm.data.clone(),
            binary_data: cm.binary_data.clone(),
            immutable: cm.immutable,
        };
        info!("Moving ConfigMap {name} to {control_namespace}");
        apply(&target, name, &copy).await?;
        delete_if_exists(&source, name).await?;
    }

    let instances: Api<IBMLicensing> = Api::all(client.clone());
    let Some(instance) = instances.get_opt(LICENSING_INSTANCE).await? else {
        debug!("No IBMLicensing instance to back up");
        return Ok(());
    };
    let backup = ConfigMap {
        metadata: ObjectMeta {
            name: Some(LICENSING_BACKUP.into()),
            namespace: Some(control_namespace.into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            LICENSING_BACKUP_KEY.into(),
            serde_yaml::to_string(&instance.spec)?,
        )])),
        ..Default::default()
    };
    info!("Backing up IBMLicensing {LICENSING_INSTANCE} to {control_namespace}/{LICENSING_BACKUP}");
    apply(&target, LICENSING_BACKUP, &backup).await?;
    delete_if_exists(&instances, LICENSING_INSTANCE).await
}

pub(super) async fn migrate_cert_manager_state(
    client: &Client,
    settings: &Settings,
    control_namespace: &str,
) -> Result<()> {
    let source: Api<CertManagerConfig> =
        Api::namespaced(client.clone(), &settings.services_namespace);
    let Some(config) = source.get_opt(CERT_MANAGER_CONFIG).await? else {
        return Ok(());
    };

    let target: Api<CertManagerConfig> = Api::namespaced(client.clone(), control_namespace);
    let mut copy = CertManagerConfig::new(&config.name_any(), config.spec.clone());
    copy.metadata = relocated(&config.metadata, control_namespace);
    info!("Moving CertManagerConfig {CERT_MANAGER_CONFIG} to {control_namespace}");
    apply(&target, CERT_MANAGER_CONFIG, &copy).await?;
    delete_if_exists(&source, CERT_MANAGER_CONFIG).await
}

pub(super) async fn licensing_deployment_exists(
    client: &Client,
    control_namespace: &str,
) -> Result<bool> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), control_namespace);
    Ok(deployments.get_opt(LICENSING_DEPLOYMENT).await?.is_some())
}

pub(super) async fn restore_licensing_from_backup(
    client: &Client,
    control_namespace: &str,
) -> Result<()> {
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), control_namespace);
    let Some(backup) = cms.get_opt(LICENSING_BACKUP).await? else {
        warn!("Licensing is not running in {control_namespace} and there is no backup to restore");
        return Ok(());
    };
    let Some(document) = backup
        .data
        .as_ref()
        .and_then(|data| data.get(LICENSING_BACKUP_KEY))
    else {
        return Err(Error::InvalidBackup(
            LICENSING_BACKUP.into(),
            format!("missing key {LICENSING_BACKUP_KEY}"),
        ));
    };

    let mut spec: IBMLicensingSpec = serde_yaml::from_str(document)
        .map_err(|err| Error::InvalidBackup(LICENSING_BACKUP.into(), err.to_string()))?;
    spec.instance_namespace = Some(control_namespace.into());

    let instances: Api<IBMLicensing> = Api::all(client.clone());
    info!("Restoring IBMLicensing {LICENSING_INSTANCE} into {control_namespace}");
    apply(
        &instances,
        LICENSING_INSTANCE,
        &IBMLicensing::new(LICENSING_INSTANCE, spec),
    )
    .await?;
    delete_if_exists(&cms, LICENSING_BACKUP).await
}

pub(super) async fn update_licensing_scope_fields(
    client: &Client,
    control_namespace: &str,
) -> Result<()> {
    let instances: Api<IBMLicensing> = Api::all(client.clone());
    if instances.get_opt(LICENSING_INSTANCE).await?.is_none() {
        return Ok(());
    }
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.into()),
        ..Default::default()
    };
    instances
        .patch(
            LICENSING_INSTANCE,
            &params,
            &Patch::Merge(json!({"spec": {"instanceNamespace": control_namespace}})),
        )
        .await?;
    Ok(())
}
