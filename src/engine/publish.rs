use async_trait::async_trait;
use kube::api::{Api, PostParams};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use super::compare::{deep_equal_maps, Extreme};
use super::{Engine, Summary};
use crate::resources::operandconfigs::{OperandConfig, OperandConfigSpec, ServiceConfig};
use crate::Result;

fn same_services(before: &[ServiceConfig], after: &[ServiceConfig]) -> bool {
    before.len() == after.len()
        && before.iter().all(|service| {
            after
                .iter()
                .find(|s| s.name == service.name)
                .is_some_and(|s| deep_equal_maps(&service.spec, &s.spec))
        })
}

/// Reads and writes of the published OperandConfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperandConfigStore: Send + Sync {
    async fn get_config(&self, name: &str) -> Result<Option<OperandConfig>>;

    async fn create_config(&self, opcon: &OperandConfig) -> Result<()>;

    /// Conditional on the resourceVersion carried by `opcon`
    async fn replace_config(&self, name: &str, opcon: &OperandConfig) -> Result<()>;
}

#[async_trait]
impl OperandConfigStore for Api<OperandConfig> {
    async fn get_config(&self, name: &str) -> Result<Option<OperandConfig>> {
        Ok(self.get_opt(name).await?)
    }

    async fn create_config(&self, opcon: &OperandConfig) -> Result<()> {
        self.create(&PostParams::default(), opcon).await?;
        Ok(())
    }

    async fn replace_config(&self, name: &str, opcon: &OperandConfig) -> Result<()> {
        self.replace(name, &PostParams::default(), opcon).await?;
        Ok(())
    }
}

impl Engine {
    /// Folds the summary into the OperandConfig in place and reports whether any leaf changed
    pub fn apply_summary(
        &self,
        summary: &Summary,
        opcon: &mut OperandConfig,
        extreme: Extreme,
    ) -> bool {
        let before = opcon.spec.services.clone();
        let service_status = opcon.service_status().cloned();
        self.fold_into_published(
            summary,
            &mut opcon.spec.services,
            extreme,
            service_status.as_ref(),
        );
        !same_services(&before, &opcon.spec.services)
    }

    /// Publishes the summary with at most one write. Returns true when nothing observable
    /// changed. Conflicts and other API errors are returned as-is.
    pub async fn publish(
        &self,
        store: &dyn OperandConfigStore,
        name: &str,
        summary: &Summary,
        extreme: Extreme,
    ) -> Result<bool> {
        let Some(mut opcon) = store.get_config(name).await? else {
            let mut opcon = OperandConfig::new(name, OperandConfigSpec::default());
            self.apply_summary(summary, &mut opcon, extreme);
            info!("Creating OperandConfig {name}");
            store.create_config(&opcon).await?;
            return Ok(false);
        };

        if !self.apply_summary(summary, &mut opcon, extreme) {
            debug!("OperandConfig {name} is up to date");
            return Ok(true);
        }

        info!("Updating OperandConfig {name}");
        store.replace_config(name, &opcon).await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate::TenantView;
    use crate::engine::profile::TenantContext;
    use crate::resources::commonservices::{CommonService, CommonServiceSpec};
    use serde_json::json;

    fn tenants() -> Vec<CommonService> {
        ["small", "large"]
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let spec: CommonServiceSpec = serde_json::from_value(json!({
                    "size": size,
                    "routeHost": "cp-console.example.com",
                    "services": [{"name": "ibm-iam-operator", "spec": {"authentication": {"replicas": 4}}}]
                }))
                .unwrap();
                let mut cs = CommonService::new("common-service", spec);
                cs.metadata.namespace = Some(format!("tenant-{i}"));
                cs
            })
            .collect()
    }

    fn summary(engine: &Engine, tenants: &[CommonService]) -> Summary {
        engine
            .aggregate(tenants.iter().map(|tenant| TenantView {
                tenant,
                context: TenantContext {
                    in_scope: true,
                    is_master: false,
                },
            }))
            .unwrap()
    }

    #[test]
    fn unchanged_tenants_produce_no_change() {
        let engine = Engine::builtin().unwrap();
        let tenants = tenants();
        let mut opcon = OperandConfig::new("common-service", OperandConfigSpec::default());

        assert!(engine.apply_summary(&summary(&engine, &tenants), &mut opcon, Extreme::Max));
        let published = opcon.spec.clone();
        assert!(!engine.apply_summary(&summary(&engine, &tenants), &mut opcon, Extreme::Max));
        assert_eq!(opcon.spec.services, published.services);
    }

    #[test]
    fn equivalent_quantities_are_not_a_change() {
        let engine = Engine::builtin().unwrap();
        let tenants = tenants();
        let summary = summary(&engine, &tenants);
        let mut opcon = OperandConfig::new("common-service", OperandConfigSpec::default());
        engine.apply_summary(&summary, &mut opcon, Extreme::Max);

        let iam = opcon
            .spec
            .services
            .iter_mut()
            .find(|s| s.name == "ibm-iam-operator")
            .unwrap();
        iam.spec["authentication"]["replicas"] = json!(4.0);

        assert!(!engine.apply_summary(&summary, &mut opcon, Extreme::Max));
    }

    #[test]
    fn new_tenant_value_is_a_change() {
        let engine = Engine::builtin().unwrap();
        let mut tenants = tenants();
        let mut opcon = OperandConfig::new("common-service", OperandConfigSpec::default());
        engine.apply_summary(&summary(&engine, &tenants), &mut opcon, Extreme::Max);

        tenants[0].spec.storage_class = Some("rook-ceph".into());
        assert!(engine.apply_summary(&summary(&engine, &tenants), &mut opcon, Extreme::Max));
    }

    fn published(engine: &Engine, tenants: &[CommonService]) -> OperandConfig {
        let mut opcon = OperandConfig::new("common-service", OperandConfigSpec::default());
        opcon.metadata.resource_version = Some("7".into());
        engine.apply_summary(&summary(engine, tenants), &mut opcon, Extreme::Max);
        opcon
    }

    #[tokio::test]
    async fn missing_config_is_created_once() {
        let engine = Engine::builtin().unwrap();
        let tenants = tenants();
        let mut store = MockOperandConfigStore::new();
        store
            .expect_get_config()
            .withf(|name| name == "common-service")
            .times(1)
            .returning(|_| Ok(None));
        store
            .expect_create_config()
            .withf(|opcon| opcon.spec.services.iter().any(|s| s.name == "ibm-iam-operator"))
            .times(1)
            .returning(|_| Ok(()));
        store.expect_replace_config().never();

        let no_change = engine
            .publish(&store, "common-service", &summary(&engine, &tenants), Extreme::Max)
            .await
            .unwrap();
        assert!(!no_change);
    }

    #[tokio::test]
    async fn converged_config_is_not_written() {
        let engine = Engine::builtin().unwrap();
        let tenants = tenants();
        let current = published(&engine, &tenants);
        let mut store = MockOperandConfigStore::new();
        store
            .expect_get_config()
            .times(1)
            .returning(move |_| Ok(Some(current.clone())));
        store.expect_create_config().never();
        store.expect_replace_config().never();

        let no_change = engine
            .publish(&store, "common-service", &summary(&engine, &tenants), Extreme::Max)
            .await
            .unwrap();
        assert!(no_change);
    }

    #[tokio::test]
    async fn changed_config_is_replaced_once_with_its_read_version() {
        let engine = Engine::builtin().unwrap();
        let mut tenants = tenants();
        let current = published(&engine, &tenants);
        tenants[0].spec.storage_class = Some("rook-ceph".into());
        let mut store = MockOperandConfigStore::new();
        store
            .expect_get_config()
            .times(1)
            .returning(move |_| Ok(Some(current.clone())));
        store.expect_create_config().never();
        store
            .expect_replace_config()
            .withf(|name, opcon| {
                name == "common-service" && opcon.metadata.resource_version.as_deref() == Some("7")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let no_change = engine
            .publish(&store, "common-service", &summary(&engine, &tenants), Extreme::Max)
            .await
            .unwrap();
        assert!(!no_change);
    }

    #[tokio::test]
    async fn conflicting_replace_is_returned() {
        let engine = Engine::builtin().unwrap();
        let mut tenants = tenants();
        let current = published(&engine, &tenants);
        tenants[0].spec.storage_class = Some("rook-ceph".into());
        let mut store = MockOperandConfigStore::new();
        store
            .expect_get_config()
            .times(1)
            .returning(move |_| Ok(Some(current.clone())));
        store.expect_replace_config().times(1).returning(|_, _| {
            Err(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".into(),
                message: "the object has been modified".into(),
                reason: "Conflict".into(),
                code: 409,
            })
            .into())
        });

        let err = engine
            .publish(&store, "common-service", &summary(&engine, &tenants), Extreme::Max)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::KubeError(kube::Error::Api(kube::error::ErrorResponse { code: 409, .. }))
        ));
    }
}
