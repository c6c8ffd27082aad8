use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use serde_json::Value;
use tracing::debug;

use super::compare::Extreme;
use super::merge::{
    merge_default_overlay, merge_extreme, prune_unsanctioned, reset_resource_in_template,
    strip_diverged,
};
use super::profile::{Fragment, ProfileControllers, ResolvedTenant, TenantContext};
use super::Engine;
use crate::resources::commonservices::CommonService;
use crate::resources::operandconfigs::ServiceConfig;
use crate::Result;

/// A tenant together with its position relative to the scope being aggregated
#[derive(Clone, Copy, Debug)]
pub struct TenantView<'a> {
    pub tenant: &'a CommonService,
    pub context: TenantContext,
}

/// Unioned desired configuration of every tenant in a pass
#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub services: Vec<ServiceConfig>,
    pub profile_controllers: ProfileControllers,
}

impl Engine {
    /// Folds all live tenants into one summary. Tenants are visited in (namespace, name) order;
    /// one tenant failing to resolve fails the whole pass.
    pub fn aggregate<'a>(&self, tenants: impl IntoIterator<Item = TenantView<'a>>) -> Result<Summary> {
        let mut tenants: Vec<_> = tenants
            .into_iter()
            .filter(|view| view.tenant.meta().deletion_timestamp.is_none())
            .collect();
        tenants.sort_by_key(|view| (view.tenant.namespace(), view.tenant.name_any()));

        let mut summary = Summary::default();
        for view in tenants {
            debug!(
                "Folding tenant {}/{}",
                view.tenant.namespace().unwrap_or_default(),
                view.tenant.name_any()
            );
            let resolved = self.resolve(view.tenant, view.context)?;
            self.fold_tenant(&mut summary, resolved);
        }
        Ok(summary)
    }

    fn fold_tenant(&self, summary: &mut Summary, resolved: ResolvedTenant) {
        for Fragment { service, options } in resolved.fragments {
            let rules = self.rules().for_service(&service.name);
            let mut spec = service.spec;
            match summary.services.iter_mut().find(|s| s.name == service.name) {
                Some(existing) => {
                    merge_default_overlay(&existing.spec, &mut spec, rules, options);
                    existing.spec = spec;
                }
                None => {
                    if !options.overwrite {
                        prune_unsanctioned(&mut spec, rules, options.direct_assign);
                    }
                    summary.services.push(ServiceConfig::new(service.name, spec));
                }
            }
        }
        summary
            .profile_controllers
            .merge(&resolved.profile_controllers);
    }

    /// Folds the summary into a published services list. Existing values are combined with the
    /// desired ones by `extreme`; fields flagged in `service_status` keep their published value,
    /// and sizing fields of services owned by an external profile controller are removed.
    pub fn fold_into_published(
        &self,
        summary: &Summary,
        published: &mut Vec<ServiceConfig>,
        extreme: Extreme,
        service_status: Option<&BTreeMap<String, Value>>,
    ) {
        for desired in &summary.services {
            let rules = self.rules().for_service(&desired.name);
            let external = summary.profile_controllers.is_external(&desired.name);

            let mut spec = desired.spec.clone();
            if external {
                reset_resource_in_template(&mut spec, rules);
            }
            if let Some(diverged) = service_status.and_then(|s| s.get(&desired.name)) {
                strip_diverged(&mut spec, diverged);
            }

            match published.iter_mut().find(|s| s.name == desired.name) {
                Some(existing) => {
                    if external {
                        reset_resource_in_template(&mut existing.spec, rules);
                    }
                    merge_extreme(&existing.spec, &mut spec, extreme);
                    existing.spec = spec;
                }
                None => published.push(ServiceConfig::new(desired.name.clone(), spec)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::RuleTable;
    use crate::engine::sizing::{SizeTemplates, SizeTier};
    use crate::resources::commonservices::CommonServiceSpec;
    use assert_json_diff::assert_json_eq;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use serde_json::json;

    const IAM: &str = "ibm-iam-operator";

    fn tenant(namespace: &str, spec: Value) -> CommonService {
        let spec: CommonServiceSpec = serde_json::from_value(spec).unwrap();
        let mut cs = CommonService::new("common-service", spec);
        cs.metadata.namespace = Some(namespace.into());
        cs
    }

    fn in_scope(tenants: &[CommonService]) -> Vec<TenantView<'_>> {
        tenants
            .iter()
            .map(|tenant| TenantView {
                tenant,
                context: TenantContext {
                    in_scope: true,
                    is_master: false,
                },
            })
            .collect()
    }

    fn publish(engine: &Engine, tenants: &[CommonService]) -> Vec<ServiceConfig> {
        let summary = engine.aggregate(in_scope(tenants)).unwrap();
        let mut published = Vec::new();
        engine.fold_into_published(&summary, &mut published, Extreme::Max, None);
        published
    }

    fn service<'a>(services: &'a [ServiceConfig], name: &str) -> &'a ServiceConfig {
        services.iter().find(|s| s.name == name).unwrap()
    }

    fn contains_key(value: &Value, key: &str) -> bool {
        match value {
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| k == key || contains_key(v, key)),
            _ => false,
        }
    }

    #[test]
    fn largest_cpu_request_wins() {
        let engine = Engine::builtin().unwrap();
        let tenants: Vec<_> = ["100m", "2", "500m"]
            .iter()
            .enumerate()
            .map(|(i, cpu)| {
                tenant(
                    &format!("tenant-{i}"),
                    json!({"services": [{
                        "name": IAM,
                        "spec": {"authentication": {"authService": {"resources": {"requests": {"cpu": cpu}}}}}
                    }]}),
                )
            })
            .collect();

        let published = publish(&engine, &tenants);
        assert_eq!(
            service(&published, IAM).spec["authentication"]["authService"]["resources"]["requests"]
                ["cpu"],
            json!("2")
        );
    }

    #[test]
    fn external_profile_controller_strips_sizing_fields() {
        let engine = Engine::builtin().unwrap();
        let tenants = vec![
            tenant(
                "tenant-a",
                json!({"size": "small", "services": [{"name": IAM, "managementStrategy": "vpa"}]}),
            ),
            tenant(
                "tenant-b",
                json!({"size": "large", "services": [{"name": IAM, "managementStrategy": "default"}]}),
            ),
        ];

        let summary = engine.aggregate(in_scope(&tenants)).unwrap();
        assert_eq!(summary.profile_controllers.get(IAM), "vpa");

        let mut published = vec![ServiceConfig::new(
            IAM,
            serde_json::from_value(json!({"authentication": {"replicas": 2, "config": {"clusterName": "c"}}}))
                .unwrap(),
        )];
        engine.fold_into_published(&summary, &mut published, Extreme::Max, None);

        let iam = Value::Object(service(&published, IAM).spec.clone());
        for field in ["replicas", "cpu", "memory"] {
            assert!(!contains_key(&iam, field), "{field} still published: {iam}");
        }
        assert_eq!(iam["authentication"]["config"]["clusterName"], json!("c"));

        let mongo = Value::Object(service(&published, "ibm-im-mongodb-operator").spec.clone());
        assert!(contains_key(&mongo, "replicas"));
    }

    #[test]
    fn small_and_large_tenants_publish_large_values() {
        let engine = Engine::builtin().unwrap();
        let tenants = vec![
            tenant("tenant-a", json!({"size": "small"})),
            tenant("tenant-b", json!({"size": "large"})),
        ];

        let published = publish(&engine, &tenants);
        let large = engine.templates().for_tier(SizeTier::Large);
        for template in large {
            assert_json_eq!(
                Value::Object(service(&published, &template.name).spec.clone()),
                Value::Object(template.spec.clone())
            );
        }
    }

    #[test]
    fn fields_only_the_smaller_tenant_declares_survive() {
        let rules = RuleTable::from_yaml(
            r#"
- name: ibm-iam-operator
  spec:
    authentication:
      replicas: LARGEST_VALUE
      cpu: LARGEST_VALUE
    audit:
      replicas: LARGEST_VALUE
"#,
        )
        .unwrap();
        let templates = SizeTemplates::from_documents([
            (
                SizeTier::Small,
                r#"
- name: ibm-iam-operator
  spec:
    authentication:
      replicas: 1
      cpu: 500m
    audit:
      replicas: 1
"#,
            ),
            (
                SizeTier::Large,
                r#"
- name: ibm-iam-operator
  spec:
    authentication:
      replicas: 3
      cpu: "2"
"#,
            ),
        ])
        .unwrap();
        let engine = Engine::new(rules, templates);

        // visit order is reversed on purpose: tenant-b sorts after tenant-a
        let tenants = vec![
            tenant("tenant-b", json!({"size": "large"})),
            tenant("tenant-a", json!({"size": "small"})),
        ];

        let published = publish(&engine, &tenants);
        assert_json_eq!(
            Value::Object(service(&published, IAM).spec.clone()),
            json!({
                "authentication": {"replicas": 3, "cpu": "2"},
                "audit": {"replicas": 1}
            })
        );
    }

    #[test]
    fn deleting_tenants_are_skipped() {
        let engine = Engine::builtin().unwrap();
        let mut leaving = tenant("tenant-b", json!({"size": "large"}));
        leaving.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        let tenants = vec![tenant("tenant-a", json!({"size": "small"})), leaving];

        let published = publish(&engine, &tenants);
        let small = engine.templates().for_tier(SizeTier::Small);
        assert_eq!(service(&published, IAM), service(small, IAM));
    }

    #[test]
    fn one_malformed_tenant_fails_the_pass() {
        let engine = Engine::builtin().unwrap();
        let tenants = vec![
            tenant("tenant-a", json!({"size": "small"})),
            tenant("tenant-b", json!({"services": [{"name": ""}]})),
        ];
        assert!(engine.aggregate(in_scope(&tenants)).is_err());
    }

    #[test]
    fn min_mode_shrinks_but_keeps_diverged_fields() {
        let engine = Engine::builtin().unwrap();
        let tenants = vec![tenant(
            "tenant-a",
            json!({"services": [{
                "name": IAM,
                "spec": {"authentication": {"replicas": 1, "authService": {"resources": {"limits": {"cpu": "500m"}}}}}
            }]}),
        )];
        let summary = engine.aggregate(in_scope(&tenants)).unwrap();

        let mut published = vec![ServiceConfig::new(
            IAM,
            serde_json::from_value(json!({
                "authentication": {"replicas": 3, "authService": {"resources": {"limits": {"cpu": "2"}}}}
            }))
            .unwrap(),
        )];
        let status = BTreeMap::from([(
            IAM.to_string(),
            json!({"authentication": {"replicas": true}}),
        )]);
        engine.fold_into_published(&summary, &mut published, Extreme::Min, Some(&status));

        assert_json_eq!(
            Value::Object(published[0].spec.clone()),
            json!({"authentication": {"replicas": 3, "authService": {"resources": {"limits": {"cpu": "500m"}}}}})
        );
    }

    #[test]
    fn out_of_scope_tenant_cannot_raise_namespaced_services() {
        let engine = Engine::builtin().unwrap();
        let tenants = vec![
            tenant("tenant-a", json!({"size": "small"})),
            tenant("tenant-b", json!({"size": "large"})),
        ];
        let views = vec![
            TenantView {
                tenant: &tenants[0],
                context: TenantContext {
                    in_scope: true,
                    is_master: true,
                },
            },
            TenantView {
                tenant: &tenants[1],
                context: TenantContext {
                    in_scope: false,
                    is_master: false,
                },
            },
        ];
        let summary = engine.aggregate(views).unwrap();

        let small = engine.templates().for_tier(SizeTier::Small);
        let large = engine.templates().for_tier(SizeTier::Large);
        assert_eq!(service(&summary.services, IAM), service(small, IAM));
        assert_eq!(
            service(&summary.services, "ibm-licensing-operator"),
            service(large, "ibm-licensing-operator")
        );
    }
}
