use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub static COMMON_SERVICE_FINALIZER: &str = "commonservices.operator.ibm.com";

/// The management strategy used when a tenant does not name one
pub const DEFAULT_PROFILE_CONTROLLER: &str = "default";

/// Desired configuration of one tenant of the shared-services fleet
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "CommonService",
    group = "operator.ibm.com",
    version = "v3",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Isolation", "priority": 1, "type":"string", "jsonPath":".status.isolationPhase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "CommonServiceStatus", shortname = "cs")]
#[serde(rename_all = "camelCase")]
pub struct CommonServiceSpec {
    /// Size tier of the deployment: starterset, small, medium, large, production or custom.
    /// Any other value falls back to the per-service overrides only.
    pub size: Option<String>,
    /// Per-service overrides layered on top of the size template
    pub services: Option<Vec<ServiceOverride>>,
    /// StorageClass used by the services that provision volumes
    pub storage_class: Option<String>,
    /// Hostname of the management ingress route
    pub route_host: Option<String>,
    /// Enables FIPS mode for IAM and both ingress controllers unless a service overrides it
    pub fips_enabled: Option<bool>,
    /// Management strategy applied to services that do not declare their own. Defaults to `default`.
    pub profile_controller: Option<String>,
    /// Username of the default IAM administrator
    pub default_admin_user: Option<String>,
    /// Optional feature toggles
    pub features: Option<CommonServiceFeatures>,
}

/// Overrides for one dependent operator
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
    /// Name of the dependent operator, e.g. ibm-iam-operator
    pub name: String,
    /// Who owns the resource sizing of this operator: `default`, or an external
    /// controller such as `vpa` or `turbonomic`
    pub management_strategy: Option<String>,
    /// Custom resource name to configuration tree
    #[schemars(default, schema_with = "preserve_unknown_fields_schema")]
    pub spec: Option<Map<String, Value>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonServiceFeatures {
    /// Signals that more than one tenant shares the cluster
    pub multi_instance: Option<bool>,
}

pub(crate) fn preserve_unknown_fields_schema(_g: &mut schemars::gen::SchemaGenerator) -> Schema {
    serde_json::from_value(json!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    }))
    .unwrap()
}

/// Status of the CommonService
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonServiceStatus {
    pub phase: Option<ServicePhase>,
    pub conditions: Option<Vec<CommonServiceCondition>>,
    pub observed_generation: Option<i64>,
    /// Management strategy in effect per dependent operator after the last aggregation
    pub profile_controllers: Option<BTreeMap<String, String>>,
    /// Progress of an in-flight scope isolation; only ever set on the master tenant
    pub isolation_phase: Option<IsolationPhase>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ServicePhase {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

/// Persisted position of the scope isolation state machine
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum IsolationPhase {
    /// No isolation in flight
    #[default]
    Normal,
    /// Fleet controller is being paused
    Isolating,
    /// Scope objects are being deleted, regenerated and migrated
    Migrating,
    /// Migrated controllers are being restored in the control namespace
    Restoring,
}

impl IsolationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Isolating => "Isolating",
            Self::Migrating => "Migrating",
            Self::Restoring => "Restoring",
        }
    }

    /// True while a previous isolation has not yet completed
    pub fn in_maintenance(&self) -> bool {
        *self != Self::Normal
    }
}

impl std::fmt::Display for IsolationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonServiceCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<Time>,
    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,
    /// Unique, one-word, CamelCase reason for the condition's last transition.
    pub reason: Option<String>,
    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,
    /// Type of condition.
    pub r#type: String,
}

impl CommonService {
    pub fn isolation_phase(&self) -> IsolationPhase {
        self.status
            .as_ref()
            .and_then(|s| s.isolation_phase)
            .unwrap_or_default()
    }

    /// The explicit override this tenant declares for a service, if any
    pub fn service_override(&self, name: &str) -> Option<&ServiceOverride> {
        self.spec
            .services
            .as_ref()
            .and_then(|services| services.iter().find(|s| s.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tenant_with_service_overrides() {
        let spec: CommonServiceSpec = serde_json::from_value(json!({
            "size": "small",
            "fipsEnabled": true,
            "services": [{
                "name": "ibm-iam-operator",
                "managementStrategy": "vpa",
                "spec": {"authentication": {"replicas": 3}}
            }]
        }))
        .unwrap();

        let services = spec.services.unwrap();
        assert_eq!(services[0].management_strategy.as_deref(), Some("vpa"));
        assert_eq!(
            services[0].spec.as_ref().unwrap()["authentication"]["replicas"],
            json!(3)
        );
        assert_eq!(spec.fips_enabled, Some(true));
    }

    #[test]
    fn missing_isolation_phase_is_normal() {
        let cs = CommonService::new("common-service", CommonServiceSpec::default());
        assert_eq!(cs.isolation_phase(), IsolationPhase::Normal);
        assert!(!cs.isolation_phase().in_maintenance());
    }

    #[test]
    fn isolation_phase_serializes_by_name() {
        assert_eq!(
            serde_json::to_value(IsolationPhase::Migrating).unwrap(),
            json!("Migrating")
        );
    }
}
