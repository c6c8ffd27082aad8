//! Custom resources owned by collaborator operators.
//!
//! Only the fields this operator reads or writes are typed; everything else is kept
//! verbatim through the flattened `extra` maps so that a read-modify-write never drops data.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog of dependent operators installed by the fleet controller
/// API: operator.ibm.com/v1alpha1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operator.ibm.com",
    version = "v1alpha1",
    kind = "OperandRegistry",
    namespaced
)]
pub struct OperandRegistrySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<BTreeMap<String, Value>>,
}

/// Set of namespaces a tenant's dependent operators may act on
/// API: operator.ibm.com/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operator.ibm.com",
    version = "v1",
    kind = "NamespaceScope",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceScopeSpec {
    #[serde(default)]
    pub namespace_members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_labels: Option<BTreeMap<String, String>>,
}

/// Licensing service instance; cluster scoped
/// API: operator.ibm.com/v1alpha1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "operator.ibm.com", version = "v1alpha1", kind = "IBMLicensing")]
#[serde(rename_all = "camelCase")]
pub struct IBMLicensingSpec {
    /// Namespace the licensing service is deployed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_namespace: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Configuration of the shared certificate manager
/// API: operator.ibm.com/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operator.ibm.com",
    version = "v1",
    kind = "CertManagerConfig",
    namespaced
)]
pub struct CertManagerConfigSpec {
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// OLM subscription of the fleet controller
/// API: operators.coreos.com/v1alpha1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    namespaced
)]
pub struct SubscriptionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<SubscriptionConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct SubscriptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<k8s_openapi::api::core::v1::EnvVar>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
