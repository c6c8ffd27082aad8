use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::commonservices::preserve_unknown_fields_schema;

/// Aggregated desired configuration of every dependent operator in a scope
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "OperandConfig",
    group = "operator.ibm.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "OperandConfigStatus", shortname = "opcon")]
#[serde(rename_all = "camelCase")]
pub struct OperandConfigSpec {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Configuration of one dependent operator: custom resource name to field tree.
/// Also the shape of size templates and rule tables.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields_schema")]
    pub spec: Map<String, Value>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, spec: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandConfigStatus {
    /// Per service, a tree mirroring the spec whose `true` leaves mark fields that the
    /// dependent operator's own controller has diverged from; those are left untouched
    #[schemars(default, schema_with = "preserve_unknown_fields_schema")]
    pub service_status: Option<BTreeMap<String, Value>>,
}

impl OperandConfig {
    pub fn service_status(&self) -> Option<&BTreeMap<String, Value>> {
        self.status.as_ref().and_then(|s| s.service_status.as_ref())
    }
}
