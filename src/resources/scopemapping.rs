use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Key of the YAML document inside the scope mapping ConfigMap
pub const SCOPE_MAPPING_KEY: &str = "common-service-maps.yaml";

/// Namespace-to-tenant mapping stored in the `common-service-maps` ConfigMap
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMapping {
    #[serde(default)]
    pub namespace_mapping: Vec<NamespaceMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NamespaceMapping {
    #[serde(rename = "requested-from-namespace", default)]
    pub requested_from_namespace: Vec<String>,
    #[serde(rename = "map-to-common-service-namespace")]
    pub map_to_common_service_namespace: String,
}

impl ScopeMapping {
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        let Some(document) = cm
            .data
            .as_ref()
            .and_then(|d| d.get(SCOPE_MAPPING_KEY))
            .filter(|d| !d.trim().is_empty())
        else {
            return Ok(Self::default());
        };
        serde_yaml::from_str(document)
            .map_err(|err| Error::InvalidScopeMapping(cm.name_any(), err.to_string()))
    }

    /// Writes the document back into the ConfigMap, keeping any other keys
    pub fn write_to(&self, cm: &mut ConfigMap) -> Result<()> {
        let document = serde_yaml::to_string(self)?;
        cm.data
            .get_or_insert_with(BTreeMap::new)
            .insert(SCOPE_MAPPING_KEY.into(), document);
        Ok(())
    }

    pub fn entry_for(&self, services_namespace: &str) -> Option<&NamespaceMapping> {
        self.namespace_mapping
            .iter()
            .find(|m| m.map_to_common_service_namespace == services_namespace)
    }

    /// Whether a tenant living in `tenant_namespace` may influence the configuration of the
    /// scope served from `services_namespace`. Without an explicit entry every tenant is in scope.
    pub fn is_in_scope(&self, tenant_namespace: &str, services_namespace: &str) -> bool {
        if tenant_namespace == services_namespace {
            return true;
        }
        match self.entry_for(services_namespace) {
            Some(entry) => entry
                .requested_from_namespace
                .iter()
                .any(|ns| ns == tenant_namespace),
            None => true,
        }
    }

    pub fn upsert(&mut self, services_namespace: &str, members: Vec<String>) {
        match self
            .namespace_mapping
            .iter_mut()
            .find(|m| m.map_to_common_service_namespace == services_namespace)
        {
            Some(entry) => entry.requested_from_namespace = members,
            None => self.namespace_mapping.push(NamespaceMapping {
                requested_from_namespace: members,
                map_to_common_service_namespace: services_namespace.into(),
            }),
        }
    }
}
