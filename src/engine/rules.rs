use std::collections::BTreeMap;

use serde_json::Value;

use crate::resources::operandconfigs::ServiceConfig;
use crate::{Error, Result};

const BUILTIN_RULES: &str = include_str!("tables/rules.yaml");

/// Leaf marker for fields converged to the largest value across tenants
pub const LARGEST_VALUE: &str = "LARGEST_VALUE";

/// Fields that may be overwritten directly when no rule governs them
pub const COMPARABLE_FIELDS: [&str; 5] = ["replicas", "cpu", "memory", "profile", "fipsEnabled"];

/// Sizing fields handed over to an external profile controller
pub const RESOURCE_FIELDS: [&str; 3] = ["replicas", "cpu", "memory"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldClass {
    /// Subject to max-merge across tenants
    LargestValue,
    /// On the comparable whitelist but not governed by a rule
    Comparable,
    /// Passed through as written
    Unrestricted,
}

/// Per-service convergence rules, mirroring the shape of an OperandConfig service spec
#[derive(Clone, Debug, Default)]
pub struct RuleTable {
    services: BTreeMap<String, Value>,
}

impl RuleTable {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_RULES)
    }

    pub fn from_yaml(document: &str) -> Result<Self> {
        let services: Vec<ServiceConfig> =
            serde_yaml::from_str(document).map_err(|err| Error::InvalidStaticTable {
                table: "rules".into(),
                message: err.to_string(),
            })?;
        Ok(Self {
            services: services
                .into_iter()
                .map(|s| (s.name, Value::Object(s.spec)))
                .collect(),
        })
    }

    /// Rule subtree for a service, keyed by custom resource name
    pub fn for_service(&self, name: &str) -> Option<&Value> {
        self.services.get(name)
    }
}

/// True when a rule node marks its field for largest-value convergence
fn is_largest_value(rule: Option<&Value>) -> bool {
    matches!(rule, Some(Value::String(s)) if s == LARGEST_VALUE)
}

/// Walks `path` through the rule tree in lock-step and classifies the field at its end
pub fn classify(rules: Option<&Value>, path: &[&str]) -> FieldClass {
    let node = rules.and_then(|root| path.iter().try_fold(root, |node, key| node.get(*key)));
    if is_largest_value(node) {
        return FieldClass::LargestValue;
    }
    match path.last() {
        Some(key) if COMPARABLE_FIELDS.contains(key) => FieldClass::Comparable,
        _ => FieldClass::Unrestricted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_parse() {
        let rules = RuleTable::builtin().unwrap();
        assert!(rules.for_service("ibm-iam-operator").is_some());
        assert!(rules.for_service("no-such-operator").is_none());
    }

    #[test]
    fn classifies_fields_by_walking_the_rule_tree() {
        let rules = RuleTable::builtin().unwrap();
        let iam = rules.for_service("ibm-iam-operator");

        assert_eq!(
            classify(iam, &["authentication", "replicas"]),
            FieldClass::LargestValue
        );
        assert_eq!(
            classify(iam, &["authentication", "authService", "resources", "limits", "cpu"]),
            FieldClass::LargestValue
        );
        assert_eq!(
            classify(iam, &["authentication", "config", "fipsEnabled"]),
            FieldClass::Comparable
        );
        assert_eq!(
            classify(iam, &["authentication", "config", "defaultAdminUser"]),
            FieldClass::Unrestricted
        );
        assert_eq!(classify(None, &["replicas"]), FieldClass::Comparable);
    }

    #[test]
    fn malformed_table_is_reported() {
        let err = RuleTable::from_yaml("- name: [").unwrap_err();
        assert!(matches!(err, Error::InvalidStaticTable { .. }));
    }
}
