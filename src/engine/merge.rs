//! Recursive merge primitives over schema-less configuration trees.
//!
//! All functions walk `serde_json` maps in lock-step. A `changed` tree is always the one
//! mutated in place; `default` is only read. Branches that are already equal are skipped,
//! so converged inputs never produce a modification.

use serde_json::{Map, Value};

use super::compare::{pick, Extreme};
use super::rules::{classify, FieldClass, RESOURCE_FIELDS};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Skip pruning `changed` against the rule table
    pub overwrite: bool,
    /// Keep leaves that no rule covers when pruning
    pub direct_assign: bool,
}

impl MergeOptions {
    /// Rule-filtered merge: fields without a rule are dropped
    pub const RULED: Self = Self {
        overwrite: false,
        direct_assign: false,
    };

    /// The tenant's own configuration: every field is kept
    pub const DIRECT: Self = Self {
        overwrite: true,
        direct_assign: true,
    };
}

/// Overlays `default` under `changed`.
///
/// Keys missing from `changed` are copied from `default`. Scalar conflicts on fields the rules
/// mark `LARGEST_VALUE` resolve to the larger value; any other conflict keeps `changed`.
/// Unless `overwrite` is set, `changed` is first pruned of fields the rules do not sanction.
pub fn merge_default_overlay(
    default: &Map<String, Value>,
    changed: &mut Map<String, Value>,
    rules: Option<&Value>,
    options: MergeOptions,
) {
    if !options.overwrite {
        prune_unsanctioned(changed, rules, options.direct_assign);
    }
    overlay(default, changed, rules);
}

fn overlay(default: &Map<String, Value>, changed: &mut Map<String, Value>, rules: Option<&Value>) {
    for (key, default_value) in default {
        let rule = rules.and_then(|r| r.get(key));
        match changed.get_mut(key) {
            None => {
                changed.insert(key.clone(), default_value.clone());
            }
            Some(changed_value) if *changed_value == *default_value => {}
            Some(changed_value) if changed_value.is_null() => {
                *changed_value = default_value.clone();
            }
            Some(Value::Object(changed_child)) => {
                // a tree replacing a scalar is kept as written
                if let Value::Object(default_child) = default_value {
                    overlay(default_child, changed_child, rule);
                }
            }
            Some(changed_value) => {
                if default_value.is_object() {
                    continue;
                }
                match classify(rules, &[key.as_str()]) {
                    FieldClass::LargestValue => {
                        let larger = pick(changed_value, default_value, Extreme::Max).clone();
                        *changed_value = larger;
                    }
                    // the tenant's value overwrites directly
                    FieldClass::Comparable | FieldClass::Unrestricted => {}
                }
            }
        }
    }
}

/// Removes every leaf of `changed` with no counterpart in the rule tree, unless `direct_assign`.
/// Subtrees left empty by the pruning are removed as well.
pub fn prune_unsanctioned(changed: &mut Map<String, Value>, rules: Option<&Value>, direct_assign: bool) {
    if direct_assign {
        return;
    }
    changed.retain(|key, value| {
        let rule = rules.and_then(|r| r.get(key));
        match (value, rule) {
            (_, None) => false,
            (Value::Object(child), Some(rule @ Value::Object(_))) => {
                let was_empty = child.is_empty();
                prune_unsanctioned(child, Some(rule), direct_assign);
                was_empty || !child.is_empty()
            }
            (_, Some(_)) => true,
        }
    });
}

/// Folds `default` into `changed`, resolving every scalar pair to the larger (`Max`) or smaller
/// (`Min`) value. A missing or null side takes the other side's value.
pub fn merge_extreme(default: &Map<String, Value>, changed: &mut Map<String, Value>, extreme: Extreme) {
    for (key, default_value) in default {
        match changed.get_mut(key) {
            None => {
                changed.insert(key.clone(), default_value.clone());
            }
            Some(changed_value) if *changed_value == *default_value => {}
            Some(changed_value) if changed_value.is_null() => {
                *changed_value = default_value.clone();
            }
            Some(Value::Object(changed_child)) => {
                if let Value::Object(default_child) = default_value {
                    merge_extreme(default_child, changed_child, extreme);
                }
            }
            Some(changed_value) => {
                if default_value.is_null() || default_value.is_object() {
                    continue;
                }
                let picked = pick(changed_value, default_value, extreme).clone();
                *changed_value = picked;
            }
        }
    }
}

/// Applies a size template under a tenant override: tenant leaves win, the template fills gaps.
pub fn deep_merge_two_maps(
    default: &Map<String, Value>,
    overlay: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = overlay.clone();
    fill_gaps(default, &mut merged);
    merged
}

fn fill_gaps(default: &Map<String, Value>, target: &mut Map<String, Value>) {
    for (key, default_value) in default {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), default_value.clone());
            }
            Some(value) if value.is_null() => *value = default_value.clone(),
            Some(Value::Object(child)) => {
                if let Value::Object(default_child) = default_value {
                    fill_gaps(default_child, child);
                }
            }
            Some(_) => {}
        }
    }
}

/// Deletes every replicas/cpu/memory leaf that has a rule, handing those fields over to an
/// external profile controller. Subtrees emptied by the reset are removed.
pub fn reset_resource_in_template(config: &mut Map<String, Value>, rules: Option<&Value>) {
    let Some(rules) = rules else {
        return;
    };
    config.retain(|key, value| {
        let Some(rule) = rules.get(key) else {
            return true;
        };
        if let Value::Object(child) = value {
            let was_empty = child.is_empty();
            reset_resource_in_template(child, Some(rule));
            return was_empty || !child.is_empty();
        }
        !RESOURCE_FIELDS.contains(&key.as_str())
    });
}

/// Removes from `desired` every leaf that `diverged` flags with `true`
pub fn strip_diverged(desired: &mut Map<String, Value>, diverged: &Value) {
    let Value::Object(diverged) = diverged else {
        return;
    };
    desired.retain(|key, value| match (diverged.get(key), value) {
        (Some(Value::Bool(true)), _) => false,
        (Some(flags @ Value::Object(_)), Value::Object(child)) => {
            strip_diverged(child, flags);
            true
        }
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn rules() -> Value {
        json!({
            "authentication": {
                "replicas": "LARGEST_VALUE",
                "resources": {"limits": {"cpu": "LARGEST_VALUE", "memory": "LARGEST_VALUE"}},
                "config": {"clusterName": "ANY"}
            }
        })
    }

    #[test]
    fn overlay_fills_gaps_and_takes_largest() {
        let default = map(json!({
            "authentication": {
                "replicas": 3,
                "resources": {"limits": {"cpu": "2", "memory": "1Gi"}}
            }
        }));
        let mut changed = map(json!({
            "authentication": {
                "replicas": 1,
                "resources": {"limits": {"cpu": "500m", "memory": "2Gi"}}
            }
        }));

        merge_default_overlay(&default, &mut changed, Some(&rules()), MergeOptions::RULED);

        assert_json_eq!(
            Value::Object(changed),
            json!({
                "authentication": {
                    "replicas": 3,
                    "resources": {"limits": {"cpu": "2", "memory": "2Gi"}}
                }
            })
        );
    }

    #[test]
    fn overlay_prunes_fields_without_rules() {
        let mut changed = map(json!({
            "authentication": {
                "replicas": 2,
                "brandNewField": "x",
                "config": {"clusterName": "a", "unknown": true}
            },
            "unknownResource": {"replicas": 1}
        }));

        merge_default_overlay(&Map::new(), &mut changed, Some(&rules()), MergeOptions::RULED);

        assert_json_eq!(
            Value::Object(changed),
            json!({"authentication": {"replicas": 2, "config": {"clusterName": "a"}}})
        );
    }

    #[test]
    fn direct_assign_keeps_unruled_fields() {
        let default = map(json!({"authentication": {"replicas": 5}}));
        let mut changed = map(json!({"authentication": {"replicas": 2, "brandNewField": "x"}}));

        merge_default_overlay(
            &default,
            &mut changed,
            Some(&rules()),
            MergeOptions {
                overwrite: false,
                direct_assign: true,
            },
        );

        assert_json_eq!(
            Value::Object(changed),
            json!({"authentication": {"replicas": 5, "brandNewField": "x"}})
        );
    }

    #[test]
    fn unruled_scalar_conflict_keeps_changed() {
        let default = map(json!({"authentication": {"config": {"clusterName": "old"}}}));
        let mut changed = map(json!({"authentication": {"config": {"clusterName": "new"}}}));

        merge_default_overlay(&default, &mut changed, Some(&rules()), MergeOptions::RULED);

        assert_eq!(changed["authentication"]["config"]["clusterName"], json!("new"));
    }

    #[test]
    fn comparable_field_without_rule_is_not_max_merged() {
        let default = map(json!({"authentication": {"config": {"fipsEnabled": true}}, "profile": "large"}));
        let mut changed = map(json!({"authentication": {"config": {"fipsEnabled": false}}, "profile": "small"}));

        merge_default_overlay(&default, &mut changed, Some(&rules()), MergeOptions::DIRECT);

        assert_json_eq!(
            Value::Object(changed),
            json!({"authentication": {"config": {"fipsEnabled": false}}, "profile": "small"})
        );
    }

    #[test]
    fn replicas_of_an_unruled_service_keep_changed() {
        let default = map(json!({"other": {"replicas": 4}}));
        let mut changed = map(json!({"other": {"replicas": 1}}));

        merge_default_overlay(&default, &mut changed, Some(&rules()), MergeOptions::DIRECT);

        assert_eq!(changed["other"]["replicas"], json!(1));
    }

    #[test]
    fn extreme_merge_max_and_min() {
        let default = map(json!({"a": {"cpu": "2", "memory": "512Mi"}, "replicas": 1}));

        let mut max = map(json!({"a": {"cpu": "100m", "memory": "1Gi"}, "replicas": null}));
        merge_extreme(&default, &mut max, Extreme::Max);
        assert_json_eq!(
            Value::Object(max),
            json!({"a": {"cpu": "2", "memory": "1Gi"}, "replicas": 1})
        );

        let mut min = map(json!({"a": {"cpu": "100m", "memory": "1Gi"}, "extra": 4}));
        merge_extreme(&default, &mut min, Extreme::Min);
        assert_json_eq!(
            Value::Object(min),
            json!({"a": {"cpu": "100m", "memory": "512Mi"}, "replicas": 1, "extra": 4})
        );
    }

    #[test]
    fn extreme_merge_is_a_no_op_on_converged_trees() {
        let default = map(json!({"a": {"cpu": "2"}}));
        let mut changed = default.clone();
        merge_extreme(&default, &mut changed, Extreme::Max);
        assert_eq!(changed, default);
    }

    #[test]
    fn deep_merge_keeps_tenant_leaves() {
        let template = map(json!({"authentication": {"replicas": 1, "resources": {"cpu": "1"}}}));
        let tenant = map(json!({"authentication": {"replicas": 5}}));

        assert_json_eq!(
            Value::Object(deep_merge_two_maps(&template, &tenant)),
            json!({"authentication": {"replicas": 5, "resources": {"cpu": "1"}}})
        );
    }

    #[test]
    fn reset_removes_ruled_resource_fields() {
        let mut config = map(json!({
            "authentication": {
                "replicas": 3,
                "resources": {"limits": {"cpu": "2", "memory": "1Gi"}},
                "config": {"clusterName": "a"}
            },
            "other": {"replicas": 2}
        }));

        reset_resource_in_template(&mut config, Some(&rules()));

        assert_json_eq!(
            Value::Object(config),
            json!({
                "authentication": {"config": {"clusterName": "a"}},
                "other": {"replicas": 2}
            })
        );
    }

    #[test]
    fn strip_diverged_removes_flagged_leaves() {
        let mut desired = map(json!({"a": {"replicas": 3, "cpu": "1"}, "b": 1}));
        strip_diverged(&mut desired, &json!({"a": {"replicas": true, "cpu": false}}));
        assert_json_eq!(Value::Object(desired), json!({"a": {"cpu": "1"}, "b": 1}));
    }
}
