//! Expands one tenant into the configuration fragments it contributes to the fleet.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::debug;

use super::merge::{deep_merge_two_maps, MergeOptions};
use super::sizing::SizeTier;
use super::Engine;
use crate::resources::commonservices::{CommonService, DEFAULT_PROFILE_CONTROLLER};
use crate::resources::operandconfigs::ServiceConfig;
use crate::{Error, Result};

pub const IAM_SERVICE: &str = "ibm-iam-operator";
pub const MANAGEMENT_INGRESS_SERVICE: &str = "ibm-management-ingress-operator";
pub const NGINX_INGRESS_SERVICE: &str = "ibm-ingress-nginx-operator";
pub const MONGODB_SERVICE: &str = "ibm-im-mongodb-operator";

/// Cluster-scoped services a tenant outside the current scope may still configure
pub const CLUSTER_SCOPED_SERVICES: [&str; 2] = ["ibm-cert-manager-operator", "ibm-licensing-operator"];

/// Where the global FIPS flag lands in each service
const FIPS_TARGETS: [(&str, &[&str]); 3] = [
    (IAM_SERVICE, &["authentication", "config", "fipsEnabled"]),
    (MANAGEMENT_INGRESS_SERVICE, &["managementIngress", "fipsEnabled"]),
    (NGINX_INGRESS_SERVICE, &["nginxIngress", "ingress", "fipsEnabled"]),
];

/// One service configuration contributed by a tenant, with how it must be folded
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    pub service: ServiceConfig,
    pub options: MergeOptions,
}

impl Fragment {
    fn new(service: ServiceConfig, options: MergeOptions) -> Self {
        Self { service, options }
    }

    /// A fragment setting a single leaf
    fn leaf(name: &str, path: &[&str], value: Value) -> Self {
        let spec = path.iter().rev().fold(value, |inner, key| {
            Value::Object(Map::from_iter([(key.to_string(), inner)]))
        });
        let spec = match spec {
            Value::Object(spec) => spec,
            _ => Map::new(),
        };
        Self::new(ServiceConfig::new(name, spec), MergeOptions::DIRECT)
    }
}

/// Who owns resource sizing per service. A non-default strategy from any tenant wins over
/// `default`; between two non-default strategies the first recorded is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileControllers(BTreeMap<String, String>);

impl ProfileControllers {
    pub fn record(&mut self, service: &str, strategy: &str) {
        match self.0.get(service) {
            Some(current) if current != DEFAULT_PROFILE_CONTROLLER => {}
            _ => {
                self.0.insert(service.to_string(), strategy.to_string());
            }
        }
    }

    pub fn merge(&mut self, other: &ProfileControllers) {
        for (service, strategy) in &other.0 {
            self.record(service, strategy);
        }
    }

    pub fn get(&self, service: &str) -> &str {
        self.0
            .get(service)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PROFILE_CONTROLLER)
    }

    /// True when an external controller such as an autoscaler owns the service's sizing
    pub fn is_external(&self, service: &str) -> bool {
        self.get(service) != DEFAULT_PROFILE_CONTROLLER
    }

    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.0.retain(|service, _| keep(service));
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedTenant {
    pub fragments: Vec<Fragment>,
    pub profile_controllers: ProfileControllers,
}

/// Where a tenant stands relative to the scope being aggregated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TenantContext {
    pub in_scope: bool,
    pub is_master: bool,
}

fn tenant_key(cs: &CommonService) -> String {
    format!("{}/{}", cs.namespace().unwrap_or_default(), cs.name_any())
}

fn validate(cs: &CommonService) -> Result<()> {
    let invalid = |message: String| Error::InvalidTenantConfig {
        tenant: tenant_key(cs),
        message,
    };
    for service in cs.spec.services.iter().flatten() {
        if service.name.trim().is_empty() {
            return Err(invalid("service entry without a name".into()));
        }
        if service
            .management_strategy
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(invalid(format!(
                "service {} has an empty managementStrategy",
                service.name
            )));
        }
        for (resource, tree) in service.spec.iter().flatten() {
            if !tree.is_object() {
                return Err(invalid(format!(
                    "service {} resource {resource} must be an object, got {tree}",
                    service.name
                )));
            }
        }
    }
    Ok(())
}

fn path_is_set(spec: Option<&Map<String, Value>>, path: &[&str]) -> bool {
    let Some((first, rest)) = path.split_first() else {
        return false;
    };
    let mut node = spec.and_then(|s| s.get(*first));
    for key in rest {
        node = node.and_then(|n| n.get(*key));
    }
    node.is_some_and(|v| !v.is_null())
}

impl Engine {
    /// Resolves a tenant's size, overrides and global fields into service fragments
    pub fn resolve(&self, cs: &CommonService, ctx: TenantContext) -> Result<ResolvedTenant> {
        validate(cs)?;

        let spec = &cs.spec;
        let default_strategy = spec
            .profile_controller
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_PROFILE_CONTROLLER);
        let override_options = if ctx.is_master {
            MergeOptions::DIRECT
        } else {
            MergeOptions::RULED
        };

        let mut resolved = ResolvedTenant::default();
        let overrides = spec.services.as_deref().unwrap_or_default();

        let tier = spec.size.as_deref().and_then(SizeTier::parse);
        let templated: &[ServiceConfig] = match tier {
            Some(tier) => self.templates().for_tier(tier),
            None => &[],
        };
        debug!(
            "Resolving {} with size {}",
            tenant_key(cs),
            tier.map(|t| t.as_str()).unwrap_or("none")
        );

        for template in templated {
            let tenant_override = cs.service_override(&template.name);
            let (spec, options) = match tenant_override.and_then(|o| o.spec.as_ref()) {
                Some(tree) => (deep_merge_two_maps(&template.spec, tree), override_options),
                None => (template.spec.clone(), MergeOptions::RULED),
            };
            let strategy = tenant_override
                .and_then(|o| o.management_strategy.as_deref())
                .unwrap_or(default_strategy);
            resolved
                .profile_controllers
                .record(&template.name, strategy);
            resolved
                .fragments
                .push(Fragment::new(ServiceConfig::new(&template.name, spec), options));
        }

        for service in overrides {
            if templated.iter().any(|t| t.name == service.name) {
                continue;
            }
            let strategy = service
                .management_strategy
                .as_deref()
                .unwrap_or(default_strategy);
            resolved.profile_controllers.record(&service.name, strategy);
            if let Some(tree) = &service.spec {
                resolved.fragments.push(Fragment::new(
                    ServiceConfig::new(&service.name, tree.clone()),
                    override_options,
                ));
            }
        }

        resolved.fragments.extend(cross_cutting_fragments(cs));

        if !ctx.in_scope {
            let keep = |name: &str| CLUSTER_SCOPED_SERVICES.contains(&name);
            resolved.fragments.retain(|f| keep(&f.service.name));
            resolved.profile_controllers.retain(keep);
        }
        Ok(resolved)
    }
}

fn cross_cutting_fragments(cs: &CommonService) -> Vec<Fragment> {
    let spec = &cs.spec;
    let mut fragments = Vec::new();

    if let Some(storage_class) = spec.storage_class.as_deref().filter(|s| !s.is_empty()) {
        fragments.push(Fragment::leaf(
            MONGODB_SERVICE,
            &["mongoDB", "storageClass"],
            storage_class.into(),
        ));
    }
    if let Some(route_host) = spec.route_host.as_deref().filter(|s| !s.is_empty()) {
        fragments.push(Fragment::leaf(
            MANAGEMENT_INGRESS_SERVICE,
            &["managementIngress", "routeHost"],
            route_host.into(),
        ));
    }
    if let Some(fips) = spec.fips_enabled {
        for (service, path) in FIPS_TARGETS {
            let own = cs.service_override(service).and_then(|o| o.spec.as_ref());
            if path_is_set(own, path) {
                continue;
            }
            fragments.push(Fragment::leaf(service, path, fips.into()));
        }
    }
    if let Some(multi_instance) = spec.features.as_ref().and_then(|f| f.multi_instance) {
        fragments.push(Fragment::leaf(
            IAM_SERVICE,
            &["authentication", "config", "multiInstancesEnable"],
            multi_instance.into(),
        ));
    }
    if let Some(admin) = spec.default_admin_user.as_deref().filter(|s| !s.is_empty()) {
        fragments.push(Fragment::leaf(
            IAM_SERVICE,
            &["authentication", "config", "defaultAdminUser"],
            admin.into(),
        ));
    }
    fragments
}
