use std::collections::BTreeMap;

use crate::resources::operandconfigs::ServiceConfig;
use crate::{Error, Result};

/// Named deployment size of a tenant
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeTier {
    Starterset,
    Small,
    Medium,
    Large,
}

impl SizeTier {
    pub const ALL: [SizeTier; 4] = [Self::Starterset, Self::Small, Self::Medium, Self::Large];

    /// Resolves the `size` field of a tenant. `custom` and unknown sizes have no template.
    pub fn parse(size: &str) -> Option<Self> {
        match size.trim().to_ascii_lowercase().as_str() {
            "starterset" | "starter" => Some(Self::Starterset),
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" | "production" => Some(Self::Large),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starterset => "starterset",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

macro_rules! templates_for {
    ($arch:literal) => {
        [
            (
                SizeTier::Starterset,
                include_str!(concat!("tables/", $arch, "/starterset.yaml")),
            ),
            (
                SizeTier::Small,
                include_str!(concat!("tables/", $arch, "/small.yaml")),
            ),
            (
                SizeTier::Medium,
                include_str!(concat!("tables/", $arch, "/medium.yaml")),
            ),
            (
                SizeTier::Large,
                include_str!(concat!("tables/", $arch, "/large.yaml")),
            ),
        ]
    };
}

#[cfg(target_arch = "s390x")]
const BUILTIN_TEMPLATES: [(SizeTier, &str); 4] = templates_for!("s390x");

#[cfg(target_arch = "powerpc64")]
const BUILTIN_TEMPLATES: [(SizeTier, &str); 4] = templates_for!("ppc64le");

#[cfg(not(any(target_arch = "s390x", target_arch = "powerpc64")))]
const BUILTIN_TEMPLATES: [(SizeTier, &str); 4] = templates_for!("amd64");

/// Per-tier default configuration, in the shape of an OperandConfig services list
#[derive(Clone, Debug, Default)]
pub struct SizeTemplates {
    tiers: BTreeMap<SizeTier, Vec<ServiceConfig>>,
}

impl SizeTemplates {
    pub fn builtin() -> Result<Self> {
        Self::from_documents(BUILTIN_TEMPLATES)
    }

    pub fn from_documents<'a>(
        documents: impl IntoIterator<Item = (SizeTier, &'a str)>,
    ) -> Result<Self> {
        let tiers = documents
            .into_iter()
            .map(|(tier, document)| {
                serde_yaml::from_str::<Vec<ServiceConfig>>(document)
                    .map(|services| (tier, services))
                    .map_err(|err| Error::InvalidStaticTable {
                        table: format!("size template {}", tier.as_str()),
                        message: err.to_string(),
                    })
            })
            .collect::<Result<_>>()?;
        Ok(Self { tiers })
    }

    /// Services of a tier; empty when no template was loaded for it
    pub fn for_tier(&self, tier: SizeTier) -> &[ServiceConfig] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compare::compare;

    #[test]
    fn parses_sizes_and_aliases() {
        assert_eq!(SizeTier::parse("starter"), Some(SizeTier::Starterset));
        assert_eq!(SizeTier::parse("Small"), Some(SizeTier::Small));
        assert_eq!(SizeTier::parse("production"), Some(SizeTier::Large));
        assert_eq!(SizeTier::parse("custom"), None);
        assert_eq!(SizeTier::parse(""), None);
    }

    #[test]
    fn builtin_templates_cover_every_tier() {
        let templates = SizeTemplates::builtin().unwrap();
        for tier in SizeTier::ALL {
            let services = templates.for_tier(tier);
            assert!(
                services.iter().any(|s| s.name == "ibm-iam-operator"),
                "{} has no iam entry",
                tier.as_str()
            );
        }
    }

    #[test]
    fn larger_tiers_are_never_smaller() {
        let templates = SizeTemplates::builtin().unwrap();
        let replicas = |tier| {
            templates
                .for_tier(tier)
                .iter()
                .find(|s| s.name == "ibm-iam-operator")
                .map(|s| s.spec["authentication"]["replicas"].clone())
                .unwrap()
        };
        let small = replicas(SizeTier::Small);
        let large = replicas(SizeTier::Large);
        let (larger, _) = compare(&large, &small).unwrap();
        assert_eq!(larger, &large);
    }

    #[test]
    fn malformed_template_names_its_tier() {
        let err = SizeTemplates::from_documents([(SizeTier::Medium, "{")]).unwrap_err();
        assert!(err.to_string().contains("medium"));
    }
}
