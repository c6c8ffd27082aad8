use crate::Result;

pub mod aggregate;
pub mod compare;
pub mod merge;
pub mod profile;
pub mod publish;
pub mod quantity_parser;
pub mod rules;
pub mod sizing;

pub use aggregate::{Summary, TenantView};
pub use compare::Extreme;
pub use profile::{ProfileControllers, ResolvedTenant};
pub use rules::RuleTable;
pub use sizing::{SizeTemplates, SizeTier};

/// Immutable tables every aggregation pass reads from. Built once at start and shared.
#[derive(Clone, Debug)]
pub struct Engine {
    rules: RuleTable,
    templates: SizeTemplates,
}

impl Engine {
    pub fn new(rules: RuleTable, templates: SizeTemplates) -> Self {
        Self { rules, templates }
    }

    /// The rule table and the size templates of the architecture this binary was built for
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(RuleTable::builtin()?, SizeTemplates::builtin()?))
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn templates(&self) -> &SizeTemplates {
        &self.templates
    }
}
