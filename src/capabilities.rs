use std::collections::HashMap;

/// One capability answer: a plain flag, or the keyword a dialect uses for
/// the feature (e.g. the clause spelling for `returning`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityValue {
    Flag(bool),
    Keyword(&'static str),
}

impl CapabilityValue {
    /// A keyword answer counts as enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        match self {
            CapabilityValue::Flag(value) => *value,
            CapabilityValue::Keyword(_) => true,
        }
    }
}

/// Feature flags a dialect advertises to SQL-generation layers.
///
/// Lookups never fail: a key nobody declared answers `Flag(false)`, so
/// callers can probe optional features without guarding against unknown
/// names. Each dialect's set is the baseline merged with its overrides,
/// overrides winning.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    entries: HashMap<&'static str, CapabilityValue>,
}

/// Feature keys the shipped dialects declare.
pub mod feature {
    pub const RETURNING: &str = "returning";
    pub const SCHEMAS: &str = "schemas";
    pub const SAVEPOINTS: &str = "savepoints";
    pub const ROW_LOCKING: &str = "row_locking";
    pub const DDL_TRANSACTIONS: &str = "ddl_transactions";
    pub const JSON: &str = "json";
    pub const ISOLATION_LEVELS: &str = "isolation_levels";
}

impl CapabilitySet {
    /// The baseline every dialect starts from. Conservative: optional SQL
    /// features are off until a dialect says otherwise.
    #[must_use]
    pub fn baseline() -> Self {
        let mut entries = HashMap::new();
        entries.insert(feature::RETURNING, CapabilityValue::Flag(false));
        entries.insert(feature::SCHEMAS, CapabilityValue::Flag(false));
        entries.insert(feature::SAVEPOINTS, CapabilityValue::Flag(true));
        entries.insert(feature::ROW_LOCKING, CapabilityValue::Flag(false));
        entries.insert(feature::DDL_TRANSACTIONS, CapabilityValue::Flag(false));
        entries.insert(feature::JSON, CapabilityValue::Flag(false));
        entries.insert(feature::ISOLATION_LEVELS, CapabilityValue::Flag(true));
        CapabilitySet { entries }
    }

    /// Baseline merged with per-dialect overrides.
    #[must_use]
    pub fn with_overrides(overrides: &[(&'static str, CapabilityValue)]) -> Self {
        let mut set = Self::baseline();
        for (key, value) in overrides {
            set.entries.insert(key, value.clone());
        }
        set
    }

    /// Answer for a feature key. Unknown keys are `Flag(false)`.
    #[must_use]
    pub fn supports(&self, feature: &str) -> CapabilityValue {
        self.entries
            .get(feature)
            .cloned()
            .unwrap_or(CapabilityValue::Flag(false))
    }

    #[must_use]
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.supports(feature).enabled()
    }
}
