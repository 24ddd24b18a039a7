//! Sizing rule table.

use std::collections::HashMap;

use thiserror::Error;

use rootsize_core::{VolumeSizingRule, VolumeTarget};

/// gp3 size bounds in GiB.
pub const MIN_SIZE_GIB: u64 = 1;
pub const MAX_SIZE_GIB: u64 = 16_384;

/// gp3 provisioned performance bounds.
pub const MIN_IOPS: u32 = 3_000;
pub const MAX_IOPS: u32 = 16_000;
pub const MIN_THROUGHPUT_MBPS: u32 = 125;
pub const MAX_THROUGHPUT_MBPS: u32 = 1_000;

/// Errors raised while building a `RuleTable`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("empty instance type pattern")]
    EmptyPattern,

    #[error("invalid instance type pattern {0:?}: only [a-z0-9.-] and a trailing '*' are allowed")]
    InvalidPattern(String),

    #[error("catch-all pattern {0:?} is not allowed: unmapped instance types keep their launch size")]
    CatchAll(String),

    #[error("rules {first:?} and {second:?} both normalize to {key}")]
    Duplicate {
        first: String,
        second: String,
        key: RuleKey,
    },

    #[error("rule {pattern:?}: size {size_gib} GiB outside 1..=16384")]
    SizeOutOfRange { pattern: String, size_gib: u64 },

    #[error("rule {pattern:?}: iops {iops} outside 3000..=16000")]
    IopsOutOfRange { pattern: String, iops: u32 },

    #[error("rule {pattern:?}: throughput {mbps} MB/s outside 125..=1000")]
    ThroughputOutOfRange { pattern: String, mbps: u32 },
}

/// Normalized lookup key of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKey {
    /// Matches one instance type.
    Exact(String),
    /// Matches every instance type starting with the stem.
    Prefix(String),
}

impl RuleKey {
    /// Normalize a configured pattern.
    ///
    /// - `c6i.2xlarge` → `Exact("c6i.2xlarge")`
    /// - `c6i` (family) → `Prefix("c6i.")`
    /// - `c6i.*` → `Prefix("c6i.")`
    /// - `c6*` → `Prefix("c6")`
    pub fn parse(pattern: &str) -> Result<Self, RuleError> {
        let normalized = pattern.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(RuleError::EmptyPattern);
        }

        let (stem, wildcard) = match normalized.strip_suffix('*') {
            Some(stem) => (stem, true),
            None => (normalized.as_str(), false),
        };

        if wildcard && stem.is_empty() {
            return Err(RuleError::CatchAll(pattern.to_string()));
        }
        if !stem
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
        {
            return Err(RuleError::InvalidPattern(pattern.to_string()));
        }

        let key = if wildcard {
            RuleKey::Prefix(stem.to_string())
        } else if stem.contains('.') {
            RuleKey::Exact(stem.to_string())
        } else {
            RuleKey::Prefix(format!("{stem}."))
        };
        Ok(key)
    }

    pub fn matches(&self, instance_type: &str) -> bool {
        match self {
            RuleKey::Exact(t) => t == instance_type,
            RuleKey::Prefix(stem) => instance_type.starts_with(stem.as_str()),
        }
    }
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKey::Exact(t) => f.write_str(t),
            RuleKey::Prefix(stem) => write!(f, "{stem}*"),
        }
    }
}

/// A validated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizingRule {
    pub key: RuleKey,
    /// The pattern as configured, for logs and outcome records.
    pub pattern: String,
    pub target: VolumeTarget,
}

/// Validated, unambiguous sizing table.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    exact: HashMap<String, SizingRule>,
    /// Sorted by stem length, longest first.
    prefixes: Vec<SizingRule>,
}

impl RuleTable {
    /// Build a table, rejecting invalid rows and duplicate keys.
    pub fn new<'a>(
        rules: impl IntoIterator<Item = &'a VolumeSizingRule>,
    ) -> Result<Self, RuleError> {
        let mut exact: HashMap<String, SizingRule> = HashMap::new();
        let mut prefixes: HashMap<String, SizingRule> = HashMap::new();

        for row in rules {
            let rule = validate(row)?;
            let slot = match &rule.key {
                RuleKey::Exact(t) => exact.get(t),
                RuleKey::Prefix(stem) => prefixes.get(stem),
            };
            if let Some(existing) = slot {
                return Err(RuleError::Duplicate {
                    first: existing.pattern.clone(),
                    second: rule.pattern.clone(),
                    key: rule.key.clone(),
                });
            }
            match &rule.key {
                RuleKey::Exact(t) => {
                    exact.insert(t.clone(), rule);
                }
                RuleKey::Prefix(stem) => {
                    prefixes.insert(stem.clone(), rule);
                }
            }
        }

        let mut prefixes: Vec<SizingRule> = prefixes.into_values().collect();
        prefixes.sort_by(|a, b| {
            prefix_len(&b.key)
                .cmp(&prefix_len(&a.key))
                .then_with(|| a.pattern.cmp(&b.pattern))
        });

        Ok(Self { exact, prefixes })
    }

    /// Most specific rule for an instance type: exact first, then longest prefix.
    pub fn lookup(&self, instance_type: &str) -> Option<&SizingRule> {
        let instance_type = instance_type.trim().to_ascii_lowercase();
        self.exact
            .get(&instance_type)
            .or_else(|| self.prefixes.iter().find(|r| r.key.matches(&instance_type)))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rules, exact ones first (sorted by type), then prefixes by specificity.
    pub fn rules(&self) -> Vec<&SizingRule> {
        let mut exact: Vec<&SizingRule> = self.exact.values().collect();
        exact.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        exact.into_iter().chain(self.prefixes.iter()).collect()
    }
}

fn prefix_len(key: &RuleKey) -> usize {
    match key {
        RuleKey::Exact(t) | RuleKey::Prefix(t) => t.len(),
    }
}

fn validate(row: &VolumeSizingRule) -> Result<SizingRule, RuleError> {
    let pattern = row.instance_type_pattern.trim().to_string();
    let key = RuleKey::parse(&pattern)?;

    if !(MIN_SIZE_GIB..=MAX_SIZE_GIB).contains(&row.target_size_gib) {
        return Err(RuleError::SizeOutOfRange {
            pattern,
            size_gib: row.target_size_gib,
        });
    }
    if let Some(iops) = row.iops
        && !(MIN_IOPS..=MAX_IOPS).contains(&iops)
    {
        return Err(RuleError::IopsOutOfRange { pattern, iops });
    }
    if let Some(mbps) = row.throughput_mbps
        && !(MIN_THROUGHPUT_MBPS..=MAX_THROUGHPUT_MBPS).contains(&mbps)
    {
        return Err(RuleError::ThroughputOutOfRange { pattern, mbps });
    }

    Ok(SizingRule {
        key,
        pattern,
        target: row.target(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, size: u64) -> VolumeSizingRule {
        VolumeSizingRule::new(pattern, size)
    }

    #[test]
    fn parse_exact_family_and_prefix() {
        assert_eq!(
            RuleKey::parse("c6i.2xlarge").unwrap(),
            RuleKey::Exact("c6i.2xlarge".to_string())
        );
        assert_eq!(RuleKey::parse("c6i").unwrap(), RuleKey::Prefix("c6i.".to_string()));
        assert_eq!(RuleKey::parse("c6i.*").unwrap(), RuleKey::Prefix("c6i.".to_string()));
        assert_eq!(RuleKey::parse("c6*").unwrap(), RuleKey::Prefix("c6".to_string()));
    }

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        assert_eq!(
            RuleKey::parse("  C6I.2XLarge ").unwrap(),
            RuleKey::Exact("c6i.2xlarge".to_string())
        );
    }

    #[test]
    fn parse_rejects_catch_all_and_garbage() {
        assert_eq!(RuleKey::parse("*"), Err(RuleError::CatchAll("*".to_string())));
        assert_eq!(RuleKey::parse(""), Err(RuleError::EmptyPattern));
        assert!(matches!(RuleKey::parse("c6i/large"), Err(RuleError::InvalidPattern(_))));
        assert!(matches!(RuleKey::parse("c*6"), Err(RuleError::InvalidPattern(_))));
    }

    #[test]
    fn duplicate_exact_keys_rejected() {
        let rules = [rule("c6i.2xlarge", 300), rule("C6I.2xlarge", 400)];
        let err = RuleTable::new(&rules).unwrap_err();
        assert!(matches!(err, RuleError::Duplicate { .. }));
    }

    #[test]
    fn family_and_wildcard_spellings_collide() {
        let rules = [rule("c6i", 100), rule("c6i.*", 200)];
        let err = RuleTable::new(&rules).unwrap_err();
        assert_eq!(
            err,
            RuleError::Duplicate {
                first: "c6i".to_string(),
                second: "c6i.*".to_string(),
                key: RuleKey::Prefix("c6i.".to_string()),
            }
        );
    }

    #[test]
    fn exact_beats_prefix() {
        let rules = [rule("c6i", 100), rule("c6i.2xlarge", 300)];
        let table = RuleTable::new(&rules).unwrap();
        assert_eq!(table.lookup("c6i.2xlarge").unwrap().target.size_gib, 300);
        assert_eq!(table.lookup("c6i.large").unwrap().target.size_gib, 100);
    }

    #[test]
    fn longest_prefix_wins() {
        let rules = [rule("c6*", 50), rule("c6i", 100)];
        let table = RuleTable::new(&rules).unwrap();
        assert_eq!(table.lookup("c6i.large").unwrap().target.size_gib, 100);
        assert_eq!(table.lookup("c6g.large").unwrap().target.size_gib, 50);
        assert!(table.lookup("m5.large").is_none());
    }

    #[test]
    fn family_does_not_match_longer_family() {
        // "c6i" must not capture "c6id" (which carries instance storage).
        let table = RuleTable::new(&[rule("c6i", 100)]).unwrap();
        assert!(table.lookup("c6id.large").is_none());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = RuleTable::new(&[rule("c6i.2xlarge", 300)]).unwrap();
        assert!(table.lookup("C6I.2XLARGE").is_some());
    }

    #[test]
    fn size_and_performance_bounds() {
        assert!(matches!(
            RuleTable::new(&[rule("c6i", 0)]),
            Err(RuleError::SizeOutOfRange { .. })
        ));
        assert!(matches!(
            RuleTable::new(&[rule("c6i", 20_000)]),
            Err(RuleError::SizeOutOfRange { .. })
        ));

        let mut row = rule("c6i", 100);
        row.iops = Some(100);
        assert!(matches!(
            RuleTable::new(&[row]),
            Err(RuleError::IopsOutOfRange { iops: 100, .. })
        ));

        let mut row = rule("c6i", 100);
        row.throughput_mbps = Some(2_000);
        assert!(matches!(
            RuleTable::new(&[row]),
            Err(RuleError::ThroughputOutOfRange { mbps: 2_000, .. })
        ));

        let mut row = rule("c6i", 100);
        row.iops = Some(6_000);
        row.throughput_mbps = Some(250);
        let table = RuleTable::new(&[row]).unwrap();
        let target = table.lookup("c6i.large").unwrap().target;
        assert_eq!(target.iops, Some(6_000));
        assert_eq!(target.throughput_mbps, Some(250));
    }

    #[test]
    fn rules_listing_order() {
        let rules = [rule("c6*", 50), rule("c6i.4xlarge", 500), rule("c6i", 100), rule("c6i.2xlarge", 300)];
        let table = RuleTable::new(&rules).unwrap();
        let listed: Vec<String> = table.rules().iter().map(|r| r.key.to_string()).collect();
        assert_eq!(listed, vec!["c6i.2xlarge", "c6i.4xlarge", "c6i.*", "c6*"]);
        assert_eq!(table.len(), 4);
    }
}
