use std::path::Path;

use anyhow::Context;

use rootsize_core::RootsizeConfig;
use rootsize_policy::{RuleTable, SizingRule};

pub fn list(config: Option<&Path>) -> anyhow::Result<()> {
    let config = RootsizeConfig::load(config)?;
    let source = if config.rules.is_empty() {
        "built-in"
    } else {
        "configured"
    };
    let rules = config.effective_rules()?;
    let table = RuleTable::new(&rules).context("invalid sizing table")?;

    println!("{} {source} rules:", table.len());
    for rule in table.rules() {
        println!("  {}", format_rule(rule));
    }
    Ok(())
}

fn format_rule(rule: &SizingRule) -> String {
    let mut line = format!("{:<20} {:>6} GiB", rule.key.to_string(), rule.target.size_gib);
    if let Some(iops) = rule.target.iops {
        line.push_str(&format!("  {iops} IOPS"));
    }
    if let Some(mbps) = rule.target.throughput_mbps {
        line.push_str(&format!("  {mbps} MB/s"));
    }
    line
}
