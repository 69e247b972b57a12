use std::sync::Arc;

use ar_config::InhibitRuleConfig;
use regex::Regex;

use crate::alert::{LabelSet, valid_label_name};
use crate::error::{CoreReason, CoreResult, core_err};
use crate::matcher::RegexCache;

// ---------------------------------------------------------------------------
// InhibitRule — compiled, immutable after load
// ---------------------------------------------------------------------------

/// A compiled inhibition rule. Regex handles are resolved at parse time and
/// live on the rule, so evaluation never consults the compiler.
#[derive(Debug, Clone)]
pub struct InhibitRule {
    pub name: String,
    pub source_match: Vec<(String, String)>,
    pub source_match_re: Vec<(String, Arc<Regex>)>,
    pub target_match: Vec<(String, String)>,
    pub target_match_re: Vec<(String, Arc<Regex>)>,
    pub equal: Vec<String>,
}

impl InhibitRule {
    pub fn target_satisfied(&self, labels: &LabelSet) -> bool {
        satisfied(&self.target_match, &self.target_match_re, labels)
    }

    pub fn source_satisfied(&self, labels: &LabelSet) -> bool {
        satisfied(&self.source_match, &self.source_match_re, labels)
    }

    /// Every label named in `equal` must exist on both sides with the same
    /// value.
    pub fn equal_satisfied(&self, source: &LabelSet, target: &LabelSet) -> bool {
        self.equal.iter().all(|name| {
            matches!((source.get(name), target.get(name)), (Some(s), Some(t)) if s == t)
        })
    }
}

fn satisfied(
    exact: &[(String, String)],
    re: &[(String, Arc<Regex>)],
    labels: &LabelSet,
) -> bool {
    exact
        .iter()
        .all(|(name, want)| labels.get(name).is_some_and(|v| v == want))
        && re
            .iter()
            .all(|(name, regex)| labels.get(name).is_some_and(|v| regex.is_match(v)))
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile the raw config rules. Errors carry the offending path, e.g.
/// `inhibit_rules[3].source_match_re.service`.
pub fn compile_rules(
    configs: &[InhibitRuleConfig],
    cache: &RegexCache,
) -> CoreResult<Vec<InhibitRule>> {
    configs
        .iter()
        .enumerate()
        .map(|(i, cfg)| compile_rule(cfg, i, cache))
        .collect()
}

fn compile_rule(
    cfg: &InhibitRuleConfig,
    index: usize,
    cache: &RegexCache,
) -> CoreResult<InhibitRule> {
    let path = format!("inhibit_rules[{index}]");

    if cfg.source_match.is_empty() && cfg.source_match_re.is_empty() {
        return Err(core_err(
            CoreReason::Validation,
            format!("{path}: at least one source condition is required"),
        ));
    }
    if cfg.target_match.is_empty() && cfg.target_match_re.is_empty() {
        return Err(core_err(
            CoreReason::Validation,
            format!("{path}: at least one target condition is required"),
        ));
    }

    let check_names = |section: &str, names: Vec<&String>| -> CoreResult<()> {
        for name in names {
            if !valid_label_name(name) {
                return Err(core_err(
                    CoreReason::Validation,
                    format!("{path}.{section}.{name}: invalid label name"),
                ));
            }
        }
        Ok(())
    };
    check_names("source_match", cfg.source_match.keys().collect())?;
    check_names("source_match_re", cfg.source_match_re.keys().collect())?;
    check_names("target_match", cfg.target_match.keys().collect())?;
    check_names("target_match_re", cfg.target_match_re.keys().collect())?;
    for name in &cfg.equal {
        if !valid_label_name(name) {
            return Err(core_err(
                CoreReason::Validation,
                format!("{path}.equal: invalid label name {name:?}"),
            ));
        }
    }

    let compile_section =
        |section: &str, pairs: &std::collections::BTreeMap<String, String>| -> CoreResult<Vec<(String, Arc<Regex>)>> {
            pairs
                .iter()
                .map(|(name, pattern)| {
                    let re = cache.prepopulate(pattern).map_err(|_| {
                        core_err(
                            CoreReason::Validation,
                            format!("{path}.{section}.{name}: invalid regex {pattern:?}"),
                        )
                    })?;
                    Ok((name.clone(), re))
                })
                .collect()
        };

    Ok(InhibitRule {
        name: cfg
            .name
            .clone()
            .unwrap_or_else(|| format!("inhibit_rules[{index}]")),
        source_match: cfg
            .source_match
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        source_match_re: compile_section("source_match_re", &cfg.source_match_re)?,
        target_match: cfg
            .target_match
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        target_match_re: compile_section("target_match_re", &cfg.target_match_re)?,
        equal: cfg.equal.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
