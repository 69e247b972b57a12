use std::collections::BTreeMap;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Inhibition rules — raw config form
// ---------------------------------------------------------------------------

/// One entry under `inhibit_rules:`.
///
/// A firing *source* alert matching `source_match` / `source_match_re`
/// suppresses any *target* alert matching `target_match` / `target_match_re`,
/// provided every label named in `equal` carries the same value on both.
/// At least one source condition and one target condition must be present;
/// that is enforced when the rules are compiled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InhibitRuleConfig {
    /// Optional rule name; defaults to `inhibit_rules[<index>]`.
    #[serde(default)]
    pub name: Option<String>,
    /// Exact-value source conditions, `label -> value`.
    #[serde(default)]
    pub source_match: BTreeMap<String, String>,
    /// Regex source conditions, `label -> pattern`.
    #[serde(default)]
    pub source_match_re: BTreeMap<String, String>,
    /// Exact-value target conditions.
    #[serde(default)]
    pub target_match: BTreeMap<String, String>,
    /// Regex target conditions.
    #[serde(default)]
    pub target_match_re: BTreeMap<String, String>,
    /// Labels whose values must be identical on source and target.
    #[serde(default)]
    pub equal: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rule() {
        let r: InhibitRuleConfig = serde_yaml::from_str(
            r#"
source_match:
  alertname: NodeDown
  severity: critical
target_match:
  alertname: InstanceDown
target_match_re:
  instance: "node-.*"
equal: [cluster]
"#,
        )
        .unwrap();
        assert_eq!(r.source_match["alertname"], "NodeDown");
        assert_eq!(r.target_match_re["instance"], "node-.*");
        assert_eq!(r.equal, vec!["cluster"]);
        assert!(r.name.is_none());
    }

    #[test]
    fn all_sections_default_empty() {
        let r: InhibitRuleConfig = serde_yaml::from_str("equal: []").unwrap();
        assert!(r.source_match.is_empty());
        assert!(r.source_match_re.is_empty());
        assert!(r.target_match.is_empty());
        assert!(r.target_match_re.is_empty());
    }
}
