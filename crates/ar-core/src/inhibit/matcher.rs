use super::rules::InhibitRule;
use crate::alert::Alert;
use crate::cache::AlertCache;

// ---------------------------------------------------------------------------
// Inhibition matching
// ---------------------------------------------------------------------------

/// A positive inhibition decision: which source suppresses the target under
/// which rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InhibitionMatch {
    pub rule_name: String,
    pub source_fingerprint: String,
}

/// Decide whether `target` is suppressed by any firing source in the cache.
///
/// For each rule in order: the target must satisfy both target conditions;
/// then the active-alert cache is scanned for a firing source satisfying the
/// source conditions whose `equal` labels agree with the target. The first
/// rule that produces a source wins. An alert never inhibits itself, and a
/// resolved source inhibits nothing.
///
/// The scan is linear over the cache snapshot; with the expected population
/// (<10^4 live alerts) that is well inside the latency budget.
pub fn find_inhibition(
    rules: &[InhibitRule],
    target: &Alert,
    cache: &AlertCache,
) -> Option<InhibitionMatch> {
    for rule in rules {
        if !rule.target_satisfied(&target.labels) {
            continue;
        }
        let mut found: Option<String> = None;
        cache.iterate(|candidate| {
            if candidate.fingerprint == target.fingerprint || !candidate.is_firing() {
                return true;
            }
            if rule.source_satisfied(&candidate.labels)
                && rule.equal_satisfied(&candidate.labels, &target.labels)
            {
                found = Some(candidate.fingerprint.clone());
                return false;
            }
            true
        });
        if let Some(source_fingerprint) = found {
            return Some(InhibitionMatch {
                rule_name: rule.name.clone(),
                source_fingerprint,
            });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
