use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use lru_time_cache::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::alert::{LabelSet, valid_label_name};
use crate::error::{CoreReason, CoreResult, core_err};

// ---------------------------------------------------------------------------
// MatchOp
// ---------------------------------------------------------------------------

/// Predicate operator vocabulary shared by routes, silences and inhibition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "=~")]
    Re,
    #[serde(rename = "!~")]
    NotRe,
}

impl MatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchOp::Eq => "=",
            MatchOp::Ne => "!=",
            MatchOp::Re => "=~",
            MatchOp::NotRe => "!~",
        }
    }

    pub fn is_regex(self) -> bool {
        matches!(self, MatchOp::Re | MatchOp::NotRe)
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// A single label predicate, `name op value`.
///
/// Truth table against a label set (`present` means the label exists):
///
/// | op   | present                   | absent |
/// |------|---------------------------|--------|
/// | `=`  | value equals operand      | false  |
/// | `!=` | value differs             | true   |
/// | `=~` | value matches pattern     | false  |
/// | `!~` | value does not match      | true   |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl Matcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    /// Parse the textual form `name op value`, e.g. `severity =~ crit.*`.
    /// Whitespace around the operator is optional.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let s = s.trim();
        // Two-character operators first so `!=` is not read as `!` + `=`.
        for op in [MatchOp::Re, MatchOp::NotRe, MatchOp::Ne, MatchOp::Eq] {
            if let Some(idx) = s.find(op.as_str()) {
                // `=` inside `=~`/`!=` would split wrongly; since longer
                // operators are tried first, the first hit is authoritative
                // only when the characters after it do not extend it.
                if op == MatchOp::Eq {
                    let rest = &s[idx + 1..];
                    if rest.starts_with('~') {
                        continue;
                    }
                }
                let name = s[..idx].trim();
                let value = s[idx + op.as_str().len()..].trim();
                if name.is_empty() {
                    return Err(core_err(
                        CoreReason::Parse,
                        format!("matcher {s:?}: missing label name"),
                    ));
                }
                if !valid_label_name(name) {
                    return Err(core_err(
                        CoreReason::Parse,
                        format!("matcher {s:?}: invalid label name {name:?}"),
                    ));
                }
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                return Ok(Matcher::new(name, op, value));
            }
        }
        Err(core_err(
            CoreReason::Parse,
            format!("matcher {s:?}: no operator (expected = != =~ !~)"),
        ))
    }

    /// Evaluate against a label set. Regex operands are resolved through the
    /// cache; a pattern that fails to compile here is an internal invariant
    /// violation (all patterns are validated at config parse) and evaluates
    /// to non-match after logging.
    pub fn matches(&self, labels: &LabelSet, cache: &RegexCache) -> bool {
        let value = labels.get(&self.name);
        match self.op {
            MatchOp::Eq => value.is_some_and(|v| *v == self.value),
            MatchOp::Ne => value.is_none_or(|v| *v != self.value),
            MatchOp::Re => match value {
                None => false,
                Some(v) => self.regex_matches(v, cache),
            },
            MatchOp::NotRe => match value {
                None => true,
                Some(v) => !self.regex_matches(v, cache),
            },
        }
    }

    fn regex_matches(&self, value: &str, cache: &RegexCache) -> bool {
        match cache.get(&self.value) {
            Ok(re) => re.is_match(value),
            Err(e) => {
                tracing::error!(
                    domain = "pipe",
                    pattern = %self.value,
                    error = %e,
                    "regex missing at match time"
                );
                false
            }
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op.as_str(), self.value)
    }
}

impl FromStr for Matcher {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Matcher::parse(s)
    }
}

/// Evaluate an ordered matcher list, short-circuiting on the first miss.
pub fn match_all(matchers: &[Matcher], labels: &LabelSet, cache: &RegexCache) -> bool {
    matchers.iter().all(|m| m.matches(labels, cache))
}

// ---------------------------------------------------------------------------
// RegexCache
// ---------------------------------------------------------------------------

/// Minimum LRU capacity for on-demand compiles.
pub const MIN_LRU_CAPACITY: usize = 1000;

/// Compiled-regex cache.
///
/// Patterns known at config parse are pre-populated into the read-mostly
/// `known` map (reader-writer lock, never written on the hot path). Anything
/// else compiles on demand into a bounded LRU. All patterns are anchored:
/// `p` compiles as `^(?:p)$`, matching Alertmanager semantics, and the
/// `regex` crate guarantees linear-time matching.
pub struct RegexCache {
    known: RwLock<HashMap<String, Arc<Regex>>>,
    lru: Mutex<LruCache<String, Arc<Regex>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegexCache {
    pub fn new(lru_capacity: usize) -> Self {
        Self {
            known: RwLock::new(HashMap::new()),
            lru: Mutex::new(LruCache::with_capacity(lru_capacity.max(MIN_LRU_CAPACITY))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compile and pin a pattern; called for every pattern seen at config
    /// parse so match time never compiles for configured rules.
    pub fn prepopulate(&self, pattern: &str) -> CoreResult<Arc<Regex>> {
        let mut known = self.known.write().expect("regex cache lock poisoned");
        if let Some(re) = known.get(pattern) {
            return Ok(Arc::clone(re));
        }
        let re = Arc::new(compile_anchored(pattern)?);
        known.insert(pattern.to_string(), Arc::clone(&re));
        Ok(re)
    }

    /// Fetch a compiled pattern, compiling into the LRU on miss.
    pub fn get(&self, pattern: &str) -> CoreResult<Arc<Regex>> {
        {
            let known = self.known.read().expect("regex cache lock poisoned");
            if let Some(re) = known.get(pattern) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(re));
            }
        }
        {
            let mut lru = self.lru.lock().expect("regex cache lock poisoned");
            if let Some(re) = lru.get(pattern) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(re));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let re = Arc::new(compile_anchored(pattern)?);
        self.lru
            .lock()
            .expect("regex cache lock poisoned")
            .insert(pattern.to_string(), Arc::clone(&re));
        Ok(re)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(MIN_LRU_CAPACITY)
    }
}

fn compile_anchored(pattern: &str) -> CoreResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        core_err(
            CoreReason::Validation,
            format!("invalid regex {pattern:?}: {e}"),
        )
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::labels;

    fn cache() -> RegexCache {
        RegexCache::default()
    }

    #[test]
    fn parse_all_operators() {
        let cases = [
            ("severity = critical", MatchOp::Eq, "critical"),
            ("severity != warning", MatchOp::Ne, "warning"),
            ("instance =~ node-.*", MatchOp::Re, "node-.*"),
            ("env !~ stag.*", MatchOp::NotRe, "stag.*"),
            ("tight=fit", MatchOp::Eq, "fit"),
        ];
        for (text, op, value) in cases {
            let m = Matcher::parse(text).unwrap();
            assert_eq!(m.op, op, "{text}");
            assert_eq!(m.value, value, "{text}");
        }
    }

    #[test]
    fn parse_quoted_value() {
        let m = Matcher::parse(r#"team = "platform eng""#).unwrap();
        assert_eq!(m.value, "platform eng");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Matcher::parse("no operator here").is_err());
        assert!(Matcher::parse("= value").is_err());
        assert!(Matcher::parse("bad-name = x").is_err());
    }

    #[test]
    fn display_round_trips() {
        let m = Matcher::parse("instance =~ node-.*").unwrap();
        let m2 = Matcher::parse(&m.to_string()).unwrap();
        assert_eq!(m, m2);
    }

    #[test]
    fn truth_table_present_and_absent() {
        let ls = labels(&[("severity", "critical")]);
        let c = cache();

        // (matcher text, expected when present, expected when absent)
        let cases = [
            ("severity = critical", true),
            ("severity = warning", false),
            ("severity != warning", true),
            ("severity != critical", false),
            ("severity =~ crit.*", true),
            ("severity =~ warn.*", false),
            ("severity !~ warn.*", true),
            ("severity !~ crit.*", false),
            // absent label
            ("other = critical", false),
            ("other != critical", true),
            ("other =~ .*", false),
            ("other !~ .*", true),
        ];
        for (text, expected) in cases {
            let m = Matcher::parse(text).unwrap();
            assert_eq!(m.matches(&ls, &c), expected, "{text}");
        }
    }

    #[test]
    fn regex_is_anchored() {
        let ls = labels(&[("instance", "prod-node-1")]);
        let c = cache();
        let m = Matcher::parse("instance =~ node-.*").unwrap();
        assert!(!m.matches(&ls, &c), "partial match must not count");
        let m = Matcher::parse("instance =~ .*node-.*").unwrap();
        assert!(m.matches(&ls, &c));
    }

    #[test]
    fn match_all_short_circuits() {
        let ls = labels(&[("a", "1"), ("b", "2")]);
        let c = cache();
        let ms = vec![
            Matcher::parse("a = 1").unwrap(),
            Matcher::parse("b = 2").unwrap(),
        ];
        assert!(match_all(&ms, &ls, &c));
        let ms = vec![
            Matcher::parse("a = 0").unwrap(),
            Matcher::parse("b = 2").unwrap(),
        ];
        assert!(!match_all(&ms, &ls, &c));
        assert!(match_all(&[], &ls, &c), "empty matcher list matches all");
    }

    #[test]
    fn cache_prepopulate_hits_without_miss() {
        let c = cache();
        c.prepopulate("crit.*").unwrap();
        let before = c.misses();
        let re = c.get("crit.*").unwrap();
        assert!(re.is_match("critical"));
        assert_eq!(c.misses(), before);
        assert!(c.hits() > 0);
    }

    #[test]
    fn cache_compiles_on_demand() {
        let c = cache();
        assert_eq!(c.misses(), 0);
        c.get("ad.?hoc").unwrap();
        assert_eq!(c.misses(), 1);
        c.get("ad.?hoc").unwrap();
        assert_eq!(c.misses(), 1, "second lookup served from LRU");
    }

    #[test]
    fn cache_rejects_bad_pattern() {
        let c = cache();
        assert!(c.prepopulate("(unclosed").is_err());
        assert!(c.get("(unclosed").is_err());
    }
}
