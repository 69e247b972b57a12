use crate::alert::LabelSet;

// ---------------------------------------------------------------------------
// FNV-1a 64-bit
// ---------------------------------------------------------------------------

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Byte separator between hashed fields, so `{"ab":"c"}` and `{"a":"bc"}`
/// hash differently.
const SEP: u8 = 0xff;

/// Incremental FNV-1a 64-bit hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv64(u64);

impl Fnv64 {
    pub fn new() -> Self {
        Self(FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_sep(&mut self) {
        self.0 ^= u64::from(SEP);
        self.0 = self.0.wrapping_mul(FNV_PRIME);
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Alert fingerprint
// ---------------------------------------------------------------------------

/// Fingerprint of a label set: FNV-1a 64 over `name`/`value` pairs in
/// lexicographic name order, rendered as 16 lowercase hex characters.
///
/// The empty label set hashes to the FNV offset basis, a well-defined
/// constant. The map type keeps the pairs sorted, so this is a pure
/// function of the label *set*, not of insertion order.
pub fn of_labels(labels: &LabelSet) -> String {
    let mut h = Fnv64::new();
    for (name, value) in labels {
        h.write(name.as_bytes());
        h.write_sep();
        h.write(value.as_bytes());
        h.write_sep();
    }
    to_hex(h.finish())
}

/// Fingerprint of an arbitrary string (used for over-long group keys).
pub fn of_str(s: &str) -> String {
    let mut h = Fnv64::new();
    h.write(s.as_bytes());
    to_hex(h.finish())
}

/// 64-bit hash of a fingerprint string, for cache shard selection.
pub fn shard_hash(fingerprint: &str) -> u64 {
    let mut h = Fnv64::new();
    h.write(fingerprint.as_bytes());
    h.finish()
}

fn to_hex(v: u64) -> String {
    format!("{v:016x}")
}

// ---------------------------------------------------------------------------
// Group keys
// ---------------------------------------------------------------------------

/// Resolved `group_by` specification of a route node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// Empty `group_by`: every alert of the route lands in one group.
    Global,
    /// `group_by: ["..."]`: group by every label present on the alert.
    All,
    /// Group by the named labels; absent labels contribute `<missing>`.
    Labels(Vec<String>),
}

impl GroupBy {
    /// Build from the raw config list. `None` is resolved by inheritance
    /// before this is called; an empty list means [`GroupBy::Global`].
    pub fn from_config(raw: &[String]) -> Self {
        if raw.is_empty() {
            GroupBy::Global
        } else if raw.len() == 1 && raw[0] == "..." {
            GroupBy::All
        } else {
            let mut names = raw.to_vec();
            names.sort();
            names.dedup();
            GroupBy::Labels(names)
        }
    }
}

/// Literal key used when `group_by` is empty.
pub const GLOBAL_GROUP_KEY: &str = "{global}";

/// Placeholder for a grouping label the alert does not carry.
pub const MISSING_VALUE: &str = "<missing>";

/// A group key longer than this collapses to `{hash:<fingerprint>}`.
pub const MAX_GROUP_KEY_LEN: usize = 256;

/// Derive the group key for `labels` under `group_by`, reusing `buf` as the
/// assembly buffer so the steady state allocates only for the returned key.
///
/// The same `(labels, group_by)` pair always yields byte-identical output.
pub fn group_key_into(group_by: &GroupBy, labels: &LabelSet, buf: &mut String) -> String {
    buf.clear();
    match group_by {
        GroupBy::Global => return GLOBAL_GROUP_KEY.to_string(),
        GroupBy::All => {
            for (name, value) in labels {
                push_pair(buf, name, value);
            }
        }
        GroupBy::Labels(names) => {
            for name in names {
                match labels.get(name) {
                    Some(value) => push_pair(buf, name, value),
                    None => push_pair(buf, name, MISSING_VALUE),
                }
            }
        }
    }
    if buf.len() > MAX_GROUP_KEY_LEN {
        return format!("{{hash:{}}}", of_str(buf));
    }
    buf.clone()
}

/// Allocating convenience wrapper around [`group_key_into`].
pub fn group_key(group_by: &GroupBy, labels: &LabelSet) -> String {
    let mut buf = String::new();
    group_key_into(group_by, labels, &mut buf)
}

fn push_pair(buf: &mut String, name: &str, value: &str) {
    if !buf.is_empty() {
        buf.push(',');
    }
    buf.push_str(name);
    buf.push('=');
    for chunk in url::form_urlencoded::byte_serialize(value.as_bytes()) {
        buf.push_str(chunk);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::labels;

    #[test]
    fn empty_label_set_is_constant() {
        assert_eq!(of_labels(&LabelSet::new()), format!("{FNV_OFFSET:016x}"));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        // BTreeMap normalizes order, but make the property explicit by
        // inserting in two different orders.
        let mut a = LabelSet::new();
        a.insert("b".into(), "2".into());
        a.insert("a".into(), "1".into());
        a.insert("c".into(), "3".into());

        let mut b = LabelSet::new();
        b.insert("c".into(), "3".into());
        b.insert("a".into(), "1".into());
        b.insert("b".into(), "2".into());

        assert_eq!(of_labels(&a), of_labels(&b));
    }

    #[test]
    fn fingerprint_is_16_lower_hex() {
        let fp = of_labels(&labels(&[("alertname", "Up")]));
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn separator_prevents_pair_ambiguity() {
        let a = labels(&[("ab", "c")]);
        let b = labels(&[("a", "bc")]);
        assert_ne!(of_labels(&a), of_labels(&b));
    }

    #[test]
    fn group_by_from_config() {
        assert_eq!(GroupBy::from_config(&[]), GroupBy::Global);
        assert_eq!(GroupBy::from_config(&["...".into()]), GroupBy::All);
        assert_eq!(
            GroupBy::from_config(&["b".into(), "a".into(), "b".into()]),
            GroupBy::Labels(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn global_key() {
        let ls = labels(&[("alertname", "Up")]);
        assert_eq!(group_key(&GroupBy::Global, &ls), "{global}");
        assert_eq!(group_key(&GroupBy::Global, &LabelSet::new()), "{global}");
    }

    #[test]
    fn named_labels_key_sorted_with_missing() {
        let gb = GroupBy::from_config(&["cluster".into(), "alertname".into()]);
        let ls = labels(&[("alertname", "Up"), ("job", "api")]);
        assert_eq!(group_key(&gb, &ls), "alertname=Up,cluster=<missing>");
    }

    #[test]
    fn all_labels_key() {
        let gb = GroupBy::All;
        let ls = labels(&[("b", "2"), ("a", "1")]);
        assert_eq!(group_key(&gb, &ls), "a=1,b=2");
    }

    #[test]
    fn values_are_url_escaped() {
        let gb = GroupBy::from_config(&["path".into()]);
        let ls = labels(&[("path", "/api v1&x=1")]);
        assert_eq!(group_key(&gb, &ls), "path=%2Fapi+v1%26x%3D1");
    }

    #[test]
    fn key_is_deterministic() {
        let gb = GroupBy::from_config(&["alertname".into(), "cluster".into()]);
        let ls = labels(&[("alertname", "Up"), ("cluster", "a")]);
        let k1 = group_key(&gb, &ls);
        let k2 = group_key(&gb, &ls);
        assert_eq!(k1, k2);
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn oversized_key_falls_back_to_hash_at_threshold() {
        let gb = GroupBy::from_config(&["k".into()]);

        // "k=" + 254 bytes of value == 256 bytes: stays literal.
        let at = labels(&[("k", "v".repeat(254).as_str())]);
        let key_at = group_key(&gb, &at);
        assert_eq!(key_at.len(), MAX_GROUP_KEY_LEN);
        assert!(key_at.starts_with("k="));

        // One more byte crosses the threshold.
        let over = labels(&[("k", "v".repeat(255).as_str())]);
        let key_over = group_key(&gb, &over);
        assert!(key_over.starts_with("{hash:"), "got {key_over}");
        assert!(key_over.ends_with('}'));
        assert_eq!(key_over.len(), "{hash:}".len() + 16);
    }

    #[test]
    fn buffer_reuse_matches_fresh() {
        let gb = GroupBy::from_config(&["a".into(), "b".into()]);
        let ls1 = labels(&[("a", "1"), ("b", "2")]);
        let ls2 = labels(&[("a", "x")]);

        let mut buf = String::new();
        let k1 = group_key_into(&gb, &ls1, &mut buf);
        let k2 = group_key_into(&gb, &ls2, &mut buf);
        assert_eq!(k1, group_key(&gb, &ls1));
        assert_eq!(k2, group_key(&gb, &ls2));
    }
}
