use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Instant;

use crate::alert::{Alert, LabelSet};
use crate::fingerprint::{Fnv64, group_key_into};
use crate::route::RouteTree;

// ---------------------------------------------------------------------------
// GroupFire — an emission decision handed to the publishing side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireKind {
    /// First notification after `group_wait`.
    Initial,
    /// Contents changed since the last notification (`group_interval`).
    Changed,
    /// Unchanged contents re-notified after `repeat_interval`.
    Repeat,
}

/// Snapshot of a group at fire time. `alerts` is a copy; the engine keeps no
/// references into it.
#[derive(Debug, Clone)]
pub struct GroupFire {
    pub route_idx: usize,
    pub group_key: String,
    pub receiver: String,
    pub kind: FireKind,
    pub alerts: Vec<Alert>,
    /// Labels carried identically by every member.
    pub common_labels: LabelSet,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

struct Group {
    /// Member alerts keyed by fingerprint; resolved members stay until the
    /// next emission delivers their resolution, then drop.
    members: BTreeMap<String, Alert>,
    last_notified: Option<Instant>,
    /// Digest of `(fingerprint, status)` pairs at the last emission.
    last_digest: Option<u64>,
    /// The single pending timer for this group; entries popped from the heap
    /// that do not match are stale and skipped.
    scheduled: Option<Instant>,
}

impl Group {
    fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            last_notified: None,
            last_digest: None,
            scheduled: None,
        }
    }

    fn digest(&self) -> u64 {
        let mut h = Fnv64::new();
        for (fp, alert) in &self.members {
            h.write(fp.as_bytes());
            h.write_sep();
            h.write(alert.status.to_string().as_bytes());
            h.write_sep();
        }
        h.finish()
    }

    fn common_labels(&self) -> LabelSet {
        let mut iter = self.members.values();
        let Some(first) = iter.next() else {
            return LabelSet::new();
        };
        let mut common = first.labels.clone();
        for alert in iter {
            common.retain(|k, v| alert.labels.get(k) == Some(v));
        }
        common
    }
}

// ---------------------------------------------------------------------------
// Timer heap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimerEntry {
    at: Instant,
    route_idx: usize,
    key: String,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.route_idx.cmp(&other.route_idx))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// GroupingEngine
// ---------------------------------------------------------------------------

/// Owns the `(route node × group key) → group` mapping and the per-group
/// timers.
///
/// The engine is a synchronous state machine driven by its owning task: the
/// task feeds routed alerts through [`on_alert`](Self::on_alert), sleeps
/// until [`next_deadline`](Self::next_deadline), and collects emissions with
/// [`due`](Self::due). Explicit `now` arguments keep every transition
/// deterministic under test.
///
/// Groups reference their route node by arena index only; a route-tree swap
/// therefore discards the engine (pending groups re-form on the next
/// ingest).
pub struct GroupingEngine {
    groups: HashMap<(usize, String), Group>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    key_buf: String,
}

impl GroupingEngine {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            timers: BinaryHeap::new(),
            key_buf: String::new(),
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Place `alert` into its bucket under the route node at `route_idx`.
    ///
    /// A group with no pending firing arms one at `now + group_wait`; a
    /// group already scheduled is left alone — new members extend contents
    /// but never delay the notification.
    pub fn on_alert(&mut self, tree: &RouteTree, route_idx: usize, alert: &Alert, now: Instant) {
        let node = tree.node(route_idx);
        let key = group_key_into(&node.group_by, &alert.labels, &mut self.key_buf);

        let group = self
            .groups
            .entry((route_idx, key.clone()))
            .or_insert_with(Group::new);
        group
            .members
            .insert(alert.fingerprint.clone(), alert.clone());

        if group.scheduled.is_none() {
            let at = now + node.group_wait;
            group.scheduled = Some(at);
            self.timers.push(Reverse(TimerEntry {
                at,
                route_idx,
                key,
            }));
        }
    }

    /// Earliest pending timer, if any. May point at a stale entry; a wakeup
    /// that finds nothing due is harmless.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(e)| e.at)
    }

    /// Process every timer due at `now` and return the resulting emissions.
    ///
    /// Per fire: snapshot the member set; emit when this is the first
    /// notification, when the `(fingerprint, status)` digest changed since
    /// the last one, or when `repeat_interval` elapsed. After an emission,
    /// resolved members drop out. An empty group lingers until
    /// `repeat_interval` past its last notification, then dies.
    pub fn due(&mut self, now: Instant, tree: &RouteTree) -> Vec<GroupFire> {
        let mut fires = Vec::new();
        while let Some(Reverse(entry)) = self.timers.peek() {
            if entry.at > now {
                break;
            }
            let Reverse(entry) = self.timers.pop().expect("peeked entry vanished");
            let slot = (entry.route_idx, entry.key.clone());
            let Some(group) = self.groups.get_mut(&slot) else {
                continue;
            };
            if group.scheduled != Some(entry.at) {
                continue; // superseded timer
            }
            group.scheduled = None;
            let node = tree.node(entry.route_idx);

            let digest = group.digest();
            let repeat_due = group
                .last_notified
                .is_some_and(|t| now.duration_since(t) >= node.repeat_interval);
            let kind = if group.members.is_empty() {
                None
            } else if group.last_notified.is_none() {
                Some(FireKind::Initial)
            } else if group.last_digest != Some(digest) {
                Some(FireKind::Changed)
            } else if repeat_due {
                Some(FireKind::Repeat)
            } else {
                None
            };

            if let Some(kind) = kind {
                fires.push(GroupFire {
                    route_idx: entry.route_idx,
                    group_key: entry.key.clone(),
                    receiver: node.receiver.clone(),
                    kind,
                    alerts: group.members.values().cloned().collect(),
                    common_labels: group.common_labels(),
                });
                group.last_notified = Some(now);
                group.members.retain(|_, a| a.is_firing());
                // Digest reflects the retained set, or the next interval
                // tick would see the dropped resolutions as a change.
                group.last_digest = Some(group.digest());
            }

            if group.members.is_empty() {
                match group.last_notified {
                    Some(t) if now.duration_since(t) < node.repeat_interval => {
                        // Quiet period not over: check again at its horizon.
                        let at = t + node.repeat_interval;
                        group.scheduled = Some(at);
                        self.timers.push(Reverse(TimerEntry {
                            at,
                            route_idx: entry.route_idx,
                            key: entry.key,
                        }));
                    }
                    _ => {
                        self.groups.remove(&slot);
                    }
                }
            } else {
                let at = now + node.group_interval;
                group.scheduled = Some(at);
                self.timers.push(Reverse(TimerEntry {
                    at,
                    route_idx: entry.route_idx,
                    key: entry.key,
                }));
            }
        }
        fires
    }
}

impl Default for GroupingEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
