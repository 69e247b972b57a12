use serde::Deserialize;

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// RouteConfig — raw nested routing tree as it appears in relay.yaml
// ---------------------------------------------------------------------------

/// One node of the routing tree, as written in config.
///
/// All fields except `matchers` are inheritable: a node that leaves
/// `receiver`, `group_by` or a timer unset takes the resolved value of its
/// parent. Inheritance is resolved when the tree is compiled, not here.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Receiver name; required on the root, inherited below.
    #[serde(default)]
    pub receiver: Option<String>,
    /// Labels to group by. Empty list means "one global group";
    /// the single element `"..."` means "group by every label".
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
    /// Textual matchers, `name op value` with op in `= != =~ !~`.
    #[serde(default)]
    pub matchers: Vec<String>,
    /// Delay from group creation to its first notification.
    #[serde(default)]
    pub group_wait: Option<HumanDuration>,
    /// Minimum gap between notifications when group contents change.
    #[serde(default)]
    pub group_interval: Option<HumanDuration>,
    /// Re-notification period for an unchanged group.
    #[serde(default)]
    pub repeat_interval: Option<HumanDuration>,
    /// Keep evaluating sibling routes after this node matches.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,
    /// Child routes, evaluated depth-first in order.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl RouteConfig {
    /// Total number of nodes in this subtree (including self).
    pub fn node_count(&self) -> usize {
        1 + self.routes.iter().map(RouteConfig::node_count).sum::<usize>()
    }

    /// Maximum nesting depth of this subtree (root alone is 1).
    pub fn depth(&self) -> usize {
        1 + self.routes.iter().map(RouteConfig::depth).max().unwrap_or(0)
    }
}

/// Route timer defaults applied to the root when unset.
pub const DEFAULT_GROUP_WAIT_SECS: u64 = 30;
pub const DEFAULT_GROUP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_REPEAT_INTERVAL_SECS: u64 = 4 * 3600;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
