use std::collections::HashSet;
use std::time::Duration;

use ar_config::route::{
    DEFAULT_GROUP_INTERVAL_SECS, DEFAULT_GROUP_WAIT_SECS, DEFAULT_REPEAT_INTERVAL_SECS,
};
use ar_config::{MAX_ROUTE_DEPTH, RouteConfig};

use crate::alert::LabelSet;
use crate::error::{CoreReason, CoreResult, core_err};
use crate::fingerprint::GroupBy;
use crate::matcher::{MatchOp, Matcher, RegexCache, match_all};

// ---------------------------------------------------------------------------
// RouteNode — one arena slot, inheritance already resolved
// ---------------------------------------------------------------------------

/// A compiled route node. Children are arena indices, never pointers, so the
/// tree is a flat `Vec` with the root at index 0.
#[derive(Debug, Clone)]
pub struct RouteNode {
    pub matchers: Vec<Matcher>,
    /// Effective receiver (inherited when the config left it unset).
    pub receiver: String,
    /// Effective grouping specification.
    pub group_by: GroupBy,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
    pub continue_matching: bool,
    pub children: Vec<usize>,
    /// A single `alertname = x` equality, lifted out as a walk pre-filter.
    alertname_eq: Option<String>,
}

impl RouteNode {
    fn matches(&self, labels: &LabelSet, cache: &RegexCache) -> bool {
        if let Some(ref want) = self.alertname_eq
            && labels.get("alertname") != Some(want)
        {
            return false;
        }
        match_all(&self.matchers, labels, cache)
    }
}

// ---------------------------------------------------------------------------
// RouteTree
// ---------------------------------------------------------------------------

/// Immutable compiled routing tree. Built once per config load, replaced
/// wholesale on reload; never mutated after publication.
#[derive(Debug)]
pub struct RouteTree {
    nodes: Vec<RouteNode>,
}

/// Expected number of matches for typical traffic; the walk result is
/// pre-allocated to this capacity.
const WALK_RESULT_CAPACITY: usize = 4;

impl RouteTree {
    /// Compile the raw config tree. Inheritance of `receiver`, `group_by`
    /// and the three timers is resolved here; every regex operand is
    /// compiled into `cache` so the walk never compiles.
    pub fn build(
        root: &RouteConfig,
        receivers: &HashSet<String>,
        cache: &RegexCache,
    ) -> CoreResult<Self> {
        if root.depth() > MAX_ROUTE_DEPTH {
            return Err(core_err(
                CoreReason::Validation,
                format!(
                    "route tree depth {} exceeds maximum {MAX_ROUTE_DEPTH}",
                    root.depth()
                ),
            ));
        }
        let defaults = Inherited {
            receiver: None,
            group_by: GroupBy::Global,
            group_wait: Duration::from_secs(DEFAULT_GROUP_WAIT_SECS),
            group_interval: Duration::from_secs(DEFAULT_GROUP_INTERVAL_SECS),
            repeat_interval: Duration::from_secs(DEFAULT_REPEAT_INTERVAL_SECS),
        };
        let mut nodes = Vec::with_capacity(root.node_count());
        compile_node(root, &defaults, receivers, cache, &mut nodes, "route")?;
        Ok(Self { nodes })
    }

    pub fn node(&self, idx: usize) -> &RouteNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk depth-first and return the matched node indices in evaluation
    /// order. A matching interior node stands in only when none of its
    /// children match; `continue: false` on a matching child stops the
    /// sibling scan at that level. The root matches unconditionally, so the
    /// result is never empty.
    pub fn walk(&self, labels: &LabelSet, cache: &RegexCache) -> Vec<usize> {
        self.walk_with_cancel(labels, cache, &|| false)
    }

    /// [`walk`](Self::walk) with a cancellation probe checked between
    /// siblings; a cancelled walk returns the matches collected so far.
    pub fn walk_with_cancel(
        &self,
        labels: &LabelSet,
        cache: &RegexCache,
        cancelled: &dyn Fn() -> bool,
    ) -> Vec<usize> {
        let mut out = Vec::with_capacity(WALK_RESULT_CAPACITY);
        self.visit(0, labels, cache, cancelled, &mut out);
        out
    }

    fn visit(
        &self,
        idx: usize,
        labels: &LabelSet,
        cache: &RegexCache,
        cancelled: &dyn Fn() -> bool,
        out: &mut Vec<usize>,
    ) -> bool {
        let node = &self.nodes[idx];
        // The root always matches; everything else evaluates its matchers.
        if idx != 0 && !node.matches(labels, cache) {
            return false;
        }

        let before = out.len();
        for &child in &node.children {
            if cancelled() {
                break;
            }
            let matched = self.visit(child, labels, cache, cancelled, out);
            if matched && !self.nodes[child].continue_matching {
                break;
            }
        }

        // No child claimed the alert: this node is the destination.
        if out.len() == before {
            out.push(idx);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Inherited {
    receiver: Option<String>,
    group_by: GroupBy,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
}

fn compile_node(
    cfg: &RouteConfig,
    inherited: &Inherited,
    receivers: &HashSet<String>,
    cache: &RegexCache,
    nodes: &mut Vec<RouteNode>,
    path: &str,
) -> CoreResult<usize> {
    let receiver = match cfg.receiver.clone().or_else(|| inherited.receiver.clone()) {
        Some(r) => r,
        None => {
            return Err(core_err(
                CoreReason::Validation,
                format!("{path}: no receiver set and none inherited"),
            ));
        }
    };
    if !receivers.contains(&receiver) {
        return Err(core_err(
            CoreReason::Validation,
            format!("{path}: receiver {receiver:?} is not defined"),
        ));
    }

    let mut matchers = Vec::with_capacity(cfg.matchers.len());
    for (i, text) in cfg.matchers.iter().enumerate() {
        let m = Matcher::parse(text)
            .map_err(|e| e.with_detail(format!("{path}.matchers[{i}]")))?;
        if m.op.is_regex() {
            cache
                .prepopulate(&m.value)
                .map_err(|e| e.with_detail(format!("{path}.matchers[{i}]")))?;
        }
        matchers.push(m);
    }
    let alertname_eq = matchers
        .iter()
        .find(|m| m.name == "alertname" && m.op == MatchOp::Eq)
        .map(|m| m.value.clone());

    let effective = Inherited {
        receiver: Some(receiver.clone()),
        group_by: cfg
            .group_by
            .as_deref()
            .map(GroupBy::from_config)
            .unwrap_or_else(|| inherited.group_by.clone()),
        group_wait: cfg
            .group_wait
            .map(Into::into)
            .unwrap_or(inherited.group_wait),
        group_interval: cfg
            .group_interval
            .map(Into::into)
            .unwrap_or(inherited.group_interval),
        repeat_interval: cfg
            .repeat_interval
            .map(Into::into)
            .unwrap_or(inherited.repeat_interval),
    };
    for (dur, what) in [
        (effective.group_wait, "group_wait"),
        (effective.group_interval, "group_interval"),
        (effective.repeat_interval, "repeat_interval"),
    ] {
        if dur.is_zero() {
            return Err(core_err(
                CoreReason::Validation,
                format!("{path}: {what} must be > 0"),
            ));
        }
    }

    let idx = nodes.len();
    nodes.push(RouteNode {
        matchers,
        receiver,
        group_by: effective.group_by.clone(),
        group_wait: effective.group_wait,
        group_interval: effective.group_interval,
        repeat_interval: effective.repeat_interval,
        continue_matching: cfg.continue_matching,
        children: Vec::with_capacity(cfg.routes.len()),
        alertname_eq,
    });

    for (i, child_cfg) in cfg.routes.iter().enumerate() {
        let child_idx = compile_node(
            child_cfg,
            &effective,
            receivers,
            cache,
            nodes,
            &format!("{path}.routes[{i}]"),
        )?;
        nodes[idx].children.push(child_idx);
    }
    Ok(idx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
