//! Limits on how many remedial actions may be activated in one state.
//!
//! Limits are global (`max_ra`, `max_tso`) or per operator. [`UsageTally`]
//! counts activated actions so the same arithmetic is shared by the bloomer,
//! the range-action filter and the usage-limit cost evaluator.

use crate::action::NetworkAction;
use crate::range_action::RangeAction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Remedial-action usage limits for one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaUsageLimits {
    /// Maximum number of remedial actions (network + range)
    #[serde(default)]
    pub max_ra: Option<usize>,
    /// Maximum number of distinct operators activating actions
    #[serde(default)]
    pub max_tso: Option<usize>,
    #[serde(default)]
    pub max_topo_per_tso: BTreeMap<String, usize>,
    #[serde(default)]
    pub max_pst_per_tso: BTreeMap<String, usize>,
    #[serde(default)]
    pub max_ra_per_tso: BTreeMap<String, usize>,
    #[serde(default)]
    pub max_elementary_actions_per_tso: BTreeMap<String, usize>,
}

impl RaUsageLimits {
    pub fn is_unlimited(&self) -> bool {
        self.max_ra.is_none()
            && self.max_tso.is_none()
            && self.max_topo_per_tso.is_empty()
            && self.max_pst_per_tso.is_empty()
            && self.max_ra_per_tso.is_empty()
            && self.max_elementary_actions_per_tso.is_empty()
    }

    /// Network actions `tso` may still hold given its activated range actions.
    pub fn max_network_actions_for_tso(&self, tso: &str, activated_range_actions: usize) -> Option<usize> {
        let topo = self.max_topo_per_tso.get(tso).copied();
        let ra = self
            .max_ra_per_tso
            .get(tso)
            .map(|limit| limit.saturating_sub(activated_range_actions));
        match (topo, ra) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Running count of activated remedial actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTally {
    pub network_actions: usize,
    pub range_actions: usize,
    pub operators: BTreeSet<String>,
    pub network_actions_per_tso: BTreeMap<String, usize>,
    pub range_actions_per_tso: BTreeMap<String, usize>,
    pub psts_per_tso: BTreeMap<String, usize>,
    pub elementary_actions_per_tso: BTreeMap<String, usize>,
}

impl UsageTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_network_action(&mut self, action: &NetworkAction) {
        self.network_actions += 1;
        self.operators.insert(action.operator.clone());
        *self
            .network_actions_per_tso
            .entry(action.operator.clone())
            .or_default() += 1;
        *self
            .elementary_actions_per_tso
            .entry(action.operator.clone())
            .or_default() += action.elementary_actions.len();
    }

    pub fn add_range_action(&mut self, action: &RangeAction) {
        self.range_actions += 1;
        self.operators.insert(action.operator.clone());
        *self
            .range_actions_per_tso
            .entry(action.operator.clone())
            .or_default() += 1;
        if action.is_pst() {
            *self.psts_per_tso.entry(action.operator.clone()).or_default() += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.network_actions + self.range_actions
    }

    fn count(map: &BTreeMap<String, usize>, tso: &str) -> usize {
        map.get(tso).copied().unwrap_or(0)
    }

    /// Number of actions in excess of `limits`, summed over every limit.
    pub fn excess(&self, limits: &RaUsageLimits) -> usize {
        let mut excess = 0;
        if let Some(max_ra) = limits.max_ra {
            excess += self.total().saturating_sub(max_ra);
        }
        if let Some(max_tso) = limits.max_tso {
            excess += self.operators.len().saturating_sub(max_tso);
        }
        for (tso, max) in &limits.max_topo_per_tso {
            excess += Self::count(&self.network_actions_per_tso, tso).saturating_sub(*max);
        }
        for (tso, max) in &limits.max_pst_per_tso {
            excess += Self::count(&self.psts_per_tso, tso).saturating_sub(*max);
        }
        for (tso, max) in &limits.max_ra_per_tso {
            let used = Self::count(&self.network_actions_per_tso, tso)
                + Self::count(&self.range_actions_per_tso, tso);
            excess += used.saturating_sub(*max);
        }
        for (tso, max) in &limits.max_elementary_actions_per_tso {
            excess += Self::count(&self.elementary_actions_per_tso, tso).saturating_sub(*max);
        }
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionType, ElementaryAction};

    fn topo(id: &str, tso: &str) -> NetworkAction {
        NetworkAction::new(
            id,
            tso,
            vec![ElementaryAction::Topology {
                element: format!("{id}-line"),
                action: ActionType::Open,
            }],
        )
    }

    #[test]
    fn test_max_network_actions_for_tso() {
        let mut limits = RaUsageLimits::default();
        assert_eq!(limits.max_network_actions_for_tso("FR", 0), None);
        limits.max_ra_per_tso.insert("FR".into(), 3);
        assert_eq!(limits.max_network_actions_for_tso("FR", 1), Some(2));
        limits.max_topo_per_tso.insert("FR".into(), 1);
        assert_eq!(limits.max_network_actions_for_tso("FR", 1), Some(1));
        assert_eq!(limits.max_network_actions_for_tso("FR", 5), Some(0));
    }

    #[test]
    fn test_excess_counts_every_limit() {
        let mut tally = UsageTally::new();
        tally.add_network_action(&topo("a", "FR"));
        tally.add_network_action(&topo("b", "FR"));
        tally.add_network_action(&topo("c", "BE"));

        let limits = RaUsageLimits {
            max_ra: Some(2),
            max_tso: Some(1),
            max_topo_per_tso: BTreeMap::from([("FR".to_string(), 1)]),
            ..RaUsageLimits::default()
        };
        // 1 over max_ra, 1 over max_tso, 1 over FR topo limit
        assert_eq!(tally.excess(&limits), 3);
        assert_eq!(tally.excess(&RaUsageLimits::default()), 0);
    }
}
