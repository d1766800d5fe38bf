//! Range-action usage limits.
//!
//! The linear problem is continuous and cannot count activated actions, so
//! range-action limits are enforced beforehand: range actions are ranked by
//! their impact on the most limiting elements and admitted while the usage
//! tally stays within the limits. Actions left out stay frozen at their
//! initial setpoint.

use crate::sensitivity::FlowResult;
use rao_core::{FlowCnec, NetworkAction, RaUsageLimits, RangeAction, RangeActionId, Unit, UsageTally};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Number of most limiting elements used to rank range actions.
const RANKING_ELEMENTS: usize = 5;

/// Range actions the linear problem may move, in perimeter order.
///
/// Aligned range actions (same group id) are admitted or frozen together.
/// Ties in impact are broken by group key.
pub fn select_free_range_actions(
    range_actions: &[Arc<RangeAction>],
    activated_network_actions: &[Arc<NetworkAction>],
    limits: &RaUsageLimits,
    flows: &FlowResult,
    most_limiting: &[Arc<FlowCnec>],
    unit: Unit,
) -> Vec<Arc<RangeAction>> {
    if limits.is_unlimited() {
        return range_actions.to_vec();
    }

    let mut tally = UsageTally::new();
    for na in activated_network_actions {
        tally.add_network_action(na);
    }

    let mut groups: BTreeMap<String, Vec<&Arc<RangeAction>>> = BTreeMap::new();
    for ra in range_actions {
        let key = ra.group_id.clone().unwrap_or_else(|| ra.id.to_string());
        groups.entry(key).or_default().push(ra);
    }

    let mut ranked: Vec<(f64, String, Vec<&Arc<RangeAction>>)> = groups
        .into_iter()
        .map(|(key, members)| {
            let impact = members
                .iter()
                .flat_map(|ra| {
                    most_limiting
                        .iter()
                        .take(RANKING_ELEMENTS)
                        .map(move |cnec| flows.sensitivity(cnec, &ra.id, unit).abs())
                })
                .fold(0.0, f64::max);
            (impact, key, members)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut free: BTreeSet<RangeActionId> = BTreeSet::new();
    for (impact, key, members) in ranked {
        let mut trial = tally.clone();
        for ra in &members {
            trial.add_range_action(ra);
        }
        if trial.excess(limits) <= tally.excess(limits) {
            tally = trial;
            free.extend(members.iter().map(|ra| ra.id.clone()));
        } else {
            debug!(group = %key, impact, "range action frozen by usage limits");
        }
    }

    range_actions
        .iter()
        .filter(|ra| free.contains(&ra.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitivity::SensitivityValues;
    use rao_core::{ActionType, ElementaryAction, State};
    use std::collections::HashMap;

    fn cnec() -> Arc<FlowCnec> {
        Arc::new(
            FlowCnec::new("c", "FR", "line-1", State::preventive())
                .with_symmetric_threshold(Unit::Megawatt, 100.0),
        )
    }

    fn hvdc(id: &str, tso: &str) -> Arc<RangeAction> {
        Arc::new(RangeAction::hvdc(id, tso, format!("{id}-el"), -100.0, 100.0))
    }

    fn flows(sensitivities: &[(&str, f64)]) -> FlowResult {
        let mut values = SensitivityValues::default();
        values.flows_mw.insert("c".into(), 110.0);
        for (ra, s) in sensitivities {
            values.sensitivities.insert(("c".into(), (*ra).into()), *s);
        }
        FlowResult::new(values, HashMap::new(), None)
    }

    fn ids(ras: &[Arc<RangeAction>]) -> Vec<&str> {
        ras.iter().map(|ra| ra.id.as_str()).collect()
    }

    #[test]
    fn test_unlimited_keeps_everything() {
        let ras = vec![hvdc("a", "FR"), hvdc("b", "FR")];
        let free = select_free_range_actions(&ras, &[], &RaUsageLimits::default(), &flows(&[]), &[cnec()], Unit::Megawatt);
        assert_eq!(ids(&free), vec!["a", "b"]);
    }

    #[test]
    fn test_most_impactful_actions_are_kept() {
        let ras = vec![hvdc("a", "FR"), hvdc("b", "FR"), hvdc("c", "BE")];
        let limits = RaUsageLimits {
            max_ra: Some(2),
            ..RaUsageLimits::default()
        };
        let f = flows(&[("a", 0.1), ("b", -0.8), ("c", 0.5)]);
        let free = select_free_range_actions(&ras, &[], &limits, &f, &[cnec()], Unit::Megawatt);
        assert_eq!(ids(&free), vec!["b", "c"]);
    }

    #[test]
    fn test_network_actions_consume_the_budget() {
        let ras = vec![hvdc("a", "FR"), hvdc("b", "BE")];
        let na = Arc::new(NetworkAction::new(
            "na",
            "FR",
            vec![ElementaryAction::Topology {
                element: "line-2".into(),
                action: ActionType::Open,
            }],
        ));
        let limits = RaUsageLimits {
            max_ra_per_tso: BTreeMap::from([("FR".to_string(), 1)]),
            ..RaUsageLimits::default()
        };
        let f = flows(&[("a", 0.9), ("b", 0.1)]);
        let free = select_free_range_actions(&ras, &[na], &limits, &f, &[cnec()], Unit::Megawatt);
        assert_eq!(ids(&free), vec!["b"]);
    }

    #[test]
    fn test_aligned_actions_move_together() {
        let a = Arc::new(RangeAction::hvdc("a", "FR", "a-el", -100.0, 100.0).with_group("g"));
        let b = Arc::new(RangeAction::hvdc("b", "FR", "b-el", -100.0, 100.0).with_group("g"));
        let c = hvdc("c", "FR");
        let limits = RaUsageLimits {
            max_ra: Some(1),
            ..RaUsageLimits::default()
        };
        let f = flows(&[("a", 0.9), ("c", 0.1)]);
        let free = select_free_range_actions(&[a, b, c], &[], &limits, &f, &[cnec()], Unit::Megawatt);
        assert_eq!(ids(&free), vec!["c"]);
    }
}
