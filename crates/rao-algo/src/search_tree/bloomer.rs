//! Candidate generation for the next search-tree depth.
//!
//! Blooming a leaf proposes every network-action combination worth testing
//! on top of it: one single-action combination per available action, plus
//! the predefined and detected combinations made of available actions.
//! Candidates then go through a chain of filters, each a free function so it
//! can be tested on its own:
//!
//! 1. [`remove_already_activated`]
//! 2. [`remove_already_tested`]
//! 3. [`remove_exceeding_usage_limits`]
//! 4. [`remove_far_combinations`] (only with a proximity radius)
//! 5. [`dedup_keep_strongest_origin`]
//!
//! and are returned in exploration order.

use super::leaf::Leaf;
use crate::parameters::SearchTreeParameters;
use crate::perimeter::OptimizationPerimeter;
use crate::result::PerimeterResult;
use rao_core::{
    AreaGraph, CnecId, Instant, NetworkAction, NetworkActionCombination, NetworkActionId,
    RaUsageLimits, RangeAction, RaoResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub struct SearchTreeBloomer<'a> {
    perimeter: &'a OptimizationPerimeter,
    params: &'a SearchTreeParameters,
    predefined: &'a [NetworkActionCombination],
    detected: &'a [NetworkActionCombination],
    area_graph: Option<&'a AreaGraph>,
}

impl<'a> SearchTreeBloomer<'a> {
    pub fn new(
        perimeter: &'a OptimizationPerimeter,
        params: &'a SearchTreeParameters,
        predefined: &'a [NetworkActionCombination],
        detected: &'a [NetworkActionCombination],
        area_graph: Option<&'a AreaGraph>,
    ) -> Self {
        Self {
            perimeter,
            params,
            predefined,
            detected,
            area_graph,
        }
    }

    /// Network actions usable on top of `leaf`.
    ///
    /// Actions with an unconditional rule on the perimeter's state always
    /// qualify. On-flow-constraint actions qualify when one of their CNECs,
    /// at the perimeter instant or at `outage_instant`, has a negative
    /// margin in `leaf`.
    pub fn available_network_actions(
        &self,
        leaf: &Leaf,
        outage_instant: Option<Instant>,
    ) -> RaoResult<Vec<Arc<NetworkAction>>> {
        let result = leaf.result()?;
        let state = self.perimeter.main_state();
        let unit = self.params.unit();
        let mut instants = vec![state.instant()];
        instants.extend(outage_instant);

        let overloaded = |id: &CnecId| {
            self.perimeter
                .flow_cnec(id)
                .is_some_and(|cnec| result.flows.margin(cnec, unit) < 0.0)
        };
        Ok(self
            .perimeter
            .network_actions()
            .iter()
            .filter(|na| {
                na.is_available_on(state)
                    || instants
                        .iter()
                        .any(|instant| na.flow_constraint_cnecs(*instant).any(&overloaded))
            })
            .cloned()
            .collect())
    }

    /// Combinations to explore below `leaf`, in exploration order.
    pub fn bloom(
        &self,
        leaf: &Leaf,
        outage_instant: Option<Instant>,
    ) -> RaoResult<Vec<NetworkActionCombination>> {
        let available = self.available_network_actions(leaf, outage_instant)?;
        let available_ids: BTreeSet<&NetworkActionId> = available.iter().map(|na| &na.id).collect();
        let activated = leaf.activated_network_actions();

        let mut candidates: Vec<NetworkActionCombination> = available
            .iter()
            .filter(|na| !activated.contains(&na.id))
            .map(|na| NetworkActionCombination::single(Arc::clone(na)))
            .collect();
        candidates.extend(
            self.predefined
                .iter()
                .chain(self.detected)
                .filter(|combination| combination.ids().all(|id| available_ids.contains(id)))
                .cloned(),
        );
        let generated = candidates.len();

        let candidates = remove_already_activated(candidates, activated);
        let candidates = remove_already_tested(candidates, activated, self.predefined);

        let result = leaf.result()?;
        let activated_range_actions: Vec<&Arc<RangeAction>> = result
            .activated_range_actions()
            .iter()
            .filter_map(|id| self.perimeter.range_action(id))
            .collect();
        let candidates = remove_exceeding_usage_limits(
            candidates,
            leaf.applied_network_actions(),
            &activated_range_actions,
            &self.params.usage_limits,
        );

        let candidates = match (
            self.area_graph,
            self.params.network_actions.max_number_of_boundaries_for_skipping_actions,
        ) {
            (Some(graph), Some(radius)) => {
                let sources = self.limiting_areas(leaf)?;
                remove_far_combinations(candidates, graph, &sources, radius)
            }
            _ => candidates,
        };

        let mut candidates = dedup_keep_strongest_origin(candidates);
        sort_in_exploration_order(&mut candidates);
        debug!(
            leaf = %leaf.id(),
            available = available.len(),
            generated,
            kept = candidates.len(),
            "bloomed leaf"
        );
        Ok(candidates)
    }

    /// Areas of the most limiting element and of the costliest element of
    /// every non-zero virtual cost.
    fn limiting_areas(&self, leaf: &Leaf) -> RaoResult<BTreeSet<String>> {
        let result = leaf.result()?;
        let mut elements = result.most_limiting_elements(1);
        for name in result.virtual_cost_names() {
            if result.virtual_cost_by_name(&name) > 0.0 {
                elements.extend(result.costly_elements(&name, 1));
            }
        }
        Ok(elements
            .iter()
            .filter_map(|id| self.perimeter.flow_cnec(id))
            .flat_map(|cnec| cnec.locations.iter().cloned())
            .collect())
    }
}

/// Drop combinations that would activate an action a second time.
pub fn remove_already_activated(
    candidates: Vec<NetworkActionCombination>,
    activated: &BTreeSet<NetworkActionId>,
) -> Vec<NetworkActionCombination> {
    candidates
        .into_iter()
        .filter(|combination| !combination.ids().any(|id| activated.contains(id)))
        .collect()
}

/// Drop single actions that complete the activated set into a predefined
/// combination: that combination was already tested one depth earlier.
pub fn remove_already_tested(
    candidates: Vec<NetworkActionCombination>,
    activated: &BTreeSet<NetworkActionId>,
    predefined: &[NetworkActionCombination],
) -> Vec<NetworkActionCombination> {
    if activated.is_empty() {
        return candidates;
    }
    let tested: BTreeSet<BTreeSet<NetworkActionId>> = predefined
        .iter()
        .filter(|combination| combination.len() == activated.len() + 1)
        .map(|combination| combination.id_set())
        .collect();
    candidates
        .into_iter()
        .filter(|combination| {
            if combination.len() != 1 {
                return true;
            }
            let mut union = activated.clone();
            union.extend(combination.ids().cloned());
            !tested.contains(&union)
        })
        .collect()
}

/// Drop combinations that would break a usage limit once added to the
/// actions already activated.
///
/// Checks, counting the activated network actions:
/// * the number of network actions against `max_ra`
/// * the number of distinct operators against `max_tso`
/// * per operator, the number of network actions against
///   `min(max_topo_per_tso, max_ra_per_tso - activated range actions)`
/// * per operator, the number of elementary actions against
///   `max_elementary_actions_per_tso`
pub fn remove_exceeding_usage_limits(
    candidates: Vec<NetworkActionCombination>,
    activated_network_actions: &[Arc<NetworkAction>],
    activated_range_actions: &[&Arc<RangeAction>],
    limits: &RaUsageLimits,
) -> Vec<NetworkActionCombination> {
    if limits.is_unlimited() {
        return candidates;
    }

    let mut ra_per_tso: BTreeMap<&str, usize> = BTreeMap::new();
    let mut active_operators: BTreeSet<&str> = BTreeSet::new();
    for ra in activated_range_actions {
        *ra_per_tso.entry(ra.operator.as_str()).or_default() += 1;
        active_operators.insert(ra.operator.as_str());
    }

    candidates
        .into_iter()
        .filter(|combination| {
            let actions: Vec<&Arc<NetworkAction>> = activated_network_actions
                .iter()
                .chain(combination.actions())
                .collect();

            if limits.max_ra.is_some_and(|max| actions.len() > max) {
                return false;
            }

            let mut operators = active_operators.clone();
            let mut na_per_tso: BTreeMap<&str, usize> = BTreeMap::new();
            let mut ea_per_tso: BTreeMap<&str, usize> = BTreeMap::new();
            for na in &actions {
                let tso = na.operator.as_str();
                operators.insert(tso);
                *na_per_tso.entry(tso).or_default() += 1;
                *ea_per_tso.entry(tso).or_default() += na.elementary_actions.len();
            }

            if limits.max_tso.is_some_and(|max| operators.len() > max) {
                return false;
            }
            let topo_ok = na_per_tso.iter().all(|(tso, count)| {
                let ras = ra_per_tso.get(tso).copied().unwrap_or(0);
                limits
                    .max_network_actions_for_tso(tso, ras)
                    .map_or(true, |max| *count <= max)
            });
            let elementary_ok = ea_per_tso.iter().all(|(tso, count)| {
                limits
                    .max_elementary_actions_per_tso
                    .get(*tso)
                    .map_or(true, |max| count <= max)
            });
            topo_ok && elementary_ok
        })
        .collect()
}

/// Drop combinations whose every action lies more than `radius` boundaries
/// away from `sources`.
///
/// An action with an unknown location is never far. Without any source
/// area nothing is dropped.
pub fn remove_far_combinations(
    candidates: Vec<NetworkActionCombination>,
    graph: &AreaGraph,
    sources: &BTreeSet<String>,
    radius: usize,
) -> Vec<NetworkActionCombination> {
    if sources.is_empty() {
        return candidates;
    }
    let distances = graph.distances_from(sources);
    let is_far = |na: &NetworkAction| {
        !na.locations.is_empty()
            && na
                .locations
                .iter()
                .all(|area| distances.get(area).map_or(true, |d| *d > radius))
    };
    candidates
        .into_iter()
        .filter(|combination| {
            let far = combination.actions().all(|na| is_far(na.as_ref()));
            if far {
                debug!(combination = %combination.concatenated_id(), radius, "combination too far from limiting elements");
            }
            !far
        })
        .collect()
}

/// Keep one combination per id set, with the strongest origin
/// (detected, then predefined, then generated).
pub fn dedup_keep_strongest_origin(candidates: Vec<NetworkActionCombination>) -> Vec<NetworkActionCombination> {
    let mut unique: BTreeMap<BTreeSet<NetworkActionId>, NetworkActionCombination> = BTreeMap::new();
    for combination in candidates {
        let key = combination.id_set();
        let stronger = unique
            .get(&key)
            .map_or(true, |kept| combination.origin() < kept.origin());
        if stronger {
            unique.insert(key, combination);
        }
    }
    unique.into_values().collect()
}

/// Detected first, then predefined, then larger combinations first, then by ids.
pub fn sort_in_exploration_order(candidates: &mut [NetworkActionCombination]) {
    candidates.sort_by(|a, b| {
        a.origin()
            .cmp(&b.origin())
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| a.cmp(b))
    });
}
