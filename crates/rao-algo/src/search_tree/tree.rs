//! Search-tree orchestration.
//!
//! The tree starts from a root leaf (no network action), optimizes its range
//! actions, then explores one depth at a time: the best leaf so far is
//! bloomed into candidate combinations, every candidate becomes a child leaf
//! that is evaluated and optimized on a bounded worker pool, and the best
//! child replaces the best leaf when it improves the cost enough.
//!
//! Children are collected in exploration order whatever their completion
//! order, so the selected leaf only depends on the inputs.

use super::bloomer::SearchTreeBloomer;
use super::leaf::{Leaf, LeafId, LeafStatus};
use super::pool::SnapshotPool;
use crate::linear_optimizer::IteratingLinearOptimizerInput;
use crate::objective::{ObjectiveFunction, VIRTUAL_COST_EPSILON};
use crate::parameters::{SearchTreeParameters, StopCriterion};
use crate::perimeter::OptimizationPerimeter;
use crate::result::PerimeterResult;
use crate::sensitivity::{FlowResult, ReferenceProgram, SensitivityComputer, SensitivityEngine};
use rao_core::{
    AreaGraph, CombinationOrigin, Instant, NetworkActionCombination, NetworkActionId,
    NetworkSnapshot, RaoError, RaoResult,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a search tree needs besides its parameters.
pub struct SearchTreeInput {
    perimeter: Arc<OptimizationPerimeter>,
    root_snapshot: NetworkSnapshot,
    engine: Arc<dyn SensitivityEngine>,
    reference_program: Option<ReferenceProgram>,
    detected_combinations: Vec<NetworkActionCombination>,
    area_graph: Option<AreaGraph>,
    pre_perimeter_flows: Option<FlowResult>,
}

impl SearchTreeInput {
    pub fn new(
        perimeter: Arc<OptimizationPerimeter>,
        root_snapshot: NetworkSnapshot,
        engine: Arc<dyn SensitivityEngine>,
    ) -> Self {
        Self {
            perimeter,
            root_snapshot,
            engine,
            reference_program: None,
            detected_combinations: Vec::new(),
            area_graph: None,
            pre_perimeter_flows: None,
        }
    }

    /// Net positions used to compute commercial and loop flows.
    pub fn with_reference_program(mut self, program: ReferenceProgram) -> Self {
        self.reference_program = Some(program);
        self
    }

    /// Combination found by a previous optimization, explored first.
    pub fn with_detected_combination(mut self, combination: NetworkActionCombination) -> Self {
        self.detected_combinations
            .push(combination.with_origin(CombinationOrigin::Detected));
        self
    }

    /// Area adjacency used to skip actions far from the limiting elements.
    pub fn with_area_graph(mut self, graph: AreaGraph) -> Self {
        self.area_graph = Some(graph);
        self
    }

    /// Flows before any remedial action of the perimeter. Computed on the
    /// root snapshot when not given.
    pub fn with_pre_perimeter_flows(mut self, flows: FlowResult) -> Self {
        self.pre_perimeter_flows = Some(flows);
        self
    }
}

/// One leaf as seen in a [`SearchTreeReport`].
#[derive(Debug, Clone, Serialize)]
pub struct LeafRecord {
    pub id: LeafId,
    pub parent: Option<LeafId>,
    pub depth: usize,
    pub label: String,
    pub origin: Option<CombinationOrigin>,
    pub status: LeafStatus,
    /// `None` for error leaves
    pub cost: Option<f64>,
    pub optimized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LeafRecord {
    fn of(leaf: &Leaf) -> Self {
        Self {
            id: leaf.id(),
            parent: leaf.parent(),
            depth: leaf.depth(),
            label: leaf.label(),
            origin: leaf.combination().map(|c| c.origin()),
            status: leaf.status(),
            cost: leaf.cost().ok().filter(|c| c.is_finite()),
            optimized: leaf.optimization_result().is_some(),
            error: leaf.error_message().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthStats {
    pub depth: usize,
    pub candidates: usize,
    pub errors: usize,
    /// Cost of the best leaf once the depth is done
    pub best_cost: f64,
    pub improved: bool,
}

/// Summary of one search-tree run.
#[derive(Debug, Clone, Serialize)]
pub struct SearchTreeReport {
    pub state: String,
    pub best_leaf: LeafId,
    pub best_label: String,
    pub cost: Option<f64>,
    pub functional_cost: Option<f64>,
    pub virtual_costs: BTreeMap<String, f64>,
    pub activated_network_actions: Vec<NetworkActionId>,
    pub optimized_setpoints: BTreeMap<String, f64>,
    pub depth_reached: usize,
    pub depths: Vec<DepthStats>,
    pub leaves: Vec<LeafRecord>,
}

impl SearchTreeReport {
    pub fn to_json(&self) -> RaoResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RaoError::Other(format!("failed to serialize search-tree report: {e}")))
    }
}

pub struct SearchTree {
    perimeter: Arc<OptimizationPerimeter>,
    root_snapshot: NetworkSnapshot,
    params: SearchTreeParameters,
    computer: SensitivityComputer,
    pool: Arc<SnapshotPool>,
    predefined: Vec<NetworkActionCombination>,
    detected: Vec<NetworkActionCombination>,
    area_graph: Option<AreaGraph>,
    pre_perimeter_flows: Option<FlowResult>,
    leaves: Vec<LeafRecord>,
    depths: Vec<DepthStats>,
    report: Option<SearchTreeReport>,
}

impl SearchTree {
    /// Validate `params` and prepare the tree. Configuration problems are
    /// reported here, before any computation.
    pub fn new(input: SearchTreeInput, params: SearchTreeParameters) -> RaoResult<Self> {
        params.validate()?;
        let SearchTreeInput {
            perimeter,
            root_snapshot,
            engine,
            reference_program,
            detected_combinations,
            area_graph,
            pre_perimeter_flows,
        } = input;

        let computer = SensitivityComputer::new(
            engine,
            Arc::clone(&perimeter),
            &params,
            reference_program,
            &root_snapshot,
        )?;
        let predefined = resolve_predefined_combinations(&perimeter, &params)?;
        let pool = SnapshotPool::new(root_snapshot.clone(), params.tree.leaves_in_parallel);

        Ok(Self {
            perimeter,
            root_snapshot,
            params,
            computer,
            pool,
            predefined,
            detected: detected_combinations,
            area_graph,
            pre_perimeter_flows,
            leaves: Vec::new(),
            depths: Vec::new(),
            report: None,
        })
    }

    pub fn parameters(&self) -> &SearchTreeParameters {
        &self.params
    }

    pub fn predefined_combinations(&self) -> &[NetworkActionCombination] {
        &self.predefined
    }

    /// Report of the last [`SearchTree::run`].
    pub fn report(&self) -> Option<&SearchTreeReport> {
        self.report.as_ref()
    }

    /// Search the best combination of remedial actions.
    ///
    /// `outage_instant` enables on-flow-constraint actions watching CNECs of
    /// that instant. The returned leaf is the best one found; it is an error
    /// leaf only when the root itself could not be evaluated or optimized.
    pub fn run(&mut self, outage_instant: Option<Instant>) -> RaoResult<Leaf> {
        self.leaves.clear();
        self.depths.clear();
        self.report = None;
        let state = self.perimeter.main_state().clone();
        info!(state = %state, engine = self.computer.engine_name(), "starting search tree");

        let mut root = Leaf::root(LeafId(0), &self.pool)?;
        // flows computed here are those of the root snapshot, reused for its evaluation
        let (pre_perimeter_flows, root_flows) = match self.pre_perimeter_flows.clone() {
            Some(flows) => (flows, None),
            None => match self.computer.compute(&self.root_snapshot) {
                Ok(flows) => (flows.clone(), Some(flows)),
                Err(e) if e.is_recoverable() => {
                    warn!(state = %state, error = %e, "pre-perimeter computation failed");
                    root.fail(e.to_string());
                    return self.finish(root);
                }
                Err(e) => return Err(e),
            },
        };
        let objective = ObjectiveFunction::build(&self.perimeter, &pre_perimeter_flows, &self.params)?;
        let optimizer_input = IteratingLinearOptimizerInput {
            computer: &self.computer,
            objective: &objective,
            pre_perimeter_flows: &pre_perimeter_flows,
        };

        match root_flows {
            Some(flows) => root.evaluate_with_flows(flows, &objective, &self.computer),
            None => root.evaluate(&objective, &self.computer),
        }
        if root.is_error() {
            return self.finish(root);
        }
        info!(cost = root.cost_or_infinity(), "root leaf evaluated");
        if self.stop_criterion_met(&root, &objective) {
            info!("stop criterion reached at root, skipping optimization");
            return self.finish(root);
        }
        root.optimize(&optimizer_input, &self.params)?;
        root.finalize_optimization()?;
        if root.is_error() {
            return self.finish(root);
        }
        info!(cost = root.cost_or_infinity(), "root leaf optimized");

        let mut best = root;
        let mut next_id = 1;
        for depth in 1..=self.params.tree.maximum_search_depth {
            if self.stop_criterion_met(&best, &objective) {
                info!(depth, "stop criterion reached");
                break;
            }
            let bloomer = SearchTreeBloomer::new(
                &self.perimeter,
                &self.params,
                &self.predefined,
                &self.detected,
                self.area_graph.as_ref(),
            );
            let candidates = bloomer.bloom(&best, outage_instant)?;
            if candidates.is_empty() {
                info!(depth, "no combination left to explore");
                break;
            }
            info!(depth, candidates = candidates.len(), "exploring depth");

            let children = self.explore(&best, candidates, next_id, &objective, &optimizer_input)?;
            next_id += children.len();
            let explored = children.len();
            let errors = children.iter().filter(|c| c.is_error()).count();

            let selected = self.select(&best, &children, &objective);
            self.leaves.extend(children.iter().map(LeafRecord::of));
            let improved = selected.is_some();
            let previous_cost = best.cost_or_infinity();
            if let Some(index) = selected {
                let mut children = children;
                let winner = children.swap_remove(index);
                info!(
                    depth,
                    leaf = %winner.id(),
                    label = %winner.label(),
                    previous_cost,
                    cost = winner.cost_or_infinity(),
                    "new best leaf"
                );
                if best.is_root() {
                    self.leaves.push(LeafRecord::of(&best));
                }
                best = winner;
            }
            self.depths.push(DepthStats {
                depth,
                candidates: explored,
                errors,
                best_cost: best.cost_or_infinity(),
                improved,
            });
            if !improved {
                info!(depth, cost = previous_cost, "no child improves the best leaf");
                break;
            }
        }

        self.finish(best)
    }

    /// Build, evaluate and optimize one child per candidate, returned in
    /// candidate order.
    fn explore(
        &self,
        parent: &Leaf,
        candidates: Vec<NetworkActionCombination>,
        first_id: usize,
        objective: &ObjectiveFunction,
        optimizer_input: &IteratingLinearOptimizerInput<'_>,
    ) -> RaoResult<Vec<Leaf>> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.tree.leaves_in_parallel)
            .build()
            .map_err(|e| RaoError::Other(format!("failed to build leaf worker pool: {e}")))?;

        let results: Vec<RaoResult<Leaf>> = workers.install(|| {
            candidates
                .into_par_iter()
                .enumerate()
                .map(|(i, combination)| {
                    self.grow_child(LeafId(first_id + i), parent, combination, objective, optimizer_input)
                })
                .collect()
        });
        results.into_iter().collect()
    }

    fn grow_child(
        &self,
        id: LeafId,
        parent: &Leaf,
        combination: NetworkActionCombination,
        objective: &ObjectiveFunction,
        optimizer_input: &IteratingLinearOptimizerInput<'_>,
    ) -> RaoResult<Leaf> {
        let mut child = Leaf::child(id, parent, combination, &self.pool)?;
        child.evaluate(objective, &self.computer);
        if !child.is_error() && !self.stop_criterion_met(&child, objective) {
            child.optimize(optimizer_input, &self.params)?;
        }
        child.finalize_optimization()?;
        debug!(leaf = %child, "child leaf done");
        Ok(child)
    }

    /// Index of the child replacing `best`, if any.
    fn select(&self, best: &Leaf, children: &[Leaf], objective: &ObjectiveFunction) -> Option<usize> {
        let at_target = self.params.tree.stop_criterion == StopCriterion::AtTargetObjectiveValue;
        if at_target && !self.stop_criterion_met(best, objective) {
            if let Some(index) = children
                .iter()
                .position(|child| !child.is_error() && self.stop_criterion_met(child, objective))
            {
                return Some(index);
            }
        }

        let mut lowest: Option<(usize, f64)> = None;
        for (index, child) in children.iter().enumerate() {
            if child.is_error() {
                continue;
            }
            let cost = child.cost_or_infinity();
            if lowest.map_or(true, |(_, c)| cost < c) {
                lowest = Some((index, cost));
            }
        }
        let (index, cost) = lowest?;

        let best_cost = best.cost_or_infinity();
        let na_params = &self.params.network_actions;
        let threshold = na_params
            .absolute_min_impact_threshold
            .max(na_params.relative_min_impact_threshold * best_cost.abs());
        (cost < best_cost - threshold).then_some(index)
    }

    /// The stop criterion only holds on leaves without virtual cost.
    fn stop_criterion_met(&self, leaf: &Leaf, objective: &ObjectiveFunction) -> bool {
        if leaf.is_error() {
            return false;
        }
        let Ok(result) = leaf.result() else {
            return false;
        };
        if result.virtual_cost() > VIRTUAL_COST_EPSILON {
            return false;
        }
        match self.params.tree.stop_criterion {
            StopCriterion::MinObjective => objective.is_purely_virtual(),
            StopCriterion::AtTargetObjectiveValue => {
                result.cost() <= self.params.tree.target_objective_value
            }
        }
    }

    /// Record and report `best`, then release its pooled snapshot so the
    /// caller can keep it across runs.
    fn finish(&mut self, mut best: Leaf) -> RaoResult<Leaf> {
        best.finalize_optimization()?;
        if !self.leaves.iter().any(|record| record.id == best.id()) {
            self.leaves.push(LeafRecord::of(&best));
        }
        self.leaves.sort_by_key(|record| record.id);
        let result = best.result().ok();
        let state = self.perimeter.main_state();
        let optimized_setpoints = result
            .map(|r| {
                self.perimeter
                    .range_actions()
                    .iter()
                    .filter_map(|ra| {
                        r.optimized_setpoint(&ra.id, state)
                            .map(|sp| (ra.id.to_string(), sp))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let report = SearchTreeReport {
            state: state.to_string(),
            best_leaf: best.id(),
            best_label: best.label(),
            cost: result.map(|r| r.cost()),
            functional_cost: result.map(|r| r.functional_cost()),
            virtual_costs: result
                .map(|r| r.objective.virtual_costs.clone())
                .unwrap_or_default(),
            activated_network_actions: best.activated_network_actions().iter().cloned().collect(),
            optimized_setpoints,
            depth_reached: best.depth(),
            depths: self.depths.clone(),
            leaves: self.leaves.clone(),
        };
        info!(
            leaf = %best.id(),
            label = %report.best_label,
            cost = best.cost_or_infinity(),
            depth = report.depth_reached,
            "search tree done"
        );
        self.report = Some(report);
        Ok(best)
    }
}

/// Turn configured id lists into combinations of the perimeter's actions.
///
/// Combinations naming an action outside the perimeter are skipped.
fn resolve_predefined_combinations(
    perimeter: &OptimizationPerimeter,
    params: &SearchTreeParameters,
) -> RaoResult<Vec<NetworkActionCombination>> {
    let mut combinations = Vec::new();
    for ids in &params.network_actions.predefined_combinations {
        if ids.is_empty() {
            return Err(RaoError::Config("empty predefined combination".into()));
        }
        let actions: Option<Vec<_>> = ids
            .iter()
            .map(|id| perimeter.network_action(&NetworkActionId::from(id.as_str())).cloned())
            .collect();
        match actions {
            Some(actions) => {
                combinations.push(NetworkActionCombination::new(actions, CombinationOrigin::Predefined))
            }
            None => debug!(combination = ?ids, "predefined combination not usable on this perimeter"),
        }
    }
    Ok(combinations)
}
