//! Iterating linear optimizer for range actions.
//!
//! Sensitivities are only valid near the point they were computed at, so the
//! linear problem is re-solved around each new point:
//!
//! 1. Solve the linear problem around the current setpoints
//! 2. Round PST angles to the closest tap
//! 3. Apply the setpoints on the leaf's snapshot and recompute flows
//! 4. Evaluate the true objective; keep the point if the cost improved
//!
//! The loop stops when setpoints no longer change, the improvement falls
//! below the convergence tolerance, the cost degrades, or the iteration
//! budget is spent. Network actions are never revisited here.

pub mod filter;
mod problem;

pub use filter::select_free_range_actions;

use crate::objective::{LoopFlowViolationEvaluator, MnecViolationEvaluator, ObjectiveFunction};
use crate::parameters::SearchTreeParameters;
use crate::result::{
    EvaluationResult, LinearOptimizationStatus, OptimizationResult, PerimeterResult,
    SETPOINT_EPSILON,
};
use crate::sensitivity::{FlowResult, SensitivityComputer};
use problem::LinearProblem;
use rao_core::{
    CnecId, FlowCnec, NetworkAction, NetworkSnapshot, RangeAction, RaoError, RaoResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared inputs of every range-action optimization in a search tree.
pub struct IteratingLinearOptimizerInput<'a> {
    pub computer: &'a SensitivityComputer,
    pub objective: &'a ObjectiveFunction,
    /// Flows before any remedial action of the perimeter
    pub pre_perimeter_flows: &'a FlowResult,
}

pub struct IteratingLinearOptimizer<'a> {
    input: &'a IteratingLinearOptimizerInput<'a>,
    params: &'a SearchTreeParameters,
}

impl<'a> IteratingLinearOptimizer<'a> {
    pub fn new(input: &'a IteratingLinearOptimizerInput<'a>, params: &'a SearchTreeParameters) -> Self {
        Self { input, params }
    }

    /// Optimize range actions on `snapshot`, starting from its evaluation `start`.
    ///
    /// `network_actions` are the network actions already applied on `snapshot`.
    /// A failure in the first iteration is returned as an error; later
    /// failures keep the best point found so far, which is also left
    /// applied on `snapshot`.
    pub fn optimize(
        &self,
        snapshot: &mut NetworkSnapshot,
        start: &EvaluationResult,
        network_actions: &[Arc<NetworkAction>],
    ) -> RaoResult<OptimizationResult> {
        let perimeter = self.input.computer.perimeter();
        let unit = self.params.unit();
        let limiting: Vec<Arc<FlowCnec>> = start
            .objective
            .most_limiting_elements
            .iter()
            .filter_map(|id| perimeter.flow_cnec(id).cloned())
            .collect();
        let free = select_free_range_actions(
            perimeter.range_actions(),
            network_actions,
            &self.params.usage_limits,
            &start.flows,
            &limiting,
            unit,
        );
        if free.is_empty() {
            debug!(snapshot = snapshot.id(), "no range action to optimize");
            return Ok(OptimizationResult {
                evaluation: start.clone(),
                iterations: 0,
                status: LinearOptimizationStatus::NoRangeAction,
            });
        }

        let mnec_floors = self.mnec_floors();
        let loop_flow_bounds = self.loop_flow_bounds();
        let tolerance = self.params.range_actions.convergence_tolerance;

        let mut best = start.clone();
        let mut status = LinearOptimizationStatus::MaxIterationsReached;
        let mut iterations = 0;
        for iteration in 1..=self.params.range_actions.max_iterations {
            iterations = iteration;
            match self.iterate(snapshot, &best, &free, &mnec_floors, &loop_flow_bounds) {
                Ok(None) => {
                    debug!(iteration, "setpoints unchanged, linear optimization converged");
                    status = LinearOptimizationStatus::Converged;
                    break;
                }
                Ok(Some(candidate)) => {
                    let improvement = best.cost() - candidate.cost();
                    debug!(
                        iteration,
                        cost = candidate.cost(),
                        improvement,
                        "linear optimization iteration"
                    );
                    if improvement <= 0.0 {
                        self.restore(snapshot, &free, &best);
                        status = LinearOptimizationStatus::Converged;
                        break;
                    }
                    best = candidate;
                    if improvement <= tolerance {
                        status = LinearOptimizationStatus::Converged;
                        break;
                    }
                }
                Err(e) if iteration == 1 => return Err(e),
                Err(e) => {
                    warn!(iteration, error = %e, "linear optimization stopped, keeping best point");
                    self.restore(snapshot, &free, &best);
                    status = LinearOptimizationStatus::StoppedOnFailure;
                    break;
                }
            }
        }

        Ok(OptimizationResult {
            evaluation: best,
            iterations,
            status,
        })
    }

    fn iterate(
        &self,
        snapshot: &mut NetworkSnapshot,
        best: &EvaluationResult,
        free: &[Arc<RangeAction>],
        mnec_floors: &BTreeMap<CnecId, f64>,
        loop_flow_bounds: &BTreeMap<CnecId, f64>,
    ) -> RaoResult<Option<EvaluationResult>> {
        let perimeter = self.input.computer.perimeter();
        let problem = LinearProblem {
            cnecs: perimeter.flow_cnecs(),
            range_actions: free,
            flows: &best.flows,
            current_setpoints: &best.activation.setpoints,
            initial_setpoints: self.input.computer.initial_setpoints(),
            mnec_floors,
            loop_flow_bounds,
            params: self.params,
        };
        let solution = problem.solve()?;
        debug!(predicted_min_margin = solution.min_margin, "linear problem solved");

        let mut changed = false;
        for ra in free {
            let Some(raw) = solution.setpoints.get(&ra.id) else {
                continue;
            };
            let rounded = round_setpoint(ra, *raw);
            let current = best.activation.setpoint(&ra.id).unwrap_or(rounded);
            if (rounded - current).abs() > SETPOINT_EPSILON {
                changed = true;
            }
            if !ra.apply_setpoint(snapshot, rounded) {
                return Err(RaoError::Simulation(format!(
                    "cannot apply setpoint {rounded} of '{}' on '{}'",
                    ra.id,
                    snapshot.id()
                )));
            }
        }
        if !changed {
            return Ok(None);
        }

        let flows = self.input.computer.compute(snapshot)?;
        let activation = self
            .input
            .computer
            .activation(snapshot, best.activation.network_actions.clone());
        let objective = self.input.objective.evaluate(&flows, &activation);
        Ok(Some(EvaluationResult {
            flows,
            activation,
            objective,
        }))
    }

    /// Put the setpoints of `best` back on the snapshot.
    fn restore(&self, snapshot: &mut NetworkSnapshot, free: &[Arc<RangeAction>], best: &EvaluationResult) {
        for ra in free {
            if let Some(setpoint) = best.activation.setpoint(&ra.id) {
                ra.apply_setpoint(snapshot, setpoint);
            }
        }
    }

    fn mnec_floors(&self) -> BTreeMap<CnecId, f64> {
        let Some(params) = &self.params.mnec else {
            return BTreeMap::new();
        };
        let perimeter = self.input.computer.perimeter();
        let cnecs: Vec<Arc<FlowCnec>> = perimeter.monitored_cnecs().cloned().collect();
        let evaluator = MnecViolationEvaluator::new(
            cnecs.clone(),
            self.input.pre_perimeter_flows,
            self.params.unit(),
            params,
        );
        cnecs
            .iter()
            .map(|c| (c.id.clone(), evaluator.margin_floor(c)))
            .collect()
    }

    fn loop_flow_bounds(&self) -> BTreeMap<CnecId, f64> {
        let Some(params) = &self.params.loop_flow else {
            return BTreeMap::new();
        };
        let perimeter = self.input.computer.perimeter();
        let cnecs: Vec<Arc<FlowCnec>> = perimeter.loop_flow_cnecs().cloned().collect();
        let evaluator =
            LoopFlowViolationEvaluator::new(cnecs.clone(), self.input.pre_perimeter_flows, params);
        cnecs
            .iter()
            .map(|c| (c.id.clone(), evaluator.loop_flow_upper_bound(c)))
            .collect()
    }
}

/// PST angles snap to the closest admissible tap, other setpoints are clamped.
fn round_setpoint(ra: &RangeAction, setpoint: f64) -> f64 {
    if ra.is_pst() {
        ra.closest_tap(setpoint)
            .and_then(|tap| ra.tap_to_angle(tap))
            .unwrap_or(setpoint)
    } else {
        ra.clamp(setpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perimeter::OptimizationPerimeter;
    use crate::sensitivity::LinearSensitivityEngine;
    use rao_core::{RangeActionId, State, Unit};
    use std::collections::BTreeSet;

    fn pst() -> RangeAction {
        let table = (-10..=10).map(|t| (t, t as f64 * 0.5)).collect();
        RangeAction::pst("pst", "FR", "pst-1", table)
    }

    fn setup() -> (SensitivityComputer, ObjectiveFunction, FlowResult, NetworkSnapshot) {
        let root = NetworkSnapshot::new("root").with_tap("pst-1", 0);
        let cnec = FlowCnec::new("c", "FR", "line-1", State::preventive())
            .with_symmetric_threshold(Unit::Megawatt, 100.0);
        let perimeter = Arc::new(
            OptimizationPerimeter::new(
                State::preventive(),
                vec![Arc::new(cnec)],
                vec![],
                vec![Arc::new(pst())],
            )
            .unwrap(),
        );
        // each degree moves 4 MW off the overloaded line
        let engine = Arc::new(
            LinearSensitivityEngine::new(root.clone())
                .with_reference_flow("c", 110.0)
                .with_sensitivity("c", "pst-1", -4.0),
        );
        let params = SearchTreeParameters::default();
        let computer = SensitivityComputer::new(engine, perimeter.clone(), &params, None, &root).unwrap();
        let initial = computer.compute(&root).unwrap();
        let objective = ObjectiveFunction::build(&perimeter, &initial, &params).unwrap();
        (computer, objective, initial, root)
    }

    #[test]
    fn test_round_setpoint() {
        let ra = pst();
        assert_eq!(round_setpoint(&ra, 1.2), 1.0);
        assert_eq!(round_setpoint(&ra, 1.3), 1.5);
        assert_eq!(round_setpoint(&ra, 12.0), 5.0);
        let hvdc = RangeAction::hvdc("h", "FR", "h-1", -10.0, 10.0);
        assert_eq!(round_setpoint(&hvdc, 12.3), 10.0);
    }

    #[test]
    fn test_optimization_relieves_overload() {
        let (computer, objective, initial, root) = setup();
        let params = SearchTreeParameters::default();
        let activation = computer.activation(&root, BTreeSet::new());
        let start = EvaluationResult {
            objective: objective.evaluate(&initial, &activation),
            flows: initial.clone(),
            activation,
        };
        assert_eq!(start.cost(), 10.0);

        let input = IteratingLinearOptimizerInput {
            computer: &computer,
            objective: &objective,
            pre_perimeter_flows: &initial,
        };
        let mut snapshot = root.clone();
        let result = IteratingLinearOptimizer::new(&input, &params)
            .optimize(&mut snapshot, &start, &[])
            .unwrap();

        // flow = 110 - 4·angle is balanced against -100 at angle 52.5, beyond the
        // 5 degree range: the PST goes to its last tap
        assert!(result.cost() < start.cost());
        assert_eq!(result.cost(), -10.0);
        assert_eq!(snapshot.tap("pst-1"), Some(10));
        let id = RangeActionId::from("pst");
        assert_eq!(result.optimized_tap(&id, &State::preventive()), Some(10));
        assert!(result.iterations >= 1);
    }
}
