//! Results produced by leaves.
//!
//! [`EvaluationResult`] is written by leaf evaluation, [`OptimizationResult`]
//! by the iterating linear optimizer. Both are exposed to callers through the
//! read-only [`PerimeterResult`] trait.

use crate::objective::ObjectiveFunctionResult;
use crate::sensitivity::{ComputationStatus, FlowResult};
use rao_core::{CnecId, NetworkActionId, RangeActionId, State};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Setpoints closer than this to their initial value count as not activated.
pub const SETPOINT_EPSILON: f64 = 1e-6;

/// Remedial actions applied on a leaf's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemedialActionActivation {
    pub state: State,
    pub network_actions: BTreeSet<NetworkActionId>,
    /// Current setpoint of every range action of the perimeter
    pub setpoints: BTreeMap<RangeActionId, f64>,
    /// Current tap of every PST range action
    pub taps: BTreeMap<RangeActionId, i32>,
    /// Setpoints before any remedial action of the perimeter
    pub initial_setpoints: BTreeMap<RangeActionId, f64>,
}

impl RemedialActionActivation {
    pub fn setpoint(&self, id: &RangeActionId) -> Option<f64> {
        self.setpoints.get(id).copied()
    }

    pub fn tap(&self, id: &RangeActionId) -> Option<i32> {
        self.taps.get(id).copied()
    }

    /// Range actions moved away from their initial setpoint.
    pub fn activated_range_actions(&self) -> BTreeSet<RangeActionId> {
        self.setpoints
            .iter()
            .filter(|(id, setpoint)| {
                self.initial_setpoints
                    .get(*id)
                    .map_or(true, |initial| (*setpoint - initial).abs() > SETPOINT_EPSILON)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub flows: FlowResult,
    pub activation: RemedialActionActivation,
    pub objective: ObjectiveFunctionResult,
}

/// How the iterating linear optimizer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearOptimizationStatus {
    /// No range action was free to move
    NoRangeAction,
    /// Setpoints or cost stopped improving
    Converged,
    MaxIterationsReached,
    /// A solve or simulation failed after the first iteration; the best result is kept
    StoppedOnFailure,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub evaluation: EvaluationResult,
    pub iterations: usize,
    pub status: LinearOptimizationStatus,
}

/// Read-only view over the result of one perimeter optimization.
pub trait PerimeterResult {
    fn evaluation(&self) -> &EvaluationResult;

    fn functional_cost(&self) -> f64 {
        self.evaluation().objective.functional_cost
    }

    fn virtual_cost(&self) -> f64 {
        self.evaluation().objective.virtual_cost()
    }

    fn virtual_cost_by_name(&self, name: &str) -> f64 {
        self.evaluation().objective.virtual_cost_by_name(name)
    }

    fn virtual_cost_names(&self) -> Vec<String> {
        self.evaluation().objective.virtual_costs.keys().cloned().collect()
    }

    fn cost(&self) -> f64 {
        self.functional_cost() + self.virtual_cost()
    }

    fn most_limiting_elements(&self, n: usize) -> Vec<CnecId> {
        self.evaluation()
            .objective
            .most_limiting_elements
            .iter()
            .take(n)
            .cloned()
            .collect()
    }

    fn costly_elements(&self, name: &str, n: usize) -> Vec<CnecId> {
        self.evaluation()
            .objective
            .costly_elements
            .get(name)
            .map(|elements| elements.iter().take(n).cloned().collect())
            .unwrap_or_default()
    }

    fn optimized_setpoint(&self, action: &RangeActionId, state: &State) -> Option<f64> {
        let activation = &self.evaluation().activation;
        (&activation.state == state)
            .then(|| activation.setpoint(action))
            .flatten()
    }

    fn optimized_tap(&self, action: &RangeActionId, state: &State) -> Option<i32> {
        let activation = &self.evaluation().activation;
        (&activation.state == state)
            .then(|| activation.tap(action))
            .flatten()
    }

    fn activated_network_actions(&self) -> &BTreeSet<NetworkActionId> {
        &self.evaluation().activation.network_actions
    }

    fn activated_range_actions(&self) -> BTreeSet<RangeActionId> {
        self.evaluation().activation.activated_range_actions()
    }

    fn sensitivity_status(&self) -> ComputationStatus {
        self.evaluation().flows.status()
    }

    fn flow_result(&self) -> &FlowResult {
        &self.evaluation().flows
    }
}

impl PerimeterResult for EvaluationResult {
    fn evaluation(&self) -> &EvaluationResult {
        self
    }
}

impl PerimeterResult for OptimizationResult {
    fn evaluation(&self) -> &EvaluationResult {
        &self.evaluation
    }
}
