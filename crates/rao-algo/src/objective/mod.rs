//! Objective function and cost evaluators.
//!
//! The cost of a leaf is a functional cost (the negated worst margin) plus
//! named virtual costs that penalise soft-constraint violations. Each term
//! is produced by a [`CostEvaluator`]; [`ObjectiveFunction`] composes them.
//!
//! | Virtual cost | Evaluator |
//! |---|---|
//! | `mnec-cost` | [`MnecViolationEvaluator`] |
//! | `loop-flow-cost` | [`LoopFlowViolationEvaluator`] |
//! | `sensitivity-failure-cost` | [`SensitivityFailureEvaluator`] |
//! | `usage-limit-cost` | [`UsageLimitEvaluator`] |

mod margin;
mod virtual_cost;

pub use margin::MinMarginEvaluator;
pub use virtual_cost::{
    LoopFlowViolationEvaluator, MnecViolationEvaluator, SensitivityFailureEvaluator,
    UsageLimitEvaluator,
};

use crate::parameters::{ObjectiveFunctionType, SearchTreeParameters};
use crate::perimeter::OptimizationPerimeter;
use crate::result::RemedialActionActivation;
use crate::sensitivity::FlowResult;
use rao_core::{CnecId, RaoError, RaoResult, Unit};
use serde::Serialize;
use std::collections::BTreeMap;

pub const MNEC_COST: &str = "mnec-cost";
pub const LOOP_FLOW_COST: &str = "loop-flow-cost";
pub const SENSITIVITY_FAILURE_COST: &str = "sensitivity-failure-cost";
pub const USAGE_LIMIT_COST: &str = "usage-limit-cost";

/// Virtual costs below this are treated as zero.
pub const VIRTUAL_COST_EPSILON: f64 = 1e-6;

/// One term of the objective function.
pub trait CostEvaluator: Send + Sync {
    fn name(&self) -> &str;

    fn unit(&self) -> Unit;

    /// Cost and the elements responsible for it, worst first.
    fn compute_cost_and_limiting_elements(
        &self,
        flows: &FlowResult,
        activation: &RemedialActionActivation,
    ) -> (f64, Vec<CnecId>);
}

/// Costs of one leaf.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectiveFunctionResult {
    pub functional_cost: f64,
    pub virtual_costs: BTreeMap<String, f64>,
    /// Optimized CNECs sorted by increasing margin
    pub most_limiting_elements: Vec<CnecId>,
    /// Elements responsible for each virtual cost, worst first
    pub costly_elements: BTreeMap<String, Vec<CnecId>>,
}

impl ObjectiveFunctionResult {
    pub fn virtual_cost(&self) -> f64 {
        self.virtual_costs.values().sum()
    }

    pub fn virtual_cost_by_name(&self, name: &str) -> f64 {
        self.virtual_costs.get(name).copied().unwrap_or(0.0)
    }

    pub fn cost(&self) -> f64 {
        self.functional_cost + self.virtual_cost()
    }
}

/// Functional evaluator plus any number of virtual evaluators.
pub struct ObjectiveFunction {
    functional: Option<Box<dyn CostEvaluator>>,
    virtual_evaluators: Vec<Box<dyn CostEvaluator>>,
}

impl ObjectiveFunction {
    pub fn new(
        functional: Option<Box<dyn CostEvaluator>>,
        virtual_evaluators: Vec<Box<dyn CostEvaluator>>,
    ) -> Self {
        Self {
            functional,
            virtual_evaluators,
        }
    }

    /// Objective configured by `params` for `perimeter`.
    ///
    /// `initial_flows` are the flows before any remedial action of the
    /// perimeter; MNEC and loop-flow tolerances are relative to them.
    pub fn build(
        perimeter: &OptimizationPerimeter,
        initial_flows: &FlowResult,
        params: &SearchTreeParameters,
    ) -> RaoResult<Self> {
        let unit = params.unit();
        let optimized = perimeter.optimized_cnecs().cloned().collect();
        let functional: Option<Box<dyn CostEvaluator>> = match params.objective_function.objective_type {
            ObjectiveFunctionType::MaxMinMargin => {
                Some(Box::new(MinMarginEvaluator::new(optimized, unit)))
            }
            ObjectiveFunctionType::MaxMinRelativeMargin => {
                if params.relative_margins.is_none() {
                    return Err(RaoError::Config(
                        "relative margins require PTDF boundaries".into(),
                    ));
                }
                Some(Box::new(MinMarginEvaluator::relative(optimized, unit)))
            }
            ObjectiveFunctionType::VirtualCostsOnly => None,
        };
        let virtual_evaluators = Self::virtual_evaluators(perimeter, initial_flows, params)?;
        Ok(Self::new(functional, virtual_evaluators))
    }

    fn virtual_evaluators(
        perimeter: &OptimizationPerimeter,
        initial_flows: &FlowResult,
        params: &SearchTreeParameters,
    ) -> RaoResult<Vec<Box<dyn CostEvaluator>>> {
        let unit = params.unit();
        let mut evaluators: Vec<Box<dyn CostEvaluator>> = Vec::new();

        if let Some(mnec) = &params.mnec {
            let cnecs = perimeter.monitored_cnecs().cloned().collect();
            evaluators.push(Box::new(MnecViolationEvaluator::new(
                cnecs,
                initial_flows,
                unit,
                mnec,
            )));
        }

        if let Some(loop_flow) = &params.loop_flow {
            if !initial_flows.has_commercial_flows() {
                return Err(RaoError::Config(
                    "loop-flow costs require a reference program".into(),
                ));
            }
            let cnecs = perimeter.loop_flow_cnecs().cloned().collect();
            evaluators.push(Box::new(LoopFlowViolationEvaluator::new(
                cnecs,
                initial_flows,
                loop_flow,
            )));
        }

        evaluators.push(Box::new(SensitivityFailureEvaluator::new(
            unit,
            params.objective_function.sensitivity_fallback_over_cost,
            params.objective_function.sensitivity_failure_over_cost,
        )));

        if !params.usage_limits.is_unlimited() {
            evaluators.push(Box::new(UsageLimitEvaluator::new(
                perimeter,
                params.usage_limits.clone(),
                unit,
                params.objective_function.usage_limit_violation_cost,
            )));
        }
        Ok(evaluators)
    }

    pub fn is_purely_virtual(&self) -> bool {
        self.functional.is_none()
    }

    pub fn virtual_cost_names(&self) -> Vec<&str> {
        self.virtual_evaluators.iter().map(|e| e.name()).collect()
    }

    pub fn evaluate(
        &self,
        flows: &FlowResult,
        activation: &RemedialActionActivation,
    ) -> ObjectiveFunctionResult {
        let mut result = ObjectiveFunctionResult::default();
        if let Some(functional) = &self.functional {
            let (cost, limiting) = functional.compute_cost_and_limiting_elements(flows, activation);
            result.functional_cost = cost;
            result.most_limiting_elements = limiting;
        }
        for evaluator in &self.virtual_evaluators {
            let (cost, costly) = evaluator.compute_cost_and_limiting_elements(flows, activation);
            result.virtual_costs.insert(evaluator.name().to_string(), cost);
            result.costly_elements.insert(evaluator.name().to_string(), costly);
        }
        result
    }
}

impl std::fmt::Debug for ObjectiveFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectiveFunction")
            .field("functional", &self.functional.as_ref().map(|e| e.name().to_string()))
            .field("virtual", &self.virtual_cost_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{LoopFlowParameters, MnecParameters};
    use crate::sensitivity::SensitivityValues;
    use rao_core::{FlowCnec, State};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    fn perimeter() -> OptimizationPerimeter {
        let optimized = FlowCnec::new("opt", "FR", "line-1", State::preventive())
            .with_symmetric_threshold(Unit::Megawatt, 100.0);
        let mnec = FlowCnec::new("mnec", "BE", "line-5", State::preventive())
            .with_symmetric_threshold(Unit::Megawatt, 100.0)
            .monitored_only();
        OptimizationPerimeter::new(
            State::preventive(),
            vec![Arc::new(optimized), Arc::new(mnec)],
            vec![],
            vec![],
        )
        .unwrap()
    }

    fn flows(opt: f64, mnec: f64) -> FlowResult {
        let mut values = SensitivityValues::default();
        values.flows_mw.insert("opt".into(), opt);
        values.flows_mw.insert("mnec".into(), mnec);
        FlowResult::new(values, HashMap::new(), None)
    }

    fn activation() -> RemedialActionActivation {
        RemedialActionActivation {
            state: State::preventive(),
            network_actions: BTreeSet::new(),
            setpoints: BTreeMap::new(),
            taps: BTreeMap::new(),
            initial_setpoints: BTreeMap::new(),
        }
    }

    #[test]
    fn test_total_cost_is_functional_plus_virtual() {
        let mut params = SearchTreeParameters::default();
        params.mnec = Some(MnecParameters {
            acceptable_margin_decrease: 10.0,
            violation_cost: 2.0,
        });
        let initial = flows(90.0, 95.0);
        let objective = ObjectiveFunction::build(&perimeter(), &initial, &params).unwrap();
        assert!(!objective.is_purely_virtual());
        assert_eq!(objective.virtual_cost_names(), vec![MNEC_COST, SENSITIVITY_FAILURE_COST]);

        // opt margin 5, mnec margin -10 against a floor of min(0, 5 - 10) = -5
        let result = objective.evaluate(&flows(95.0, 110.0), &activation());
        assert_eq!(result.functional_cost, -5.0);
        assert_eq!(result.virtual_cost_by_name(MNEC_COST), 10.0);
        assert_eq!(result.cost(), 5.0);
        assert_eq!(result.costly_elements[MNEC_COST], vec![CnecId::from("mnec")]);
    }

    #[test]
    fn test_purely_virtual_objective() {
        let mut params = SearchTreeParameters::default();
        params.objective_function.objective_type = ObjectiveFunctionType::VirtualCostsOnly;
        let initial = flows(90.0, 95.0);
        let objective = ObjectiveFunction::build(&perimeter(), &initial, &params).unwrap();
        assert!(objective.is_purely_virtual());
        let result = objective.evaluate(&flows(150.0, 0.0), &activation());
        assert_eq!(result.functional_cost, 0.0);
        assert_eq!(result.cost(), 0.0);
        assert!(result.most_limiting_elements.is_empty());
    }

    #[test]
    fn test_loop_flow_without_commercial_flows_is_a_config_error() {
        let mut params = SearchTreeParameters::default();
        params.loop_flow = Some(LoopFlowParameters::default());
        let err = ObjectiveFunction::build(&perimeter(), &flows(0.0, 0.0), &params).unwrap_err();
        assert!(matches!(err, RaoError::Config(_)));
    }
}
