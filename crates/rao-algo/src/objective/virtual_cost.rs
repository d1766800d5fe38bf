use super::{
    CostEvaluator, LOOP_FLOW_COST, MNEC_COST, SENSITIVITY_FAILURE_COST, USAGE_LIMIT_COST,
};
use crate::parameters::{LoopFlowParameters, MnecParameters};
use crate::perimeter::OptimizationPerimeter;
use crate::result::RemedialActionActivation;
use crate::sensitivity::{ComputationStatus, FlowResult};
use rao_core::{
    CnecId, FlowCnec, NetworkAction, NetworkActionId, RaUsageLimits, RangeAction, RangeActionId,
    Unit, UsageTally,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sort `(excess, id)` pairs worst first and keep the violating ids.
fn costly(mut excesses: Vec<(f64, CnecId)>) -> Vec<CnecId> {
    excesses.retain(|(excess, _)| *excess > 0.0);
    excesses.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    excesses.into_iter().map(|(_, id)| id).collect()
}

/// Penalises MNECs whose margin drops below
/// `min(0, initial margin - acceptable decrease)`.
pub struct MnecViolationEvaluator {
    cnecs: Vec<Arc<FlowCnec>>,
    initial_margins: BTreeMap<CnecId, f64>,
    unit: Unit,
    acceptable_margin_decrease: f64,
    violation_cost: f64,
}

impl MnecViolationEvaluator {
    pub fn new(
        cnecs: Vec<Arc<FlowCnec>>,
        initial_flows: &FlowResult,
        unit: Unit,
        params: &MnecParameters,
    ) -> Self {
        let initial_margins = cnecs
            .iter()
            .map(|c| (c.id.clone(), initial_flows.margin(c, unit)))
            .collect();
        Self {
            cnecs,
            initial_margins,
            unit,
            acceptable_margin_decrease: params.acceptable_margin_decrease,
            violation_cost: params.violation_cost,
        }
    }

    /// Lowest margin `cnec` may reach without violation, in the evaluator unit.
    pub fn margin_floor(&self, cnec: &FlowCnec) -> f64 {
        let initial = self.initial_margins.get(&cnec.id).copied().unwrap_or(f64::INFINITY);
        let decrease = self.acceptable_margin_decrease * cnec.unit_factor(self.unit);
        (initial - decrease).min(0.0)
    }
}

impl CostEvaluator for MnecViolationEvaluator {
    fn name(&self) -> &str {
        MNEC_COST
    }

    fn unit(&self) -> Unit {
        self.unit
    }

    fn compute_cost_and_limiting_elements(
        &self,
        flows: &FlowResult,
        _activation: &RemedialActionActivation,
    ) -> (f64, Vec<CnecId>) {
        let excesses: Vec<(f64, CnecId)> = self
            .cnecs
            .iter()
            .map(|c| {
                let excess = (self.margin_floor(c) - flows.margin(c, self.unit)).max(0.0);
                (excess, c.id.clone())
            })
            .collect();
        let total: f64 = excesses.iter().map(|(e, _)| e).sum();
        (self.violation_cost * total, costly(excesses))
    }
}

/// Penalises loop flows above `max(threshold, |initial loop flow| + acceptable increase)`.
pub struct LoopFlowViolationEvaluator {
    cnecs: Vec<Arc<FlowCnec>>,
    initial_loop_flows: BTreeMap<CnecId, f64>,
    acceptable_increase: f64,
    violation_cost: f64,
}

impl LoopFlowViolationEvaluator {
    pub fn new(cnecs: Vec<Arc<FlowCnec>>, initial_flows: &FlowResult, params: &LoopFlowParameters) -> Self {
        let initial_loop_flows = cnecs
            .iter()
            .map(|c| (c.id.clone(), initial_flows.loop_flow(c).unwrap_or(0.0)))
            .collect();
        Self {
            cnecs,
            initial_loop_flows,
            acceptable_increase: params.acceptable_increase,
            violation_cost: params.violation_cost,
        }
    }

    /// Largest loop flow (MW, absolute) allowed on `cnec`.
    pub fn loop_flow_upper_bound(&self, cnec: &FlowCnec) -> f64 {
        let threshold = cnec.loop_flow_threshold.unwrap_or(f64::INFINITY);
        let initial = self.initial_loop_flows.get(&cnec.id).copied().unwrap_or(0.0);
        threshold.max(initial.abs() + self.acceptable_increase)
    }
}

impl CostEvaluator for LoopFlowViolationEvaluator {
    fn name(&self) -> &str {
        LOOP_FLOW_COST
    }

    fn unit(&self) -> Unit {
        Unit::Megawatt
    }

    fn compute_cost_and_limiting_elements(
        &self,
        flows: &FlowResult,
        _activation: &RemedialActionActivation,
    ) -> (f64, Vec<CnecId>) {
        let excesses: Vec<(f64, CnecId)> = self
            .cnecs
            .iter()
            .map(|c| {
                let loop_flow = flows.loop_flow(c).unwrap_or(0.0);
                let excess = (loop_flow.abs() - self.loop_flow_upper_bound(c)).max(0.0);
                (excess, c.id.clone())
            })
            .collect();
        let total: f64 = excesses.iter().map(|(e, _)| e).sum();
        (self.violation_cost * total, costly(excesses))
    }
}

/// Overcost for degraded or partially failed sensitivity computations.
pub struct SensitivityFailureEvaluator {
    unit: Unit,
    fallback_over_cost: f64,
    failure_over_cost: f64,
}

impl SensitivityFailureEvaluator {
    pub fn new(unit: Unit, fallback_over_cost: f64, failure_over_cost: f64) -> Self {
        Self {
            unit,
            fallback_over_cost,
            failure_over_cost,
        }
    }
}

impl CostEvaluator for SensitivityFailureEvaluator {
    fn name(&self) -> &str {
        SENSITIVITY_FAILURE_COST
    }

    fn unit(&self) -> Unit {
        self.unit
    }

    fn compute_cost_and_limiting_elements(
        &self,
        flows: &FlowResult,
        _activation: &RemedialActionActivation,
    ) -> (f64, Vec<CnecId>) {
        let cost = match flows.status() {
            ComputationStatus::Default => 0.0,
            ComputationStatus::Fallback => self.fallback_over_cost,
            ComputationStatus::Failure => self.failure_over_cost,
        };
        (cost, Vec::new())
    }
}

/// Penalises activations exceeding the usage limits of the perimeter instant.
pub struct UsageLimitEvaluator {
    network_actions: BTreeMap<NetworkActionId, Arc<NetworkAction>>,
    range_actions: BTreeMap<RangeActionId, Arc<RangeAction>>,
    limits: RaUsageLimits,
    unit: Unit,
    violation_cost: f64,
}

impl UsageLimitEvaluator {
    pub fn new(
        perimeter: &OptimizationPerimeter,
        limits: RaUsageLimits,
        unit: Unit,
        violation_cost: f64,
    ) -> Self {
        Self {
            network_actions: perimeter
                .network_actions()
                .iter()
                .map(|na| (na.id.clone(), na.clone()))
                .collect(),
            range_actions: perimeter
                .range_actions()
                .iter()
                .map(|ra| (ra.id.clone(), ra.clone()))
                .collect(),
            limits,
            unit,
            violation_cost,
        }
    }

    pub fn tally(&self, activation: &RemedialActionActivation) -> UsageTally {
        let mut tally = UsageTally::new();
        for id in &activation.network_actions {
            if let Some(na) = self.network_actions.get(id) {
                tally.add_network_action(na);
            }
        }
        for id in activation.activated_range_actions() {
            if let Some(ra) = self.range_actions.get(&id) {
                tally.add_range_action(ra);
            }
        }
        tally
    }
}

impl CostEvaluator for UsageLimitEvaluator {
    fn name(&self) -> &str {
        USAGE_LIMIT_COST
    }

    fn unit(&self) -> Unit {
        self.unit
    }

    fn compute_cost_and_limiting_elements(
        &self,
        _flows: &FlowResult,
        activation: &RemedialActionActivation,
    ) -> (f64, Vec<CnecId>) {
        let excess = self.tally(activation).excess(&self.limits);
        (self.violation_cost * excess as f64, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitivity::SensitivityValues;
    use rao_core::{ActionType, ElementaryAction, State};
    use std::collections::HashMap;

    fn activation(network_actions: &[&str]) -> RemedialActionActivation {
        RemedialActionActivation {
            state: State::preventive(),
            network_actions: network_actions.iter().map(|id| NetworkActionId::from(*id)).collect(),
            setpoints: BTreeMap::new(),
            taps: BTreeMap::new(),
            initial_setpoints: BTreeMap::new(),
        }
    }

    fn loop_flow_cnec() -> Arc<FlowCnec> {
        Arc::new(
            FlowCnec::new("lf", "FR", "line-1", State::preventive())
                .with_symmetric_threshold(Unit::Megawatt, 1000.0)
                .with_loop_flow_threshold(50.0),
        )
    }

    fn loop_flows(flow: f64, commercial: f64) -> FlowResult {
        let mut values = SensitivityValues::default();
        values.flows_mw.insert("lf".into(), flow);
        FlowResult::new(
            values,
            HashMap::new(),
            Some(HashMap::from([(CnecId::from("lf"), commercial)])),
        )
    }

    #[test]
    fn test_loop_flow_bound_uses_initial_loop_flow() {
        let params = LoopFlowParameters {
            acceptable_increase: 10.0,
            violation_cost: 1.0,
        };
        // initial loop flow 70 exceeds the threshold, so the bound becomes 80
        let evaluator = LoopFlowViolationEvaluator::new(vec![loop_flow_cnec()], &loop_flows(100.0, 30.0), &params);
        assert_eq!(evaluator.loop_flow_upper_bound(&loop_flow_cnec()), 80.0);
        let (cost, costly) =
            evaluator.compute_cost_and_limiting_elements(&loop_flows(120.0, 30.0), &activation(&[]));
        assert_eq!(cost, 10.0);
        assert_eq!(costly, vec![CnecId::from("lf")]);
        let (cost, costly) =
            evaluator.compute_cost_and_limiting_elements(&loop_flows(100.0, 30.0), &activation(&[]));
        assert_eq!(cost, 0.0);
        assert!(costly.is_empty());
    }

    #[test]
    fn test_sensitivity_failure_overcost() {
        let evaluator = SensitivityFailureEvaluator::new(Unit::Megawatt, 5.0, 10_000.0);
        let mut values = SensitivityValues::default();
        values.status = ComputationStatus::Fallback;
        let flows = FlowResult::new(values, HashMap::new(), None);
        assert_eq!(evaluator.compute_cost_and_limiting_elements(&flows, &activation(&[])).0, 5.0);
        let (cost, _) = evaluator.compute_cost_and_limiting_elements(&FlowResult::default(), &activation(&[]));
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_usage_limit_violation() {
        let topo = |id: &str| {
            Arc::new(NetworkAction::new(
                id,
                "FR",
                vec![ElementaryAction::Topology {
                    element: format!("{id}-line"),
                    action: ActionType::Open,
                }],
            ))
        };
        let perimeter =
            OptimizationPerimeter::new(State::preventive(), vec![], vec![topo("a"), topo("b")], vec![])
                .unwrap();
        let limits = RaUsageLimits {
            max_ra: Some(1),
            ..RaUsageLimits::default()
        };
        let evaluator = UsageLimitEvaluator::new(&perimeter, limits, Unit::Megawatt, 100.0);
        let flows = FlowResult::default();
        assert_eq!(evaluator.compute_cost_and_limiting_elements(&flows, &activation(&["a"])).0, 0.0);
        assert_eq!(
            evaluator.compute_cost_and_limiting_elements(&flows, &activation(&["a", "b"])).0,
            100.0
        );
    }
}
