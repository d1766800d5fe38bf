//! Linearised range-action problem.
//!
//! Flows are linearised around the current setpoints:
//! `flow(c) = flow₀(c) + Σ_r sensitivity(c, r) · (setpoint_r - setpoint₀_r)`.
//!
//! ```text
//! maximise   min_margin - Σ penalty_r · |setpoint_r - initial_r|
//!                       - mnec_cost · Σ v_mnec - loop_flow_cost · Σ v_lf
//! subject to min_margin <= k_c · (upper_c - flow(c))        optimized CNECs
//!            min_margin <= k_c · (flow(c) - lower_c)
//!            k_c · (upper_c - flow(c)) >= floor_c - v_c       MNECs
//!            |flow(c) - commercial(c)| <= bound_c + v_c      loop-flow CNECs
//!            setpoint_r = setpoint_g                         aligned actions
//! ```
//!
//! `k_c` converts MW into the objective unit and, for relative margins on a
//! secure network, divides by the CNEC's PTDF zonal sum.

use crate::parameters::SearchTreeParameters;
use crate::sensitivity::FlowResult;
use good_lp::solvers::clarabel::clarabel;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};
use rao_core::{CnecId, FlowCnec, RangeAction, RangeActionId, RaoError, RaoResult, Unit};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Bound on the min-margin variable, keeps the problem bounded without optimized CNECs.
const MAX_MARGIN: f64 = 1e5;

pub(crate) struct LinearProblem<'a> {
    pub cnecs: &'a [Arc<FlowCnec>],
    /// Range actions free to move
    pub range_actions: &'a [Arc<RangeAction>],
    /// Flows at `current_setpoints`
    pub flows: &'a FlowResult,
    pub current_setpoints: &'a BTreeMap<RangeActionId, f64>,
    pub initial_setpoints: &'a BTreeMap<RangeActionId, f64>,
    /// Lowest admissible margin of each MNEC, in the objective unit
    pub mnec_floors: &'a BTreeMap<CnecId, f64>,
    /// Largest admissible absolute loop flow of each loop-flow CNEC (MW)
    pub loop_flow_bounds: &'a BTreeMap<CnecId, f64>,
    pub params: &'a SearchTreeParameters,
}

#[derive(Debug, Clone)]
pub(crate) struct LinearSolution {
    pub setpoints: BTreeMap<RangeActionId, f64>,
    pub min_margin: f64,
}

impl LinearProblem<'_> {
    fn current(&self, ra: &RangeAction) -> f64 {
        self.current_setpoints
            .get(&ra.id)
            .copied()
            .unwrap_or_else(|| ra.clamp(0.0))
    }

    fn flow_expression(&self, cnec: &FlowCnec, setpoint_vars: &BTreeMap<RangeActionId, Variable>) -> Expression {
        let threshold = self.params.range_actions.sensitivity_threshold;
        let mut constant = self.flows.flow(cnec, Unit::Megawatt);
        let mut expr = Expression::from(0.0);
        for ra in self.range_actions {
            let s = self.flows.sensitivity(cnec, &ra.id, Unit::Megawatt);
            if s.abs() < threshold {
                continue;
            }
            if let Some(var) = setpoint_vars.get(&ra.id) {
                constant -= s * self.current(ra);
                expr += s * *var;
            }
        }
        expr + constant
    }

    /// Whether relative margins apply at the current point.
    fn use_relative(&self, unit: Unit) -> bool {
        self.params.is_relative()
            && self
                .cnecs
                .iter()
                .filter(|c| c.optimized)
                .all(|c| self.flows.margin(c, unit) >= 0.0)
    }

    pub fn solve(&self) -> RaoResult<LinearSolution> {
        let unit = self.params.unit();
        let ra_params = &self.params.range_actions;
        let relative = self.use_relative(unit);

        let mut vars = variables!();
        let min_margin = vars.add(variable().min(-MAX_MARGIN).max(MAX_MARGIN));

        let mut setpoint_vars: BTreeMap<RangeActionId, Variable> = BTreeMap::new();
        let mut variation_vars: Vec<(RangeActionId, Variable)> = Vec::new();
        let mut objective = Expression::from(0.0) - min_margin;
        for ra in self.range_actions {
            let setpoint = vars.add(variable().min(ra.min_setpoint).max(ra.max_setpoint));
            let variation = vars.add(variable().min(0.0));
            objective += ra_params.penalty_cost(ra.kind_name()) * variation;
            setpoint_vars.insert(ra.id.clone(), setpoint);
            variation_vars.push((ra.id.clone(), variation));
        }

        let mut mnec_vars: Vec<(&Arc<FlowCnec>, f64, Variable)> = Vec::new();
        if let Some(mnec) = &self.params.mnec {
            for cnec in self.cnecs.iter().filter(|c| c.monitored) {
                if let Some(floor) = self.mnec_floors.get(&cnec.id) {
                    let v = vars.add(variable().min(0.0));
                    objective += mnec.violation_cost * v;
                    mnec_vars.push((cnec, *floor, v));
                }
            }
        }

        let mut loop_flow_vars: Vec<(&Arc<FlowCnec>, f64, f64, Variable)> = Vec::new();
        if let Some(loop_flow) = &self.params.loop_flow {
            for cnec in self.cnecs {
                let (Some(bound), Some(commercial)) =
                    (self.loop_flow_bounds.get(&cnec.id), self.flows.commercial_flow(cnec))
                else {
                    continue;
                };
                let v = vars.add(variable().min(0.0));
                objective += loop_flow.violation_cost * v;
                loop_flow_vars.push((cnec, *bound, commercial, v));
            }
        }

        let mut model = vars.minimise(objective).using(clarabel);

        // |setpoint - initial| through two one-sided constraints
        for (id, variation) in &variation_vars {
            if let (Some(setpoint), Some(initial)) = (setpoint_vars.get(id), self.initial_setpoints.get(id)) {
                model = model.with(constraint!(*variation >= *setpoint - *initial));
                model = model.with(constraint!(*variation + *setpoint >= *initial));
            }
        }

        let mut group_leaders: BTreeMap<&str, Variable> = BTreeMap::new();
        for ra in self.range_actions {
            let (Some(group), Some(setpoint)) = (ra.group_id.as_deref(), setpoint_vars.get(&ra.id)) else {
                continue;
            };
            if let Some(leader) = group_leaders.get(group).copied() {
                model = model.with(constraint!(*setpoint == leader));
            } else {
                group_leaders.insert(group, *setpoint);
            }
        }

        for cnec in self.cnecs.iter().filter(|c| c.optimized) {
            let mut k = cnec.unit_factor(unit);
            if relative {
                k /= self.flows.ptdf_zonal_sum(cnec);
            }
            let flow = self.flow_expression(cnec, &setpoint_vars);
            if let Some(upper) = cnec.upper_bound(Unit::Megawatt) {
                model = model.with(constraint!(min_margin + flow.clone() * k <= k * upper));
            }
            if let Some(lower) = cnec.lower_bound(Unit::Megawatt) {
                model = model.with(constraint!(min_margin - flow * k <= -k * lower));
            }
        }

        for (cnec, floor, v) in &mnec_vars {
            let k = cnec.unit_factor(unit);
            let flow = self.flow_expression(cnec, &setpoint_vars);
            if let Some(upper) = cnec.upper_bound(Unit::Megawatt) {
                model = model.with(constraint!(flow.clone() * k - *v <= k * upper - floor));
            }
            if let Some(lower) = cnec.lower_bound(Unit::Megawatt) {
                model = model.with(constraint!(flow * k + *v >= floor + k * lower));
            }
        }

        for (cnec, bound, commercial, v) in &loop_flow_vars {
            let flow = self.flow_expression(cnec, &setpoint_vars);
            model = model.with(constraint!(flow.clone() - *v <= bound + commercial));
            model = model.with(constraint!(flow + *v >= commercial - bound));
        }

        let solution = model
            .solve()
            .map_err(|e| RaoError::Solver(format!("linear problem failed: {:?}", e)))?;

        let setpoints = self
            .range_actions
            .iter()
            .filter_map(|ra| {
                setpoint_vars
                    .get(&ra.id)
                    .map(|var| (ra.id.clone(), ra.clamp(solution.value(*var))))
            })
            .collect();
        Ok(LinearSolution {
            setpoints,
            min_margin: solution.value(min_margin),
        })
    }
}
