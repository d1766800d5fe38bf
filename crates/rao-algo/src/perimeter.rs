//! Optimization perimeter: the slice of the catalog one search tree works on.
//!
//! A perimeter has a main state (where remedial actions are applied) and the
//! CNECs whose flows it must secure. Preventive perimeters also cover the
//! outage states, since preventive actions act on them too.

use rao_core::{
    CnecId, Crac, FlowCnec, Instant, NetworkAction, NetworkActionId, RangeAction, RangeActionId,
    RaoError, RaoResult, State, UsageRule,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct OptimizationPerimeter {
    main_state: State,
    flow_cnecs: Vec<Arc<FlowCnec>>,
    network_actions: Vec<Arc<NetworkAction>>,
    range_actions: Vec<Arc<RangeAction>>,
    cnec_index: BTreeMap<CnecId, usize>,
}

impl OptimizationPerimeter {
    pub fn new(
        main_state: State,
        flow_cnecs: Vec<Arc<FlowCnec>>,
        network_actions: Vec<Arc<NetworkAction>>,
        range_actions: Vec<Arc<RangeAction>>,
    ) -> RaoResult<Self> {
        if !main_state.instant().is_optimizable() {
            return Err(RaoError::Config(format!(
                "cannot optimize remedial actions on state '{}'",
                main_state
            )));
        }
        let cnec_index = flow_cnecs
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Ok(Self {
            main_state,
            flow_cnecs,
            network_actions,
            range_actions,
            cnec_index,
        })
    }

    /// Preventive perimeter: preventive and outage CNECs, preventive actions.
    pub fn preventive(crac: &Crac) -> RaoResult<Self> {
        let state = State::preventive();
        let cnecs = crac
            .flow_cnecs()
            .iter()
            .filter(|c| matches!(c.state.instant(), Instant::Preventive | Instant::Outage))
            .cloned()
            .collect();
        Self::from_crac(crac, state, cnecs)
    }

    /// Curative perimeter of one contingency.
    pub fn curative(crac: &Crac, contingency: &str) -> RaoResult<Self> {
        if crac.contingency(contingency).is_none() {
            return Err(RaoError::Validation(format!(
                "unknown contingency '{contingency}'"
            )));
        }
        let state = State::post_contingency(contingency, Instant::Curative);
        let cnecs = crac.flow_cnecs_for_state(&state).cloned().collect();
        Self::from_crac(crac, state, cnecs)
    }

    fn from_crac(crac: &Crac, state: State, cnecs: Vec<Arc<FlowCnec>>) -> RaoResult<Self> {
        let cnec_ids: BTreeSet<&CnecId> = cnecs.iter().map(|c| &c.id).collect();
        // on-flow-constraint actions are kept when they watch a CNEC of the perimeter
        let network_actions = crac
            .network_actions()
            .iter()
            .filter(|na| {
                na.is_available_on(&state)
                    || na.usage_rules.iter().any(|rule| {
                        matches!(rule, UsageRule::OnFlowConstraint { cnec, .. } if cnec_ids.contains(cnec))
                    })
            })
            .cloned()
            .collect();
        let range_actions = crac
            .range_actions()
            .iter()
            .filter(|ra| ra.is_available_on(&state))
            .cloned()
            .collect();
        Self::new(state, cnecs, network_actions, range_actions)
    }

    pub fn main_state(&self) -> &State {
        &self.main_state
    }

    pub fn flow_cnecs(&self) -> &[Arc<FlowCnec>] {
        &self.flow_cnecs
    }

    pub fn flow_cnec(&self, id: &CnecId) -> Option<&Arc<FlowCnec>> {
        self.cnec_index.get(id).map(|i| &self.flow_cnecs[*i])
    }

    pub fn optimized_cnecs(&self) -> impl Iterator<Item = &Arc<FlowCnec>> {
        self.flow_cnecs.iter().filter(|c| c.optimized)
    }

    pub fn monitored_cnecs(&self) -> impl Iterator<Item = &Arc<FlowCnec>> {
        self.flow_cnecs.iter().filter(|c| c.monitored)
    }

    pub fn loop_flow_cnecs(&self) -> impl Iterator<Item = &Arc<FlowCnec>> {
        self.flow_cnecs
            .iter()
            .filter(|c| c.loop_flow_threshold.is_some())
    }

    pub fn network_actions(&self) -> &[Arc<NetworkAction>] {
        &self.network_actions
    }

    pub fn network_action(&self, id: &NetworkActionId) -> Option<&Arc<NetworkAction>> {
        self.network_actions.iter().find(|na| &na.id == id)
    }

    pub fn range_actions(&self) -> &[Arc<RangeAction>] {
        &self.range_actions
    }

    pub fn range_action(&self, id: &RangeActionId) -> Option<&Arc<RangeAction>> {
        self.range_actions.iter().find(|ra| &ra.id == id)
    }
}
