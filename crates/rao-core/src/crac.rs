//! In-memory CRAC catalog: contingencies, monitored elements and remedial actions.
//!
//! The catalog is read-only once handed to the optimizer. Elements are kept
//! behind `Arc` so perimeters, leaves and combinations share them without
//! copying.

use crate::action::NetworkAction;
use crate::cnec::FlowCnec;
use crate::error::{RaoError, RaoResult};
use crate::range_action::RangeAction;
use crate::state::{Contingency, Instant, State};
use crate::usage_limits::RaUsageLimits;
use crate::{CnecId, NetworkActionId, RangeActionId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Crac {
    pub id: String,
    contingencies: Vec<Contingency>,
    network_actions: Vec<Arc<NetworkAction>>,
    range_actions: Vec<Arc<RangeAction>>,
    flow_cnecs: Vec<Arc<FlowCnec>>,
    ra_usage_limits: BTreeMap<Instant, RaUsageLimits>,
}

impl Crac {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn add_contingency(&mut self, contingency: Contingency) -> RaoResult<()> {
        if self.contingency(&contingency.id).is_some() {
            return Err(RaoError::Validation(format!(
                "duplicate contingency '{}'",
                contingency.id
            )));
        }
        self.contingencies.push(contingency);
        Ok(())
    }

    pub fn add_network_action(&mut self, action: NetworkAction) -> RaoResult<()> {
        if self.network_action(&action.id).is_some() {
            return Err(RaoError::Validation(format!(
                "duplicate network action '{}'",
                action.id
            )));
        }
        if action.elementary_actions.is_empty() {
            return Err(RaoError::Validation(format!(
                "network action '{}' has no elementary action",
                action.id
            )));
        }
        self.network_actions.push(Arc::new(action));
        Ok(())
    }

    pub fn add_range_action(&mut self, action: RangeAction) -> RaoResult<()> {
        if self.range_action(&action.id).is_some() {
            return Err(RaoError::Validation(format!(
                "duplicate range action '{}'",
                action.id
            )));
        }
        if !(action.min_setpoint <= action.max_setpoint) {
            return Err(RaoError::Validation(format!(
                "range action '{}' has an empty range [{}, {}]",
                action.id, action.min_setpoint, action.max_setpoint
            )));
        }
        self.range_actions.push(Arc::new(action));
        Ok(())
    }

    pub fn add_flow_cnec(&mut self, cnec: FlowCnec) -> RaoResult<()> {
        if self.flow_cnec(&cnec.id).is_some() {
            return Err(RaoError::Validation(format!("duplicate cnec '{}'", cnec.id)));
        }
        if let Some(co) = cnec.state.contingency() {
            if self.contingency(co).is_none() {
                return Err(RaoError::Validation(format!(
                    "cnec '{}' refers to unknown contingency '{}'",
                    cnec.id, co
                )));
            }
        }
        self.flow_cnecs.push(Arc::new(cnec));
        Ok(())
    }

    pub fn set_usage_limits(&mut self, instant: Instant, limits: RaUsageLimits) {
        self.ra_usage_limits.insert(instant, limits);
    }

    /// Usage limits of `instant`; unlimited when none are configured.
    pub fn usage_limits(&self, instant: Instant) -> RaUsageLimits {
        self.ra_usage_limits.get(&instant).cloned().unwrap_or_default()
    }

    pub fn contingency(&self, id: &str) -> Option<&Contingency> {
        self.contingencies.iter().find(|co| co.id == id)
    }

    pub fn contingencies(&self) -> &[Contingency] {
        &self.contingencies
    }

    pub fn network_action(&self, id: &NetworkActionId) -> Option<&Arc<NetworkAction>> {
        self.network_actions.iter().find(|na| &na.id == id)
    }

    pub fn network_actions(&self) -> &[Arc<NetworkAction>] {
        &self.network_actions
    }

    pub fn range_action(&self, id: &RangeActionId) -> Option<&Arc<RangeAction>> {
        self.range_actions.iter().find(|ra| &ra.id == id)
    }

    pub fn range_actions(&self) -> &[Arc<RangeAction>] {
        &self.range_actions
    }

    pub fn flow_cnec(&self, id: &CnecId) -> Option<&Arc<FlowCnec>> {
        self.flow_cnecs.iter().find(|c| &c.id == id)
    }

    pub fn flow_cnecs(&self) -> &[Arc<FlowCnec>] {
        &self.flow_cnecs
    }

    pub fn flow_cnecs_for_state<'a>(&'a self, state: &'a State) -> impl Iterator<Item = &'a Arc<FlowCnec>> {
        self.flow_cnecs.iter().filter(move |c| &c.state == state)
    }

    /// Every state that carries at least one CNEC, plus the preventive state.
    pub fn states(&self) -> BTreeSet<State> {
        let mut states: BTreeSet<State> = self.flow_cnecs.iter().map(|c| c.state.clone()).collect();
        states.insert(State::preventive());
        states
    }
}
