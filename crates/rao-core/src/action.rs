//! Discrete remedial actions ("network actions") and their combinations.
//!
//! A [`NetworkAction`] is all-or-nothing: it is made of one or more
//! [`ElementaryAction`]s (open a line, move a switch pair, fix an injection
//! setpoint or a PST tap) and applying it either changes every targeted
//! element or changes nothing.

use crate::network::NetworkSnapshot;
use crate::state::{Instant, State};
use crate::{CnecId, NetworkActionId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// When a remedial action may be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsageRule {
    /// Available on every state of the instant.
    OnInstant { instant: Instant },
    /// Available on one specific state.
    OnContingencyState { state: State },
    /// Available at `instant` only while `cnec` is overloaded.
    OnFlowConstraint { instant: Instant, cnec: CnecId },
}

impl UsageRule {
    /// Unconditional availability on `state`.
    pub fn is_available_on(&self, state: &State) -> bool {
        match self {
            UsageRule::OnInstant { instant } => *instant == state.instant(),
            UsageRule::OnContingencyState { state: rule_state } => rule_state == state,
            UsageRule::OnFlowConstraint { .. } => false,
        }
    }
}

/// Status targeted by a topological action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Open,
    Close,
}

/// One change on one (or two) network elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementaryAction {
    Topology { element: String, action: ActionType },
    InjectionSetpoint { element: String, setpoint: f64 },
    PstSetpoint { element: String, tap: i32 },
    SwitchPair { open: String, close: String },
}

impl ElementaryAction {
    pub fn can_apply(&self, snapshot: &NetworkSnapshot) -> bool {
        match self {
            ElementaryAction::Topology { element, .. } => snapshot.is_connected(element).is_some(),
            ElementaryAction::InjectionSetpoint { element, .. } => {
                snapshot.setpoint(element).is_some()
            }
            ElementaryAction::PstSetpoint { element, .. } => snapshot.tap(element).is_some(),
            ElementaryAction::SwitchPair { open, close } => {
                open != close
                    && snapshot.is_connected(open).is_some()
                    && snapshot.is_connected(close).is_some()
            }
        }
    }

    fn apply_unchecked(&self, snapshot: &mut NetworkSnapshot) {
        match self {
            ElementaryAction::Topology { element, action } => {
                snapshot.set_connected(element, *action == ActionType::Close);
            }
            ElementaryAction::InjectionSetpoint { element, setpoint } => {
                snapshot.set_setpoint(element, *setpoint);
            }
            ElementaryAction::PstSetpoint { element, tap } => {
                snapshot.set_tap(element, *tap);
            }
            ElementaryAction::SwitchPair { open, close } => {
                snapshot.set_connected(open, false);
                snapshot.set_connected(close, true);
            }
        }
    }

    /// Elements touched by this action.
    pub fn elements(&self) -> Vec<&str> {
        match self {
            ElementaryAction::Topology { element, .. }
            | ElementaryAction::InjectionSetpoint { element, .. }
            | ElementaryAction::PstSetpoint { element, .. } => vec![element.as_str()],
            ElementaryAction::SwitchPair { open, close } => vec![open.as_str(), close.as_str()],
        }
    }
}

/// A discrete remedial action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAction {
    pub id: NetworkActionId,
    pub name: String,
    /// Operator (TSO) owning the action
    pub operator: String,
    pub elementary_actions: Vec<ElementaryAction>,
    pub usage_rules: Vec<UsageRule>,
    /// Areas the action is located in; empty when unknown
    #[serde(default)]
    pub locations: BTreeSet<String>,
}

impl NetworkAction {
    pub fn new(
        id: impl Into<String>,
        operator: impl Into<String>,
        elementary_actions: Vec<ElementaryAction>,
    ) -> Self {
        let id = NetworkActionId::new(id);
        Self {
            name: id.as_str().to_string(),
            id,
            operator: operator.into(),
            elementary_actions,
            usage_rules: Vec::new(),
            locations: BTreeSet::new(),
        }
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rules.push(rule);
        self
    }

    pub fn with_location(mut self, area: impl Into<String>) -> Self {
        self.locations.insert(area.into());
        self
    }

    pub fn can_apply(&self, snapshot: &NetworkSnapshot) -> bool {
        !self.elementary_actions.is_empty()
            && self.elementary_actions.iter().all(|ea| ea.can_apply(snapshot))
    }

    /// Apply every elementary action, or none of them.
    ///
    /// Returns `false`, leaving `snapshot` untouched, if any elementary
    /// action targets an element the snapshot does not know.
    pub fn apply(&self, snapshot: &mut NetworkSnapshot) -> bool {
        if !self.can_apply(snapshot) {
            return false;
        }
        for ea in &self.elementary_actions {
            ea.apply_unchecked(snapshot);
        }
        true
    }

    /// Available without condition on `state`.
    pub fn is_available_on(&self, state: &State) -> bool {
        self.usage_rules.iter().any(|rule| rule.is_available_on(state))
    }

    /// CNECs whose overload makes this action available at `instant`.
    pub fn flow_constraint_cnecs(&self, instant: Instant) -> impl Iterator<Item = &CnecId> {
        self.usage_rules.iter().filter_map(move |rule| match rule {
            UsageRule::OnFlowConstraint {
                instant: rule_instant,
                cnec,
            } if *rule_instant == instant => Some(cnec),
            _ => None,
        })
    }
}

/// Where a combination candidate comes from.
///
/// Ordered by exploration priority: detected combinations are explored
/// first, single actions generated by the bloomer last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationOrigin {
    /// Discovered by a previous optimization pass of this run
    Detected,
    /// Configured by an operator
    Predefined,
    /// Built by the bloomer from a single available action
    Generated,
}

/// A set of network actions tested together as one search-tree step.
///
/// Two combinations are equal when they contain the same action ids,
/// whatever their origin.
#[derive(Debug, Clone)]
pub struct NetworkActionCombination {
    actions: BTreeMap<NetworkActionId, Arc<NetworkAction>>,
    origin: CombinationOrigin,
}

impl NetworkActionCombination {
    pub fn new(actions: Vec<Arc<NetworkAction>>, origin: CombinationOrigin) -> Self {
        Self {
            actions: actions.into_iter().map(|na| (na.id.clone(), na)).collect(),
            origin,
        }
    }

    pub fn single(action: Arc<NetworkAction>) -> Self {
        Self::new(vec![action], CombinationOrigin::Generated)
    }

    pub fn origin(&self) -> CombinationOrigin {
        self.origin
    }

    pub fn with_origin(mut self, origin: CombinationOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_detected(&self) -> bool {
        self.origin == CombinationOrigin::Detected
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, id: &NetworkActionId) -> bool {
        self.actions.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NetworkActionId> {
        self.actions.keys()
    }

    pub fn id_set(&self) -> BTreeSet<NetworkActionId> {
        self.actions.keys().cloned().collect()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Arc<NetworkAction>> {
        self.actions.values()
    }

    pub fn operators(&self) -> BTreeSet<&str> {
        self.actions.values().map(|na| na.operator.as_str()).collect()
    }

    /// Human-readable id, e.g. `close-sw-2 + open-line-1`.
    pub fn concatenated_id(&self) -> String {
        self.actions
            .keys()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl PartialEq for NetworkActionCombination {
    fn eq(&self, other: &Self) -> bool {
        self.actions.keys().eq(other.actions.keys())
    }
}

impl Eq for NetworkActionCombination {}

impl Hash for NetworkActionCombination {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for id in self.actions.keys() {
            id.hash(state);
        }
    }
}

impl PartialOrd for NetworkActionCombination {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NetworkActionCombination {
    fn cmp(&self, other: &Self) -> Ordering {
        self.actions.keys().cmp(other.actions.keys())
    }
}
