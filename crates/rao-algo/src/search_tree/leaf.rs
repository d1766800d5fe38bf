//! Search-tree leaves.
//!
//! A leaf is one combination of network actions applied on its own
//! snapshot. Its lifecycle is
//!
//! ```text
//! Created ──evaluate──▶ Evaluated ──optimize──▶ Optimized
//!    │                     │                      │
//!    └──(engine failure)───┴──▶ Error             │
//!                          finalize_optimization ─┴──▶ Finalized
//! ```
//!
//! The set of activated network actions is fixed at construction and
//! results are written once by the stage that produces them.

use super::pool::{PooledSnapshot, SnapshotPool};
use crate::linear_optimizer::{IteratingLinearOptimizer, IteratingLinearOptimizerInput};
use crate::objective::ObjectiveFunction;
use crate::parameters::SearchTreeParameters;
use crate::result::{EvaluationResult, OptimizationResult, PerimeterResult};
use crate::sensitivity::{FlowResult, SensitivityComputer};
use rao_core::{
    CnecId, NetworkAction, NetworkActionCombination, NetworkActionId, NetworkSnapshot, RaoError,
    RaoResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Arena index of a leaf within one search tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeafId(pub usize);

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafStatus {
    Created,
    Evaluated,
    Optimized,
    Error,
    Finalized,
}

impl fmt::Display for LeafStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeafStatus::Created => "created",
            LeafStatus::Evaluated => "evaluated",
            LeafStatus::Optimized => "optimized",
            LeafStatus::Error => "error",
            LeafStatus::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Leaf {
    id: LeafId,
    parent: Option<LeafId>,
    depth: usize,
    combination: Option<NetworkActionCombination>,
    /// Activated network actions, in application order
    applied: Vec<Arc<NetworkAction>>,
    activated: BTreeSet<NetworkActionId>,
    snapshot: Option<PooledSnapshot>,
    /// Copy of the snapshot kept once the pooled handle is released
    final_snapshot: Option<NetworkSnapshot>,
    status: LeafStatus,
    finalized: bool,
    evaluation: Option<EvaluationResult>,
    optimization: Option<OptimizationResult>,
    error: Option<String>,
}

impl Leaf {
    /// Root leaf: no network action, snapshot straight from the pool.
    pub fn root(id: LeafId, pool: &Arc<SnapshotPool>) -> RaoResult<Self> {
        let snapshot = pool.acquire()?;
        Ok(Self {
            id,
            parent: None,
            depth: 0,
            combination: None,
            applied: Vec::new(),
            activated: BTreeSet::new(),
            snapshot: Some(snapshot),
            final_snapshot: None,
            status: LeafStatus::Created,
            finalized: false,
            evaluation: None,
            optimization: None,
            error: None,
        })
    }

    /// Child of `parent` activating `combination` on top of the parent's actions.
    ///
    /// The child starts from a copy of the parent's snapshot, optimized
    /// setpoints included, then the combination is applied. Fails with
    /// [`RaoError::IllegalCombination`] if any action cannot be applied; the
    /// snapshot then returns to the pool.
    pub fn child(
        id: LeafId,
        parent: &Leaf,
        combination: NetworkActionCombination,
        pool: &Arc<SnapshotPool>,
    ) -> RaoResult<Self> {
        let Some(parent_snapshot) = parent.snapshot() else {
            return Err(RaoError::ContractViolation(format!(
                "leaf {} has no snapshot to grow children from",
                parent.id
            )));
        };
        let mut snapshot = pool.acquire()?;
        snapshot.reset_from(parent_snapshot);
        let added: Vec<Arc<NetworkAction>> = combination
            .actions()
            .filter(|na| !parent.activated.contains(&na.id))
            .cloned()
            .collect();
        for action in &added {
            if !action.apply(&mut snapshot) {
                return Err(RaoError::IllegalCombination {
                    action: action.id.to_string(),
                    snapshot: snapshot.id().to_string(),
                });
            }
        }
        let mut applied = parent.applied.clone();
        applied.extend(added);
        snapshot.set_id(format!("{}{}", pool.template().id(), id));
        let activated = applied.iter().map(|na| na.id.clone()).collect();
        Ok(Self {
            id,
            parent: Some(parent.id),
            depth: parent.depth + 1,
            combination: Some(combination),
            applied,
            activated,
            snapshot: Some(snapshot),
            final_snapshot: None,
            status: LeafStatus::Created,
            finalized: false,
            evaluation: None,
            optimization: None,
            error: None,
        })
    }

    pub fn id(&self) -> LeafId {
        self.id
    }

    pub fn parent(&self) -> Option<LeafId> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn status(&self) -> LeafStatus {
        if self.finalized {
            LeafStatus::Finalized
        } else {
            self.status
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Combination this leaf added to its parent; `None` for the root.
    pub fn combination(&self) -> Option<&NetworkActionCombination> {
        self.combination.as_ref()
    }

    pub fn activated_network_actions(&self) -> &BTreeSet<NetworkActionId> {
        &self.activated
    }

    pub fn applied_network_actions(&self) -> &[Arc<NetworkAction>] {
        &self.applied
    }

    /// Network state of the leaf, with its remedial actions applied.
    pub fn snapshot(&self) -> Option<&NetworkSnapshot> {
        self.snapshot.as_deref().or(self.final_snapshot.as_ref())
    }

    pub fn optimization_result(&self) -> Option<&OptimizationResult> {
        self.optimization.as_ref()
    }

    /// `root` or the activated action ids, e.g. `close-sw-2 + open-line-1`.
    pub fn label(&self) -> String {
        if self.activated.is_empty() {
            "root".to_string()
        } else {
            self.activated
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(" + ")
        }
    }

    /// Compute flows and costs of the leaf's snapshot.
    ///
    /// Only the first call does any work. An engine failure turns the leaf
    /// into an error leaf.
    pub fn evaluate(&mut self, objective: &ObjectiveFunction, computer: &SensitivityComputer) {
        if !self.awaits_evaluation() {
            return;
        }
        let Some(snapshot) = self.snapshot.as_deref() else {
            self.fail("leaf has no snapshot".to_string());
            return;
        };
        match computer.compute(snapshot) {
            Ok(flows) => self.record_evaluation(flows, objective, computer),
            Err(e) => {
                warn!(leaf = %self.id, label = %self.label(), error = %e, "leaf evaluation failed");
                self.fail(e.to_string());
            }
        }
    }

    /// Evaluate the leaf with flows already computed on its snapshot.
    pub fn evaluate_with_flows(
        &mut self,
        flows: FlowResult,
        objective: &ObjectiveFunction,
        computer: &SensitivityComputer,
    ) {
        if self.awaits_evaluation() {
            self.record_evaluation(flows, objective, computer);
        }
    }

    fn awaits_evaluation(&self) -> bool {
        if self.status != LeafStatus::Created || self.finalized {
            debug!(leaf = %self.id, status = %self.status(), "leaf already evaluated");
            return false;
        }
        true
    }

    fn record_evaluation(&mut self, flows: FlowResult, objective: &ObjectiveFunction, computer: &SensitivityComputer) {
        let Some(snapshot) = self.snapshot.as_deref() else {
            self.fail("leaf has no snapshot".to_string());
            return;
        };
        let activation = computer.activation(snapshot, self.activated.clone());
        let result = objective.evaluate(&flows, &activation);
        self.evaluation = Some(EvaluationResult {
            flows,
            activation,
            objective: result,
        });
        self.status = LeafStatus::Evaluated;
        debug!(leaf = %self.id, label = %self.label(), cost = self.cost_or_infinity(), "leaf evaluated");
    }

    /// Optimize range actions on top of the leaf's network actions.
    ///
    /// Does nothing unless the leaf is `Evaluated`. A simulation or solver
    /// failure in the first iteration turns the leaf into an error leaf;
    /// other errors are returned.
    pub fn optimize(
        &mut self,
        input: &IteratingLinearOptimizerInput<'_>,
        params: &SearchTreeParameters,
    ) -> RaoResult<()> {
        if self.finalized {
            return Err(RaoError::ContractViolation(format!(
                "cannot optimize leaf {} after it was finalized",
                self.id
            )));
        }
        if self.status != LeafStatus::Evaluated {
            debug!(leaf = %self.id, status = %self.status, "leaf not optimized, it is not evaluated");
            return Ok(());
        }
        let (Some(snapshot), Some(start)) = (self.snapshot.as_deref_mut(), self.evaluation.as_ref()) else {
            return Err(RaoError::ContractViolation(format!(
                "leaf {} is evaluated but holds no result",
                self.id
            )));
        };
        let optimizer = IteratingLinearOptimizer::new(input, params);
        match optimizer.optimize(snapshot, start, &self.applied) {
            Ok(result) => {
                debug!(
                    leaf = %self.id,
                    label = %self.label(),
                    iterations = result.iterations,
                    cost = result.cost(),
                    "leaf optimized"
                );
                self.optimization = Some(result);
                self.status = LeafStatus::Optimized;
            }
            Err(e) if e.is_recoverable() => {
                warn!(leaf = %self.id, label = %self.label(), error = %e, "leaf optimization failed");
                self.fail(e.to_string());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Return the leaf's pooled snapshot handle. Results and a copy of the
    /// final network state stay readable.
    pub fn finalize_optimization(&mut self) -> RaoResult<()> {
        if self.status == LeafStatus::Created && !self.is_error() {
            return Err(RaoError::ContractViolation(format!(
                "cannot finalize leaf {} before it is evaluated",
                self.id
            )));
        }
        if let Some(pooled) = self.snapshot.take() {
            self.final_snapshot = Some(NetworkSnapshot::clone(&pooled));
        }
        self.finalized = true;
        Ok(())
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.error = Some(message);
        self.status = LeafStatus::Error;
    }

    /// Latest result: optimization if any, else evaluation.
    pub fn result(&self) -> RaoResult<&EvaluationResult> {
        if let Some(optimization) = &self.optimization {
            return Ok(&optimization.evaluation);
        }
        self.evaluation.as_ref().ok_or_else(|| {
            RaoError::ContractViolation(format!(
                "leaf {} has no result (status {})",
                self.id,
                self.status()
            ))
        })
    }

    /// Total cost; `+∞` for error leaves.
    pub fn cost(&self) -> RaoResult<f64> {
        if self.is_error() {
            return Ok(f64::INFINITY);
        }
        Ok(self.result()?.cost())
    }

    pub fn functional_cost(&self) -> RaoResult<f64> {
        Ok(self.result()?.functional_cost())
    }

    pub fn virtual_cost(&self) -> RaoResult<f64> {
        Ok(self.result()?.virtual_cost())
    }

    pub fn virtual_cost_by_name(&self, name: &str) -> RaoResult<f64> {
        Ok(self.result()?.virtual_cost_by_name(name))
    }

    pub fn most_limiting_elements(&self, n: usize) -> RaoResult<Vec<CnecId>> {
        Ok(self.result()?.most_limiting_elements(n))
    }

    pub fn costly_elements(&self, name: &str, n: usize) -> RaoResult<Vec<CnecId>> {
        Ok(self.result()?.costly_elements(name, n))
    }

    pub(crate) fn cost_or_infinity(&self) -> f64 {
        self.cost().unwrap_or(f64::INFINITY)
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "leaf {} [{}] ({})", self.id, self.label(), self.status())?;
        if let Ok(result) = self.result() {
            write!(
                f,
                " cost {:.2} (functional {:.2}, virtual {:.2})",
                result.cost(),
                result.functional_cost(),
                result.virtual_cost()
            )?;
        }
        Ok(())
    }
}
