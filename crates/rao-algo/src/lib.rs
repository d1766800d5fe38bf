//! # rao-algo: Search-Tree Remedial-Action Optimization
//!
//! Finds the least-cost set of remedial actions that keeps monitored
//! branches within their limits for one optimization perimeter (a network
//! state plus the CNECs it must secure).
//!
//! ## Search Tree
//!
//! Discrete network actions are explored by a [`SearchTree`]:
//!
//! | Stage | Component | Output |
//! |-------|-----------|--------|
//! | Evaluate | [`Leaf::evaluate`] | flows, functional and virtual costs |
//! | Optimize | [`IteratingLinearOptimizer`] | range-action setpoints, PST taps |
//! | Bloom | [`SearchTreeBloomer`] | candidate combinations for the next depth |
//! | Select | [`SearchTree::run`] | best leaf, replaced only on sufficient improvement |
//!
//! Continuous range actions (PSTs, HVDC lines, injections) are optimized in
//! every leaf by iterating a linear program built with `good_lp` around the
//! current setpoints.
//!
//! ## Costs
//!
//! A leaf's cost is the negated worst margin over optimized CNECs plus named
//! virtual costs (MNEC degradation, loop flows, sensitivity fallback and
//! usage-limit excess). See [`objective`].
//!
//! ## Example
//!
//! ```ignore
//! use rao_algo::{OptimizationPerimeter, SearchTree, SearchTreeInput, SearchTreeParameters};
//!
//! let perimeter = Arc::new(OptimizationPerimeter::preventive(&crac)?);
//! let input = SearchTreeInput::new(perimeter, snapshot, engine);
//! let params = rao_algo::load_parameters(Path::new("rao.toml"))?;
//!
//! let mut tree = SearchTree::new(input, params)?;
//! let best = tree.run(Some(Instant::Outage))?;
//! println!("{}", tree.report().unwrap().to_json()?);
//! ```

pub mod linear_optimizer;
pub mod logging;
pub mod objective;
pub mod parameters;
pub mod perimeter;
pub mod result;
pub mod search_tree;
pub mod sensitivity;

pub use linear_optimizer::{IteratingLinearOptimizer, IteratingLinearOptimizerInput};
pub use objective::{CostEvaluator, ObjectiveFunction, ObjectiveFunctionResult};
pub use parameters::{
    load_parameters, save_parameters, ObjectiveFunctionType, SearchTreeParameters, StopCriterion,
};
pub use perimeter::OptimizationPerimeter;
pub use result::{
    EvaluationResult, LinearOptimizationStatus, OptimizationResult, PerimeterResult,
    RemedialActionActivation,
};
pub use search_tree::{
    Leaf, LeafId, LeafStatus, SearchTree, SearchTreeBloomer, SearchTreeInput, SearchTreeReport,
};
pub use sensitivity::{
    ComputationStatus, FlowResult, LinearSensitivityEngine, ReferenceProgram, SensitivityComputer,
    SensitivityEngine, SensitivityRequest, SensitivityValues,
};
