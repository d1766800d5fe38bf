//! Sensitivity computation seam.
//!
//! The physical load-flow/sensitivity engine lives outside this crate and is
//! reached through the [`SensitivityEngine`] trait. [`SensitivityComputer`]
//! wraps an engine for one perimeter and turns its raw output into a
//! read-only [`FlowResult`] (flows, margins, relative margins, loop flows,
//! sensitivities).

mod computer;
mod flow_result;
pub mod linear;

pub use computer::SensitivityComputer;
pub use flow_result::FlowResult;
pub use linear::LinearSensitivityEngine;

use rao_core::{CnecId, FlowCnec, NetworkSnapshot, RangeAction, RangeActionId, RaoResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Outcome quality of a sensitivity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationStatus {
    #[default]
    Default,
    /// The engine fell back to a degraded mode (e.g. DC instead of AC)
    Fallback,
    /// Some results could not be computed
    Failure,
}

impl fmt::Display for ComputationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputationStatus::Default => write!(f, "default"),
            ComputationStatus::Fallback => write!(f, "fallback"),
            ComputationStatus::Failure => write!(f, "failure"),
        }
    }
}

/// What the engine must compute for one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SensitivityRequest<'a> {
    pub cnecs: &'a [Arc<FlowCnec>],
    pub range_actions: &'a [Arc<RangeAction>],
    /// Areas whose zonal PTDFs are needed (relative margins, loop flows)
    pub ptdf_areas: &'a BTreeSet<String>,
}

/// Raw engine output. Flows and sensitivities are in MW.
#[derive(Debug, Clone, Default)]
pub struct SensitivityValues {
    pub status: ComputationStatus,
    pub flows_mw: HashMap<CnecId, f64>,
    /// AC currents; may be left empty (DC or fallback computations)
    pub flows_a: HashMap<CnecId, f64>,
    /// MW per unit of setpoint (degree for PSTs)
    pub sensitivities: HashMap<(CnecId, RangeActionId), f64>,
    pub zonal_ptdfs: HashMap<(CnecId, String), f64>,
}

/// Load-flow and sensitivity engine.
///
/// Implementations must be usable from several search-tree workers at once.
/// An `Err` means nothing usable was computed; partial results are reported
/// through [`ComputationStatus::Failure`] instead.
pub trait SensitivityEngine: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        snapshot: &NetworkSnapshot,
        request: &SensitivityRequest<'_>,
    ) -> RaoResult<SensitivityValues>;
}

/// Net positions per area, used to compute commercial flows and loop flows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProgram {
    #[serde(default)]
    pub net_positions: BTreeMap<String, f64>,
}

impl ReferenceProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_net_position(mut self, area: impl Into<String>, mw: f64) -> Self {
        self.net_positions.insert(area.into(), mw);
        self
    }

    pub fn net_position(&self, area: &str) -> f64 {
        self.net_positions.get(area).copied().unwrap_or(0.0)
    }

    pub fn areas(&self) -> impl Iterator<Item = &String> {
        self.net_positions.keys()
    }
}
