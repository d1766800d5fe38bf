use super::CostEvaluator;
use crate::result::RemedialActionActivation;
use crate::sensitivity::FlowResult;
use rao_core::{CnecId, FlowCnec, Unit};
use std::sync::Arc;

/// Functional cost: the negated smallest margin over optimized CNECs.
///
/// In relative mode positive margins are divided by the CNEC's PTDF zonal
/// sum while negative margins stay absolute, so the evaluator only switches
/// to relative margins once the network is secure.
pub struct MinMarginEvaluator {
    cnecs: Vec<Arc<FlowCnec>>,
    unit: Unit,
    relative: bool,
}

impl MinMarginEvaluator {
    pub fn new(cnecs: Vec<Arc<FlowCnec>>, unit: Unit) -> Self {
        Self {
            cnecs,
            unit,
            relative: false,
        }
    }

    pub fn relative(cnecs: Vec<Arc<FlowCnec>>, unit: Unit) -> Self {
        Self {
            cnecs,
            unit,
            relative: true,
        }
    }

    fn margin(&self, flows: &FlowResult, cnec: &FlowCnec) -> f64 {
        if self.relative {
            flows.relative_margin(cnec, self.unit)
        } else {
            flows.margin(cnec, self.unit)
        }
    }
}

impl CostEvaluator for MinMarginEvaluator {
    fn name(&self) -> &str {
        if self.relative {
            "min-relative-margin"
        } else {
            "min-margin"
        }
    }

    fn unit(&self) -> Unit {
        self.unit
    }

    fn compute_cost_and_limiting_elements(
        &self,
        flows: &FlowResult,
        _activation: &RemedialActionActivation,
    ) -> (f64, Vec<CnecId>) {
        // CNECs without any threshold have an infinite margin and never limit
        let mut margins: Vec<(f64, &CnecId)> = self
            .cnecs
            .iter()
            .map(|c| (self.margin(flows, c), &c.id))
            .filter(|(m, _)| m.is_finite())
            .collect();
        margins.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        let cost = margins.first().map_or(0.0, |(m, _)| -m);
        (cost, margins.into_iter().map(|(_, id)| id.clone()).collect())
    }
}
