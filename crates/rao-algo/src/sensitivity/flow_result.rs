use super::{ComputationStatus, SensitivityValues};
use rao_core::{CnecId, FlowCnec, RangeActionId, Unit};
use std::collections::HashMap;

/// Flows, margins and sensitivities of one snapshot.
///
/// CNECs outside the computed set read as zero flow.
#[derive(Debug, Clone, Default)]
pub struct FlowResult {
    values: SensitivityValues,
    ptdf_sums: HashMap<CnecId, f64>,
    commercial_flows: Option<HashMap<CnecId, f64>>,
}

impl FlowResult {
    pub fn new(
        values: SensitivityValues,
        ptdf_sums: HashMap<CnecId, f64>,
        commercial_flows: Option<HashMap<CnecId, f64>>,
    ) -> Self {
        Self {
            values,
            ptdf_sums,
            commercial_flows,
        }
    }

    pub fn status(&self) -> ComputationStatus {
        self.values.status
    }

    /// Flow in `unit`. Amperes missing from the engine output are derived
    /// from the MW flow at nominal voltage.
    pub fn flow(&self, cnec: &FlowCnec, unit: Unit) -> f64 {
        let mw = self.values.flows_mw.get(&cnec.id).copied().unwrap_or(0.0);
        match unit {
            Unit::Megawatt => mw,
            Unit::Ampere => self
                .values
                .flows_a
                .get(&cnec.id)
                .copied()
                .unwrap_or(mw * cnec.ampere_per_megawatt()),
        }
    }

    pub fn margin(&self, cnec: &FlowCnec, unit: Unit) -> f64 {
        cnec.compute_margin(self.flow(cnec, unit), unit)
    }

    /// Positive margins divided by the PTDF zonal sum; negative margins unchanged.
    pub fn relative_margin(&self, cnec: &FlowCnec, unit: Unit) -> f64 {
        let margin = self.margin(cnec, unit);
        if margin > 0.0 {
            margin / self.ptdf_zonal_sum(cnec)
        } else {
            margin
        }
    }

    /// Absolute zonal PTDF sum over the configured boundaries (1 when not computed).
    pub fn ptdf_zonal_sum(&self, cnec: &FlowCnec) -> f64 {
        self.ptdf_sums.get(&cnec.id).copied().unwrap_or(1.0)
    }

    pub fn has_commercial_flows(&self) -> bool {
        self.commercial_flows.is_some()
    }

    pub fn commercial_flow(&self, cnec: &FlowCnec) -> Option<f64> {
        self.commercial_flows
            .as_ref()
            .map(|flows| flows.get(&cnec.id).copied().unwrap_or(0.0))
    }

    /// Flow minus commercial flow, in MW.
    pub fn loop_flow(&self, cnec: &FlowCnec) -> Option<f64> {
        self.commercial_flow(cnec)
            .map(|commercial| self.flow(cnec, Unit::Megawatt) - commercial)
    }

    /// Flow variation in `unit` per unit of setpoint of `range_action`.
    pub fn sensitivity(&self, cnec: &FlowCnec, range_action: &RangeActionId, unit: Unit) -> f64 {
        let mw = self
            .values
            .sensitivities
            .get(&(cnec.id.clone(), range_action.clone()))
            .copied()
            .unwrap_or(0.0);
        mw * cnec.unit_factor(unit)
    }
}
