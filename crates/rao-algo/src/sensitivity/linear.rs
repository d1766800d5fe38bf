//! Linear (DC-sensitivity) engine.
//!
//! Flows are a first-order expansion around a base snapshot:
//!
//! ```text
//! flow(c) = reference(c)
//!         + Σ_element sensitivity(c, element) · Δsetpoint(element)
//!         + Σ_element shift(c, element)   for elements whose status differs from base
//! ```
//!
//! PST setpoint deltas are angle deltas (degrees), read through the tap-to-angle
//! table of the range action acting on that PST.

use super::{ComputationStatus, SensitivityEngine, SensitivityRequest, SensitivityValues};
use rao_core::{CnecId, NetworkSnapshot, RangeAction, RaoResult};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LinearSensitivityEngine {
    base: NetworkSnapshot,
    reference_flows: BTreeMap<CnecId, f64>,
    setpoint_sensitivities: BTreeMap<CnecId, BTreeMap<String, f64>>,
    topology_shifts: BTreeMap<CnecId, BTreeMap<String, f64>>,
    zonal_ptdfs: BTreeMap<CnecId, BTreeMap<String, f64>>,
    status: ComputationStatus,
    ampere_flows: bool,
}

impl LinearSensitivityEngine {
    pub fn new(base: NetworkSnapshot) -> Self {
        Self {
            base,
            reference_flows: BTreeMap::new(),
            setpoint_sensitivities: BTreeMap::new(),
            topology_shifts: BTreeMap::new(),
            zonal_ptdfs: BTreeMap::new(),
            status: ComputationStatus::Default,
            ampere_flows: true,
        }
    }

    /// Flow on the base snapshot (MW).
    pub fn with_reference_flow(mut self, cnec: impl Into<CnecId>, mw: f64) -> Self {
        self.reference_flows.insert(cnec.into(), mw);
        self
    }

    /// MW per unit of setpoint of `element` (degree for PSTs).
    pub fn with_sensitivity(mut self, cnec: impl Into<CnecId>, element: &str, mw: f64) -> Self {
        self.setpoint_sensitivities
            .entry(cnec.into())
            .or_default()
            .insert(element.to_string(), mw);
        self
    }

    /// Flow shift (MW) applied when `element` is switched away from its base status.
    pub fn with_topology_shift(mut self, cnec: impl Into<CnecId>, element: &str, mw: f64) -> Self {
        self.topology_shifts
            .entry(cnec.into())
            .or_default()
            .insert(element.to_string(), mw);
        self
    }

    pub fn with_zonal_ptdf(mut self, cnec: impl Into<CnecId>, area: &str, ptdf: f64) -> Self {
        self.zonal_ptdfs
            .entry(cnec.into())
            .or_default()
            .insert(area.to_string(), ptdf);
        self
    }

    /// Status reported with every result. `Fallback` also drops ampere flows.
    pub fn with_status(mut self, status: ComputationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn without_ampere_flows(mut self) -> Self {
        self.ampere_flows = false;
        self
    }

    pub fn base(&self) -> &NetworkSnapshot {
        &self.base
    }

    fn setpoint_delta(
        &self,
        snapshot: &NetworkSnapshot,
        element: &str,
        range_actions: &[Arc<RangeAction>],
    ) -> f64 {
        let pst = range_actions
            .iter()
            .find(|ra| ra.is_pst() && ra.network_element == element);
        if let Some(pst) = pst {
            return match (pst.current_setpoint(snapshot), pst.current_setpoint(&self.base)) {
                (Some(now), Some(base)) => now - base,
                _ => 0.0,
            };
        }
        match (snapshot.setpoint(element), self.base.setpoint(element)) {
            (Some(now), Some(base)) => now - base,
            _ => 0.0,
        }
    }

    fn flow(&self, cnec: &CnecId, snapshot: &NetworkSnapshot, range_actions: &[Arc<RangeAction>]) -> f64 {
        let mut flow = self.reference_flows.get(cnec).copied().unwrap_or(0.0);
        if let Some(sensitivities) = self.setpoint_sensitivities.get(cnec) {
            for (element, s) in sensitivities {
                flow += s * self.setpoint_delta(snapshot, element, range_actions);
            }
        }
        if let Some(shifts) = self.topology_shifts.get(cnec) {
            for (element, shift) in shifts {
                if snapshot.is_connected(element) != self.base.is_connected(element) {
                    flow += shift;
                }
            }
        }
        flow
    }
}

impl SensitivityEngine for LinearSensitivityEngine {
    fn name(&self) -> &str {
        "linear"
    }

    fn run(
        &self,
        snapshot: &NetworkSnapshot,
        request: &SensitivityRequest<'_>,
    ) -> RaoResult<SensitivityValues> {
        let mut values = SensitivityValues {
            status: self.status,
            ..SensitivityValues::default()
        };
        let report_amperes = self.ampere_flows && self.status != ComputationStatus::Fallback;

        for cnec in request.cnecs {
            let mw = self.flow(&cnec.id, snapshot, request.range_actions);
            values.flows_mw.insert(cnec.id.clone(), mw);
            if report_amperes {
                values
                    .flows_a
                    .insert(cnec.id.clone(), mw * cnec.ampere_per_megawatt());
            }

            if let Some(sensitivities) = self.setpoint_sensitivities.get(&cnec.id) {
                for ra in request.range_actions {
                    if let Some(s) = sensitivities.get(&ra.network_element) {
                        values
                            .sensitivities
                            .insert((cnec.id.clone(), ra.id.clone()), *s);
                    }
                }
            }

            if let Some(ptdfs) = self.zonal_ptdfs.get(&cnec.id) {
                for area in request.ptdf_areas {
                    if let Some(ptdf) = ptdfs.get(area) {
                        values
                            .zonal_ptdfs
                            .insert((cnec.id.clone(), area.clone()), *ptdf);
                    }
                }
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::{FlowCnec, State, Unit};
    use std::collections::BTreeSet;

    fn cnecs() -> Vec<Arc<FlowCnec>> {
        vec![Arc::new(
            FlowCnec::new("c", "FR", "line-1", State::preventive())
                .with_symmetric_threshold(Unit::Megawatt, 100.0),
        )]
    }

    fn pst() -> Arc<RangeAction> {
        let table = (-2..=2).map(|t| (t, t as f64 * 1.5)).collect();
        Arc::new(RangeAction::pst("pst", "FR", "pst-1", table))
    }

    fn base() -> NetworkSnapshot {
        NetworkSnapshot::new("base")
            .with_element("line-2", true)
            .with_tap("pst-1", 0)
            .with_setpoint("load-1", 50.0)
    }

    fn engine() -> LinearSensitivityEngine {
        LinearSensitivityEngine::new(base())
            .with_reference_flow("c", 105.0)
            .with_sensitivity("c", "pst-1", -2.0)
            .with_sensitivity("c", "load-1", 0.5)
            .with_topology_shift("c", "line-2", -7.0)
    }

    fn run(snapshot: &NetworkSnapshot) -> SensitivityValues {
        let cnecs = cnecs();
        let ras = vec![pst()];
        let areas = BTreeSet::new();
        let request = SensitivityRequest {
            cnecs: &cnecs,
            range_actions: &ras,
            ptdf_areas: &areas,
        };
        engine().run(snapshot, &request).unwrap()
    }

    #[test]
    fn test_base_flow() {
        let values = run(&base());
        assert_eq!(values.flows_mw[&CnecId::from("c")], 105.0);
        assert_eq!(values.sensitivities[&("c".into(), "pst".into())], -2.0);
        assert!(values.flows_a.contains_key(&CnecId::from("c")));
    }

    #[test]
    fn test_topology_and_setpoint_changes() {
        let mut snapshot = base();
        snapshot.set_connected("line-2", false);
        snapshot.set_tap("pst-1", 2);
        snapshot.set_setpoint("load-1", 60.0);
        // 105 - 7 - 2 * 3.0 + 0.5 * 10
        let values = run(&snapshot);
        assert!((values.flows_mw[&CnecId::from("c")] - 97.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_drops_amperes() {
        let cnecs = cnecs();
        let areas = BTreeSet::new();
        let request = SensitivityRequest {
            cnecs: &cnecs,
            range_actions: &[],
            ptdf_areas: &areas,
        };
        let values = engine()
            .with_status(ComputationStatus::Fallback)
            .run(&base(), &request)
            .unwrap();
        assert_eq!(values.status, ComputationStatus::Fallback);
        assert!(values.flows_a.is_empty());
    }
}
