//! Monitored elements ("CNECs": critical network element × contingency).
//!
//! A [`FlowCnec`] enforces flow limits on one branch in one state. Optimized
//! CNECs drive the functional cost; monitored-only CNECs (MNECs) must not
//! degrade beyond an accepted margin decrease and only generate virtual
//! costs.

use crate::state::State;
use crate::CnecId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unit of flows, thresholds and margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Megawatt,
    Ampere,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Megawatt => f.write_str("MW"),
            Unit::Ampere => f.write_str("A"),
        }
    }
}

/// One flow limit, possibly open on one side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub unit: Unit,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Flow limits on one branch for one network state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCnec {
    pub id: CnecId,
    pub operator: String,
    pub network_element: String,
    pub state: State,
    /// Margin counts in the functional cost
    pub optimized: bool,
    /// Margin must not degrade (MNEC)
    pub monitored: bool,
    pub thresholds: Vec<Threshold>,
    pub nominal_voltage_kv: f64,
    /// Loop-flow limit in MW, when the element is subject to loop-flow control
    #[serde(default)]
    pub loop_flow_threshold: Option<f64>,
    /// Areas the element is located in; empty when unknown
    #[serde(default)]
    pub locations: BTreeSet<String>,
}

impl FlowCnec {
    pub fn new(
        id: impl Into<String>,
        operator: impl Into<String>,
        network_element: impl Into<String>,
        state: State,
    ) -> Self {
        Self {
            id: CnecId::new(id),
            operator: operator.into(),
            network_element: network_element.into(),
            state,
            optimized: true,
            monitored: false,
            thresholds: Vec::new(),
            nominal_voltage_kv: 400.0,
            loop_flow_threshold: None,
            locations: BTreeSet::new(),
        }
    }

    pub fn with_threshold(mut self, unit: Unit, min: Option<f64>, max: Option<f64>) -> Self {
        self.thresholds.push(Threshold { unit, min, max });
        self
    }

    /// Symmetric limit `[-limit, limit]`.
    pub fn with_symmetric_threshold(self, unit: Unit, limit: f64) -> Self {
        self.with_threshold(unit, Some(-limit), Some(limit))
    }

    /// Turn the element into an MNEC: monitored, not optimized.
    pub fn monitored_only(mut self) -> Self {
        self.optimized = false;
        self.monitored = true;
        self
    }

    pub fn with_nominal_voltage(mut self, kv: f64) -> Self {
        self.nominal_voltage_kv = kv;
        self
    }

    pub fn with_loop_flow_threshold(mut self, mw: f64) -> Self {
        self.loop_flow_threshold = Some(mw);
        self
    }

    pub fn with_location(mut self, area: impl Into<String>) -> Self {
        self.locations.insert(area.into());
        self
    }

    /// Amperes per megawatt at nominal voltage: `1000 / (√3·U)`.
    pub fn ampere_per_megawatt(&self) -> f64 {
        1000.0 / (3f64.sqrt() * self.nominal_voltage_kv)
    }

    /// Factor converting a value in MW into `unit`.
    pub fn unit_factor(&self, unit: Unit) -> f64 {
        match unit {
            Unit::Megawatt => 1.0,
            Unit::Ampere => self.ampere_per_megawatt(),
        }
    }

    fn convert(&self, value: f64, from: Unit, to: Unit) -> f64 {
        if from == to {
            value
        } else {
            value * self.unit_factor(to) / self.unit_factor(from)
        }
    }

    /// Tightest upper limit expressed in `unit`.
    pub fn upper_bound(&self, unit: Unit) -> Option<f64> {
        self.thresholds
            .iter()
            .filter_map(|t| t.max.map(|max| self.convert(max, t.unit, unit)))
            .reduce(f64::min)
    }

    /// Tightest lower limit expressed in `unit`.
    pub fn lower_bound(&self, unit: Unit) -> Option<f64> {
        self.thresholds
            .iter()
            .filter_map(|t| t.min.map(|min| self.convert(min, t.unit, unit)))
            .reduce(f64::max)
    }

    /// Margin of `flow` (already in `unit`) to the closest limit; `+∞` without limits.
    pub fn compute_margin(&self, flow: f64, unit: Unit) -> f64 {
        let upper = self.upper_bound(unit).map(|max| max - flow);
        let lower = self.lower_bound(unit).map(|min| flow - min);
        match (upper, lower) {
            (Some(u), Some(l)) => u.min(l),
            (Some(u), None) => u,
            (None, Some(l)) => l,
            (None, None) => f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_in_megawatt() {
        let cnec = FlowCnec::new("c", "FR", "line-1", State::preventive())
            .with_threshold(Unit::Megawatt, Some(-80.0), Some(100.0));
        assert_eq!(cnec.compute_margin(60.0, Unit::Megawatt), 40.0);
        assert_eq!(cnec.compute_margin(-90.0, Unit::Megawatt), -10.0);
    }

    #[test]
    fn test_tightest_threshold_wins() {
        let cnec = FlowCnec::new("c", "FR", "line-1", State::preventive())
            .with_symmetric_threshold(Unit::Megawatt, 100.0)
            .with_threshold(Unit::Megawatt, None, Some(90.0));
        assert_eq!(cnec.upper_bound(Unit::Megawatt), Some(90.0));
        assert_eq!(cnec.lower_bound(Unit::Megawatt), Some(-100.0));
    }

    #[test]
    fn test_ampere_conversion() {
        let cnec = FlowCnec::new("c", "FR", "line-1", State::preventive())
            .with_nominal_voltage(400.0)
            .with_symmetric_threshold(Unit::Ampere, 1000.0);
        let factor = cnec.ampere_per_megawatt();
        assert!((factor - 1.443375).abs() < 1e-5);
        let upper_mw = cnec.upper_bound(Unit::Megawatt).unwrap();
        assert!((upper_mw - 1000.0 / factor).abs() < 1e-9);
    }

    #[test]
    fn test_no_threshold_means_infinite_margin() {
        let cnec = FlowCnec::new("c", "FR", "line-1", State::preventive());
        assert!(cnec.compute_margin(1e6, Unit::Megawatt).is_infinite());
    }
}
