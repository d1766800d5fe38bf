use super::{FlowResult, ReferenceProgram, SensitivityEngine, SensitivityRequest};
use crate::parameters::SearchTreeParameters;
use crate::perimeter::OptimizationPerimeter;
use crate::result::RemedialActionActivation;
use rao_core::{
    Boundary, CnecId, NetworkActionId, NetworkSnapshot, RangeActionId, RaoError, RaoResult,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Runs the sensitivity engine for one perimeter and post-processes its output.
pub struct SensitivityComputer {
    engine: Arc<dyn SensitivityEngine>,
    perimeter: Arc<OptimizationPerimeter>,
    ptdf_areas: BTreeSet<String>,
    ptdf_boundaries: Vec<Boundary>,
    ptdf_sum_lower_bound: f64,
    reference_program: Option<ReferenceProgram>,
    initial_setpoints: BTreeMap<RangeActionId, f64>,
}

impl SensitivityComputer {
    /// `root` is the snapshot before any remedial action of the perimeter;
    /// range-action initial setpoints are read from it.
    pub fn new(
        engine: Arc<dyn SensitivityEngine>,
        perimeter: Arc<OptimizationPerimeter>,
        params: &SearchTreeParameters,
        reference_program: Option<ReferenceProgram>,
        root: &NetworkSnapshot,
    ) -> RaoResult<Self> {
        if params.loop_flow.is_some() && reference_program.is_none() {
            return Err(RaoError::Config(
                "loop-flow costs require a reference program".into(),
            ));
        }

        let mut ptdf_areas = BTreeSet::new();
        let (ptdf_boundaries, ptdf_sum_lower_bound) = match &params.relative_margins {
            Some(relative) if params.is_relative() => {
                for b in &relative.ptdf_boundaries {
                    ptdf_areas.insert(b.from.clone());
                    ptdf_areas.insert(b.to.clone());
                }
                (relative.ptdf_boundaries.clone(), relative.ptdf_sum_lower_bound)
            }
            _ => (Vec::new(), 0.0),
        };
        // Commercial flows are only needed when loop flows are penalised
        let reference_program = reference_program.filter(|_| params.loop_flow.is_some());
        if let Some(program) = &reference_program {
            ptdf_areas.extend(program.areas().cloned());
        }

        let mut initial_setpoints = BTreeMap::new();
        for ra in perimeter.range_actions() {
            let setpoint = ra.current_setpoint(root).ok_or_else(|| {
                RaoError::Config(format!(
                    "range action '{}' has no setpoint on snapshot '{}'",
                    ra.id,
                    root.id()
                ))
            })?;
            initial_setpoints.insert(ra.id.clone(), setpoint);
        }

        Ok(Self {
            engine,
            perimeter,
            ptdf_areas,
            ptdf_boundaries,
            ptdf_sum_lower_bound,
            reference_program,
            initial_setpoints,
        })
    }

    pub fn perimeter(&self) -> &Arc<OptimizationPerimeter> {
        &self.perimeter
    }

    pub fn initial_setpoints(&self) -> &BTreeMap<RangeActionId, f64> {
        &self.initial_setpoints
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Flows and sensitivities of `snapshot`.
    pub fn compute(&self, snapshot: &NetworkSnapshot) -> RaoResult<FlowResult> {
        let request = SensitivityRequest {
            cnecs: self.perimeter.flow_cnecs(),
            range_actions: self.perimeter.range_actions(),
            ptdf_areas: &self.ptdf_areas,
        };
        let values = self.engine.run(snapshot, &request)?;

        if let Some(missing) = self
            .perimeter
            .flow_cnecs()
            .iter()
            .find(|c| !values.flows_mw.contains_key(&c.id))
        {
            return Err(RaoError::Simulation(format!(
                "{} returned no flow for cnec '{}' on '{}'",
                self.engine.name(),
                missing.id,
                snapshot.id()
            )));
        }

        let lookup = |cnec: &CnecId, area: &str| {
            values
                .zonal_ptdfs
                .get(&(cnec.clone(), area.to_string()))
                .copied()
                .unwrap_or(0.0)
        };

        let mut ptdf_sums = HashMap::new();
        if !self.ptdf_boundaries.is_empty() {
            for cnec in self.perimeter.flow_cnecs() {
                let sum: f64 = self
                    .ptdf_boundaries
                    .iter()
                    .map(|b| (lookup(&cnec.id, &b.from) - lookup(&cnec.id, &b.to)).abs())
                    .sum();
                ptdf_sums.insert(cnec.id.clone(), sum.max(self.ptdf_sum_lower_bound));
            }
        }

        let commercial_flows = self.reference_program.as_ref().map(|program| {
            self.perimeter
                .loop_flow_cnecs()
                .map(|cnec| {
                    let commercial: f64 = program
                        .net_positions
                        .iter()
                        .map(|(area, np)| lookup(&cnec.id, area) * np)
                        .sum();
                    (cnec.id.clone(), commercial)
                })
                .collect::<HashMap<_, _>>()
        });

        debug!(
            snapshot = snapshot.id(),
            status = %values.status,
            cnecs = values.flows_mw.len(),
            "sensitivity computation done"
        );
        Ok(FlowResult::new(values, ptdf_sums, commercial_flows))
    }

    /// Remedial actions currently applied on `snapshot`.
    pub fn activation(
        &self,
        snapshot: &NetworkSnapshot,
        network_actions: BTreeSet<NetworkActionId>,
    ) -> RemedialActionActivation {
        let mut setpoints = BTreeMap::new();
        let mut taps = BTreeMap::new();
        for ra in self.perimeter.range_actions() {
            if let Some(setpoint) = ra.current_setpoint(snapshot) {
                setpoints.insert(ra.id.clone(), setpoint);
            }
            if ra.is_pst() {
                if let Some(tap) = snapshot.tap(&ra.network_element) {
                    taps.insert(ra.id.clone(), tap);
                }
            }
        }
        RemedialActionActivation {
            state: self.perimeter.main_state().clone(),
            network_actions,
            setpoints,
            taps,
            initial_setpoints: self.initial_setpoints.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{LoopFlowParameters, ObjectiveFunctionType, RelativeMarginsParameters};
    use crate::sensitivity::LinearSensitivityEngine;
    use rao_core::{FlowCnec, RangeAction, State, Unit};

    fn perimeter() -> Arc<OptimizationPerimeter> {
        let cnec = FlowCnec::new("c", "FR", "line-1", State::preventive())
            .with_symmetric_threshold(Unit::Megawatt, 100.0)
            .with_loop_flow_threshold(50.0);
        let hvdc = RangeAction::hvdc("hvdc", "FR", "hvdc-1", -500.0, 500.0);
        Arc::new(
            OptimizationPerimeter::new(
                State::preventive(),
                vec![Arc::new(cnec)],
                vec![],
                vec![Arc::new(hvdc)],
            )
            .unwrap(),
        )
    }

    fn root() -> NetworkSnapshot {
        NetworkSnapshot::new("root").with_setpoint("hvdc-1", 100.0)
    }

    fn engine() -> Arc<LinearSensitivityEngine> {
        Arc::new(
            LinearSensitivityEngine::new(root())
                .with_reference_flow("c", 80.0)
                .with_sensitivity("c", "hvdc-1", 0.5)
                .with_zonal_ptdf("c", "FR", 0.3)
                .with_zonal_ptdf("c", "BE", -0.1),
        )
    }

    #[test]
    fn test_loop_flow_requires_reference_program() {
        let mut params = SearchTreeParameters::default();
        params.loop_flow = Some(LoopFlowParameters::default());
        let err = SensitivityComputer::new(engine(), perimeter(), &params, None, &root())
            .err()
            .unwrap();
        assert!(matches!(err, RaoError::Config(_)));
    }

    #[test]
    fn test_ptdf_sums_and_commercial_flows() {
        let mut params = SearchTreeParameters::default();
        params.objective_function.objective_type = ObjectiveFunctionType::MaxMinRelativeMargin;
        params.relative_margins = Some(RelativeMarginsParameters {
            ptdf_boundaries: vec!["FR-BE".parse().unwrap()],
            ptdf_sum_lower_bound: 0.01,
        });
        params.loop_flow = Some(LoopFlowParameters::default());
        let program = ReferenceProgram::new()
            .with_net_position("FR", 100.0)
            .with_net_position("BE", -100.0);
        let computer =
            SensitivityComputer::new(engine(), perimeter(), &params, Some(program), &root()).unwrap();
        let flows = computer.compute(&root()).unwrap();
        let cnec = &computer.perimeter().flow_cnecs()[0];
        assert!((flows.ptdf_zonal_sum(cnec) - 0.4).abs() < 1e-9);
        // 0.3 * 100 + (-0.1) * (-100) = 40
        assert!((flows.commercial_flow(cnec).unwrap() - 40.0).abs() < 1e-9);
        assert!((flows.loop_flow(cnec).unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_activation_reads_snapshot() {
        let params = SearchTreeParameters::default();
        let computer = SensitivityComputer::new(engine(), perimeter(), &params, None, &root()).unwrap();
        let moved = root().with_setpoint("hvdc-1", 250.0);
        let activation = computer.activation(&moved, BTreeSet::new());
        assert_eq!(activation.setpoint(&"hvdc".into()), Some(250.0));
        assert_eq!(activation.initial_setpoints[&RangeActionId::from("hvdc")], 100.0);
        assert_eq!(activation.activated_range_actions().len(), 1);
    }

    #[test]
    fn test_missing_setpoint_is_a_config_error() {
        let params = SearchTreeParameters::default();
        let bare = NetworkSnapshot::new("bare");
        let err = SensitivityComputer::new(engine(), perimeter(), &params, None, &bare)
            .err()
            .unwrap();
        assert!(matches!(err, RaoError::Config(_)));
    }
}
