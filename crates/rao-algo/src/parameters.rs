//! Search-tree parameters.
//!
//! Parameters are an immutable snapshot handed to [`crate::SearchTree`].
//! They deserialize from TOML with per-field defaults, so a parameter file
//! only needs the values that differ from the defaults:
//!
//! ```toml
//! [objective_function]
//! objective_type = "max_min_margin"
//! unit = "megawatt"
//!
//! [tree]
//! stop_criterion = "at_target_objective_value"
//! target_objective_value = 0.0
//! maximum_search_depth = 3
//! leaves_in_parallel = 4
//!
//! [usage_limits]
//! max_ra = 3
//! max_topo_per_tso = { FR = 1 }
//! ```

use anyhow::{Context, Result};
use rao_core::{Boundary, RaUsageLimits, RaoError, RaoResult, Unit};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the objective function measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveFunctionType {
    /// Maximize the smallest margin
    #[default]
    MaxMinMargin,
    /// Maximize the smallest margin, PTDF-normalized once the network is secure
    MaxMinRelativeMargin,
    /// Only minimize virtual costs (functional cost is always zero)
    VirtualCostsOnly,
}

/// When the tree search may stop before its depth limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCriterion {
    /// Keep searching while children improve the cost
    #[default]
    MinObjective,
    /// Stop as soon as the cost reaches `target_objective_value`
    AtTargetObjectiveValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveFunctionParameters {
    #[serde(default)]
    pub objective_type: ObjectiveFunctionType,
    #[serde(default)]
    pub unit: Unit,
    /// Overcost added when the sensitivity computation fell back to a degraded mode
    #[serde(default)]
    pub sensitivity_fallback_over_cost: f64,
    /// Overcost added when the sensitivity computation partially failed
    #[serde(default = "default_sensitivity_failure_over_cost")]
    pub sensitivity_failure_over_cost: f64,
    /// Cost per remedial action in excess of the usage limits
    #[serde(default = "default_usage_limit_violation_cost")]
    pub usage_limit_violation_cost: f64,
}

impl Default for ObjectiveFunctionParameters {
    fn default() -> Self {
        Self {
            objective_type: ObjectiveFunctionType::default(),
            unit: Unit::default(),
            sensitivity_fallback_over_cost: 0.0,
            sensitivity_failure_over_cost: default_sensitivity_failure_over_cost(),
            usage_limit_violation_cost: default_usage_limit_violation_cost(),
        }
    }
}

fn default_sensitivity_failure_over_cost() -> f64 {
    10_000.0
}

fn default_usage_limit_violation_cost() -> f64 {
    1_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParameters {
    #[serde(default)]
    pub stop_criterion: StopCriterion,
    #[serde(default)]
    pub target_objective_value: f64,
    #[serde(default = "default_maximum_search_depth")]
    pub maximum_search_depth: usize,
    #[serde(default = "default_leaves_in_parallel")]
    pub leaves_in_parallel: usize,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            stop_criterion: StopCriterion::default(),
            target_objective_value: 0.0,
            maximum_search_depth: default_maximum_search_depth(),
            leaves_in_parallel: default_leaves_in_parallel(),
        }
    }
}

fn default_maximum_search_depth() -> usize {
    2
}

fn default_leaves_in_parallel() -> usize {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkActionParameters {
    /// Combinations of network action ids tested together
    #[serde(default)]
    pub predefined_combinations: Vec<Vec<String>>,
    /// A child must beat the best leaf by more than this (objective unit)
    #[serde(default)]
    pub absolute_min_impact_threshold: f64,
    /// Same, relative to the absolute value of the best leaf's cost
    #[serde(default)]
    pub relative_min_impact_threshold: f64,
    /// Skip actions more than this many boundaries away from the limiting elements
    #[serde(default)]
    pub max_number_of_boundaries_for_skipping_actions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeActionsOptimizationParameters {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Stop iterating when the cost improves by less than this
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    #[serde(default = "default_pst_penalty_cost")]
    pub pst_penalty_cost: f64,
    #[serde(default = "default_hvdc_penalty_cost")]
    pub hvdc_penalty_cost: f64,
    #[serde(default = "default_injection_penalty_cost")]
    pub injection_penalty_cost: f64,
    /// Sensitivities below this are left out of the linear problem
    #[serde(default = "default_sensitivity_threshold")]
    pub sensitivity_threshold: f64,
}

impl Default for RangeActionsOptimizationParameters {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            convergence_tolerance: default_convergence_tolerance(),
            pst_penalty_cost: default_pst_penalty_cost(),
            hvdc_penalty_cost: default_hvdc_penalty_cost(),
            injection_penalty_cost: default_injection_penalty_cost(),
            sensitivity_threshold: default_sensitivity_threshold(),
        }
    }
}

impl RangeActionsOptimizationParameters {
    /// Variation penalty for a range action kind (`pst`, `hvdc`, `injection`).
    pub fn penalty_cost(&self, kind: &str) -> f64 {
        match kind {
            "pst" => self.pst_penalty_cost,
            "hvdc" => self.hvdc_penalty_cost,
            _ => self.injection_penalty_cost,
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_convergence_tolerance() -> f64 {
    1e-2
}

fn default_pst_penalty_cost() -> f64 {
    0.01
}

fn default_hvdc_penalty_cost() -> f64 {
    0.001
}

fn default_injection_penalty_cost() -> f64 {
    0.001
}

fn default_sensitivity_threshold() -> f64 {
    1e-6
}

/// Monitored-element (MNEC) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MnecParameters {
    /// Margin decrease (MW) accepted on an MNEC compared to its initial margin
    #[serde(default = "default_acceptable_margin_decrease")]
    pub acceptable_margin_decrease: f64,
    #[serde(default = "default_violation_cost")]
    pub violation_cost: f64,
}

impl Default for MnecParameters {
    fn default() -> Self {
        Self {
            acceptable_margin_decrease: default_acceptable_margin_decrease(),
            violation_cost: default_violation_cost(),
        }
    }
}

fn default_acceptable_margin_decrease() -> f64 {
    50.0
}

fn default_violation_cost() -> f64 {
    10.0
}

/// Loop-flow settings. Requires a reference program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFlowParameters {
    /// Increase (MW) accepted above the initial loop flow
    #[serde(default = "default_acceptable_increase")]
    pub acceptable_increase: f64,
    #[serde(default = "default_violation_cost")]
    pub violation_cost: f64,
}

impl Default for LoopFlowParameters {
    fn default() -> Self {
        Self {
            acceptable_increase: default_acceptable_increase(),
            violation_cost: default_violation_cost(),
        }
    }
}

fn default_acceptable_increase() -> f64 {
    10.0
}

/// PTDF boundaries used by relative margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativeMarginsParameters {
    #[serde(default)]
    pub ptdf_boundaries: Vec<Boundary>,
    /// Floor applied to PTDF sums so near-zero sums do not blow relative margins up
    #[serde(default = "default_ptdf_sum_lower_bound")]
    pub ptdf_sum_lower_bound: f64,
}

impl Default for RelativeMarginsParameters {
    fn default() -> Self {
        Self {
            ptdf_boundaries: Vec::new(),
            ptdf_sum_lower_bound: default_ptdf_sum_lower_bound(),
        }
    }
}

fn default_ptdf_sum_lower_bound() -> f64 {
    0.01
}

/// Complete configuration of one search-tree run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchTreeParameters {
    #[serde(default)]
    pub objective_function: ObjectiveFunctionParameters,
    #[serde(default)]
    pub tree: TreeParameters,
    #[serde(default)]
    pub usage_limits: RaUsageLimits,
    #[serde(default)]
    pub network_actions: NetworkActionParameters,
    #[serde(default)]
    pub range_actions: RangeActionsOptimizationParameters,
    #[serde(default)]
    pub mnec: Option<MnecParameters>,
    #[serde(default)]
    pub loop_flow: Option<LoopFlowParameters>,
    #[serde(default)]
    pub relative_margins: Option<RelativeMarginsParameters>,
}

impl SearchTreeParameters {
    pub fn from_toml_str(contents: &str) -> RaoResult<Self> {
        let params: SearchTreeParameters =
            toml::from_str(contents).map_err(|e| RaoError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_toml_string(&self) -> RaoResult<String> {
        toml::to_string_pretty(self).map_err(|e| RaoError::Parse(e.to_string()))
    }

    /// Reject inconsistent settings before any search starts.
    pub fn validate(&self) -> RaoResult<()> {
        if self.tree.leaves_in_parallel == 0 {
            return Err(RaoError::Config("leaves_in_parallel must be at least 1".into()));
        }
        if self.range_actions.max_iterations == 0 {
            return Err(RaoError::Config("max_iterations must be at least 1".into()));
        }
        let nap = &self.network_actions;
        if nap.absolute_min_impact_threshold < 0.0 || nap.relative_min_impact_threshold < 0.0 {
            return Err(RaoError::Config("min impact thresholds must be non-negative".into()));
        }
        if self.range_actions.convergence_tolerance < 0.0 {
            return Err(RaoError::Config("convergence_tolerance must be non-negative".into()));
        }
        if self.objective_function.objective_type == ObjectiveFunctionType::MaxMinRelativeMargin {
            let relative = self.relative_margins.as_ref().ok_or_else(|| {
                RaoError::Config("relative margins require a [relative_margins] section".into())
            })?;
            if relative.ptdf_boundaries.is_empty() {
                return Err(RaoError::Config(
                    "relative margins require at least one PTDF boundary".into(),
                ));
            }
            if relative.ptdf_sum_lower_bound <= 0.0 {
                return Err(RaoError::Config("ptdf_sum_lower_bound must be positive".into()));
            }
        }
        Ok(())
    }

    pub fn is_relative(&self) -> bool {
        self.objective_function.objective_type == ObjectiveFunctionType::MaxMinRelativeMargin
    }

    pub fn unit(&self) -> Unit {
        self.objective_function.unit
    }
}

/// Load search-tree parameters from a TOML file.
pub fn load_parameters(path: &Path) -> Result<SearchTreeParameters> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading parameters from {}", path.display()))?;
    let params = SearchTreeParameters::from_toml_str(&contents)
        .with_context(|| format!("parsing parameters from {}", path.display()))?;
    Ok(params)
}

/// Write search-tree parameters to a TOML file.
pub fn save_parameters(path: &Path, params: &SearchTreeParameters) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, params.to_toml_string()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SearchTreeParameters::default();
        assert_eq!(params.tree.stop_criterion, StopCriterion::MinObjective);
        assert_eq!(params.tree.maximum_search_depth, 2);
        assert_eq!(params.tree.leaves_in_parallel, 1);
        assert_eq!(params.range_actions.max_iterations, 10);
        assert!(params.usage_limits.is_unlimited());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let params = SearchTreeParameters::from_toml_str(
            r#"
            [tree]
            stop_criterion = "at_target_objective_value"
            target_objective_value = -10.0
            leaves_in_parallel = 4

            [usage_limits]
            max_ra = 2
            max_topo_per_tso = { FR = 1 }
            "#,
        )
        .unwrap();
        assert_eq!(params.tree.stop_criterion, StopCriterion::AtTargetObjectiveValue);
        assert_eq!(params.tree.target_objective_value, -10.0);
        assert_eq!(params.tree.leaves_in_parallel, 4);
        assert_eq!(params.tree.maximum_search_depth, 2);
        assert_eq!(params.usage_limits.max_ra, Some(2));
        assert_eq!(params.usage_limits.max_topo_per_tso["FR"], 1);
        assert_eq!(params.range_actions.pst_penalty_cost, 0.01);
    }

    #[test]
    fn test_relative_margin_requires_boundaries() {
        let err = SearchTreeParameters::from_toml_str(
            r#"
            [objective_function]
            objective_type = "max_min_relative_margin"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, RaoError::Config(_)));

        let ok = SearchTreeParameters::from_toml_str(
            r#"
            [objective_function]
            objective_type = "max_min_relative_margin"

            [relative_margins]
            ptdf_boundaries = ["FR-BE", "BE-NL"]
            "#,
        )
        .unwrap();
        let relative = ok.relative_margins.unwrap();
        assert_eq!(relative.ptdf_boundaries.len(), 2);
        assert_eq!(relative.ptdf_sum_lower_bound, 0.01);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = SearchTreeParameters::from_toml_str("[tree]\nleaves_in_parallel = 0\n").unwrap_err();
        assert!(matches!(err, RaoError::Config(_)));
        let err = SearchTreeParameters::from_toml_str("[tree]\nleaves_in_parallel = \"x\"\n").unwrap_err();
        assert!(matches!(err, RaoError::Parse(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("search_tree.toml");
        let mut params = SearchTreeParameters::default();
        params.tree.maximum_search_depth = 5;
        params.mnec = Some(MnecParameters::default());
        save_parameters(&path, &params).unwrap();
        let loaded = load_parameters(&path).unwrap();
        assert_eq!(loaded, params);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_parameters(Path::new("/nonexistent/params.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/params.toml"));
    }
}
