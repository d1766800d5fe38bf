//! Continuous remedial actions ("range actions").
//!
//! Range actions have a setpoint that the linear optimizer chooses inside an
//! admissible range. Phase-shifting transformers (PSTs) are optimized on
//! their angle and then rounded to the closest available tap.

use crate::action::UsageRule;
use crate::network::NetworkSnapshot;
use crate::state::State;
use crate::RangeActionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Physical nature of a range action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeActionKind {
    /// Phase shifter: tap position → angle (degrees)
    Pst { tap_to_angle: BTreeMap<i32, f64> },
    /// HVDC active-power setpoint (MW)
    Hvdc,
    /// Generation/load injection setpoint (MW)
    Injection,
}

/// A continuous remedial action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeAction {
    pub id: RangeActionId,
    pub operator: String,
    pub network_element: String,
    pub kind: RangeActionKind,
    /// Lowest admissible setpoint (angle for PSTs)
    pub min_setpoint: f64,
    /// Highest admissible setpoint (angle for PSTs)
    pub max_setpoint: f64,
    /// Actions sharing a group id are aligned on one setpoint
    #[serde(default)]
    pub group_id: Option<String>,
    /// Lower is faster; used to order multi-pass optimizations
    #[serde(default)]
    pub speed: Option<u32>,
    #[serde(default)]
    pub usage_rules: Vec<UsageRule>,
}

impl RangeAction {
    /// A PST whose admissible range covers every tap of the table.
    pub fn pst(
        id: impl Into<String>,
        operator: impl Into<String>,
        element: impl Into<String>,
        tap_to_angle: BTreeMap<i32, f64>,
    ) -> Self {
        let min = tap_to_angle.values().copied().fold(f64::INFINITY, f64::min);
        let max = tap_to_angle.values().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            id: RangeActionId::new(id),
            operator: operator.into(),
            network_element: element.into(),
            kind: RangeActionKind::Pst { tap_to_angle },
            min_setpoint: min,
            max_setpoint: max,
            group_id: None,
            speed: None,
            usage_rules: Vec::new(),
        }
    }

    pub fn hvdc(
        id: impl Into<String>,
        operator: impl Into<String>,
        element: impl Into<String>,
        min_mw: f64,
        max_mw: f64,
    ) -> Self {
        Self::continuous(id, operator, element, RangeActionKind::Hvdc, min_mw, max_mw)
    }

    pub fn injection(
        id: impl Into<String>,
        operator: impl Into<String>,
        element: impl Into<String>,
        min_mw: f64,
        max_mw: f64,
    ) -> Self {
        Self::continuous(id, operator, element, RangeActionKind::Injection, min_mw, max_mw)
    }

    fn continuous(
        id: impl Into<String>,
        operator: impl Into<String>,
        element: impl Into<String>,
        kind: RangeActionKind,
        min: f64,
        max: f64,
    ) -> Self {
        Self {
            id: RangeActionId::new(id),
            operator: operator.into(),
            network_element: element.into(),
            kind,
            min_setpoint: min.min(max),
            max_setpoint: max.max(min),
            group_id: None,
            speed: None,
            usage_rules: Vec::new(),
        }
    }

    /// Restrict a PST to the taps in `[min_tap, max_tap]`.
    pub fn with_tap_range(mut self, min_tap: i32, max_tap: i32) -> Self {
        if let RangeActionKind::Pst { tap_to_angle } = &self.kind {
            let angles: Vec<f64> = tap_to_angle
                .range(min_tap..=max_tap)
                .map(|(_, angle)| *angle)
                .collect();
            if !angles.is_empty() {
                self.min_setpoint = angles.iter().copied().fold(f64::INFINITY, f64::min);
                self.max_setpoint = angles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            }
        }
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_speed(mut self, speed: u32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rules.push(rule);
        self
    }

    pub fn is_pst(&self) -> bool {
        matches!(self.kind, RangeActionKind::Pst { .. })
    }

    /// Short kind label, used to pick variation penalties.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            RangeActionKind::Pst { .. } => "pst",
            RangeActionKind::Hvdc => "hvdc",
            RangeActionKind::Injection => "injection",
        }
    }

    pub fn is_available_on(&self, state: &State) -> bool {
        self.usage_rules.iter().any(|rule| rule.is_available_on(state))
    }

    pub fn clamp(&self, setpoint: f64) -> f64 {
        setpoint.clamp(self.min_setpoint, self.max_setpoint)
    }

    pub fn tap_to_angle(&self, tap: i32) -> Option<f64> {
        match &self.kind {
            RangeActionKind::Pst { tap_to_angle } => tap_to_angle.get(&tap).copied(),
            _ => None,
        }
    }

    /// Admissible tap whose angle is closest to `angle`. Ties go to the lower tap.
    pub fn closest_tap(&self, angle: f64) -> Option<i32> {
        let RangeActionKind::Pst { tap_to_angle } = &self.kind else {
            return None;
        };
        tap_to_angle
            .iter()
            .filter(|(_, a)| **a >= self.min_setpoint - 1e-9 && **a <= self.max_setpoint + 1e-9)
            .min_by(|(ta, a), (tb, b)| {
                (**a - angle)
                    .abs()
                    .total_cmp(&(**b - angle).abs())
                    .then(ta.cmp(tb))
            })
            .map(|(tap, _)| *tap)
    }

    /// Setpoint currently applied on `snapshot` (angle for PSTs).
    pub fn current_setpoint(&self, snapshot: &NetworkSnapshot) -> Option<f64> {
        match &self.kind {
            RangeActionKind::Pst { .. } => snapshot
                .tap(&self.network_element)
                .and_then(|tap| self.tap_to_angle(tap)),
            RangeActionKind::Hvdc | RangeActionKind::Injection => {
                snapshot.setpoint(&self.network_element)
            }
        }
    }

    /// Apply a setpoint; PSTs move to the closest admissible tap.
    pub fn apply_setpoint(&self, snapshot: &mut NetworkSnapshot, setpoint: f64) -> bool {
        match &self.kind {
            RangeActionKind::Pst { .. } => match self.closest_tap(setpoint) {
                Some(tap) => snapshot.set_tap(&self.network_element, tap),
                None => false,
            },
            RangeActionKind::Hvdc | RangeActionKind::Injection => {
                snapshot.set_setpoint(&self.network_element, self.clamp(setpoint))
            }
        }
    }
}
