//! # rao-core: Remedial-Action Optimization Model
//!
//! Data model shared by the remedial-action optimizer: what can be done to
//! the grid, what must be secured, and the grid state the actions act upon.
//!
//! ## Design Philosophy
//!
//! The catalog ("CRAC") is read-only during optimization:
//! - **Network actions** are discrete, all-or-nothing changes (topology,
//!   fixed setpoints) tested by the search tree
//! - **Range actions** are continuous setpoints (PST angles, HVDC and
//!   injection setpoints) chosen by the linear optimizer
//! - **Flow CNECs** are branches monitored in a network state
//!
//! Grid state lives in [`NetworkSnapshot`] values that are owned by exactly
//! one search-tree leaf at a time. Optimization results are never attached to
//! catalog objects.
//!
//! ## Quick Start
//!
//! ```rust
//! use rao_core::*;
//!
//! let mut crac = Crac::new("example");
//! crac.add_network_action(
//!     NetworkAction::new(
//!         "open-line-2",
//!         "FR",
//!         vec![ElementaryAction::Topology {
//!             element: "line-2".into(),
//!             action: ActionType::Open,
//!         }],
//!     )
//!     .with_usage_rule(UsageRule::OnInstant { instant: Instant::Preventive }),
//! )?;
//! crac.add_flow_cnec(
//!     FlowCnec::new("line-1-prev", "FR", "line-1", State::preventive())
//!         .with_symmetric_threshold(Unit::Megawatt, 100.0),
//! )?;
//!
//! let mut snapshot = NetworkSnapshot::new("base")
//!     .with_element("line-1", true)
//!     .with_element("line-2", true);
//! let action = &crac.network_actions()[0];
//! assert!(action.apply(&mut snapshot));
//! assert_eq!(snapshot.is_connected("line-2"), Some(false));
//! # Ok::<(), rao_core::RaoError>(())
//! ```
//!
//! ## Modules
//!
//! - [`action`] - Network actions, usage rules and combinations
//! - [`range_action`] - PSTs, HVDC and injection range actions
//! - [`cnec`] - Flow CNECs, thresholds and units
//! - [`usage_limits`] - Per-instant limits and usage tallies
//! - [`area`] - Area adjacency graph for proximity pruning
//! - [`crac`] - The catalog itself

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod action;
pub mod area;
pub mod cnec;
pub mod crac;
pub mod error;
pub mod network;
pub mod range_action;
pub mod state;
pub mod usage_limits;

pub use action::{
    ActionType, CombinationOrigin, ElementaryAction, NetworkAction, NetworkActionCombination,
    UsageRule,
};
pub use area::{parse_boundaries, AreaGraph, Boundary};
pub use cnec::{FlowCnec, Threshold, Unit};
pub use crac::Crac;
pub use error::{RaoError, RaoResult};
pub use network::NetworkSnapshot;
pub use range_action::{RangeAction, RangeActionKind};
pub use state::{Contingency, Instant, State};
pub use usage_limits::{RaUsageLimits, UsageTally};

// Newtype wrappers for catalog ids so network-action, range-action and CNEC ids can't be mixed up
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

string_id!(NetworkActionId);
string_id!(RangeActionId);
string_id!(CnecId);
