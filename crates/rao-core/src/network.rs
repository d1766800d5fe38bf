//! Owned grid-state snapshot.
//!
//! The physical network model is owned by the simulation engine; the search
//! tree only needs a value it can clone per leaf and mutate through remedial
//! actions. A [`NetworkSnapshot`] records exactly that: the connection status
//! of switchable elements, continuous setpoints (injections, HVDC lines) and
//! phase-shifter tap positions.
//!
//! Snapshots are plain values. Cloning produces an independent copy, so two
//! leaves can never observe each other's mutations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mutable grid state of one search-tree leaf.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    id: String,
    connected: BTreeMap<String, bool>,
    setpoints: BTreeMap<String, f64>,
    taps: BTreeMap<String, i32>,
}

impl NetworkSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Register a switchable element with its initial status.
    pub fn with_element(mut self, element: impl Into<String>, connected: bool) -> Self {
        self.connected.insert(element.into(), connected);
        self
    }

    /// Register an element carrying a continuous setpoint (injection, HVDC).
    pub fn with_setpoint(mut self, element: impl Into<String>, setpoint: f64) -> Self {
        self.setpoints.insert(element.into(), setpoint);
        self
    }

    /// Register a phase-shifting transformer at the given tap.
    pub fn with_tap(mut self, element: impl Into<String>, tap: i32) -> Self {
        self.taps.insert(element.into(), tap);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rename the snapshot (leaves name their copy after their own id).
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn has_element(&self, element: &str) -> bool {
        self.connected.contains_key(element)
            || self.setpoints.contains_key(element)
            || self.taps.contains_key(element)
    }

    pub fn is_connected(&self, element: &str) -> Option<bool> {
        self.connected.get(element).copied()
    }

    /// Change the status of a switchable element. Returns `false` if the element is unknown.
    pub fn set_connected(&mut self, element: &str, connected: bool) -> bool {
        match self.connected.get_mut(element) {
            Some(status) => {
                *status = connected;
                true
            }
            None => false,
        }
    }

    pub fn setpoint(&self, element: &str) -> Option<f64> {
        self.setpoints.get(element).copied()
    }

    /// Change a continuous setpoint. Returns `false` if the element is unknown.
    pub fn set_setpoint(&mut self, element: &str, setpoint: f64) -> bool {
        match self.setpoints.get_mut(element) {
            Some(value) => {
                *value = setpoint;
                true
            }
            None => false,
        }
    }

    pub fn tap(&self, element: &str) -> Option<i32> {
        self.taps.get(element).copied()
    }

    /// Move a phase shifter to a tap. Returns `false` if the element is unknown.
    pub fn set_tap(&mut self, element: &str, tap: i32) -> bool {
        match self.taps.get_mut(element) {
            Some(value) => {
                *value = tap;
                true
            }
            None => false,
        }
    }

    /// Switchable elements and their status, in element order.
    pub fn statuses(&self) -> impl Iterator<Item = (&str, bool)> {
        self.connected.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Overwrite this snapshot's state with `other`'s, reusing allocations.
    pub fn reset_from(&mut self, other: &NetworkSnapshot) {
        self.id.clone_from(&other.id);
        self.connected.clone_from(&other.connected);
        self.setpoints.clone_from(&other.setpoints);
        self.taps.clone_from(&other.taps);
    }
}
