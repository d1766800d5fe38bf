//! Instants, contingencies and network states.
//!
//! A [`State`] is the pair (contingency, instant) a monitored element or a
//! remedial action belongs to. The preventive state has no contingency.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instant of the operating timeline, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instant {
    Preventive,
    Outage,
    Auto,
    Curative,
}

impl Instant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instant::Preventive => "preventive",
            Instant::Outage => "outage",
            Instant::Auto => "auto",
            Instant::Curative => "curative",
        }
    }

    /// Whether remedial actions can be chosen by the optimizer at this instant.
    pub fn is_optimizable(&self) -> bool {
        matches!(self, Instant::Preventive | Instant::Curative)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outage of one or more network elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contingency {
    pub id: String,
    pub elements: Vec<String>,
}

impl Contingency {
    pub fn new(id: impl Into<String>, elements: Vec<String>) -> Self {
        Self {
            id: id.into(),
            elements,
        }
    }
}

/// A network state: the preventive state, or a contingency at a post-outage instant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct State {
    contingency: Option<String>,
    instant: Instant,
}

impl State {
    pub fn preventive() -> Self {
        Self {
            contingency: None,
            instant: Instant::Preventive,
        }
    }

    pub fn post_contingency(contingency: impl Into<String>, instant: Instant) -> Self {
        Self {
            contingency: Some(contingency.into()),
            instant,
        }
    }

    pub fn contingency(&self) -> Option<&str> {
        self.contingency.as_deref()
    }

    pub fn instant(&self) -> Instant {
        self.instant
    }

    pub fn is_preventive(&self) -> bool {
        self.contingency.is_none()
    }

    /// Stable textual id, e.g. `preventive` or `co-1 - curative`.
    pub fn id(&self) -> String {
        match &self.contingency {
            None => self.instant.to_string(),
            Some(co) => format!("{} - {}", co, self.instant),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_ordering() {
        assert!(Instant::Preventive < Instant::Outage);
        assert!(Instant::Outage < Instant::Auto);
        assert!(Instant::Auto < Instant::Curative);
        assert!(Instant::Curative.is_optimizable());
        assert!(!Instant::Outage.is_optimizable());
    }

    #[test]
    fn test_state_ids() {
        assert_eq!(State::preventive().id(), "preventive");
        let curative = State::post_contingency("co-1", Instant::Curative);
        assert_eq!(curative.id(), "co-1 - curative");
        assert_eq!(curative.contingency(), Some("co-1"));
        assert!(!curative.is_preventive());
    }
}
