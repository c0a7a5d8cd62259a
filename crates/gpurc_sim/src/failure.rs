//! Failure injection for best-effort hardware steps.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A hardware step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePoint {
    /// Runlist disable
    RunlistDisable,
    /// Runlist enable
    RunlistEnable,
    /// Runlist preempt
    Preempt,
    /// TSG removal from a runlist
    RemoveTsg,
    /// TSG disable
    TsgDisable,
    /// Fault latch clear
    ClearFaultLatches,
}

/// Set of failing steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalFailures {
    points: IndexSet<FailurePoint>,
}

impl HalFailures {
    /// No failures
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `point` fail from now on
    #[must_use]
    pub fn with(mut self, point: FailurePoint) -> Self {
        self.points.insert(point);
        self
    }

    /// Make `point` fail
    pub fn inject(&mut self, point: FailurePoint) {
        self.points.insert(point);
    }

    /// Make `point` succeed again
    pub fn heal(&mut self, point: FailurePoint) {
        self.points.shift_remove(&point);
    }

    /// Check whether `point` fails
    #[must_use]
    pub fn fails(&self, point: FailurePoint) -> bool {
        self.points.contains(&point)
    }
}
