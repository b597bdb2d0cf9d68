// coordination.rs
//
// Multi-intersection coordination plans. The controller only builds the plan;
// each step is handed to the deferred scheduler together with the generation
// the intersection had when the plan was made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    /// Consecutive greens offset by a fixed travel time.
    #[default]
    GreenWave,
    /// Every intersection turns green together.
    Synchronized,
    /// Each intersection waits its own rolling average wait.
    AdaptiveNetwork,
}

impl CoordinationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GreenWave => "green_wave",
            Self::Synchronized => "synchronized",
            Self::AdaptiveNetwork => "adaptive_network",
        }
    }

    /// Label attached to every step of a plan built in this mode.
    pub fn action(self) -> &'static str {
        match self {
            Self::GreenWave => "green_on_schedule",
            Self::Synchronized => "synchronized_green",
            Self::AdaptiveNetwork => "adaptive_timing",
        }
    }
}

impl fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinationMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green_wave" => Ok(Self::GreenWave),
            "synchronized" => Ok(Self::Synchronized),
            "adaptive_network" => Ok(Self::AdaptiveNetwork),
            other => Err(EngineError::InvalidState(format!(
                "invalid coordination type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationStep {
    pub intersection_id: String,
    pub delay_ms: u64,
    pub action: String,
    /// Generation of the intersection when the plan was built.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationPlan {
    pub mode: CoordinationMode,
    pub steps: Vec<CoordinationStep>,
}

impl CoordinationPlan {
    pub fn coordinated_intersections(&self) -> usize {
        self.steps.len()
    }
}
