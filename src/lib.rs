//! Traffic-signal coordination engine.
//!
//! Intersection state machines with adaptive timing, emergency-vehicle
//! preemption and conflict resolution, congestion forecasting and flow
//! analysis, all driven through [`engine::TrafficEngine`].

pub mod clock;
pub mod communication;
pub mod config;
pub mod control_system;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod flow_analyzer;
pub mod forecaster;
pub mod global_variables;
pub mod monitoring;
pub mod rng;
pub mod scheduler;
pub mod shared_data;

pub use config::EngineConfig;
pub use engine::TrafficEngine;
pub use error::{ConfigError, EngineError, Result};
