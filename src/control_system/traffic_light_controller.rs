use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::config::{CycleConfig, EmergencyConfig, RED_FLOOR_SECS};
use crate::control_system::coordination::{CoordinationMode, CoordinationPlan, CoordinationStep};
use crate::error::{require_id, EngineError, Result};
use crate::shared_data::{round2, CongestionLevel};

/// Wait assumed when nothing has been observed yet.
const DEFAULT_AVERAGE_WAIT_SECS: f64 = 30.0;
const LONG_WAIT_SECS: f64 = 45.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalState {
    #[default]
    Red,
    Yellow,
    Green,
}

impl SignalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalState {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "red" => Ok(Self::Red),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            other => Err(EngineError::InvalidState(format!(
                "invalid traffic light state '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    North,
    South,
    East,
    West,
}

impl FromStr for Approach {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "north" => Ok(Self::North),
            "south" => Ok(Self::South),
            "east" => Ok(Self::East),
            "west" => Ok(Self::West),
            other => Err(EngineError::Validation(format!("invalid approach '{other}'"))),
        }
    }
}

/// Seconds spent in each state over one rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub green: u32,
    pub yellow: u32,
    pub red: u32,
}

impl Cycle {
    pub fn duration_of(&self, state: SignalState) -> u32 {
        match state {
            SignalState::Red => self.red,
            SignalState::Yellow => self.yellow,
            SignalState::Green => self.green,
        }
    }

    pub fn total(&self) -> u32 {
        self.green + self.yellow + self.red
    }

    /// Share of green against green plus red, as a percentage.
    fn green_share(&self) -> f64 {
        f64::from(self.green) / f64::from(self.green + self.red) * 100.0
    }
}

impl From<&CycleConfig> for Cycle {
    fn from(config: &CycleConfig) -> Self {
        Self {
            green: config.green,
            yellow: config.yellow,
            red: config.red,
        }
    }
}

/// Vehicles waiting per approach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensors {
    pub north: u32,
    pub south: u32,
    pub east: u32,
    pub west: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntersectionMetrics {
    /// Transitions into green.
    pub total_cycles: u64,
    pub average_wait_secs: f64,
    pub wait_observations: u64,
    pub throughput: u64,
}

/// Optional per-intersection overrides for `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionSettings {
    pub cycle: Option<Cycle>,
    pub sensors: Sensors,
    pub adaptive_mode: bool,
}

impl Default for IntersectionSettings {
    fn default() -> Self {
        Self {
            cycle: None,
            sensors: Sensors::default(),
            adaptive_mode: true,
        }
    }
}

/// A priority arrival far enough out to be served later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityIntent {
    pub vehicle_id: String,
    pub approach: Approach,
    pub due_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: String,
    pub state: SignalState,
    pub cycle: Cycle,
    pub sensors: Sensors,
    pub adaptive_mode: bool,
    pub priority: Priority,
    /// Vehicle that put the intersection under emergency priority.
    pub priority_holder: Option<String>,
    pub scheduled_priority: Option<PriorityIntent>,
    pub metrics: IntersectionMetrics,
    pub last_transition: u64,
    /// Bumped on every state change.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub intersection_id: String,
    pub previous_state: SignalState,
    pub current_state: SignalState,
    pub timestamp: u64,
    pub scheduled_duration_secs: u32,
    pub generation: u64,
}

/// Telemetry fed to adaptive timing; absent fields lower the confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveInput {
    pub vehicle_count: Option<u32>,
    pub congestion_level: Option<CongestionLevel>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationResult {
    pub intersection_id: String,
    pub previous_cycle: Cycle,
    pub new_cycle: Cycle,
    /// Relative change of the green share, in percent.
    pub improvement_pct: f64,
    pub confidence: f64,
    /// False when the intersection is not in adaptive mode.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalAction {
    ImmediateGreen,
    ScheduledPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityArrival {
    pub vehicle_id: String,
    pub intersection_id: String,
    pub approach: Approach,
    pub action: ArrivalAction,
    pub estimated_clearance_ms: u64,
    /// Present when the signal was switched right away.
    pub transition: Option<TransitionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Excellent,
    Good,
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionStatus {
    pub intersection_id: String,
    pub state: SignalState,
    pub runtime_ms: u64,
    pub cycle: Cycle,
    pub priority: Priority,
    pub sensors: Sensors,
    pub metrics: IntersectionMetrics,
    /// Green share of the whole cycle, in percent.
    pub efficiency: u32,
    pub health: Health,
    pub generation: u64,
}

/// Owns every intersection and is the only place their state changes.
pub struct IntersectionController {
    intersections: HashMap<String, Intersection>,
    cycle_limits: CycleConfig,
    immediate_green_eta_ms: u64,
    arrival_clearance_ms: u64,
}

impl Default for IntersectionController {
    fn default() -> Self {
        Self::new(CycleConfig::default(), &EmergencyConfig::default())
    }
}

impl IntersectionController {
    pub fn new(cycle_limits: CycleConfig, emergency: &EmergencyConfig) -> Self {
        Self {
            intersections: HashMap::new(),
            cycle_limits: CycleConfig {
                min_red: cycle_limits.min_red.max(RED_FLOOR_SECS),
                ..cycle_limits
            },
            immediate_green_eta_ms: emergency.immediate_green_eta_ms,
            arrival_clearance_ms: emergency.arrival_clearance_ms,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Intersection> {
        self.intersections.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.intersections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.intersections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intersections.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.intersections.keys().map(String::as_str)
    }

    pub fn generation(&self, id: &str) -> Result<u64> {
        Ok(self.intersection(id)?.generation)
    }

    fn intersection(&self, id: &str) -> Result<&Intersection> {
        self.intersections
            .get(id)
            .ok_or_else(|| EngineError::intersection_not_found(id))
    }

    fn intersection_mut(&mut self, id: &str) -> Result<&mut Intersection> {
        self.intersections
            .get_mut(id)
            .ok_or_else(|| EngineError::intersection_not_found(id))
    }

    pub fn initialize(
        &mut self,
        id: &str,
        settings: IntersectionSettings,
        now: u64,
    ) -> Result<&Intersection> {
        require_id("intersection id", id)?;
        if self.intersections.contains_key(id) {
            return Err(EngineError::Duplicate {
                kind: "intersection",
                id: id.to_string(),
            });
        }
        let cycle = settings
            .cycle
            .unwrap_or_else(|| Cycle::from(&self.cycle_limits));
        if cycle.green == 0 || cycle.yellow == 0 {
            return Err(EngineError::Validation(
                "green and yellow durations must be positive".to_string(),
            ));
        }
        if cycle.red < self.cycle_limits.min_red {
            return Err(EngineError::Validation(format!(
                "red duration must be at least {} seconds",
                self.cycle_limits.min_red
            )));
        }

        log::info!(
            "[Controller] Intersection {} online: green {}s, yellow {}s, red {}s, adaptive {}",
            id,
            cycle.green,
            cycle.yellow,
            cycle.red,
            settings.adaptive_mode
        );
        let intersection = self
            .intersections
            .entry(id.to_string())
            .or_insert(Intersection {
                id: id.to_string(),
                state: SignalState::Red,
                cycle,
                sensors: settings.sensors,
                adaptive_mode: settings.adaptive_mode,
                priority: Priority::Normal,
                priority_holder: None,
                scheduled_priority: None,
                metrics: IntersectionMetrics::default(),
                last_transition: now,
                generation: 0,
            });
        Ok(&*intersection)
    }

    /// The only operation that changes an intersection's signal state.
    pub fn transition(
        &mut self,
        id: &str,
        new_state: SignalState,
        duration_secs: Option<u32>,
        now: u64,
    ) -> Result<TransitionRecord> {
        let intersection = self.intersection_mut(id)?;
        let previous_state = intersection.state;
        intersection.state = new_state;
        intersection.last_transition = now;
        intersection.generation += 1;
        if new_state == SignalState::Green {
            intersection.metrics.total_cycles += 1;
        }

        let record = TransitionRecord {
            intersection_id: id.to_string(),
            previous_state,
            current_state: new_state,
            timestamp: now,
            scheduled_duration_secs: duration_secs
                .unwrap_or_else(|| intersection.cycle.duration_of(new_state)),
            generation: intersection.generation,
        };
        log::debug!(
            "[Controller] {}: {} -> {} for {}s (generation {})",
            id,
            previous_state,
            new_state,
            record.scheduled_duration_secs,
            record.generation
        );
        Ok(record)
    }

    /// [`transition`](Self::transition) for a state given by name.
    pub fn transition_named(
        &mut self,
        id: &str,
        new_state: &str,
        duration_secs: Option<u32>,
        now: u64,
    ) -> Result<TransitionRecord> {
        let state = new_state.parse::<SignalState>()?;
        self.transition(id, state, duration_secs, now)
    }

    /// Rescales the cycle from load and congestion, then nudges it by the
    /// observed average wait.
    pub fn adapt_timing(&mut self, id: &str, input: &AdaptiveInput) -> Result<AdaptationResult> {
        let limits = self.cycle_limits;
        let intersection = self.intersection_mut(id)?;
        let previous = intersection.cycle;
        let confidence = adaptation_confidence(input);

        if !intersection.adaptive_mode {
            return Ok(AdaptationResult {
                intersection_id: id.to_string(),
                previous_cycle: previous,
                new_cycle: previous,
                improvement_pct: 0.0,
                confidence,
                applied: false,
            });
        }

        let count = input.vehicle_count.unwrap_or(0);
        let load = (f64::from(count) / 20.0).clamp(0.5, 2.0);
        let adjustment = congestion_adjustment(input.congestion_level.unwrap_or(CongestionLevel::Low));
        let green = (f64::from(previous.green) * load * adjustment).round();
        let red = (f64::from(previous.red) / adjustment)
            .round()
            .max(f64::from(limits.min_red));

        let average_wait = if intersection.metrics.wait_observations == 0 {
            DEFAULT_AVERAGE_WAIT_SECS
        } else {
            intersection.metrics.average_wait_secs
        };
        let feedback = if average_wait > LONG_WAIT_SECS { 1.1 } else { 0.95 };

        let new_cycle = Cycle {
            green: ((green * feedback).round() as u32)
                .min(limits.max_green)
                .max(limits.min_green),
            yellow: previous.yellow,
            red: ((red / feedback).round() as u32).max(limits.min_red),
        };
        intersection.cycle = new_cycle;

        let improvement_pct =
            round2((new_cycle.green_share() - previous.green_share()) / previous.green_share() * 100.0);
        log::debug!(
            "[Controller] {} adapted: green {}s -> {}s, red {}s -> {}s ({:+.2}%)",
            id,
            previous.green,
            new_cycle.green,
            previous.red,
            new_cycle.red,
            improvement_pct
        );

        Ok(AdaptationResult {
            intersection_id: id.to_string(),
            previous_cycle: previous,
            new_cycle,
            improvement_pct,
            confidence,
            applied: true,
        })
    }

    /// Near arrivals get green now; the rest are recorded for later.
    pub fn handle_priority_arrival(
        &mut self,
        id: &str,
        vehicle_id: &str,
        approach: Approach,
        eta_ms: u64,
        now: u64,
    ) -> Result<PriorityArrival> {
        require_id("vehicle id", vehicle_id)?;
        self.intersection(id)?;
        let estimated_clearance_ms = eta_ms.saturating_add(self.arrival_clearance_ms);

        if eta_ms <= self.immediate_green_eta_ms {
            let record = self.apply_preemption(id, vehicle_id, now)?;
            log::info!(
                "[Controller] {} arriving at {} from {:?} in {} ms: immediate green",
                vehicle_id,
                id,
                approach,
                eta_ms
            );
            return Ok(PriorityArrival {
                vehicle_id: vehicle_id.to_string(),
                intersection_id: id.to_string(),
                approach,
                action: ArrivalAction::ImmediateGreen,
                estimated_clearance_ms,
                transition: Some(record),
            });
        }

        let due_at = now.saturating_add(eta_ms - self.immediate_green_eta_ms);
        let intersection = self.intersection_mut(id)?;
        intersection.scheduled_priority = Some(PriorityIntent {
            vehicle_id: vehicle_id.to_string(),
            approach,
            due_at,
        });
        log::info!(
            "[Controller] {} arriving at {} from {:?} in {} ms: priority scheduled for {}",
            vehicle_id,
            id,
            approach,
            eta_ms,
            due_at
        );

        Ok(PriorityArrival {
            vehicle_id: vehicle_id.to_string(),
            intersection_id: id.to_string(),
            approach,
            action: ArrivalAction::ScheduledPriority,
            estimated_clearance_ms,
            transition: None,
        })
    }

    /// Green plus emergency priority on behalf of a vehicle.
    pub fn apply_preemption(
        &mut self,
        id: &str,
        vehicle_id: &str,
        now: u64,
    ) -> Result<TransitionRecord> {
        let record = self.transition(id, SignalState::Green, None, now)?;
        let intersection = self.intersection_mut(id)?;
        intersection.priority = Priority::Emergency;
        intersection.priority_holder = Some(vehicle_id.to_string());
        if intersection
            .scheduled_priority
            .as_ref()
            .is_some_and(|intent| intent.vehicle_id == vehicle_id)
        {
            intersection.scheduled_priority = None;
        }
        Ok(record)
    }

    /// Returns the intersection to normal priority. `true` if it was under
    /// emergency priority or had one scheduled.
    pub fn release_priority(&mut self, id: &str) -> Result<bool> {
        let intersection = self.intersection_mut(id)?;
        let was_held =
            intersection.priority == Priority::Emergency || intersection.scheduled_priority.is_some();
        intersection.priority = Priority::Normal;
        intersection.priority_holder = None;
        intersection.scheduled_priority = None;
        if was_held {
            log::info!("[Controller] {} back to normal priority", id);
        }
        Ok(was_held)
    }

    /// Releases every intersection held or scheduled by `vehicle_id`.
    pub fn release_priority_held_by(&mut self, vehicle_id: &str) -> Vec<String> {
        let mut released: Vec<String> = self
            .intersections
            .values_mut()
            .filter(|i| {
                i.priority_holder.as_deref() == Some(vehicle_id)
                    || i.scheduled_priority
                        .as_ref()
                        .is_some_and(|intent| intent.vehicle_id == vehicle_id)
            })
            .map(|i| {
                i.priority = Priority::Normal;
                i.priority_holder = None;
                i.scheduled_priority = None;
                i.id.clone()
            })
            .collect();
        released.sort();
        released
    }

    /// Builds a plan of green transitions; scheduling them is the caller's job.
    pub fn coordinate(
        &self,
        ids: &[String],
        mode: CoordinationMode,
        green_wave_offset_ms: u64,
    ) -> Result<CoordinationPlan> {
        if ids.len() < 2 {
            return Err(EngineError::Validation(
                "at least 2 intersections required for coordination".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "intersection {id} listed more than once"
                )));
            }
        }

        let steps = ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let intersection = self.intersection(id)?;
                let delay_ms = match mode {
                    CoordinationMode::GreenWave => (index as u64).saturating_mul(green_wave_offset_ms),
                    CoordinationMode::Synchronized => 0,
                    CoordinationMode::AdaptiveNetwork => {
                        (intersection.metrics.average_wait_secs * 1000.0).round() as u64
                    }
                };
                Ok(CoordinationStep {
                    intersection_id: id.clone(),
                    delay_ms,
                    action: mode.action().to_string(),
                    generation: intersection.generation,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "[Controller] {} plan across {} intersections",
            mode,
            steps.len()
        );
        Ok(CoordinationPlan { mode, steps })
    }

    pub fn status(&self, id: &str, now: u64) -> Result<IntersectionStatus> {
        let intersection = self.intersection(id)?;
        let cycle = intersection.cycle;
        let efficiency =
            (f64::from(cycle.green) / f64::from(cycle.total()) * 100.0).round() as u32;
        let balance = f64::from(cycle.green) / f64::from(cycle.red);
        let health = if balance > 0.5 && intersection.metrics.total_cycles > 10 {
            Health::Excellent
        } else if balance > 0.3 {
            Health::Good
        } else {
            Health::NeedsAttention
        };

        Ok(IntersectionStatus {
            intersection_id: id.to_string(),
            state: intersection.state,
            runtime_ms: now.saturating_sub(intersection.last_transition),
            cycle,
            priority: intersection.priority,
            sensors: intersection.sensors,
            metrics: intersection.metrics,
            efficiency,
            health,
            generation: intersection.generation,
        })
    }

    /// Folds one observed wait into the rolling average.
    pub fn observe_wait(&mut self, id: &str, wait_secs: f64, vehicles_served: u32) -> Result<()> {
        if !wait_secs.is_finite() || wait_secs < 0.0 {
            return Err(EngineError::Validation(
                "wait time must be a non-negative number".to_string(),
            ));
        }
        let metrics = &mut self.intersection_mut(id)?.metrics;
        let n = metrics.wait_observations as f64;
        metrics.average_wait_secs = (metrics.average_wait_secs * n + wait_secs) / (n + 1.0);
        metrics.wait_observations += 1;
        metrics.throughput += u64::from(vehicles_served);
        Ok(())
    }

    pub fn update_sensors(&mut self, id: &str, sensors: Sensors) -> Result<()> {
        self.intersection_mut(id)?.sensors = sensors;
        Ok(())
    }
}

fn congestion_adjustment(level: CongestionLevel) -> f64 {
    match level {
        CongestionLevel::Low => 0.8,
        CongestionLevel::Moderate => 1.0,
        CongestionLevel::High => 1.3,
        CongestionLevel::Critical => 1.6,
    }
}

fn adaptation_confidence(input: &AdaptiveInput) -> f64 {
    let mut confidence = 0.0;
    if input.vehicle_count.is_some_and(|c| c > 0) {
        confidence += 0.4;
    }
    if input.congestion_level.is_some() {
        confidence += 0.3;
    }
    if input.timestamp.is_some() {
        confidence += 0.3;
    }
    round2(confidence)
}
