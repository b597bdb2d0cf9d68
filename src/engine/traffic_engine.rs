// src/engine/traffic_engine.rs
//
// The single mutation point of the engine. Every operation reads "now" from
// the injected clock, validates before it mutates, and routes signal changes
// through the intersection controller, either directly or via the deferred
// scheduler.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{sleep, Duration};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::control_system::{
    AdaptationResult, AdaptiveInput, Approach, ArrivalAction, CoordinationMode, CoordinationPlan,
    Intersection, IntersectionController, IntersectionSettings, IntersectionStatus,
    PriorityArrival, SignalState, TransitionRecord,
};
use crate::emergency::{
    CompletionStatus, Deregistration, EmergencyCoordinator, LiveConditions, MultiEmergencyPlan,
    PathOptimization, PerformanceReport, PreemptionMode, PreemptionResult, Registration, Urgency,
    VehicleClass,
};
use crate::error::{EngineError, Result};
use crate::flow_analyzer::{FlowAnalyzer, FlowOptimization, PatternReport, TrafficInsight};
use crate::forecaster::{
    CongestionForecast, CongestionForecaster, EventImpact, EventReport, LearningMode,
    PatternAnalysis, PatternSample, RiskAssessment, RiskConditions, RouteConstraints,
    RouteOptimization, WeatherImpact, WeatherReport,
};
use crate::rng::SeededRandom;
use crate::scheduler::{DeferredScheduler, DeferredTask, TaskId, TaskOwner};

/// What `ingest` did with one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingestion {
    pub insight: TrafficInsight,
    /// Present when the intersection is in adaptive mode.
    pub adaptation: Option<AdaptationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPreemption {
    pub preemption: PreemptionResult,
    /// One deferred green per targeted intersection, in target order.
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCoordination {
    pub plan: CoordinationPlan,
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledArrival {
    pub arrival: PriorityArrival,
    /// The deferred preemption for a scheduled-priority arrival.
    pub task: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRelease {
    pub deregistration: Deregistration,
    pub cancelled_tasks: Vec<TaskId>,
    /// Intersections this vehicle still held, now back to normal priority.
    pub released_priority: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredResult {
    Applied(TransitionRecord),
    /// The intersection changed after the task was scheduled.
    Discarded { current_generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredOutcome {
    pub task: DeferredTask,
    pub result: DeferredResult,
}

impl DeferredOutcome {
    pub fn applied(&self) -> bool {
        matches!(self.result, DeferredResult::Applied(_))
    }
}

pub struct TrafficEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    controller: IntersectionController,
    coordinator: EmergencyCoordinator,
    forecaster: CongestionForecaster,
    analyzer: FlowAnalyzer,
    scheduler: DeferredScheduler,
}

impl TrafficEngine {
    /// Builds every component from `config`, with all simulated values drawn
    /// from generators seeded by `config.rng_seed`.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let seed = config.rng_seed;
        let forecaster = CongestionForecaster::new(
            config.forecaster.interval_ms,
            config.forecaster.history_capacity,
            Box::new(SeededRandom::new(seed.wrapping_add(2))),
        );
        Self::with_components(
            config.clone(),
            clock,
            EmergencyCoordinator::seeded(seed),
            forecaster,
        )
    }

    /// Uses caller-built coordinator and forecaster, e.g. with pinned
    /// random sources.
    pub fn with_components(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        coordinator: EmergencyCoordinator,
        forecaster: CongestionForecaster,
    ) -> Self {
        Self {
            controller: IntersectionController::new(config.cycle, &config.emergency),
            analyzer: FlowAnalyzer::new(config.analyzer.history_capacity),
            scheduler: DeferredScheduler::new(),
            coordinator,
            forecaster,
            clock,
            config,
        }
    }

    pub fn with_system_clock(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> &IntersectionController {
        &self.controller
    }

    pub fn coordinator(&self) -> &EmergencyCoordinator {
        &self.coordinator
    }

    pub fn forecaster(&self) -> &CongestionForecaster {
        &self.forecaster
    }

    pub fn analyzer(&self) -> &FlowAnalyzer {
        &self.analyzer
    }

    pub fn scheduler(&self) -> &DeferredScheduler {
        &self.scheduler
    }

    // ---- intersections ----

    pub fn initialize_intersection(
        &mut self,
        id: &str,
        settings: IntersectionSettings,
    ) -> Result<Intersection> {
        let now = self.now();
        self.controller.initialize(id, settings, now).cloned()
    }

    pub fn transition(
        &mut self,
        id: &str,
        state: SignalState,
        duration_secs: Option<u32>,
    ) -> Result<TransitionRecord> {
        let now = self.now();
        self.controller.transition(id, state, duration_secs, now)
    }

    pub fn transition_named(
        &mut self,
        id: &str,
        state: &str,
        duration_secs: Option<u32>,
    ) -> Result<TransitionRecord> {
        let now = self.now();
        self.controller.transition_named(id, state, duration_secs, now)
    }

    pub fn adapt_timing(&mut self, id: &str, input: &AdaptiveInput) -> Result<AdaptationResult> {
        self.controller.adapt_timing(id, input)
    }

    pub fn status(&self, id: &str) -> Result<IntersectionStatus> {
        self.controller.status(id, self.now())
    }

    pub fn observe_wait(&mut self, id: &str, wait_secs: f64, vehicles_served: u32) -> Result<()> {
        self.controller.observe_wait(id, wait_secs, vehicles_served)
    }

    pub fn release_priority(&mut self, id: &str) -> Result<bool> {
        self.controller.release_priority(id)
    }

    /// Near arrivals switch now; distant ones become a deferred preemption
    /// owned by the vehicle. Only registered vehicles may claim priority.
    pub fn handle_priority_arrival(
        &mut self,
        id: &str,
        vehicle_id: &str,
        approach: Approach,
        eta_ms: u64,
    ) -> Result<ScheduledArrival> {
        if self.coordinator.get(vehicle_id).is_none() {
            return Err(EngineError::vehicle_not_found(vehicle_id));
        }
        let now = self.now();
        let arrival = self
            .controller
            .handle_priority_arrival(id, vehicle_id, approach, eta_ms, now)?;
        let task = match arrival.action {
            ArrivalAction::ImmediateGreen => None,
            ArrivalAction::ScheduledPriority => {
                let lead_ms = eta_ms.saturating_sub(self.config.emergency.immediate_green_eta_ms);
                let due_at = now.saturating_add(lead_ms);
                let generation = self.controller.generation(id)?;
                Some(self.scheduler.schedule(
                    due_at,
                    id,
                    generation,
                    TaskOwner::Emergency(vehicle_id.to_string()),
                ))
            }
        };
        Ok(ScheduledArrival { arrival, task })
    }

    /// Plans the coordination and schedules one deferred green per step.
    pub fn coordinate(
        &mut self,
        ids: &[String],
        mode: CoordinationMode,
    ) -> Result<ScheduledCoordination> {
        let now = self.now();
        let plan = self.controller.coordinate(
            ids,
            mode,
            self.config.coordination.green_wave_offset_ms,
        )?;
        let tasks = plan
            .steps
            .iter()
            .map(|step| {
                self.scheduler.schedule(
                    now.saturating_add(step.delay_ms),
                    &step.intersection_id,
                    step.generation,
                    TaskOwner::Coordination,
                )
            })
            .collect();
        Ok(ScheduledCoordination { plan, tasks })
    }

    /// Records a reading, feeds the forecaster history and, for adaptive
    /// intersections, retunes the cycle.
    pub fn ingest(&mut self, intersection: &str, vehicle_count: u32) -> Result<Ingestion> {
        let adaptive = self
            .controller
            .get(intersection)
            .map(|i| i.adaptive_mode)
            .ok_or_else(|| EngineError::intersection_not_found(intersection))?;
        let now = self.now();

        let insight = self.analyzer.record(intersection, vehicle_count, now)?;
        if let Some(sample) = self.analyzer.latest(intersection) {
            self.forecaster.record_history(intersection, sample);
        }

        let adaptation = if adaptive {
            let input = AdaptiveInput {
                vehicle_count: Some(vehicle_count),
                congestion_level: Some(insight.congestion_level),
                timestamp: Some(now),
            };
            Some(self.controller.adapt_timing(intersection, &input)?)
        } else {
            None
        };
        Ok(Ingestion {
            insight,
            adaptation,
        })
    }

    /// Fires every deferred action that is due. A task whose captured
    /// generation no longer matches is dropped.
    pub fn run_due(&mut self) -> Vec<DeferredOutcome> {
        let now = self.now();
        let mut outcomes = Vec::new();
        for task in self.scheduler.drain_due(now) {
            let current_generation = match self.controller.generation(&task.intersection_id) {
                Ok(generation) => generation,
                Err(err) => {
                    log::warn!("[Engine] Dropping {}: {}", task.id, err);
                    continue;
                }
            };
            if current_generation != task.generation {
                log::warn!(
                    "[Engine] Discarding stale {} for {} (generation {} -> {})",
                    task.id,
                    task.intersection_id,
                    task.generation,
                    current_generation
                );
                outcomes.push(DeferredOutcome {
                    task,
                    result: DeferredResult::Discarded { current_generation },
                });
                continue;
            }

            let applied = match &task.owner {
                TaskOwner::Coordination => {
                    self.controller
                        .transition(&task.intersection_id, SignalState::Green, None, now)
                }
                TaskOwner::Emergency(vehicle_id) => {
                    self.controller
                        .apply_preemption(&task.intersection_id, vehicle_id, now)
                }
            };
            match applied {
                Ok(record) => outcomes.push(DeferredOutcome {
                    task,
                    result: DeferredResult::Applied(record),
                }),
                Err(err) => log::warn!("[Engine] Could not apply {}: {}", task.id, err),
            }
        }
        outcomes
    }

    pub fn pending_actions(&self) -> usize {
        self.scheduler.pending()
    }

    // ---- emergencies ----

    pub fn register_emergency(
        &mut self,
        vehicle_id: &str,
        class: VehicleClass,
        origin: &str,
        destination: &str,
        urgency: Urgency,
    ) -> Result<Registration> {
        let now = self.now();
        self.coordinator
            .register(vehicle_id, class, origin, destination, urgency, now)
    }

    pub fn optimize_emergency_path(
        &mut self,
        vehicle_id: &str,
        conditions: LiveConditions,
    ) -> Result<PathOptimization> {
        let now = self.now();
        self.coordinator.optimize_path(vehicle_id, conditions, now)
    }

    /// Records the preemption and schedules a green ahead of the vehicle at
    /// each intersection: all at once, or spaced by the green-wave offset.
    pub fn preempt_intersections(
        &mut self,
        vehicle_id: &str,
        intersection_ids: &[String],
        mode: PreemptionMode,
    ) -> Result<ScheduledPreemption> {
        let generations = intersection_ids
            .iter()
            .map(|id| self.controller.generation(id))
            .collect::<Result<Vec<u64>>>()?;
        let now = self.now();
        let preemption =
            self.coordinator
                .preempt_intersections(vehicle_id, intersection_ids, mode, now)?;

        let offset = self.config.coordination.green_wave_offset_ms;
        let tasks = intersection_ids
            .iter()
            .zip(generations)
            .enumerate()
            .map(|(index, (id, generation))| {
                let delay = match mode {
                    PreemptionMode::Immediate => 0,
                    PreemptionMode::Scheduled => (index as u64).saturating_mul(offset),
                };
                self.scheduler.schedule(
                    now.saturating_add(delay),
                    id,
                    generation,
                    TaskOwner::Emergency(vehicle_id.to_string()),
                )
            })
            .collect();
        Ok(ScheduledPreemption { preemption, tasks })
    }

    pub fn coordinate_emergencies(&self, vehicle_ids: &[String]) -> Result<MultiEmergencyPlan> {
        self.coordinator.coordinate_multiple(vehicle_ids)
    }

    /// Retires the vehicle, cancels its pending preemptions and hands back
    /// any intersection it still holds.
    pub fn deregister_emergency(
        &mut self,
        vehicle_id: &str,
        status: CompletionStatus,
    ) -> Result<EmergencyRelease> {
        let now = self.now();
        let deregistration = self.coordinator.deregister(vehicle_id, status, now)?;
        let cancelled_tasks: Vec<TaskId> = self
            .scheduler
            .cancel_owned_by(vehicle_id)
            .into_iter()
            .map(|task| task.id)
            .collect();
        if !cancelled_tasks.is_empty() {
            log::info!(
                "[Engine] Cancelled {} pending action(s) for {}",
                cancelled_tasks.len(),
                vehicle_id
            );
        }
        let released_priority = self.controller.release_priority_held_by(vehicle_id);
        Ok(EmergencyRelease {
            deregistration,
            cancelled_tasks,
            released_priority,
        })
    }

    pub fn analyze_emergency_performance(&self, window_ms: u64) -> Option<PerformanceReport> {
        self.coordinator.analyze_performance(window_ms, self.now())
    }

    // ---- forecasting ----

    pub fn predict(&self, location: &str, horizon_ms: u64) -> Result<CongestionForecast> {
        self.forecaster.predict(location, horizon_ms, self.now())
    }

    pub fn analyze_patterns(
        &self,
        samples: &[PatternSample],
        mode: LearningMode,
    ) -> Result<PatternAnalysis> {
        self.forecaster.analyze_patterns(samples, mode)
    }

    /// Pattern analysis over the history `ingest` has built for a location.
    pub fn analyze_location_patterns(
        &self,
        location: &str,
        mode: LearningMode,
    ) -> Result<PatternAnalysis> {
        self.forecaster
            .analyze_patterns(&self.forecaster.history_for(location), mode)
    }

    pub fn assess_risk(&self, location: &str, conditions: &RiskConditions) -> Result<RiskAssessment> {
        self.forecaster.assess_risk(location, conditions, self.now())
    }

    pub fn optimize_routes(
        &self,
        origin: &str,
        destinations: &[String],
        constraints: RouteConstraints,
    ) -> Result<RouteOptimization> {
        self.forecaster
            .optimize_routes(origin, destinations, constraints, self.now())
    }

    pub fn integrate_weather(&mut self, location: &str, report: WeatherReport) -> Result<WeatherImpact> {
        let now = self.now();
        self.forecaster.integrate_weather(location, report, now)
    }

    pub fn integrate_event(&mut self, location: &str, report: EventReport) -> Result<EventImpact> {
        let now = self.now();
        self.forecaster.integrate_event(location, report, now)
    }

    // ---- flow analysis ----

    pub fn detect_flow_patterns(&self, intersection: &str, window_ms: u64) -> PatternReport {
        self.analyzer
            .detect_patterns(intersection, window_ms, self.now())
    }

    pub fn optimize_flow(&self, intersection: &str) -> Result<FlowOptimization> {
        self.analyzer.optimize(intersection)
    }

    /// Fires due deferred actions every `tick`. Intended to be spawned as an
    /// async task next to whatever feeds the engine.
    pub async fn run_scheduler_loop(engine: Arc<Mutex<Self>>, tick: Duration) {
        loop {
            {
                let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
                let outcomes = engine.run_due();
                if !outcomes.is_empty() {
                    let applied = outcomes.iter().filter(|o| o.applied()).count();
                    log::debug!(
                        "[Engine] Fired {} deferred action(s), {} applied",
                        outcomes.len(),
                        applied
                    );
                }
            }
            sleep(tick).await;
        }
    }
}
