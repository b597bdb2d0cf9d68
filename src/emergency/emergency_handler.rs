// emergency_handler.rs
//
// Active emergency records, their preemptions, multi-vehicle conflict
// resolution and the response history kept for analytics. This module never
// touches signal state; the engine turns its preemption records into
// deferred transitions on the controller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::emergency::routing::{EmergencyRoute, RouteProvider, SimulatedRouter};
use crate::error::{require_id, EngineError, Result};
use crate::forecaster::WeatherCondition;
use crate::rng::{RandomSource, SeededRandom};

const SLOW_RESPONSE_MS: u64 = 120_000;
const SLOW_AVERAGE_MS: f64 = 90_000.0;
const COMPLEX_ROUTE_INTERSECTIONS: usize = 5;
const TARGET_SUCCESS_RATE: f64 = 95.0;
const HIGH_CONFLICT_DELAY_SECS: u32 = 45;
const MEDIUM_CONFLICT_DELAY_SECS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Ambulance,
    FireTruck,
    Police,
    EmergencyServices,
}

impl VehicleClass {
    pub fn base_priority(self) -> f64 {
        match self {
            Self::Ambulance | Self::FireTruck | Self::EmergencyServices => 1.0,
            Self::Police => 2.0,
        }
    }

    /// Nominal time for an intersection to clear ahead of the vehicle.
    pub fn clearance_secs(self) -> u32 {
        match self {
            Self::Ambulance | Self::EmergencyServices => 45,
            Self::FireTruck => 60,
            Self::Police => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ambulance => "ambulance",
            Self::FireTruck => "fire_truck",
            Self::Police => "police",
            Self::EmergencyServices => "emergency_services",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ambulance" => Ok(Self::Ambulance),
            "fire_truck" => Ok(Self::FireTruck),
            "police" => Ok(Self::Police),
            "emergency_services" => Ok(Self::EmergencyServices),
            other => Err(EngineError::Validation(format!(
                "invalid emergency vehicle type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    #[default]
    High,
    Critical,
}

impl Urgency {
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Medium => 1.0,
            Self::High => 1.2,
            Self::Critical => 1.5,
        }
    }
}

impl FromStr for Urgency {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(EngineError::Validation(format!("invalid urgency '{other}'"))),
        }
    }
}

/// `base priority × urgency multiplier`, rounded to one decimal.
pub fn dynamic_priority(class: VehicleClass, urgency: Urgency) -> f64 {
    (class.base_priority() * urgency.multiplier() * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptionMode {
    #[default]
    Immediate,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionEntry {
    pub intersection_id: String,
    pub vehicle_id: String,
    pub mode: PreemptionMode,
    pub timestamp: u64,
    pub estimated_clearance_secs: u32,
    pub success: bool,
}

impl PreemptionEntry {
    fn window_end(&self) -> u64 {
        self.timestamp
            .saturating_add(u64::from(self.estimated_clearance_secs) * 1_000)
    }

    fn overlaps(&self, other: &PreemptionEntry) -> bool {
        self.timestamp <= other.window_end() && other.timestamp <= self.window_end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub vehicle_id: String,
    pub class: VehicleClass,
    pub origin: String,
    pub destination: String,
    pub urgency: Urgency,
    pub dynamic_priority: f64,
    pub route: EmergencyRoute,
    pub preemptions: Vec<PreemptionEntry>,
    pub status: EmergencyStatus,
    pub registered_at: u64,
    pub optimized_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathClearance {
    pub actions: Vec<String>,
    pub estimated_clearance_secs: u32,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub vehicle_id: String,
    pub priority: f64,
    pub route: EmergencyRoute,
    pub path_clearance: PathClearance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveConditions {
    /// Share of road capacity in use, in [0, 1].
    pub traffic_density: f64,
    pub weather: Option<WeatherCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathOptimization {
    pub original_route: EmergencyRoute,
    pub optimized_route: EmergencyRoute,
    pub time_saved_ms: u64,
    pub intersections_avoided: u32,
    /// In [0, 100].
    pub risk_reduction: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionResult {
    pub vehicle_id: String,
    pub mode: PreemptionMode,
    pub entries: Vec<PreemptionEntry>,
    /// The path is clear once the slowest intersection has cleared.
    pub estimated_path_clearance_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Medium,
    High,
}

impl ConflictSeverity {
    fn delay_secs(self) -> u32 {
        match self {
            Self::High => HIGH_CONFLICT_DELAY_SECS,
            Self::Medium => MEDIUM_CONFLICT_DELAY_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConflict {
    pub vehicles: (String, String),
    pub shared_points: Vec<String>,
    pub severity: ConflictSeverity,
}

impl RouteConflict {
    fn involves(&self, vehicle_id: &str) -> bool {
        self.vehicles.0 == vehicle_id || self.vehicles.1 == vehicle_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Proceed,
    YieldTemporarily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStep {
    pub vehicle_id: String,
    pub priority: f64,
    pub action: ResolutionAction,
    pub delay_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiEmergencyPlan {
    pub conflicts: Vec<RouteConflict>,
    /// Highest priority first.
    pub plan: Vec<ResolutionStep>,
    pub total_delay_secs: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHistoryEntry {
    pub vehicle_id: String,
    pub class: VehicleClass,
    pub registered_at: u64,
    pub completed_at: u64,
    pub response_time_ms: u64,
    pub success: bool,
    pub intersections_touched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deregistration {
    pub vehicle_id: String,
    pub response_time_ms: u64,
    /// Intersections whose preemption was released, first touch order.
    pub released_intersections: Vec<String>,
    pub final_status: CompletionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPerformance {
    pub count: usize,
    pub average_response_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_responses: usize,
    pub average_response_time_ms: f64,
    /// Percentage.
    pub success_rate: f64,
    pub by_class: BTreeMap<VehicleClass, ClassPerformance>,
    pub bottlenecks: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct EmergencyCoordinator {
    active: HashMap<String, EmergencyRecord>,
    history: Vec<ResponseHistoryEntry>,
    router: Box<dyn RouteProvider>,
    rng: Box<dyn RandomSource>,
}

impl Default for EmergencyCoordinator {
    fn default() -> Self {
        Self::seeded(crate::rng::DEFAULT_SEED)
    }
}

impl EmergencyCoordinator {
    pub fn new(router: Box<dyn RouteProvider>, rng: Box<dyn RandomSource>) -> Self {
        Self {
            active: HashMap::new(),
            history: Vec::new(),
            router,
            rng,
        }
    }

    /// Simulated router and complexity draws from one seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(
            Box::new(SimulatedRouter::seeded(seed)),
            Box::new(SeededRandom::new(seed.wrapping_add(1))),
        )
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&EmergencyRecord> {
        self.active.get(vehicle_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn history(&self) -> &[ResponseHistoryEntry] {
        &self.history
    }

    fn active_record(&self, vehicle_id: &str) -> Result<&EmergencyRecord> {
        self.active
            .get(vehicle_id)
            .ok_or_else(|| EngineError::vehicle_not_found(vehicle_id))
    }

    fn active_record_mut(&mut self, vehicle_id: &str) -> Result<&mut EmergencyRecord> {
        self.active
            .get_mut(vehicle_id)
            .ok_or_else(|| EngineError::vehicle_not_found(vehicle_id))
    }

    pub fn register(
        &mut self,
        vehicle_id: &str,
        class: VehicleClass,
        origin: &str,
        destination: &str,
        urgency: Urgency,
        now: u64,
    ) -> Result<Registration> {
        require_id("vehicle id", vehicle_id)?;
        require_id("origin", origin)?;
        require_id("destination", destination)?;
        if self.active.contains_key(vehicle_id) {
            return Err(EngineError::Duplicate {
                kind: "emergency vehicle",
                id: vehicle_id.to_string(),
            });
        }

        let route = self.router.route(origin, destination);
        let priority = dynamic_priority(class, urgency);
        let path_clearance = PathClearance {
            actions: [
                "Signal traffic management system",
                "Alert nearby intersections",
                "Calculate optimal timing",
                "Prepare preemption sequences",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
            estimated_clearance_secs: class.clearance_secs(),
            status: "initiated".to_string(),
        };

        self.active.insert(
            vehicle_id.to_string(),
            EmergencyRecord {
                vehicle_id: vehicle_id.to_string(),
                class,
                origin: origin.to_string(),
                destination: destination.to_string(),
                urgency,
                dynamic_priority: priority,
                route: route.clone(),
                preemptions: Vec::new(),
                status: EmergencyStatus::Active,
                registered_at: now,
                optimized_at: None,
            },
        );
        log::info!(
            "[Emergency] Registered {} {} ({} -> {}), priority {:.1}",
            class,
            vehicle_id,
            origin,
            destination,
            priority
        );

        Ok(Registration {
            vehicle_id: vehicle_id.to_string(),
            priority,
            route,
            path_clearance,
        })
    }

    /// Folds live conditions into the stored route.
    pub fn optimize_path(
        &mut self,
        vehicle_id: &str,
        conditions: LiveConditions,
        now: u64,
    ) -> Result<PathOptimization> {
        if !(0.0..=1.0).contains(&conditions.traffic_density) {
            return Err(EngineError::Validation(
                "traffic density must be within [0, 1]".to_string(),
            ));
        }
        let record = self.active_record_mut(vehicle_id)?;
        let original = record.route.clone();
        let mut optimized = original.clone();

        let congested = conditions.traffic_density > 0.7;
        let mut duration = optimized.duration_ms as f64;
        if congested {
            duration *= 0.8;
            optimized.intersection_count = optimized.intersection_count.saturating_sub(2);
        }
        if conditions.weather.is_some_and(WeatherCondition::is_adverse) {
            duration *= 1.1;
        }
        optimized.duration_ms = duration.round() as u64;
        optimized.optimization_applied = true;

        let mut risk_reduction = 0;
        if optimized.intersection_count < original.intersection_count {
            risk_reduction += 20;
        }
        if optimized.duration_ms < original.duration_ms {
            risk_reduction += 30;
        }
        if congested && optimized.optimization_applied {
            risk_reduction += 10;
        }

        record.route = optimized.clone();
        record.optimized_at = Some(now);

        Ok(PathOptimization {
            time_saved_ms: original.duration_ms.saturating_sub(optimized.duration_ms),
            intersections_avoided: original
                .intersection_count
                .saturating_sub(optimized.intersection_count),
            risk_reduction: risk_reduction.min(100),
            original_route: original,
            optimized_route: optimized,
        })
    }

    pub fn preempt_intersections(
        &mut self,
        vehicle_id: &str,
        intersection_ids: &[String],
        mode: PreemptionMode,
        now: u64,
    ) -> Result<PreemptionResult> {
        if intersection_ids.is_empty() {
            return Err(EngineError::Validation(
                "at least one intersection id is required".to_string(),
            ));
        }
        for id in intersection_ids {
            require_id("intersection id", id)?;
        }
        let class = self.active_record(vehicle_id)?.class;

        let entries: Vec<PreemptionEntry> = intersection_ids
            .iter()
            .map(|intersection_id| {
                let complexity = self.rng.range_f64(0.75, 1.25);
                PreemptionEntry {
                    intersection_id: intersection_id.clone(),
                    vehicle_id: vehicle_id.to_string(),
                    mode,
                    timestamp: now,
                    estimated_clearance_secs: (f64::from(class.clearance_secs()) * complexity)
                        .round() as u32,
                    success: true,
                }
            })
            .collect();
        let estimated_path_clearance_secs = entries
            .iter()
            .map(|e| e.estimated_clearance_secs)
            .max()
            .unwrap_or(0);

        self.active_record_mut(vehicle_id)?
            .preemptions
            .extend(entries.iter().cloned());
        log::info!(
            "[Emergency] {} preempting {} intersection(s), path clear in {}s",
            vehicle_id,
            entries.len(),
            estimated_path_clearance_secs
        );

        Ok(PreemptionResult {
            vehicle_id: vehicle_id.to_string(),
            mode,
            entries,
            estimated_path_clearance_secs,
        })
    }

    /// Ranks the vehicles and assigns yield delays for every route conflict.
    pub fn coordinate_multiple(&self, vehicle_ids: &[String]) -> Result<MultiEmergencyPlan> {
        if vehicle_ids.len() < 2 {
            return Err(EngineError::Validation(
                "at least 2 emergency vehicles required for coordination".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for id in vehicle_ids {
            if !seen.insert(id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "vehicle {id} listed more than once"
                )));
            }
        }
        let records = vehicle_ids
            .iter()
            .map(|id| self.active_record(id))
            .collect::<Result<Vec<_>>>()?;

        let mut conflicts = Vec::new();
        for (i, a) in records.iter().enumerate() {
            for b in &records[i + 1..] {
                if let Some(conflict) = find_conflict(a, b) {
                    if conflict.severity == ConflictSeverity::High
                        && (a.dynamic_priority - b.dynamic_priority).abs() < f64::EPSILON
                    {
                        return Err(EngineError::Conflict {
                            first: a.vehicle_id.clone(),
                            second: b.vehicle_id.clone(),
                        });
                    }
                    conflicts.push(conflict);
                }
            }
        }

        let mut ranked = records;
        // Stable: equal priorities keep the caller's order.
        ranked.sort_by(|a, b| b.dynamic_priority.total_cmp(&a.dynamic_priority));

        let plan: Vec<ResolutionStep> = ranked
            .iter()
            .enumerate()
            .map(|(rank, record)| {
                let delay_secs = if rank == 0 {
                    0
                } else {
                    conflicts
                        .iter()
                        .filter(|c| c.involves(&record.vehicle_id))
                        .map(|c| c.severity.delay_secs())
                        .sum()
                };
                ResolutionStep {
                    vehicle_id: record.vehicle_id.clone(),
                    priority: record.dynamic_priority,
                    action: if delay_secs > 0 {
                        ResolutionAction::YieldTemporarily
                    } else {
                        ResolutionAction::Proceed
                    },
                    delay_secs,
                }
            })
            .collect();
        let total_delay_secs = plan.iter().map(|s| s.delay_secs).sum();

        Ok(MultiEmergencyPlan {
            conflicts,
            plan,
            total_delay_secs,
        })
    }

    /// Retires an active record into the response history.
    pub fn deregister(
        &mut self,
        vehicle_id: &str,
        status: CompletionStatus,
        now: u64,
    ) -> Result<Deregistration> {
        let record = self
            .active
            .remove(vehicle_id)
            .ok_or_else(|| EngineError::vehicle_not_found(vehicle_id))?;

        let response_time_ms = now.saturating_sub(record.registered_at);
        let mut released_intersections: Vec<String> = Vec::new();
        for entry in &record.preemptions {
            if !released_intersections.contains(&entry.intersection_id) {
                released_intersections.push(entry.intersection_id.clone());
            }
        }

        self.history.push(ResponseHistoryEntry {
            vehicle_id: record.vehicle_id.clone(),
            class: record.class,
            registered_at: record.registered_at,
            completed_at: now,
            response_time_ms,
            success: status == CompletionStatus::Completed,
            intersections_touched: released_intersections.len(),
        });
        log::info!(
            "[Emergency] Deregistered {} ({:?}) after {} ms, released {} intersection(s)",
            vehicle_id,
            status,
            response_time_ms,
            released_intersections.len()
        );

        Ok(Deregistration {
            vehicle_id: record.vehicle_id,
            response_time_ms,
            released_intersections,
            final_status: status,
        })
    }

    /// Response analytics over the entries completed in the last `window_ms`.
    /// `None` when nothing completed in the window.
    pub fn analyze_performance(&self, window_ms: u64, now: u64) -> Option<PerformanceReport> {
        let cutoff = now.saturating_sub(window_ms);
        let recent: Vec<&ResponseHistoryEntry> = self
            .history
            .iter()
            .filter(|r| r.completed_at >= cutoff)
            .collect();
        if recent.is_empty() {
            return None;
        }

        let (average_response_time_ms, success_rate) = averages(&recent);

        let mut grouped: BTreeMap<VehicleClass, Vec<&ResponseHistoryEntry>> = BTreeMap::new();
        for entry in &recent {
            grouped.entry(entry.class).or_default().push(entry);
        }
        let by_class = grouped
            .into_iter()
            .map(|(class, entries)| {
                let (avg, rate) = averages(&entries);
                (
                    class,
                    ClassPerformance {
                        count: entries.len(),
                        average_response_time_ms: avg,
                        success_rate: rate,
                    },
                )
            })
            .collect();

        let mut bottlenecks = Vec::new();
        let slow = recent
            .iter()
            .filter(|r| r.response_time_ms > SLOW_RESPONSE_MS)
            .count();
        if slow as f64 > recent.len() as f64 * 0.2 {
            bottlenecks.push("High response time detected".to_string());
        }
        if recent
            .iter()
            .any(|r| r.intersections_touched > COMPLEX_ROUTE_INTERSECTIONS)
        {
            bottlenecks.push("Complex intersection navigation".to_string());
        }

        let mut recommendations = Vec::new();
        if average_response_time_ms > SLOW_AVERAGE_MS {
            recommendations.push("Optimize traffic preemption algorithms".to_string());
        }
        if success_rate < TARGET_SUCCESS_RATE {
            recommendations.push("Review emergency vehicle routing protocols".to_string());
        }
        if !bottlenecks.is_empty() {
            recommendations.push("Address identified system bottlenecks".to_string());
        }

        Some(PerformanceReport {
            total_responses: recent.len(),
            average_response_time_ms,
            success_rate,
            by_class,
            bottlenecks,
            recommendations,
        })
    }
}

/// (average response time, success percentage)
fn averages(entries: &[&ResponseHistoryEntry]) -> (f64, f64) {
    let n = entries.len() as f64;
    let total: u64 = entries.iter().map(|r| r.response_time_ms).sum();
    let successes = entries.iter().filter(|r| r.success).count() as f64;
    (total as f64 / n, successes / n * 100.0)
}

/// Two records conflict when they preempt a common intersection (high when
/// their clearance windows there overlap) or share a route waypoint.
fn find_conflict(a: &EmergencyRecord, b: &EmergencyRecord) -> Option<RouteConflict> {
    let mut shared_points: Vec<String> = Vec::new();
    let mut overlapping = false;
    for pa in &a.preemptions {
        for pb in b
            .preemptions
            .iter()
            .filter(|pb| pb.intersection_id == pa.intersection_id)
        {
            if !shared_points.contains(&pa.intersection_id) {
                shared_points.push(pa.intersection_id.clone());
            }
            overlapping |= pa.overlaps(pb);
        }
    }
    for waypoint in &a.route.waypoints {
        if b.route.waypoints.contains(waypoint) && !shared_points.contains(waypoint) {
            shared_points.push(waypoint.clone());
        }
    }
    if shared_points.is_empty() {
        return None;
    }

    Some(RouteConflict {
        vehicles: (a.vehicle_id.clone(), b.vehicle_id.clone()),
        shared_points,
        severity: if overlapping {
            ConflictSeverity::High
        } else {
            ConflictSeverity::Medium
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FixedRandom;

    fn coordinator() -> EmergencyCoordinator {
        EmergencyCoordinator::new(
            Box::new(SimulatedRouter::new(Box::new(FixedRandom(0.0)))),
            Box::new(FixedRandom(0.5)),
        )
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn priority_is_base_times_urgency() {
        assert_eq!(dynamic_priority(VehicleClass::Ambulance, Urgency::Critical), 1.5);
        assert_eq!(dynamic_priority(VehicleClass::FireTruck, Urgency::High), 1.2);
        assert_eq!(dynamic_priority(VehicleClass::Police, Urgency::Low), 1.6);
        assert_eq!(Urgency::default(), Urgency::High);
    }

    #[test]
    fn unknown_class_is_a_validation_error() {
        assert!(matches!(
            "hovercraft".parse::<VehicleClass>(),
            Err(EngineError::Validation(_))
        ));
        assert_eq!("fire_truck".parse::<VehicleClass>(), Ok(VehicleClass::FireTruck));
    }

    #[test]
    fn duplicate_registration_fails_until_deregistered() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "hospital", "site", Urgency::High, 0)
            .unwrap();
        let err = c
            .register("amb1", VehicleClass::Ambulance, "hospital", "site", Urgency::High, 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::Duplicate { .. }));
        assert_eq!(c.get("amb1").unwrap().registered_at, 0);

        c.deregister("amb1", CompletionStatus::Completed, 10).unwrap();
        assert!(c
            .register("amb1", VehicleClass::Ambulance, "hospital", "site", Urgency::High, 20)
            .is_ok());
    }

    #[test]
    fn registration_reports_route_and_clearance() {
        let mut c = coordinator();
        let reg = c
            .register("fire1", VehicleClass::FireTruck, "station", "mall", Urgency::Medium, 0)
            .unwrap();
        assert_eq!(reg.priority, 1.0);
        assert_eq!(reg.route.intersection_count, 4);
        assert_eq!(reg.path_clearance.actions.len(), 4);
        assert_eq!(reg.path_clearance.estimated_clearance_secs, 60);
        assert_eq!(c.get("fire1").unwrap().status, EmergencyStatus::Active);
    }

    #[test]
    fn congested_optimization_saves_time() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "a", "b", Urgency::High, 0)
            .unwrap();
        let opt = c
            .optimize_path(
                "amb1",
                LiveConditions {
                    traffic_density: 0.9,
                    weather: None,
                },
                5,
            )
            .unwrap();
        assert_eq!(opt.original_route.duration_ms, 240_000);
        assert_eq!(opt.optimized_route.duration_ms, 192_000);
        assert_eq!(opt.time_saved_ms, 48_000);
        assert_eq!(opt.intersections_avoided, 2);
        assert_eq!(opt.risk_reduction, 60);
        assert_eq!(c.get("amb1").unwrap().route.duration_ms, 192_000);
        assert_eq!(c.get("amb1").unwrap().optimized_at, Some(5));
    }

    #[test]
    fn adverse_weather_only_slows_the_route() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "a", "b", Urgency::High, 0)
            .unwrap();
        let opt = c
            .optimize_path(
                "amb1",
                LiveConditions {
                    traffic_density: 0.2,
                    weather: Some(WeatherCondition::Fog),
                },
                5,
            )
            .unwrap();
        assert_eq!(opt.optimized_route.duration_ms, 264_000);
        assert_eq!(opt.time_saved_ms, 0);
        assert_eq!(opt.risk_reduction, 0);
    }

    #[test]
    fn intersection_count_floors_at_zero() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "a", "b", Urgency::High, 0)
            .unwrap();
        let dense = LiveConditions {
            traffic_density: 0.95,
            weather: None,
        };
        for _ in 0..3 {
            c.optimize_path("amb1", dense, 1).unwrap();
        }
        assert_eq!(c.get("amb1").unwrap().route.intersection_count, 0);
        assert!(c
            .optimize_path(
                "amb1",
                LiveConditions {
                    traffic_density: 1.5,
                    weather: None
                },
                1
            )
            .is_err());
    }

    #[test]
    fn aggregate_clearance_is_the_max() {
        let mut c = EmergencyCoordinator::seeded(17);
        c.register("amb1", VehicleClass::Ambulance, "a", "b", Urgency::High, 0)
            .unwrap();
        let result = c
            .preempt_intersections("amb1", &ids(&["i1", "i2"]), PreemptionMode::Immediate, 0)
            .unwrap();
        let clearances: Vec<u32> = result
            .entries
            .iter()
            .map(|e| e.estimated_clearance_secs)
            .collect();
        assert_eq!(
            result.estimated_path_clearance_secs,
            *clearances.iter().max().unwrap()
        );
        for secs in clearances {
            assert!((34..=57).contains(&secs));
        }
        assert_eq!(c.get("amb1").unwrap().preemptions.len(), 2);
    }

    #[test]
    fn preemption_requires_targets_and_active_vehicle() {
        let mut c = coordinator();
        assert!(matches!(
            c.preempt_intersections("ghost", &ids(&["i1"]), PreemptionMode::Immediate, 0),
            Err(EngineError::NotFound { .. })
        ));
        c.register("amb1", VehicleClass::Ambulance, "a", "b", Urgency::High, 0)
            .unwrap();
        assert!(matches!(
            c.preempt_intersections("amb1", &[], PreemptionMode::Immediate, 0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn higher_priority_goes_first() {
        let mut c = coordinator();
        c.register("fire1", VehicleClass::FireTruck, "s", "x", Urgency::High, 0)
            .unwrap();
        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::Critical, 0)
            .unwrap();
        let plan = c.coordinate_multiple(&ids(&["amb1", "fire1"])).unwrap();
        assert_eq!(plan.plan[0].vehicle_id, "amb1");
        assert_eq!(plan.plan[0].priority, 1.5);
        assert_eq!(plan.plan[0].delay_secs, 0);
        assert_eq!(plan.plan[0].action, ResolutionAction::Proceed);

        let reversed = c.coordinate_multiple(&ids(&["fire1", "amb1"])).unwrap();
        assert_eq!(reversed.plan[0].vehicle_id, "amb1");
    }

    #[test]
    fn overlapping_preemptions_delay_the_lower_priority() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::Critical, 0)
            .unwrap();
        c.register("fire1", VehicleClass::FireTruck, "s", "x", Urgency::High, 0)
            .unwrap();
        c.register("pol1", VehicleClass::Police, "p", "z", Urgency::Low, 0)
            .unwrap();
        c.preempt_intersections("amb1", &ids(&["i1", "i2"]), PreemptionMode::Immediate, 0)
            .unwrap();
        // Same intersection, long after amb1's window closed.
        c.preempt_intersections("fire1", &ids(&["i2"]), PreemptionMode::Immediate, 600_000)
            .unwrap();
        c.preempt_intersections("pol1", &ids(&["i1"]), PreemptionMode::Immediate, 1_000)
            .unwrap();

        let plan = c
            .coordinate_multiple(&ids(&["amb1", "fire1", "pol1"]))
            .unwrap();
        assert_eq!(plan.conflicts.len(), 2);
        let order: Vec<&str> = plan.plan.iter().map(|s| s.vehicle_id.as_str()).collect();
        // police 2.0 x 0.8 = 1.6 outranks amb1 at 1.5
        assert_eq!(order, vec!["pol1", "amb1", "fire1"]);
        assert_eq!(plan.plan[0].delay_secs, 0);
        assert_eq!(plan.plan[1].delay_secs, 65);
        assert_eq!(plan.plan[2].delay_secs, 20);
        assert_eq!(plan.total_delay_secs, 85);
    }

    #[test]
    fn equal_priority_hard_conflict_is_unresolvable() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::High, 0)
            .unwrap();
        c.register("amb2", VehicleClass::Ambulance, "k", "z", Urgency::High, 0)
            .unwrap();
        c.preempt_intersections("amb1", &ids(&["i1"]), PreemptionMode::Immediate, 0)
            .unwrap();
        c.preempt_intersections("amb2", &ids(&["i1"]), PreemptionMode::Immediate, 0)
            .unwrap();
        assert!(matches!(
            c.coordinate_multiple(&ids(&["amb1", "amb2"])),
            Err(EngineError::Conflict { .. })
        ));
    }

    #[test]
    fn coordination_input_is_validated() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::High, 0)
            .unwrap();
        assert!(c.coordinate_multiple(&ids(&["amb1"])).is_err());
        assert!(c.coordinate_multiple(&ids(&["amb1", "amb1"])).is_err());
        assert!(matches!(
            c.coordinate_multiple(&ids(&["amb1", "ghost"])),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn deregistration_moves_record_to_history() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::High, 1_000)
            .unwrap();
        c.preempt_intersections("amb1", &ids(&["i1", "i2", "i1"]), PreemptionMode::Immediate, 1_000)
            .unwrap();
        let result = c.deregister("amb1", CompletionStatus::Cancelled, 31_000).unwrap();
        assert_eq!(result.response_time_ms, 30_000);
        assert_eq!(result.released_intersections, vec!["i1", "i2"]);
        assert!(c.get("amb1").is_none());
        assert_eq!(c.history().len(), 1);
        assert!(!c.history()[0].success);
        assert_eq!(c.history()[0].intersections_touched, 2);
        assert!(matches!(
            c.deregister("amb1", CompletionStatus::Completed, 40_000),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn performance_report_flags_bottlenecks() {
        let mut c = coordinator();
        assert!(c.analyze_performance(86_400_000, 0).is_none());

        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::High, 0)
            .unwrap();
        c.deregister("amb1", CompletionStatus::Completed, 60_000).unwrap();

        c.register("fire1", VehicleClass::FireTruck, "s", "x", Urgency::High, 0)
            .unwrap();
        let many = ids(&["i1", "i2", "i3", "i4", "i5", "i6"]);
        c.preempt_intersections("fire1", &many, PreemptionMode::Immediate, 0)
            .unwrap();
        c.deregister("fire1", CompletionStatus::Failed, 200_000).unwrap();

        let report = c.analyze_performance(86_400_000, 200_000).unwrap();
        assert_eq!(report.total_responses, 2);
        assert_eq!(report.average_response_time_ms, 130_000.0);
        assert_eq!(report.success_rate, 50.0);
        assert_eq!(report.by_class.len(), 2);
        assert_eq!(report.by_class[&VehicleClass::FireTruck].success_rate, 0.0);
        assert_eq!(
            report.bottlenecks,
            vec!["High response time detected", "Complex intersection navigation"]
        );
        assert_eq!(report.recommendations.len(), 3);

        // A window that only reaches the second completion.
        let narrow = c.analyze_performance(1_000, 200_000).unwrap();
        assert_eq!(narrow.total_responses, 1);
    }

    #[test]
    fn repeated_preemptions_count_once_toward_complexity() {
        let mut c = coordinator();
        c.register("amb1", VehicleClass::Ambulance, "h", "y", Urgency::High, 0)
            .unwrap();
        let looping = ids(&["i1", "i2", "i3", "i1", "i2", "i3"]);
        c.preempt_intersections("amb1", &looping, PreemptionMode::Immediate, 0)
            .unwrap();
        c.deregister("amb1", CompletionStatus::Completed, 30_000).unwrap();

        assert_eq!(c.history()[0].intersections_touched, 3);
        let report = c.analyze_performance(86_400_000, 30_000).unwrap();
        assert!(report.bottlenecks.is_empty());
    }
}
