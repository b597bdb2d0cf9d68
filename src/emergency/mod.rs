pub mod emergency_handler;
pub mod routing;

pub use emergency_handler::{
    dynamic_priority, ClassPerformance, CompletionStatus, ConflictSeverity, Deregistration,
    EmergencyCoordinator, EmergencyRecord, EmergencyStatus, LiveConditions, MultiEmergencyPlan,
    PathClearance, PathOptimization, PerformanceReport, PreemptionEntry, PreemptionMode,
    PreemptionResult, Registration, ResolutionAction, ResolutionStep, ResponseHistoryEntry,
    RouteConflict, Urgency, VehicleClass,
};
pub use routing::{EmergencyRoute, RouteProvider, SimulatedRouter};
