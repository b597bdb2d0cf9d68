// routing.rs
//
// The routing collaborator. Real map data is out of reach here, so the
// default router simulates a route from seeded random values: a 2-12 km trip
// at two minutes per kilometre, 2-4 named waypoints and one signalled
// intersection every 500 m.

use serde::{Deserialize, Serialize};

use crate::rng::{RandomSource, SeededRandom};

const MINUTES_PER_KM: f64 = 2.0;
const KM_PER_INTERSECTION: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRoute {
    pub distance_km: f64,
    pub duration_ms: u64,
    pub waypoints: Vec<String>,
    pub intersection_count: u32,
    /// Set once live conditions have been folded into the route.
    pub optimization_applied: bool,
}

/// Produces an initial route between two named places.
pub trait RouteProvider: Send {
    fn route(&mut self, origin: &str, destination: &str) -> EmergencyRoute;
}

/// Seeded stand-in for a real router.
pub struct SimulatedRouter {
    rng: Box<dyn RandomSource>,
}

impl SimulatedRouter {
    pub fn new(rng: Box<dyn RandomSource>) -> Self {
        Self { rng }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(Box::new(SeededRandom::new(seed)))
    }
}

impl RouteProvider for SimulatedRouter {
    fn route(&mut self, origin: &str, destination: &str) -> EmergencyRoute {
        let distance_km = self.rng.range_f64(2.0, 12.0);
        let duration_ms = (distance_km * MINUTES_PER_KM * 60_000.0).round() as u64;
        let waypoint_count = self.rng.range_u32(2, 4);
        let waypoints = (1..=waypoint_count)
            .map(|i| format!("waypoint_{i}_{origin}_to_{destination}"))
            .collect();

        EmergencyRoute {
            distance_km,
            duration_ms,
            waypoints,
            intersection_count: (distance_km / KM_PER_INTERSECTION).ceil() as u32,
            optimization_applied: false,
        }
    }
}
