// Demo run: a four-intersection corridor fed with simulated telemetry, a
// green wave and one ambulance run, on a real clock.
use smart_traffic_engine::control_system::{CoordinationMode, IntersectionSettings};
use smart_traffic_engine::emergency::{CompletionStatus, LiveConditions, PreemptionMode, Urgency, VehicleClass};
use smart_traffic_engine::forecaster::{RiskConditions, WeatherCondition, WeatherReport};
use smart_traffic_engine::rng::{RandomSource, SeededRandom};
use smart_traffic_engine::{EngineConfig, TrafficEngine};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{sleep, Duration};

const CORRIDOR: [&str; 4] = ["main_1st", "main_2nd", "main_3rd", "main_4th"];

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                return;
            }
        },
        None => EngineConfig::default(),
    };
    let seed = config.rng_seed;
    let engine = Arc::new(Mutex::new(TrafficEngine::with_system_clock(config)));
    let corridor: Vec<String> = CORRIDOR.iter().map(|s| s.to_string()).collect();

    {
        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &corridor {
            if let Err(e) = engine.initialize_intersection(id, IntersectionSettings::default()) {
                eprintln!("Could not initialize {}: {}", id, e);
                return;
            }
        }
        if let Err(e) = engine.integrate_weather(
            "main_3rd",
            WeatherReport {
                conditions: WeatherCondition::Rain,
                ..WeatherReport::default()
            },
        ) {
            eprintln!("Weather update failed: {}", e);
        }
    }

    tokio::spawn(TrafficEngine::run_scheduler_loop(
        Arc::clone(&engine),
        Duration::from_millis(100),
    ));

    // Telemetry
    let mut rng = SeededRandom::new(seed);
    for round in 0..5 {
        {
            let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            for id in &corridor {
                let count = rng.range_u32(5, 55);
                match engine.ingest(id, count) {
                    Ok(ingestion) => {
                        if let Some(adaptation) = ingestion.adaptation {
                            println!(
                                "[round {}] {}: {} vehicles ({}), green {}s red {}s",
                                round,
                                id,
                                count,
                                ingestion.insight.congestion_level,
                                adaptation.new_cycle.green,
                                adaptation.new_cycle.red
                            );
                        }
                    }
                    Err(e) => eprintln!("Ingest failed for {}: {}", id, e),
                }
                if let Err(e) = engine.observe_wait(id, rng.range_f64(10.0, 60.0), count) {
                    eprintln!("Wait observation failed for {}: {}", id, e);
                }
            }
        }
        sleep(Duration::from_millis(200)).await;
    }

    // Coordination
    {
        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        match engine.coordinate(&corridor, CoordinationMode::GreenWave) {
            Ok(scheduled) => println!(
                "Green wave scheduled across {} intersections",
                scheduled.plan.coordinated_intersections()
            ),
            Err(e) => eprintln!("Coordination failed: {}", e),
        }
        match engine.predict("main_3rd", 3_600_000) {
            Ok(forecast) => println!(
                "main_3rd forecast: mean congestion {:.2}, confidence {:.2}",
                forecast.mean_congestion(),
                forecast.confidence
            ),
            Err(e) => eprintln!("Forecast failed: {}", e),
        }
        let conditions = RiskConditions {
            traffic_flow: engine.analyzer().average_count_for("main_3rd"),
            weather: Some(WeatherCondition::Rain),
            time: None,
        };
        match engine.assess_risk("main_3rd", &conditions) {
            Ok(risk) => println!("main_3rd risk: {} ({:.2})", risk.risk_level, risk.risk_score),
            Err(e) => eprintln!("Risk assessment failed: {}", e),
        }
    }

    // Emergency run
    {
        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        let run = engine
            .register_emergency("amb1", VehicleClass::Ambulance, "hospital", "main_4th", Urgency::Critical)
            .and_then(|registration| {
                println!(
                    "amb1 registered with priority {:.1}, route {:.1} km",
                    registration.priority, registration.route.distance_km
                );
                engine.optimize_emergency_path(
                    "amb1",
                    LiveConditions {
                        traffic_density: 0.8,
                        weather: Some(WeatherCondition::Rain),
                    },
                )
            })
            .and_then(|optimization| {
                println!("amb1 route optimized, {} ms saved", optimization.time_saved_ms);
                engine.preempt_intersections("amb1", &corridor, PreemptionMode::Scheduled)
            });
        match run {
            Ok(scheduled) => println!(
                "amb1 preempting {} intersections, path clear in {}s",
                scheduled.tasks.len(),
                scheduled.preemption.estimated_path_clearance_secs
            ),
            Err(e) => eprintln!("Emergency run failed: {}", e),
        }
    }

    sleep(Duration::from_secs(2)).await;

    {
        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        match engine.deregister_emergency("amb1", CompletionStatus::Completed) {
            Ok(release) => println!(
                "amb1 done in {} ms, {} pending action(s) cancelled",
                release.deregistration.response_time_ms,
                release.cancelled_tasks.len()
            ),
            Err(e) => eprintln!("Deregistration failed: {}", e),
        }
        for id in &corridor {
            if let Ok(status) = engine.status(id) {
                println!(
                    "{}: {} (efficiency {}%, {:?}, generation {})",
                    id, status.state, status.efficiency, status.health, status.generation
                );
            }
        }
        if let Some(report) = engine.analyze_emergency_performance(86_400_000) {
            println!(
                "Emergency responses: {}, success rate {:.0}%",
                report.total_responses, report.success_rate
            );
        }
    }
}
