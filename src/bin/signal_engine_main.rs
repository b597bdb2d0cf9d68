// signal_engine_main.rs
use smart_traffic_engine::communication::run_signal_engine_service;
use smart_traffic_engine::global_variables::LIGHT_ADJUSTMENTS_CSV;
use smart_traffic_engine::monitoring::DecisionLog;
use smart_traffic_engine::{EngineConfig, TrafficEngine};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

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
    let amqp_url = config.amqp_url.clone();
    let engine = Arc::new(Mutex::new(TrafficEngine::with_system_clock(config)));

    tokio::spawn(TrafficEngine::run_scheduler_loop(
        Arc::clone(&engine),
        Duration::from_millis(250),
    ));

    println!("Starting signal engine service...");
    if let Err(e) =
        run_signal_engine_service(engine, amqp_url, DecisionLog::new(LIGHT_ADJUSTMENTS_CSV)).await
    {
        eprintln!("Signal engine error: {}", e);
    }
}
