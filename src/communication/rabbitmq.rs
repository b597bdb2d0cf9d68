// rabbitmq.rs
//
// Broker adapter: traffic readings in, timing decisions and congestion
// alerts out. The engine itself never sees AMQP; `process_reading` is the
// whole contract between the two.

use amiquip::{
    Connection, ConsumerMessage, ConsumerOptions, Exchange, Publish, QueueDeclareOptions,
    Result as AmiquipResult,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task;

use crate::communication::messages::{CongestionAlert, LightAdjustment, TrafficReading};
use crate::control_system::IntersectionSettings;
use crate::engine::TrafficEngine;
use crate::error::Result;
use crate::global_variables::{QUEUE_CONGESTION_ALERTS, QUEUE_LIGHT_ADJUSTMENTS, QUEUE_TRAFFIC_DATA};
use crate::monitoring::DecisionLog;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] amiquip::Error),
    #[error("consumer task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Messages to publish in response to one reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbound {
    pub adjustment: Option<LightAdjustment>,
    pub alerts: Vec<CongestionAlert>,
}

/// Feeds one reading to the engine. Intersections the engine has not seen
/// are brought online with default settings first.
pub fn process_reading(engine: &mut TrafficEngine, reading: &TrafficReading) -> Result<Outbound> {
    if !engine.controller().contains(&reading.intersection_id) {
        engine.initialize_intersection(&reading.intersection_id, IntersectionSettings::default())?;
    }
    let ingestion = engine.ingest(&reading.intersection_id, reading.vehicle_count)?;
    let now = engine.now();

    Ok(Outbound {
        adjustment: ingestion
            .adaptation
            .as_ref()
            .filter(|a| a.applied && a.new_cycle != a.previous_cycle)
            .map(|a| LightAdjustment::from_adaptation(a, now)),
        alerts: CongestionAlert::from_insight(&ingestion.insight, now),
    })
}

/// Consumes `traffic_data` until the broker closes the consumer.
pub async fn run_signal_engine_service(
    engine: Arc<Mutex<TrafficEngine>>,
    amqp_url: String,
    decision_log: DecisionLog,
) -> std::result::Result<(), TransportError> {
    task::spawn_blocking(move || -> AmiquipResult<()> {
        let mut connection = Connection::insecure_open(&amqp_url)?;
        let channel = connection.open_channel(None)?;
        let exchange = Exchange::direct(&channel);
        let queue = channel.queue_declare(QUEUE_TRAFFIC_DATA, QueueDeclareOptions::default())?;
        channel.queue_declare(QUEUE_LIGHT_ADJUSTMENTS, QueueDeclareOptions::default())?;
        channel.queue_declare(QUEUE_CONGESTION_ALERTS, QueueDeclareOptions::default())?;
        let consumer = queue.consume(ConsumerOptions::default())?;
        log::info!("[SignalEngine] Waiting for readings on '{}'...", QUEUE_TRAFFIC_DATA);

        for message in consumer.receiver() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    match serde_json::from_slice::<TrafficReading>(&delivery.body) {
                        Ok(reading) => {
                            let outcome = {
                                let mut engine =
                                    engine.lock().unwrap_or_else(PoisonError::into_inner);
                                process_reading(&mut engine, &reading)
                            };
                            match outcome {
                                Ok(outbound) => publish(&exchange, &decision_log, &outbound)?,
                                Err(e) => log::warn!(
                                    "[SignalEngine] Rejected reading for {}: {}",
                                    reading.intersection_id,
                                    e
                                ),
                            }
                        }
                        Err(e) => log::warn!("[SignalEngine] Malformed reading: {}", e),
                    }
                    consumer.ack(delivery)?;
                }
                other => {
                    log::info!("[SignalEngine] Consumer ended: {:?}", other);
                    break;
                }
            }
        }
        connection.close()
    })
    .await??;
    Ok(())
}

fn publish(exchange: &Exchange, decision_log: &DecisionLog, outbound: &Outbound) -> AmiquipResult<()> {
    if let Some(adjustment) = &outbound.adjustment {
        match serde_json::to_string(adjustment) {
            Ok(json) => {
                exchange.publish(Publish::new(json.as_bytes(), QUEUE_LIGHT_ADJUSTMENTS))?;
                decision_log.append_or_warn(adjustment);
                log::info!(
                    "[SignalEngine] {} -> green {}s, red {}s",
                    adjustment.intersection_id,
                    adjustment.green_secs,
                    adjustment.red_secs
                );
            }
            Err(e) => log::warn!("[SignalEngine] Could not encode adjustment: {}", e),
        }
    }
    for alert in &outbound.alerts {
        match serde_json::to_string(alert) {
            Ok(json) => {
                exchange.publish(Publish::new(json.as_bytes(), QUEUE_CONGESTION_ALERTS))?
            }
            Err(e) => log::warn!("[SignalEngine] Could not encode alert: {}", e),
        }
    }
    Ok(())
}
