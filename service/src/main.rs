//! Order saga service.
//!
//! Wires together the Kafka-compatible event bus, the Postgres-backed
//! stores, and the inventory engine, then runs every bus consumer
//! (§4.E–§4.H) as a background task alongside a periodic reservation
//! sweep. There is no HTTP surface here; upstream order placement and
//! state-transition requests are expected to call into
//! `order_saga_saga::handlers` from an edge process that embeds this
//! wiring (out of scope for this binary, per spec §1/§6).
//!
//! # Environment
//!
//! - `INVENTORY_TTL_SECONDS` — reservation TTL handed to the
//!   Reservation Consumer; defaults to 600.
//! - `RABBITMQ_HOST` / `RABBITMQ_PORT` — mapped onto the Kafka-compatible
//!   bus as its bootstrap-server address, consistent with building an
//!   AMQP-shaped abstraction over Kafka-compatible infrastructure.
//!   `RABBITMQ_USER` / `RABBITMQ_PASS` / `RABBITMQ_VHOST` are accepted
//!   for parity with the AMQP topology but unused by the Kafka client.
//! - `ORDERS_CONN` — Postgres connection string.
//! - `DISABLE_HOSTED_SERVICES` — when set to `1`, skips connecting to
//!   Kafka and Postgres entirely; for local unit-test runs only.

use order_saga_bus::KafkaEventBus;
use order_saga_core::environment::{Clock, SystemClock};
use order_saga_core::event_bus::EventBus;
use order_saga_inventory::InventoryEngine;
use order_saga_saga::consumers::{payment, refund, reservation, status_updater};
use order_saga_store::{DeadLetterQueue, IdempotencyKeyStore, IdempotencyStore, OrderRepository, OrderStore};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_INVENTORY_TTL_SECONDS: i64 = 600;
/// spec.md §4.A / §5: the background TTL sweep runs every 60 seconds.
const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn hosted_services_disabled() -> bool {
    env::var("DISABLE_HOSTED_SERVICES").as_deref() == Ok("1")
}

fn inventory_ttl_seconds() -> i64 {
    env::var("INVENTORY_TTL_SECONDS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_INVENTORY_TTL_SECONDS)
}

fn kafka_brokers() -> String {
    let host = env::var("RABBITMQ_HOST").unwrap_or_else(|_| "localhost".into());
    let port = env::var("RABBITMQ_PORT").unwrap_or_else(|_| "9092".into());
    format!("{host}:{port}")
}

/// Periodically sweep TTL-expired reservations out of the inventory
/// engine so a crashed or stalled saga never holds stock forever.
async fn run_ttl_sweeper(
    inventory: Arc<InventoryEngine>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ttl sweeper observed shutdown signal, exiting");
                    return;
                }
            }
            _ = ticker.tick() => {
                let released = inventory.release_expired(clock.as_ref());
                if released > 0 {
                    info!(released, "ttl sweep released expired reservations");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("=== Order Saga Service ===");

    if hosted_services_disabled() {
        info!("DISABLE_HOSTED_SERVICES=1, exiting without connecting to kafka or postgres");
        return Ok(());
    }

    let orders_conn = env::var("ORDERS_CONN").map_err(|_| anyhow::anyhow!("ORDERS_CONN must be set"))?;
    let brokers = kafka_brokers();
    let ttl_seconds = inventory_ttl_seconds();

    info!("connecting to postgres");
    let pool = PgPoolOptions::new().max_connections(10).connect(&orders_conn).await?;
    sqlx::migrate!("../store/migrations").run(&pool).await?;

    let order_store = Arc::new(OrderStore::new(pool.clone()));
    let orders: Arc<dyn OrderRepository> = Arc::clone(&order_store);
    let idempotency_store = Arc::new(IdempotencyStore::new(pool.clone()));
    let idempotency: Arc<dyn IdempotencyKeyStore> = Arc::clone(&idempotency_store);
    let dead_letter_queue = Arc::new(DeadLetterQueue::new(pool));

    info!(brokers, "connecting to kafka-compatible bus");
    let bus: Arc<dyn EventBus> =
        Arc::new(KafkaEventBus::connect(&brokers).await?.with_dead_letter_queue(dead_letter_queue));

    let inventory = Arc::new(InventoryEngine::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    info!(ttl_seconds, "starting saga consumers");

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(reservation::run_order_created(
        Arc::clone(&bus),
        Arc::clone(&inventory),
        ttl_seconds,
        Arc::clone(&clock),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(reservation::run_stock_released(
        Arc::clone(&bus),
        Arc::clone(&inventory),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(payment::run(Arc::clone(&bus), Arc::clone(&orders), shutdown_rx.clone())));
    tasks.push(tokio::spawn(status_updater::run_payment_processed(
        Arc::clone(&bus),
        Arc::clone(&orders),
        Arc::clone(&clock),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(status_updater::run_payment_failed(
        Arc::clone(&bus),
        Arc::clone(&orders),
        Arc::clone(&clock),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(status_updater::run_stock_failed(
        Arc::clone(&bus),
        Arc::clone(&orders),
        Arc::clone(&clock),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(refund::run(Arc::clone(&bus), shutdown_rx.clone())));

    // The idempotency store is only touched by the create-order handler,
    // which this binary does not expose; keep it alive for the lifetime
    // of the process so a future edge layer can be wired in without
    // restarting the service.
    drop(idempotency);

    let sweeper = tokio::spawn(run_ttl_sweeper(Arc::clone(&inventory), clock, TTL_SWEEP_INTERVAL, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping consumers");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => error!(%error, "a consumer loop failed"),
            Err(join_error) => error!(%join_error, "a consumer task panicked"),
        }
    }
    if let Err(join_error) = sweeper.await {
        error!(%join_error, "ttl sweeper task panicked");
    }

    info!("all consumers stopped, exiting");
    Ok(())
}
