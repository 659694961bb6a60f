use std::collections::HashMap;
use std::future::ready;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{routing::get, Router};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use health::HealthRegistry;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod config;

use config::Config;
use replicamap_core::{
    BoundedCleanQueue, BoundedFlushQueue, FlushQueue, MapHandler, OpsWorker, OpsWorkerConfig,
};
use replicamap_kafka::{KafkaLogConsumer, KafkaLogProducer};

common_alloc::used!();

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().unwrap()),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "replicamap ops worker"
}

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("Starting replicamap ops worker...");

    let config = Config::init_from_env()?;
    let assigned_partitions = config.parsed_assigned_partitions()?;
    info!(
        client_id = config.client_id,
        partitions = ?assigned_partitions,
        flush_period_ops = config.flush_period_ops,
        "Configuration loaded"
    );

    let health_registry = HealthRegistry::new("liveness");
    let ops_health = health_registry
        .register("ops_worker".to_string(), Duration::from_secs(30))
        .await;

    let health_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get({
                let registry = health_registry.clone();
                move || ready(registry.get_status())
            }),
        );
    let health_router = setup_metrics_routes(health_router);

    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(health_router, &bind)
            .await
            .expect("failed to start health server");
    });

    let data_consumer = KafkaLogConsumer::new(&config.kafka)?;
    let ops_consumer = KafkaLogConsumer::new(&config.kafka)?;
    let data_cancel = data_consumer.cancel_flag();
    let ops_cancel = ops_consumer.cancel_flag();
    let producer = KafkaLogProducer::new(&config.kafka)?;

    let handler = MapHandler::new();
    let mut flush_queues: HashMap<i32, Box<dyn FlushQueue>> = HashMap::new();
    let mut flush_receivers = Vec::new();
    for &partition in &assigned_partitions {
        let (queue, receiver) = BoundedFlushQueue::new(1024);
        flush_queues.insert(partition, Box::new(queue));
        flush_receivers.push((partition, receiver));
    }
    let (clean_queue, _clean_rx) = BoundedCleanQueue::new(1024);

    // The flush worker and clean/compaction consumer that would read
    // `flush_receivers`/`_clean_rx` don't exist in this binary yet; keep the
    // receivers alive anyway so the `SyncSender`s the Ops Worker holds stay
    // connected. Dropping them here would disconnect every flush queue
    // before the worker ever ran, turning its first `add()` into a fatal
    // error.
    let _flush_receivers = flush_receivers;

    let (steady_latch, mut steady_rx) = replicamap_core::steady_latch();

    let worker_config = OpsWorkerConfig {
        client_id: config.client_id,
        assigned_partitions,
        flush_period_ops: config.flush_period_ops,
        data_topic: config.data_topic.clone(),
        ops_topic: config.ops_topic.clone(),
        flush_topic: config.flush_topic.clone(),
    };

    let worker_thread = std::thread::Builder::new()
        .name("ops-worker".to_string())
        .spawn(move || {
            let worker = OpsWorker::new(worker_config);
            worker.run(
                Box::new(data_consumer),
                Box::new(ops_consumer),
                &handler,
                &handler,
                &flush_queues,
                &clean_queue,
                &producer,
                &steady_latch,
            )
        })
        .expect("failed to spawn ops worker thread");

    tokio::spawn({
        let health = ops_health.clone();
        async move {
            loop {
                match steady_rx.wait().await {
                    Ok(()) => {
                        info!("ops worker reached steady state");
                        loop {
                            health.report_healthy().await;
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "ops worker failed before reaching steady state");
                        return;
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    info!("Shutdown signal received");
    data_cancel.store(true, Ordering::SeqCst);
    ops_cancel.store(true, Ordering::SeqCst);

    match worker_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_cancelled() => {}
        Ok(Err(err)) => error!(error = %err, "ops worker exited with an error"),
        Err(_) => error!("ops worker thread panicked"),
    }

    info!("replicamap ops worker shut down");
    Ok(())
}
