use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use tick_pipeline::config::{Config, LoggingConfig};
use tick_pipeline::engine::{run_engine, AggregationEngine};
use tick_pipeline::generator::{run_producer, Pacer, TickGenerator};
use tick_pipeline::publisher::Publisher;
use tick_pipeline::sink::{ConsoleSink, JsonLinesSink, Sink, SinkKind};
use tick_pipeline::transport::{InMemoryBroker, Transport};
use tick_pipeline::watermark::WatermarkTracker;

fn init_tracing(logging: &LoggingConfig) {
    // stderr, so the console sink owns stdout
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(&logging.level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    tracing::info!(
        broker = %config.transport.broker,
        topic = %config.transport.topic,
        rate_per_sec = config.generator.rate_per_sec,
        symbols = config.generator.symbols,
        window = %config.window.length,
        slide = %config.window.slide,
        "Starting tick-pipeline"
    );

    let broker = Arc::new(InMemoryBroker::new(
        config.transport.broker.clone(),
        config.transport.partitions,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Engine side: subscribe before the producer starts so no tick is missed.
    let subscription = broker
        .subscribe(&config.transport.topic)
        .context("failed to subscribe to tick topic")?;
    let mut engine = AggregationEngine::new(
        config.window.assigner()?,
        config.window.allowed_lateness_ms()?,
        WatermarkTracker::new(config.window.max_out_of_orderness_ms()?),
    );
    let batch_size = config.window.batch_size;
    let trigger_interval = config.window.trigger_interval()?;
    let mut sink: Box<dyn Sink + Send> = match config.sink.kind {
        SinkKind::Console => Box::new(ConsoleSink::new(std::io::stdout(), config.sink.max_rows)),
        SinkKind::Jsonl => Box::new(JsonLinesSink::new(std::io::stdout())),
    };
    let engine_shutdown = shutdown_rx.clone();
    let engine_task = tokio::spawn(async move {
        run_engine(
            &mut engine,
            subscription,
            &mut sink,
            batch_size,
            trigger_interval,
            engine_shutdown,
        )
        .await
    });

    // Producer side.
    let generator = TickGenerator::new(&config.generator.generator_config())?;
    let pacer = Pacer::new(config.generator.rate_per_sec)?;
    let publisher = Publisher::new(
        broker.clone(),
        config.transport.topic.clone(),
        config.publisher.retry_policy(),
    );
    let on_failure = config.generator.on_delivery_failure;
    let producer_shutdown = shutdown_rx.clone();
    let producer_stop = shutdown_tx.clone();
    let producer_task = tokio::spawn(async move {
        let result =
            run_producer(generator, pacer, &publisher, on_failure, producer_shutdown).await;
        if result.is_err() {
            let _ = producer_stop.send(true);
        }
        result
    });

    let ctrl_c_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received");
        let _ = ctrl_c_shutdown.send(true);
    });

    let producer_result = producer_task.await.context("producer task panicked")?;
    let engine_stats = engine_task.await.context("engine task panicked")??;
    let producer_stats = producer_result?;

    tracing::info!(
        published = producer_stats.published,
        dropped = producer_stats.dropped,
        ingested = engine_stats.ingested,
        late_dropped = engine_stats.late_dropped,
        malformed = engine_stats.malformed,
        "Shutdown complete"
    );
    Ok(())
}
