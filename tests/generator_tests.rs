use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_test::assert_err;

use tick_pipeline::error::PipelineError;
use tick_pipeline::generator::{run_producer, GeneratorConfig, Pacer, TickGenerator, PRICE_FLOOR};
use tick_pipeline::publisher::{DeliveryFailurePolicy, Publisher, RetryPolicy};
use tick_pipeline::transport::InMemoryBroker;

fn single_symbol(seed: u64) -> GeneratorConfig {
    GeneratorConfig {
        symbols: 1,
        seed,
        ..GeneratorConfig::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

#[test]
/// Verifies price positivity:
/// 10,000 walk steps on one symbol never reach zero.
fn price_stays_positive_over_long_walk() {
    for seed in [1, 2, 3, 42] {
        let mut generator = TickGenerator::new(&GeneratorConfig {
            max_step_pct: 0.49,
            ..single_symbol(seed)
        })
        .unwrap();
        for _ in 0..10_000 {
            let tick = generator.next_tick();
            assert!(tick.price > 0.0);
            assert!(tick.price >= PRICE_FLOOR);
            assert!(tick.volume > 0);
        }
    }
}

#[test]
/// Verifies base prices are seeded into the plausible [100, 200) band.
fn base_prices_start_in_band() {
    let generator = TickGenerator::new(&GeneratorConfig {
        symbols: 20,
        ..GeneratorConfig::default()
    })
    .unwrap();
    for symbol in generator.universe().iter() {
        let price = generator.last_price(symbol).unwrap();
        assert!((100.0..200.0).contains(&price), "{} starts at {}", symbol, price);
    }
}

#[tokio::test(start_paused = true)]
/// Verifies rate pacing at 100/s over 10 seconds:
/// each second holds 90..=110 emissions and no gap undercuts the interval.
async fn pacer_holds_target_rate() {
    let mut pacer = Pacer::new(100.0).unwrap();
    let start = Instant::now();
    let mut buckets = [0u32; 10];
    let mut prev: Option<Instant> = None;
    loop {
        pacer.wait().await;
        let now = Instant::now();
        let elapsed = now.duration_since(start);
        if elapsed >= Duration::from_secs(10) {
            break;
        }
        if let Some(p) = prev {
            assert!(now.duration_since(p) >= pacer.interval());
        }
        prev = Some(now);
        buckets[elapsed.as_secs() as usize] += 1;
    }
    let total: u32 = buckets.iter().sum();
    assert!((900..=1100).contains(&total), "total {}", total);
    for (sec, count) in buckets.iter().enumerate() {
        assert!((90..=110).contains(count), "second {} had {}", sec, count);
    }
}

#[tokio::test(start_paused = true)]
/// Verifies a stalled caller is not compensated with a burst:
/// after a long pause the next two waits are spaced by a full interval.
async fn pacer_does_not_burst_after_stall() {
    let mut pacer = Pacer::new(100.0).unwrap();
    pacer.wait().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    pacer.wait().await;
    let resumed = Instant::now();
    pacer.wait().await;
    assert!(Instant::now().duration_since(resumed) >= pacer.interval());
}

#[tokio::test(start_paused = true)]
/// Verifies cancellation:
/// the producer publishes at the target rate and stops once shutdown flips.
async fn producer_stops_on_shutdown() {
    let broker = Arc::new(InMemoryBroker::new("memory://test", 4));
    let publisher = Publisher::new(broker.clone(), "ticks", fast_retry());
    let generator = TickGenerator::new(&GeneratorConfig::default()).unwrap();
    let pacer = Pacer::new(100.0).unwrap();
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        run_producer(generator, pacer, &publisher, DeliveryFailurePolicy::Abort, rx).await
    });
    tokio::time::sleep(Duration::from_millis(995)).await;
    tx.send(true).unwrap();

    let stats = task.await.unwrap().unwrap();
    assert!((99..=101).contains(&stats.published), "{:?}", stats);
    assert_eq!(stats.dropped, 0);
    assert_eq!(broker.published_count("ticks"), stats.published);
}

#[tokio::test(start_paused = true)]
/// Verifies the abort policy:
/// persistent unavailability surfaces TransportUnavailable after bounded retries.
async fn producer_aborts_on_persistent_outage() {
    let broker = Arc::new(InMemoryBroker::new("memory://down", 1));
    broker.set_available(false);
    let publisher = Publisher::new(broker.clone(), "ticks", fast_retry());
    let generator = TickGenerator::new(&GeneratorConfig::default()).unwrap();
    let (_tx, rx) = watch::channel(false);

    let result = run_producer(
        generator,
        Pacer::new(100.0).unwrap(),
        &publisher,
        DeliveryFailurePolicy::Abort,
        rx,
    )
    .await;
    let err = assert_err!(result);
    assert!(matches!(
        err,
        PipelineError::TransportUnavailable { attempts: 3, .. }
    ));
}

#[tokio::test(start_paused = true)]
/// Verifies the drop-and-continue policy:
/// failed ticks are counted as dropped and the loop keeps running.
async fn producer_drops_and_continues_during_outage() {
    let broker = Arc::new(InMemoryBroker::new("memory://flaky", 1));
    broker.set_available(false);
    let publisher = Publisher::new(broker.clone(), "ticks", fast_retry());
    let generator = TickGenerator::new(&GeneratorConfig::default()).unwrap();
    let (tx, rx) = watch::channel(false);

    let outage = broker.clone();
    let task = tokio::spawn(async move {
        run_producer(
            generator,
            Pacer::new(100.0).unwrap(),
            &publisher,
            DeliveryFailurePolicy::DropAndContinue,
            rx,
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    outage.set_available(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();

    let stats = task.await.unwrap().unwrap();
    assert!(stats.dropped > 0, "{:?}", stats);
    assert!(stats.published > 0, "{:?}", stats);
}
