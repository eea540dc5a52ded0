//! Pipeline scenarios driven by a simulated clock.
//!
//! Most scenarios submit one record per simulated second for 60 seconds:
//! handle, ask for the remaining quota, advance the clock, fire timers.

use chrono::{DateTime, TimeZone, Utc};
use logstore::clock::{Clock, MockClock};
use logstore::config::{CleanupConfig, DebounceConfig, EmitterConfig, QuotaConfig};
use logstore::pipeline::Emitter;
use logstore::quota::{
    FixedQuotaQuerier, LogReporter, Quota, QuotaQuerier, QuotaUnit, StaticQuotaQuerier,
};
use logstore::record::{AccessLogRecord, LogRecord, Protocol};
use logstore::service::Service;
use logstore::storage::MemoryStorage;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn period_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

struct Pipeline {
    clock: MockClock,
    main: Arc<MemoryStorage<AccessLogRecord>>,
    secondary: Arc<MemoryStorage<AccessLogRecord>>,
    service: Service<AccessLogRecord>,
}

fn pipeline_with(
    main: EmitterConfig,
    secondary: EmitterConfig,
    querier: Arc<dyn QuotaQuerier>,
    clock: MockClock,
) -> Pipeline {
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let main_storage = Arc::new(MemoryStorage::new());
    let secondary_storage = Arc::new(MemoryStorage::new());

    let service = Service::new(
        shared.clone(),
        vec![
            Emitter::new("main", shared.clone(), &main, main_storage.clone()),
            Emitter::new("secondary", shared.clone(), &secondary, secondary_storage.clone()),
        ],
        querier,
        Arc::new(LogReporter),
    );

    Pipeline {
        clock,
        main: main_storage,
        secondary: secondary_storage,
        service,
    }
}

fn pipeline(main: EmitterConfig, secondary: EmitterConfig, quota: Option<Quota>) -> Pipeline {
    pipeline_with(
        main,
        secondary,
        Arc::new(FixedQuotaQuerier::new(quota)),
        MockClock::new(period_start()),
    )
}

fn quota(amount: u64, interval: Duration, limit: bool) -> Quota {
    Quota {
        unit: QuotaUnit::RequestsAllAuthenticated,
        amount,
        interval,
        limit,
        period_start: period_start(),
        period_end: period_start() + chrono::Duration::from_std(interval).unwrap(),
        notifications: Vec::new(),
    }
}

fn record(clock: &MockClock, n: usize) -> AccessLogRecord {
    AccessLogRecord::new(clock.now(), Protocol::Http, "instance", format!("/request/{}", n))
}

/// Runs the 60 tick loop and returns every value `limit` answered.
async fn run_ticks(p: &Pipeline) -> Vec<Option<u64>> {
    let mut remaining = Vec::new();
    for i in 0..60 {
        p.service.handle(record(&p.clock, i)).await.unwrap();
        remaining.push(p.service.limit("instance").await.unwrap());
        p.clock.advance(secs(1));
        p.service.tick().await.unwrap();
    }
    remaining
}

fn debounce(min_frequency: u64, max_bulk_size: usize) -> EmitterConfig {
    EmitterConfig::default().with_debounce(DebounceConfig::new(secs(min_frequency), max_bulk_size))
}

#[tokio::test]
async fn test_time_and_size_triggers_coincide() {
    let p = pipeline(debounce(60, 60), EmitterConfig::default(), None);

    run_ticks(&p).await;

    assert_eq!(p.main.bulks(), vec![60]);
    assert_eq!(p.main.len(), 60);
    assert_eq!(p.secondary.bulks(), vec![1; 60]);
    assert_eq!(p.secondary.len(), 60);
}

#[tokio::test]
async fn test_size_trigger_and_time_trigger_per_sink() {
    let p = pipeline(debounce(0, 6), debounce(10, 0), None);

    run_ticks(&p).await;

    assert_eq!(p.main.bulks(), vec![6; 10]);
    assert_eq!(p.main.len(), 60);
    assert_eq!(p.secondary.bulks(), vec![10; 6]);
    assert_eq!(p.secondary.len(), 60);
}

#[tokio::test]
async fn test_disabled_sink_receives_nothing() {
    let p = pipeline(EmitterConfig::disabled(), EmitterConfig::default(), None);

    run_ticks(&p).await;

    assert!(p.service.enabled());
    assert!(p.main.bulks().is_empty());
    assert_eq!(p.main.len(), 0);
    assert_eq!(p.secondary.bulks(), vec![1; 60]);
    assert_eq!(p.secondary.len(), 60);
}

#[tokio::test]
async fn test_all_sinks_disabled() {
    let p = pipeline(
        EmitterConfig::disabled(),
        EmitterConfig::disabled(),
        Some(quota(30, secs(90), true)),
    );

    let remaining = run_ticks(&p).await;

    assert!(!p.service.enabled());
    assert!(p.main.is_empty());
    assert!(p.secondary.is_empty());
    assert!(remaining.iter().all(Option::is_none));
}

#[tokio::test]
async fn test_cleanup_prunes_on_its_own_cadence() {
    // Main: cleanups at 28s and 56s; the one at 56s keeps records from 39s on.
    // Secondary: one cleanup at 47s keeping 42s..44s, then the last bulk of 15.
    let p = pipeline(
        EmitterConfig::default().with_cleanup(CleanupConfig::new(secs(28), secs(17))),
        debounce(0, 15).with_cleanup(CleanupConfig::new(secs(47), secs(5))),
        None,
    );

    run_ticks(&p).await;

    assert_eq!(p.main.bulks(), vec![1; 60]);
    assert_eq!(p.main.len(), 21);
    assert_eq!(p.secondary.bulks(), vec![15; 4]);
    assert_eq!(p.secondary.len(), 18);
}

#[tokio::test]
async fn test_cleanup_never_removes_young_records() {
    let keep = secs(10);
    let p = pipeline(
        EmitterConfig::default().with_cleanup(CleanupConfig::new(secs(3), keep)),
        EmitterConfig::disabled(),
        None,
    );

    for i in 0..60 {
        p.service.handle(record(&p.clock, i)).await.unwrap();
        p.clock.advance(secs(1));
        p.service.tick().await.unwrap();

        let cutoff = p.clock.now() - chrono::Duration::from_std(keep).unwrap();
        let young = (0..=i)
            .filter(|&n| period_start() + chrono::Duration::seconds(n as i64) >= cutoff)
            .count();
        let stored: Vec<_> = p.main.records();
        assert!(stored.len() >= young);
        assert_eq!(stored.iter().filter(|r| r.timestamp() >= cutoff).count(), young);
    }
}

#[tokio::test]
async fn test_limit_remaining() {
    let p = pipeline(
        EmitterConfig::default(),
        EmitterConfig::default(),
        Some(quota(90, secs(90), true)),
    );
    let remaining = run_ticks(&p).await;
    assert_eq!(p.service.limit("instance").await.unwrap(), Some(30));
    assert_eq!(remaining.last(), Some(&Some(30)));
}

#[tokio::test]
async fn test_limit_never_negative() {
    let p = pipeline(
        EmitterConfig::default(),
        EmitterConfig::default(),
        Some(quota(30, secs(30), true)),
    );
    let remaining = run_ticks(&p).await;
    assert_eq!(p.service.limit("instance").await.unwrap(), Some(0));
    assert!(remaining[29..].iter().all(|r| *r == Some(0)));
}

#[tokio::test]
async fn test_limit_unlimited_returns_nothing() {
    let p = pipeline(
        EmitterConfig::default(),
        EmitterConfig::default(),
        Some(quota(30, secs(30), false)),
    );
    let remaining = run_ticks(&p).await;
    assert_eq!(p.service.limit("instance").await.unwrap(), None);
    assert!(remaining.iter().all(Option::is_none));
}

#[tokio::test]
async fn test_remaining_monotonic_within_period() {
    let p = pipeline(
        debounce(0, 4),
        EmitterConfig::disabled(),
        Some(quota(50, secs(3600), true)),
    );

    let remaining: Vec<u64> = run_ticks(&p).await.into_iter().map(Option::unwrap).collect();

    assert!(remaining.windows(2).all(|w| w[1] <= w[0]), "{:?}", remaining);
    assert_eq!(*remaining.last().unwrap(), 0);
}

#[tokio::test]
async fn test_remaining_resets_when_period_rolls_over() {
    let clock = MockClock::new(period_start());
    let querier = StaticQuotaQuerier::new(
        Arc::new(clock.clone()),
        vec![QuotaConfig {
            instance_id: "instance".to_string(),
            unit: QuotaUnit::RequestsAllAuthenticated,
            from: period_start(),
            interval: secs(30),
            amount: 20,
            limit: true,
            notifications: Vec::new(),
        }],
    );
    let p = pipeline_with(
        EmitterConfig::default(),
        EmitterConfig::disabled(),
        Arc::new(querier),
        clock,
    );

    let remaining = run_ticks(&p).await;

    // Second 19 exhausts the first period; second 30 opens the next one.
    assert_eq!(remaining[18], Some(1));
    assert_eq!(remaining[19], Some(0));
    assert_eq!(remaining[29], Some(0));
    assert_eq!(remaining[30], Some(19));
    assert_eq!(remaining[49], Some(0));
}

/// Deterministic pseudo-random sequence.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[tokio::test]
async fn test_every_record_flushed_exactly_once() {
    let mut rng = Lcg(7);
    let configs = [
        debounce(0, 5),
        debounce(7, 0),
        debounce(3, 11),
        EmitterConfig::default(),
    ];

    for config in configs {
        let p = pipeline(config.clone(), EmitterConfig::disabled(), None);
        let mut submitted = Vec::new();

        for i in 0..200 {
            let r = record(&p.clock, i);
            submitted.push(r.log_id);
            p.service.handle(r).await.unwrap();
            p.clock.advance(Duration::from_millis(rng.next(2500)));
            if rng.next(3) == 0 {
                p.service.tick().await.unwrap();
            }
        }
        p.service.flush().await.unwrap();

        let stored: Vec<_> = p.main.records().into_iter().map(|r| r.log_id).collect();
        assert_eq!(stored, submitted, "order or content differs for {:?}", config);
        assert_eq!(stored.iter().collect::<HashSet<_>>().len(), 200);
    }
}

#[tokio::test]
async fn test_size_only_bulks_are_exact() {
    let p = pipeline(debounce(0, 8), EmitterConfig::disabled(), None);

    for i in 0..61 {
        p.service.handle(record(&p.clock, i)).await.unwrap();
        p.clock.advance(secs(1));
        p.service.tick().await.unwrap();
    }
    assert_eq!(p.main.bulks(), vec![8; 7]);

    p.service.flush().await.unwrap();
    let bulks = p.main.bulks();
    assert_eq!(bulks.len(), 8);
    assert_eq!(bulks[7], 5);
}

#[tokio::test]
async fn test_concurrent_handles_lose_nothing() {
    let p = pipeline(debounce(0, 7), debounce(0, 3), None);
    let service = Arc::new(p.service);

    let mut tasks = Vec::new();
    for task in 0..8 {
        let service = service.clone();
        let clock = p.clock.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                service.handle(record(&clock, task * 100 + i)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    service.flush().await.unwrap();

    for storage in [&p.main, &p.secondary] {
        let ids: HashSet<_> = storage.records().into_iter().map(|r| r.log_id).collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(storage.len(), 200);
    }
    assert!(p.main.bulks().iter().all(|&size| size <= 7));
}
