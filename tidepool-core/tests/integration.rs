//! Integration Tests for the Pool Engine
//!
//! These tests verify that pools, derivations, lenses and combinators work
//! together correctly through the public API.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use tidepool_core::clock::ManualClock;
use tidepool_core::combinators::{CombinatorSpec, Combinators, Emission};
use tidepool_core::config::{CombinatorDefaults, EngineConfig};
use tidepool_core::error::{Error, OperatorError, Result};
use tidepool_core::lens::{
    conditional_lens, filter_lens, map_lens, reduce_lens, transform_paths, Condition, Lens,
    LensContext, OperatorRegistry,
};
use tidepool_core::metrics::EngineMetrics;
use tidepool_core::reactive::{
    ChangeStrategy, PoolStore, Reaper, SubscriberRunner, SubscriberToken, Transform,
};

fn operators() -> Arc<OperatorRegistry> {
    let registry = OperatorRegistry::new();
    registry
        .register("scale", |v, args, _| {
            let factor = args.first().and_then(Value::as_f64).unwrap_or(1.0);
            Ok(json!(v.as_f64().unwrap_or(0.0) * factor))
        })
        .unwrap();
    registry
        .register("offset", |v, args, _| {
            let by = args.first().and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!(v.as_f64().unwrap_or(0.0) + by))
        })
        .unwrap();
    registry
        .register("strict", |v, _, _| match v {
            Value::Number(_) => Ok(v.clone()),
            other => Err(OperatorError::new("strict", format!("not a number: {other}"))),
        })
        .unwrap();
    Arc::new(registry)
}

fn store(clock: &ManualClock, config: EngineConfig) -> PoolStore {
    PoolStore::builder()
        .config(config)
        .clock(Arc::new(clock.clone()))
        .operators(operators())
        .build()
}

type Seen = Arc<Mutex<Vec<(String, Value)>>>;

fn recording_runner() -> (Arc<dyn SubscriberRunner>, Seen) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let runner = move |token: &SubscriberToken, _source: &str, value: &Value| -> Result<()> {
        sink.lock().push((token.to_string(), value.clone()));
        Ok(())
    };
    (Arc::new(runner), seen)
}

fn manual_combinators() -> (Combinators, ManualClock) {
    let clock = ManualClock::new();
    let combinators = Combinators::new(
        Arc::new(clock.clone()),
        CombinatorDefaults::default(),
        Arc::new(EngineMetrics::new()),
    );
    (combinators, clock)
}

// ----------------------------------------------------------------------------
// Pools and propagation
// ----------------------------------------------------------------------------

/// Writing a deep-equal value twice records both writes but propagates once.
#[test]
fn deep_equal_writes_are_idempotent() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    let (runner, seen) = recording_runner();
    store.set_runner(runner);

    store.create("profile", json!({"name": "ada"})).unwrap();
    store
        .track_dependency("profile", SubscriberToken::new("header"))
        .unwrap();

    let value = json!({"name": "grace", "tags": ["a", "b"]});
    assert!(store.update("profile", value.clone()).unwrap());
    assert!(!store.update("profile", value).unwrap());

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(store.stats("profile").unwrap().update_count, 2);
}

/// A derived pool always equals its transform applied to the source.
#[test]
fn derived_pools_stay_consistent_with_their_source() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    let lens = Lens::compile(".celsius | scale(1.8) | offset(32)", operators().as_ref()).unwrap();

    store.create("reading", json!({"celsius": 0})).unwrap();
    store
        .create_derived("reading", Transform::from(lens), "fahrenheit")
        .unwrap();
    assert_eq!(store.get("fahrenheit").unwrap(), json!(32.0));

    for celsius in [10, 25, 100] {
        store.update("reading", json!({"celsius": celsius})).unwrap();
        let expected = celsius as f64 * 1.8 + 32.0;
        assert_eq!(store.get("fahrenheit").unwrap(), json!(expected));
    }
}

/// The last history entry is the current value after every write.
#[test]
fn history_ends_with_the_current_value() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default().with_history_limit(5));
    store.create("counter", json!(0)).unwrap();

    for i in 1..=12 {
        store.update("counter", json!(i)).unwrap();
        let history = store.history("counter", None).unwrap();
        assert!(history.len() <= 5);
        assert_eq!(history.last(), Some(&store.get("counter").unwrap()));
    }
}

/// Dependency cycles are rejected, direct or transitive.
#[test]
fn cycles_are_rejected() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    store.create("a", json!(1)).unwrap();
    store.create_derived("a", Transform::field("x"), "b").unwrap();

    let err = store
        .create_derived("b", Transform::field("x"), "a")
        .unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));
    assert!(store.pool("a").unwrap().meta.derivation.is_none());
}

/// A failing derivation or runner does not stop the other dependents.
#[test]
fn failures_are_isolated() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    let (runner, seen) = recording_runner();
    store.set_runner(runner);

    store.create("src", json!(1)).unwrap();
    store
        .create_derived("src", Transform::call("strict", []), "checked")
        .unwrap();
    store
        .create_derived("src", Transform::call("offset", [json!(1)]), "next")
        .unwrap();
    store
        .track_dependency("src", SubscriberToken::new("view"))
        .unwrap();

    store.update("src", json!("oops")).unwrap();
    assert_eq!(store.metrics().snapshot().derivation_failures, 1);
    assert_eq!(store.get("checked").unwrap(), json!(1));
    assert_eq!(store.get("next").unwrap(), json!(1.0));
    assert_eq!(seen.lock().as_slice(), &[("view".to_string(), json!("oops"))]);

    let broken = |_: &SubscriberToken, _: &str, _: &Value| -> Result<()> {
        Err(Error::Runner {
            token: "view".into(),
            reason: "detached".into(),
        })
    };
    store.set_runner(Arc::new(broken));
    store.update("src", json!(3)).unwrap();

    let metrics = store.metrics().snapshot();
    assert_eq!(metrics.runner_failures, 1);
    assert_eq!(metrics.derivation_failures, 1);
    assert_eq!(store.get("checked").unwrap(), json!(3));
    assert_eq!(store.get("next").unwrap(), json!(4.0));
}

/// Batched writes propagate each pool once with its final value.
#[test]
fn batch_propagates_last_value_once() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    let (runner, seen) = recording_runner();
    store.set_runner(runner);

    store.create("x", json!(0)).unwrap();
    store.create("y", json!(0)).unwrap();
    store.track_dependency("x", SubscriberToken::new("tx")).unwrap();
    store.track_dependency("y", SubscriberToken::new("ty")).unwrap();

    store.batch(|s| {
        for i in 1..=5 {
            s.update("x", json!(i)).unwrap();
        }
        s.update("y", json!("done")).unwrap();
    });

    let seen = seen.lock();
    assert_eq!(
        seen.as_slice(),
        &[
            ("tx".to_string(), json!(5)),
            ("ty".to_string(), json!("done")),
        ]
    );
}

/// Chains longer than the configured depth are refused.
#[test]
fn derivation_depth_is_bounded() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    store.create("p0", json!(0)).unwrap();

    for i in 1..=10 {
        store
            .create_derived(&format!("p{}", i - 1), Transform::call("offset", [json!(1)]), &format!("p{i}"))
            .unwrap();
    }
    assert_eq!(store.get("p10").unwrap(), json!(10.0));

    let err = store
        .create_derived("p10", Transform::call("offset", [json!(1)]), "p11")
        .unwrap_err();
    assert!(matches!(err, Error::DerivationTooDeep { depth: 11, max: 10, .. }));
}

/// Configuration loaded from JSON drives the store.
#[test]
fn config_from_json_applies() {
    let config = EngineConfig::from_json(
        r#"{"history_limit": 2, "change_detection": "always", "combinators": {"debounce_ms": 5}}"#,
    )
    .unwrap();
    assert_eq!(config.change_detection, ChangeStrategy::Always);
    assert_eq!(config.combinators.debounce_ms, 5);
    assert_eq!(config.combinators.throttle_ms, 1000);

    let clock = ManualClock::new();
    let store = store(&clock, config);
    store.create("p", json!(1)).unwrap();
    assert!(store.update("p", json!(1)).unwrap());
    assert_eq!(store.history("p", None).unwrap().len(), 2);

    assert!(matches!(
        EngineConfig::from_json(r#"{"history_limit": 0}"#),
        Err(Error::Config(_))
    ));
}

// ----------------------------------------------------------------------------
// Lenses
// ----------------------------------------------------------------------------

/// An unknown operator is skipped; later steps still run.
#[test]
fn lens_unknown_operator_is_fail_soft() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    let ctx = LensContext::default();

    let out = store
        .evaluator()
        .evaluate_str(&json!({"field": 7}), "unknownOp | .field", &ctx);
    assert_eq!(out, json!(7));
    assert_eq!(store.metrics().snapshot().lens_step_failures, 1);
}

/// The lens consumers compose over collections.
#[test]
fn lens_consumers_over_collections() {
    let clock = ManualClock::new();
    let store = store(&clock, EngineConfig::default());
    let ev = store.evaluator();
    let ctx = LensContext::default();
    let orders = json!([
        {"id": 1, "total": 30, "paid": true},
        {"id": 2, "total": 12, "paid": false},
        {"id": 3, "total": 50, "paid": true}
    ]);

    let paid = filter_lens(ev, &orders, &Lens::parse(".paid").unwrap(), &ctx);
    let totals = map_lens(ev, &paid, &Lens::parse(".total").unwrap(), &ctx);
    assert_eq!(totals, json!([30, 50]));

    let sum = reduce_lens(ev, &orders, &Lens::parse(".item.total").unwrap(), json!(0), &ctx);
    // the reducer lens replaces the accumulator, so the last item wins
    assert_eq!(sum, json!(50));

    let big = Condition::parse(".total > 20").unwrap();
    let label = conditional_lens(ev, &orders[0], &big, Some(&Lens::parse(".id").unwrap()), None, &ctx);
    assert_eq!(label, json!(1));

    let shaped = transform_paths(
        ev,
        &json!({"id": 9, "total": 4}),
        &[("summary.amount".to_string(), Lens::parse(".total | scale(2)").unwrap())],
        &ctx,
    );
    assert_eq!(shaped["summary"]["amount"], json!(8.0));
    assert_eq!(shaped["id"], json!(9));
}

// ----------------------------------------------------------------------------
// Combinators
// ----------------------------------------------------------------------------

/// Pushes at 0, 50 and 80 ms with a 100 ms debounce emit only the last one.
#[tokio::test(start_paused = true)]
async fn debounce_collapses_a_burst() {
    let store = PoolStore::new();
    let combinators = Combinators::for_store(&store);
    let start = tokio::time::Instant::now();

    let mut tasks = Vec::new();
    for (at, value) in [(0u64, 1), (50, 2), (80, 3)] {
        let c = combinators.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep_until(start + Duration::from_millis(at)).await;
            c.debounce("input", 100, json!(value)).await
        }));
    }

    let mut emitted = Vec::new();
    for task in tasks {
        emitted.push(task.await.unwrap());
    }
    assert_eq!(emitted, vec![None, None, Some(json!(3))]);
    assert!(start.elapsed() >= Duration::from_millis(180));
}

/// Throttle replays the previous emission inside the window.
#[test]
fn throttle_replays_previous_emission() {
    let (c, clock) = manual_combinators();
    assert_eq!(c.throttle("clicks", 1_000, json!("first")), json!("first"));
    clock.advance(500);
    assert_eq!(c.throttle("clicks", 1_000, json!("second")), json!("first"));
    clock.advance(600);
    assert_eq!(c.throttle("clicks", 1_000, json!("third")), json!("third"));
}

/// Cached values are served until the TTL passes.
#[test]
fn cache_respects_ttl() {
    let (c, clock) = manual_combinators();
    assert!(!c.cache("quote", 100, json!(1)).cached);
    clock.advance(99);
    assert_eq!(c.cache("quote", 100, json!(2)).value, json!(1));
    clock.advance(1);
    assert_eq!(c.cache("quote", 100, json!(3)).value, json!(3));
}

/// A partial buffer is flushed on the channel after its timeout.
#[tokio::test(start_paused = true)]
async fn buffer_timeout_flushes_partial_batch() {
    let (c, _) = manual_combinators();
    let mut flushes = c.buffer_flushes().unwrap();

    let spec = c.parse_spec("buffer", &[json!(3), json!(200)]).unwrap();
    assert_eq!(c.apply("log", &spec, json!("a")).await, Emission::Suppressed);
    assert_eq!(c.apply("log", &spec, json!("b")).await, Emission::Suppressed);

    let flush = flushes.recv().await.unwrap();
    assert_eq!(flush.stream, "log");
    assert_eq!(flush.items, vec![json!("a"), json!("b")]);
}

/// Shutdown cancels in-flight delays and retries.
#[tokio::test(start_paused = true)]
async fn shutdown_cancels_in_flight_waits() {
    let (c, _) = manual_combinators();

    let delayed = {
        let c = c.clone();
        tokio::spawn(async move { c.delay(60_000, json!("late")).await })
    };
    let retrying = {
        let c = c.clone();
        tokio::spawn(async move {
            let spec = CombinatorSpec::Retry { max: 3, backoff_ms: 60_000 };
            c.apply("fetch", &spec, json!({"error": "503"})).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    c.shutdown();
    assert_eq!(delayed.await.unwrap(), None);
    assert_eq!(retrying.await.unwrap(), Emission::Suppressed);
}

/// The reaper evicts idle pools nobody subscribes to, and only those.
#[tokio::test(start_paused = true)]
async fn reaper_evicts_only_unsubscribed_idle_pools() {
    let clock = ManualClock::new();
    let config = EngineConfig::default()
        .with_inactivity_threshold_ms(1_000)
        .with_reap_interval_ms(250);
    let store = store(&clock, config);
    let combinators = Combinators::for_store(&store);

    store.create("orphan", json!(1)).unwrap();
    store.create("watched", json!(1)).unwrap();
    store
        .track_dependency("watched", SubscriberToken::new("ui"))
        .unwrap();
    combinators.throttle("ui", 10, json!(1));

    clock.advance(5_000);
    let handle = Reaper::new(store.clone())
        .with_combinators(combinators.clone())
        .spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!store.contains("orphan"));
    assert!(store.contains("watched"));
    assert_eq!(combinators.state_count(), 0);
    assert_eq!(store.metrics().snapshot().evictions, 2);

    handle.shutdown().await;
}
