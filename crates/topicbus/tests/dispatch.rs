//! Integration tests for subscription and both dispatch paths.
//!
//! Handlers run on the blocking pool, so every test that expects a handler to
//! run uses the multi-thread runtime and waits with a generous bound instead
//! of assuming completion order.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use topicbus::{BusConfig, BusError, EventBus, Value, json};
use topicbus_telemetry::{LogConfig, setup_logging};

fn init_logging() {
    // Several tests race to install the global subscriber; only one wins.
    let _ = setup_logging(&LogConfig::console_only("topicbus=debug").without_ansi());
}

fn greet(name: String) -> String {
    format!("hello {name}")
}

fn noop() {}

fn slow_tick(counter: &AtomicUsize) {
    std::thread::sleep(Duration::from_millis(20));
    counter.fetch_add(1, Ordering::SeqCst);
}

#[tokio::test]
async fn unsubscribed_topic_has_no_callback() {
    let bus = EventBus::new();
    assert!(!bus.has_callback("never"));
    assert!(!bus.has_callback(""));
}

#[tokio::test]
async fn subscribe_unsubscribe_resubscribe() {
    let bus = EventBus::new();

    bus.subscribe("topic", noop).unwrap();
    assert!(bus.has_callback("topic"));

    bus.unsubscribe("topic", &noop).unwrap();
    assert!(!bus.has_callback("topic"));
    assert_eq!(bus.topics(), vec!["topic".to_string()]);

    bus.subscribe("topic", noop).unwrap();
    assert!(bus.has_callback("topic"));
    assert_eq!(bus.handler_count("topic"), 1);
}

#[tokio::test]
async fn unsubscribe_unknown_topic_fails() {
    let bus = EventBus::new();
    let err = bus.unsubscribe("missing", &noop).unwrap_err();
    assert!(matches!(err, BusError::UnknownTopic { ref topic } if topic == "missing"));
}

#[tokio::test]
async fn unsubscribe_other_callable_is_silent() {
    let bus = EventBus::new();
    bus.subscribe("topic", noop).unwrap();

    bus.unsubscribe("topic", &greet).unwrap();
    assert_eq!(bus.handler_count("topic"), 1);
}

#[tokio::test]
async fn non_callable_subscription_is_rejected() {
    init_logging();
    let bus = EventBus::new();
    bus.subscribe("topic", noop).unwrap();

    let err = bus
        .subscribe_any("topic", Box::new(String::from("not a function")))
        .unwrap_err();
    assert!(matches!(err, BusError::NotInvocable { .. }));
    assert_eq!(bus.handler_count("topic"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn function_pointer_subscribed_dynamically_replies() {
    let bus = EventBus::new();
    bus.subscribe_any("greet", Box::new(greet as fn(String) -> String))
        .unwrap();

    let reply = bus
        .publish_with_reply("greet", Duration::from_millis(200), vec![json!("any")])
        .await
        .unwrap();
    assert_eq!(reply, Some(json!("hello any")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_invokes_every_handler_once() {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<usize>();

    for id in 0..5 {
        let tx = tx.clone();
        bus.subscribe("fanout", move |_payload: String| {
            let _ = tx.send(id);
        })
        .unwrap();
    }
    drop(tx);

    assert_eq!(bus.publish("fanout", vec![json!("event")]), 5);

    let mut seen = Vec::new();
    let collected = tokio::time::timeout(Duration::from_millis(200), async {
        while seen.len() < 5 {
            match rx.recv().await {
                Some(id) => seen.push(id),
                None => break,
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "only {} of 5 handlers ran", seen.len());

    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_returns_before_handlers_finish() {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.subscribe("slow", move || {
        std::thread::sleep(Duration::from_millis(200));
        let _ = tx.send(std::thread::current().id());
    })
    .unwrap();

    let publisher = std::thread::current().id();
    let started = Instant::now();
    assert_eq!(bus.publish("slow", vec![]), 1);
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "publish blocked for {:?}",
        started.elapsed()
    );

    let handler_thread = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(handler_thread, publisher);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_subscriptions_each_run() {
    let bus = EventBus::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let make = |counter: Arc<AtomicUsize>| {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    };
    let handler = make(Arc::clone(&counter));
    bus.subscribe("dup", handler.clone()).unwrap();
    bus.subscribe("dup", handler).unwrap();

    bus.publish("dup", vec![]);
    wait_for(|| counter.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn null_argument_becomes_zero_value() {
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.subscribe("zero", move |n: i64, s: String, v: Value| {
        let _ = tx.send((n, s, v));
    })
    .unwrap();

    bus.publish("zero", vec![Value::Null, Value::Null, Value::Null]);

    let received = tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, (0, String::new(), Value::Null));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_handler_does_not_stop_siblings() {
    init_logging();
    let bus = EventBus::new();
    let counter = Arc::new(AtomicUsize::new(0));

    bus.subscribe("mixed", |_: String| -> u8 { panic!("handler exploded") })
        .unwrap();
    // Wrong arity for the published arguments.
    bus.subscribe("mixed", |_: String, _: String| {}).unwrap();
    let c = Arc::clone(&counter);
    bus.subscribe("mixed", move |_: String| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(bus.publish("mixed", vec![json!("go")]), 3);
    wait_for(|| counter.load(Ordering::SeqCst) == 1).await;

    // The bus keeps working after handler faults.
    bus.publish("mixed", vec![json!("again")]);
    wait_for(|| counter.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_returns_handler_value() {
    let bus = EventBus::new();
    bus.subscribe("greet", greet).unwrap();

    let reply = bus
        .publish_with_reply("greet", Duration::from_millis(100), vec![json!("world")])
        .await
        .unwrap();
    assert_eq!(reply, Some(json!("hello world")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_with_no_or_many_values_is_none() {
    let bus = EventBus::new();
    bus.subscribe("unit", noop).unwrap();
    bus.subscribe("pair", |a: i32, b: i32| (a + b, a - b)).unwrap();

    let reply = bus
        .publish_with_reply("unit", Duration::from_millis(100), vec![])
        .await
        .unwrap();
    assert_eq!(reply, None);

    let reply = bus
        .publish_with_reply("pair", Duration::from_millis(100), vec![json!(3), json!(1)])
        .await
        .unwrap();
    assert_eq!(reply, None);
}

#[tokio::test]
async fn reply_on_unknown_topic_fails() {
    let bus = EventBus::new();
    let err = bus
        .publish_with_reply("missing", Duration::from_secs(5), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::UnknownTopic { .. }));
}

#[tokio::test]
async fn reply_on_emptied_topic_fails_immediately() {
    let bus = EventBus::new();
    bus.subscribe("greet", greet).unwrap();
    bus.unsubscribe("greet", &greet).unwrap();

    let started = Instant::now();
    let err = bus
        .publish_with_reply("greet", Duration::from_secs(5), vec![json!("x")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::HandlerCountMismatch {
            expected: 1,
            actual: 0,
            ..
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_with_two_handlers_invokes_neither() {
    let bus = EventBus::new();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let c = Arc::clone(&counter);
        bus.subscribe("two", move || c.fetch_add(1, Ordering::SeqCst))
            .unwrap();
    }

    let err = bus
        .publish_with_reply("two", Duration::from_millis(100), vec![])
        .await
        .unwrap_err();
    match err {
        BusError::HandlerCountMismatch { topic, actual, .. } => {
            assert_eq!(topic, "two");
            assert_eq!(actual, 2);
        },
        other => panic!("unexpected error: {other}"),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_reply_times_out_but_may_finish() {
    let bus = EventBus::new();
    let finished = Arc::new(AtomicBool::new(false));

    let f = Arc::clone(&finished);
    bus.subscribe("slow", move || {
        std::thread::sleep(Duration::from_millis(100));
        f.store(true, Ordering::SeqCst);
        "late"
    })
    .unwrap();

    let err = bus
        .publish_with_reply("slow", Duration::from_millis(10), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Timeout { ref topic, .. } if topic == "slow"));

    // The handler is not cancelled.
    wait_for(|| finished.load(Ordering::SeqCst)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_reply_handler_reports_timeout() {
    init_logging();
    let bus = EventBus::new();
    bus.subscribe("broken", |_: u32| -> u32 { panic!("reply exploded") })
        .unwrap();

    let err = bus
        .publish_with_reply("broken", Duration::from_millis(50), vec![json!(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Timeout { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_during_publish_keeps_snapshot() {
    let bus = EventBus::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let make = |counter: Arc<AtomicUsize>| move || slow_tick(&counter);
    let handler = make(Arc::clone(&counter));
    for _ in 0..4 {
        bus.subscribe("churn", handler.clone()).unwrap();
    }

    assert_eq!(bus.publish("churn", vec![]), 4);

    let remover = bus.clone();
    let h = handler.clone();
    let unsubscriber = tokio::task::spawn_blocking(move || {
        for _ in 0..4 {
            remover.unsubscribe("churn", &h).unwrap();
        }
    });
    unsubscriber.await.unwrap();

    assert!(!bus.has_callback("churn"));
    wait_for(|| counter.load(Ordering::SeqCst) == 4).await;

    // Nothing left to run.
    assert_eq!(bus.publish("churn", vec![]), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serial_handler_never_overlaps() {
    let bus = EventBus::new();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let (a, m, d) = (Arc::clone(&active), Arc::clone(&max_active), Arc::clone(&done));
    bus.subscribe_serial("serial", move || {
        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
        m.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        a.fetch_sub(1, Ordering::SeqCst);
        d.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    for _ in 0..5 {
        bus.publish("serial", vec![]);
    }

    wait_for(|| done.load(Ordering::SeqCst) == 5).await;
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn blocking_reply_from_plain_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let bus = EventBus::with_runtime(runtime.handle().clone(), BusConfig::default());
    bus.subscribe("greet", greet).unwrap();
    bus.subscribe("slow", || {
        std::thread::sleep(Duration::from_millis(100));
        1_u8
    })
    .unwrap();

    let reply = bus
        .publish_with_reply_blocking("greet", Duration::from_millis(200), vec![json!("thread")])
        .unwrap();
    assert_eq!(reply, Some(json!("hello thread")));

    let err = bus
        .publish_with_reply_blocking("slow", Duration::from_millis(10), vec![])
        .unwrap_err();
    assert!(matches!(err, BusError::Timeout { .. }));
}

async fn wait_for(condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_millis(500), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}
