//! Queue bounds and fan-out isolation
//!
//! The memory promise: every queue holds at most its configured depth no
//! matter how far a consumer falls behind; overruns land in monotone drop
//! counters; and one misbehaving subscriber never degrades another.

use std::time::Duration;

use tokio::time::timeout;

use session::{DropPolicy, Session, SessionConfig, SubscriptionSpec};

use crate::support::{paced, stepper, SOON};

#[tokio::test]
async fn a_stalled_subscriber_stays_bounded_and_sheds() {
    let mut session = Session::new();
    // Unpaced: the solver free-runs against the queues.
    session.start(stepper(), SessionConfig::default()).unwrap();

    let stalled = session
        .subscribe_frames(
            SubscriptionSpec::new("stalled")
                .with_queue_depth(4)
                .with_drop_policy(DropPolicy::DropOldest),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let first = session.get_diagnostics();
    let entry = first.subscription("stalled").expect("subscription is registered");
    assert_eq!(entry.queue_capacity, 4);
    assert!(
        entry.queue_depth <= 4,
        "queue depth {} exceeds the configured bound",
        entry.queue_depth
    );
    assert!(
        entry.dropped > 0,
        "an unread subscriber under a free-running solver must shed"
    );
    assert!(stalled.depth() <= 4);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = session.get_diagnostics();
    assert!(
        second.produced_total > first.produced_total,
        "production stalled behind an unread subscriber"
    );
    assert!(
        second.dropped_total > first.dropped_total,
        "drop counters must keep growing under sustained overrun"
    );
    assert!(second.subscription("stalled").unwrap().queue_depth <= 4);

    session.stop().await.unwrap();

    // Frames queued at stop stay poppable; the bound still holds.
    let mut leftovers = 0;
    while timeout(SOON, stalled.next_frame())
        .await
        .expect("a closed queue must not block")
        .is_some()
    {
        leftovers += 1;
    }
    assert!(leftovers <= 4, "drained {leftovers} frames from a depth-4 queue");

    // Totals survive the teardown.
    let after = session.get_diagnostics();
    assert!(
        after.dropped_total >= second.dropped_total,
        "drop totals rewound across stop: {} then {}",
        second.dropped_total,
        after.dropped_total
    );
}

#[tokio::test]
async fn a_slow_subscriber_does_not_starve_a_fast_one() {
    let mut session = Session::new();
    session.start(stepper(), paced(1_000.0)).unwrap();

    let fast = session
        .subscribe_frames(SubscriptionSpec::new("fast").with_queue_depth(32))
        .unwrap();
    let slow = session
        .subscribe_frames(SubscriptionSpec::new("slow").with_queue_depth(2))
        .unwrap();

    let fast_task = tokio::spawn(async move {
        let mut delivered = 0u64;
        let mut last = None;
        while let Some(frame) = fast.next_frame().await {
            if let Some(prev) = last {
                assert!(
                    frame.meta.step_index > prev,
                    "fast subscriber saw step {} after {prev}",
                    frame.meta.step_index
                );
            }
            last = Some(frame.meta.step_index);
            delivered += 1;
        }
        delivered
    });
    let slow_task = tokio::spawn(async move {
        // Pop far below the production rate so the queue sits full.
        let mut delivered = 0u64;
        loop {
            tokio::time::sleep(Duration::from_millis(40)).await;
            match timeout(Duration::from_millis(5), slow.next_envelope()).await {
                Ok(Some(_)) => delivered += 1,
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        delivered
    });

    tokio::time::sleep(Duration::from_millis(600)).await;
    let live = session.get_diagnostics();
    let fast_entry = live.subscription("fast").unwrap();
    let slow_entry = live.subscription("slow").unwrap();

    assert_eq!(
        fast_entry.dropped, 0,
        "a continuously draining depth-32 subscriber at 1 kHz must not shed"
    );
    assert!(
        slow_entry.dropped > 0,
        "the slow subscriber sheds its own frames instead of exerting backpressure"
    );
    assert!(
        fast_entry.delivered >= 300,
        "fast subscriber starved: {} frames in 600 ms",
        fast_entry.delivered
    );
    assert!(
        fast_entry.latency_p95_ms < 50.0,
        "fast delivery latency degraded to p95 {} ms behind a slow peer",
        fast_entry.latency_p95_ms
    );

    session.stop().await.unwrap();
    let fast_delivered = timeout(SOON, fast_task).await.unwrap().unwrap();
    let slow_delivered = timeout(SOON, slow_task).await.unwrap().unwrap();
    assert!(fast_delivered >= 300);
    assert!(
        slow_delivered < fast_delivered,
        "a 25 Hz consumer cannot out-deliver a continuous one"
    );
}
