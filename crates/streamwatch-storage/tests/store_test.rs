//! Tail-read behavior of the session store.
//!
//! Covers the "follow live" contract: immediate visibility of appends,
//! wakeup on samples appended after the tail began, termination at close,
//! and restartability from an arbitrary index.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::timeout;

use streamwatch_core::{CloseReason, GpsFix, InterfaceReading, Sample};
use streamwatch_storage::SessionStore;

fn rich_sample(device_id: &str) -> Sample {
    Sample::new(device_id, Utc::now())
        .with_gps(GpsFix::new(48.1173, -1.6778))
        .with_link(InterfaceReading {
            bitrate_kbps: Some(4200),
            one_way_delay_ms: Some(38),
            loss_percent: Some(0.0),
            dropped_packets: Some(0),
            link_up: true,
            ..InterfaceReading::named("wwan0")
        })
}

#[tokio::test]
async fn test_tail_round_trip() {
    let store = SessionStore::new();
    let session = store.open_session("d1", Utc::now()).expect("open");

    let sample = rich_sample("d1");
    let seq = store.append(session.id, sample.clone()).expect("append");

    let mut tail = Box::pin(store.tail(session.id, seq).expect("tail"));
    let got = timeout(Duration::from_secs(1), tail.next())
        .await
        .expect("tail should yield immediately")
        .expect("stream should not be empty");

    // Identical except for the store-assigned index.
    assert_eq!(got.seq, seq);
    assert_eq!(got.gps, sample.gps);
    assert_eq!(got.links, sample.links);
    assert_eq!(got.timestamp, sample.timestamp);
}

#[tokio::test]
async fn test_tail_observes_appends_after_subscription() {
    let store = Arc::new(SessionStore::new());
    let session = store.open_session("d1", Utc::now()).expect("open");

    let mut tail = Box::pin(store.tail(session.id, 0).expect("tail"));

    let writer = {
        let store = Arc::clone(&store);
        let session_id = session.id;
        tokio::spawn(async move {
            for _ in 0..3 {
                store
                    .append(session_id, rich_sample("d1"))
                    .expect("append");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            store
                .close_session(session_id, Utc::now(), CloseReason::Graceful)
                .expect("close");
        })
    };

    let mut seen = Vec::new();
    while let Some(sample) = timeout(Duration::from_secs(2), tail.next())
        .await
        .expect("tail should progress")
    {
        seen.push(sample.seq);
    }
    writer.await.expect("writer task");

    assert_eq!(seen, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_tail_terminates_when_session_closes() {
    let store = SessionStore::new();
    let session = store.open_session("d1", Utc::now()).expect("open");
    store.append(session.id, rich_sample("d1")).expect("append");
    store
        .close_session(session.id, Utc::now(), CloseReason::Timeout)
        .expect("close");

    let tail = Box::pin(store.tail(session.id, 0).expect("tail"));
    let collected: Vec<Sample> = timeout(Duration::from_secs(1), tail.collect())
        .await
        .expect("tail over a closed session must be finite");
    assert_eq!(collected.len(), 1);
}

#[tokio::test]
async fn test_tail_restart_from_index() {
    let store = SessionStore::new();
    let session = store.open_session("d1", Utc::now()).expect("open");
    for _ in 0..5 {
        store.append(session.id, rich_sample("d1")).expect("append");
    }
    store
        .close_session(session.id, Utc::now(), CloseReason::Graceful)
        .expect("close");

    let tail = Box::pin(store.tail(session.id, 3).expect("tail"));
    let rest: Vec<u64> = timeout(
        Duration::from_secs(1),
        tail.map(|s| s.seq).collect::<Vec<_>>(),
    )
    .await
    .expect("finite");
    assert_eq!(rest, vec![3, 4]);
}

#[tokio::test]
async fn test_concurrent_devices_do_not_interleave_indices() {
    let store = Arc::new(SessionStore::new());
    let mut handles = Vec::new();

    for d in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let device_id = format!("d{d}");
            let session = store.open_session(&device_id, Utc::now()).expect("open");
            for i in 0..50u64 {
                let seq = store
                    .append(session.id, rich_sample(&device_id))
                    .expect("append");
                assert_eq!(seq, i);
            }
            session.id
        }));
    }

    for handle in handles {
        let session_id = handle.await.expect("task");
        assert_eq!(store.sample_count(session_id).expect("count"), 50);
    }
}
