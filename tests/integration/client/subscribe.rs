use std::time::Duration;

use bytes::Bytes;
use gdp::{Datum, ErrorKind, Event, EventKind, GdpClient, Gin, GinState, OpenMode};

use crate::fixtures::{Cluster, unique_human};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn next_data(client: &GdpClient, gin: &Gin) -> Datum {
    match client.next_event(Some(gin.id()), WAIT).expect("event") {
        Event::Data { datum, .. } => datum,
        other => panic!("expected DATA, got {other:?}"),
    }
}

fn append_n(gin: &Gin, range: std::ops::RangeInclusive<u64>) {
    for i in range {
        gin.append(Datum::new(format!("r{i}")), None).expect("append");
    }
}

#[test]
fn replay_then_live_records_arrive_in_order() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("replay"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    append_n(&writer, 1..=3);

    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(2, 0, None).expect("subscribe");
    assert_eq!(reader.state(), GinState::Subscribing);
    append_n(&writer, 4..=5);

    for expected in 2..=5u64 {
        let datum = next_data(&client, &reader);
        assert_eq!(datum.recno, expected);
        assert_eq!(datum.payload, Bytes::from(format!("r{expected}")));
    }
}

#[test]
fn start_zero_skips_history() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("live"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    append_n(&writer, 1..=3);

    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(0, 0, None).expect("subscribe");
    append_n(&writer, 4..=4);
    assert_eq!(next_data(&client, &reader).recno, 4);
}

#[test]
fn bounded_subscription_ends_with_eos() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("bounded"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    append_n(&writer, 1..=2);

    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(1, 3, None).expect("subscribe");
    append_n(&writer, 3..=5);

    for expected in 1..=3u64 {
        assert_eq!(next_data(&client, &reader).recno, expected);
    }
    match client.next_event(Some(reader.id()), WAIT).expect("event") {
        Event::Eos { delivered, .. } => assert_eq!(delivered, 3),
        other => panic!("expected EOS, got {other:?}"),
    }
    let err = client
        .next_event(Some(reader.id()), Some(Duration::from_millis(200)))
        .expect_err("nothing past the quota");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn unsubscribe_stops_delivery() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("unsub"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    let reader = cluster.open(&client, name, OpenMode::ReadOnly);

    reader.subscribe(0, 0, None).expect("subscribe");
    append_n(&writer, 1..=1);
    assert_eq!(next_data(&client, &reader).recno, 1);

    reader.unsubscribe().expect("unsubscribe");
    assert_eq!(reader.state(), GinState::Open);
    append_n(&writer, 2..=3);
    let err = client
        .next_event(Some(reader.id()), Some(Duration::from_millis(300)))
        .expect_err("no data after unsubscribe");
    assert_eq!(err.kind(), ErrorKind::Timeout);

    assert!(reader.unsubscribe().is_err());
}

#[test]
fn deleting_the_log_ends_subscriptions() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("deleted"));
    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(0, 0, None).expect("subscribe");

    let owner = cluster.open(&client, name, OpenMode::ReadAppend);
    owner.delete().expect("delete");
    assert_eq!(owner.state(), GinState::Closed);

    let event = client.next_event(Some(reader.id()), WAIT).expect("event");
    assert_eq!(event.kind(), EventKind::Eos);
    assert!(!cluster.server(1).store().contains(&name));
}

#[test]
fn events_are_filtered_by_handle() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let first = cluster.create_log(&client, 1, &unique_human("first"));
    let second = cluster.create_log(&client, 1, &unique_human("second"));
    let a = cluster.open(&client, first, OpenMode::ReadAppend);
    let b = cluster.open(&client, second, OpenMode::ReadAppend);

    b.subscribe(0, 0, None).expect("subscribe b");
    a.subscribe(0, 0, None).expect("subscribe a");
    append_n(&b, 1..=1);
    append_n(&a, 1..=1);

    let from_a = client.next_event(Some(a.id()), WAIT).expect("event");
    assert_eq!(from_a.handle(), Some(a.id()));
    let from_b = client.next_event(Some(b.id()), WAIT).expect("event");
    assert_eq!(from_b.handle(), Some(b.id()));
}

#[test]
fn client_shutdown_wakes_consumers() {
    let cluster = Cluster::start(0);
    let client = cluster.client();
    let waiter = {
        let client = client.clone();
        std::thread::spawn(move || client.next_event(None, None))
    };
    std::thread::sleep(Duration::from_millis(50));
    client.shutdown();
    let event = waiter.join().expect("waiter").expect("event");
    assert_eq!(event.kind(), EventKind::Shutdown);
}

#[test]
fn closing_a_sibling_handle_keeps_the_subscription() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("sibling"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(0, 0, None).expect("subscribe");

    let sibling = cluster.open(&client, name, OpenMode::ReadOnly);
    assert_eq!(sibling.addr(), reader.addr());
    sibling.close().expect("close sibling");

    append_n(&writer, 1..=2);
    assert_eq!(next_data(&client, &reader).recno, 1);
    assert_eq!(next_data(&client, &reader).recno, 2);
    assert_eq!(reader.state(), GinState::Subscribing);
}

#[test]
fn dropped_connection_resumes_from_next_undelivered_record() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("resume"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    append_n(&writer, 1..=2);

    let live = cluster.open(&client, name, OpenMode::ReadOnly);
    live.subscribe(0, 0, None).expect("subscribe live");
    let replay = cluster.open(&client, name, OpenMode::ReadOnly);
    replay.subscribe(1, 0, None).expect("subscribe replay");
    for expected in 1..=2u64 {
        assert_eq!(next_data(&client, &replay).recno, expected);
    }

    assert!(cluster.server(1).drop_sessions() >= 1);
    // Committed while the client is reconnecting.
    let store = cluster.server(1).store();
    for i in 3..=5u64 {
        let (recno, _) = store
            .append(&name, Datum::new(format!("r{i}")))
            .expect("store append");
        assert_eq!(recno, i);
    }

    for expected in 3..=5u64 {
        assert_eq!(next_data(&client, &live).recno, expected);
        assert_eq!(next_data(&client, &replay).recno, expected);
    }

    append_n(&writer, 6..=6);
    assert_eq!(next_data(&client, &live).recno, 6);
    assert_eq!(next_data(&client, &replay).recno, 6);
    assert_eq!(live.state(), GinState::Subscribing);
    assert_eq!(replay.state(), GinState::Subscribing);
}

#[test]
fn met_quota_is_not_reopened_by_a_reconnect() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("quota"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    append_n(&writer, 1..=3);

    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(1, 3, None).expect("subscribe");
    for expected in 1..=3u64 {
        assert_eq!(next_data(&client, &reader).recno, expected);
    }
    match client.next_event(Some(reader.id()), WAIT).expect("event") {
        Event::Eos { delivered, .. } => assert_eq!(delivered, 3),
        other => panic!("expected EOS, got {other:?}"),
    }

    cluster.server(1).drop_sessions();
    for i in 4..=5u64 {
        cluster
            .server(1)
            .store()
            .append(&name, Datum::new(format!("r{i}")))
            .expect("store append");
    }
    let err = client
        .next_event(Some(reader.id()), Some(Duration::from_millis(300)))
        .expect_err("nothing after EOS");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
