use std::time::Duration;

use bytes::Bytes;
use gdp::client::Completed;
use gdp::{
    Context, Datum, ErrorKind, Event, EventKind, Gin, InternalName, LogMetadata, OpenMode,
    OpenOptions,
};

use crate::fixtures::{Cluster, unique_human};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

#[test]
fn appended_records_read_back_in_order() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("append"));
    let gin = cluster.open(&client, name, OpenMode::ReadAppend);

    for i in 1..=5u64 {
        let recno = gin
            .append(Datum::new(format!("record {i}")), None)
            .expect("append");
        assert_eq!(recno, i);
    }
    assert_eq!(gin.highest_recno(), 5);

    for i in 1..=5u64 {
        let datum = gin.read_by_recno(i).expect("read");
        assert_eq!(datum.recno, i);
        assert_eq!(datum.payload, Bytes::from(format!("record {i}")));
    }
    gin.close().expect("close");
}

#[test]
fn concurrent_appends_get_distinct_recnos() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("concurrent"));
    let gin = cluster.open(&client, name, OpenMode::AppendOnly);

    let mut recnos: Vec<u64> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|w| {
                let gin = &gin;
                scope.spawn(move || {
                    (0..10)
                        .map(|i| {
                            gin.append(Datum::new(format!("w{w}-{i}")), None)
                                .expect("append")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().expect("worker"))
            .collect()
    });
    recnos.sort_unstable();
    assert_eq!(recnos, (1..=40).collect::<Vec<_>>());
}

#[test]
fn chained_append_pins_position() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("chained"));
    let gin = cluster.open(&client, name, OpenMode::ReadAppend);

    gin.append(Datum::new("first"), None).expect("append");
    let prev = gin.last_hash().expect("head hash");
    assert_eq!(gin.append(Datum::new("second"), Some(prev)).expect("chained"), 2);

    // A second writer moves the log on; the stale chain is rejected.
    let other = cluster.open(&client, name, OpenMode::AppendOnly);
    other.append(Datum::new("third"), None).expect("append");
    let stale = gin.last_hash().expect("head hash");
    let err = gin
        .append(Datum::new("fourth"), Some(stale))
        .expect_err("stale chain");
    assert_eq!(err.kind(), ErrorKind::SequenceConflict);
}

#[test]
fn reads_outside_the_log_are_out_of_range() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("range"));
    let gin = cluster.open(&client, name, OpenMode::ReadAppend);
    gin.append(Datum::new("only"), None).expect("append");

    for recno in [0, 2, 99] {
        let err = gin.read_by_recno(recno).expect_err("out of range");
        assert_eq!(err.kind(), ErrorKind::OutOfRange, "recno {recno}");
    }
}

#[test]
fn async_operations_complete_with_their_context() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("async"));
    let gin = cluster.open(&client, name, OpenMode::ReadAppend);

    let request = gin
        .append_async(Datum::new("queued"), None, Some(Context::new("append-ctx")))
        .expect("append_async");
    let event = client.next_event(Some(gin.id()), WAIT).expect("event");
    match &event {
        Event::Done {
            request: done,
            outcome: Completed::Appended { recno },
            ..
        } => {
            assert_eq!(*done, request);
            assert_eq!(*recno, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        event.context().and_then(|c| c.downcast_ref::<&str>()),
        Some(&"append-ctx")
    );

    gin.read_by_recno_async(1, Some(Context::new(7u32)))
        .expect("read_async");
    let event = client.next_event(Some(gin.id()), WAIT).expect("event");
    assert_eq!(event.kind(), EventKind::Done);
    assert_eq!(event.datum().map(|d| d.payload.clone()), Some(Bytes::from("queued")));
    assert_eq!(event.context().and_then(|c| c.downcast_ref::<u32>()), Some(&7));
}

#[test]
fn async_appends_complete_in_submission_order() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("fifo"));
    let gin = cluster.open(&client, name, OpenMode::AppendOnly);

    let requests: Vec<_> = (1..=8u64)
        .map(|i| {
            gin.append_async(Datum::new(format!("q{i}")), None, Some(Context::new(i)))
                .expect("append_async")
        })
        .collect();
    for (expected, request) in (1..=8u64).zip(&requests) {
        let event = client.next_event(Some(gin.id()), WAIT).expect("event");
        match &event {
            Event::Done {
                request: done,
                outcome: Completed::Appended { recno },
                ..
            } => {
                assert_eq!(done, request);
                assert_eq!(*recno, expected);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            event.context().and_then(|c| c.downcast_ref::<u64>()),
            Some(&expected)
        );
    }
}

#[test]
fn next_event_times_out_when_idle() {
    let cluster = Cluster::start(0);
    let client = cluster.client();
    let err = client
        .next_event(None, Some(Duration::from_millis(50)))
        .expect_err("idle queue");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn opening_a_missing_log_is_not_found() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = InternalName::from_human(&unique_human("missing")).expect("name");
    let err = Gin::open(&client, name, OpenMode::ReadOnly, OpenOptions::new())
        .err()
        .expect("missing log");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn open_creates_on_the_named_server() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let human = unique_human("create-on");
    let name = InternalName::from_human(&human).expect("name");
    let options = OpenOptions::new()
        .create_on(
            cluster.server_name(2),
            LogMetadata::for_new_log(Some(&human), "test", None),
        )
        .human(human.clone());

    let gin = Gin::open(&client, name, OpenMode::AppendOnly, options).expect("open");
    assert_eq!(gin.addr(), cluster.server(2).addr());
    assert!(cluster.server(2).store().contains(&name));
    assert_eq!(client.lookup_human(&human).expect("lookup"), name);
}

#[test]
fn mode_restricts_operations() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("modes"));

    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    let err = reader.append(Datum::new("nope"), None).expect_err("read-only");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    writer.append(Datum::new("yes"), None).expect("append");
    let err = writer.read_by_recno(1).expect_err("append-only");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn closed_handles_reject_work() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("closed"));
    let gin = cluster.open(&client, name, OpenMode::ReadAppend);
    gin.close().expect("close");
    gin.close().expect("close twice");
    assert!(gin.append(Datum::new("late"), None).is_err());
}
