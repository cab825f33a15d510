use std::time::Duration;

use gdp::client::Completed;
use gdp::{Context, Datum, ErrorKind, Event, GdpClient, Gin, OpenMode, forward_append};

use crate::fixtures::{Cluster, unique_human};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn forward_and_wait(client: &GdpClient, source: &Gin, datum: Datum, cluster: &Cluster) -> Event {
    let recno = datum.recno;
    forward_append(source, datum, &cluster.server_name(2), Some(Context::new(recno)))
        .expect("forward");
    let event = client.next_event(Some(source.id()), WAIT).expect("event");
    assert_eq!(event.context().and_then(|c| c.downcast_ref::<u64>()), Some(&recno));
    event
}

#[test]
fn forwarded_records_land_in_order_on_the_replica() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let human = unique_human("forward");
    let name = cluster.create_log(&client, 1, &human);
    let source = cluster.open(&client, name, OpenMode::ReadAppend);
    for i in 1..=12u64 {
        source.append(Datum::new(format!("r{i}")), None).expect("append");
    }

    // Replica of the same log on the second peer.
    client
        .create_log(&name, source.metadata(), &cluster.server_name(2), None)
        .expect("replica");

    for recno in 1..=10u64 {
        let datum = source.read_by_recno(recno).expect("read");
        match forward_and_wait(&client, &source, datum, &cluster) {
            Event::Done {
                outcome: Completed::Forwarded { recno: landed },
                ..
            } => assert_eq!(landed, recno),
            other => panic!("forward {recno}: unexpected {other:?}"),
        }
    }

    // A gap is refused; the replica still expects 11.
    let skipped = source.read_by_recno(12).expect("read");
    match forward_and_wait(&client, &source, skipped, &cluster) {
        Event::Error { status, .. } => assert_eq!(status.kind, ErrorKind::SequenceConflict),
        other => panic!("gap accepted: {other:?}"),
    }

    let next = source.read_by_recno(11).expect("read");
    match forward_and_wait(&client, &source, next, &cluster) {
        Event::Done {
            outcome: Completed::Forwarded { recno },
            ..
        } => assert_eq!(recno, 11),
        other => panic!("forward 11: unexpected {other:?}"),
    }

    let replica = cluster.server(2).store();
    assert_eq!(replica.stat(&name).expect("stat").highest_recno, 11);
    assert_eq!(
        replica.read(&name, 5).expect("read").payload,
        source.read_by_recno(5).expect("read").payload
    );
}

#[test]
fn replaying_a_forwarded_record_is_a_conflict() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("replay"));
    let source = cluster.open(&client, name, OpenMode::ReadAppend);
    source.append(Datum::new("once"), None).expect("append");
    client
        .create_log(&name, source.metadata(), &cluster.server_name(2), None)
        .expect("replica");

    let datum = source.read_by_recno(1).expect("read");
    let first = forward_and_wait(&client, &source, datum.clone(), &cluster);
    assert!(matches!(first, Event::Done { .. }), "{first:?}");
    match forward_and_wait(&client, &source, datum, &cluster) {
        Event::Error { status, .. } => assert_eq!(status.kind, ErrorKind::SequenceConflict),
        other => panic!("duplicate accepted: {other:?}"),
    }
}

#[test]
fn records_without_a_recno_are_not_forwarded() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("norecno"));
    let source = cluster.open(&client, name, OpenMode::ReadAppend);
    let err = forward_append(&source, Datum::new("fresh"), &cluster.server_name(2), None)
        .expect_err("recno 0");
    assert_eq!(err.kind(), ErrorKind::OutOfRange);
}
