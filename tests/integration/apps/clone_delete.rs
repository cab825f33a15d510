use std::sync::Arc;

use bytes::Bytes;
use gdp::apps::{
    CreateRequest, ReadRange, SubscriptionEnd, append_payloads, clone_log, create_log,
    delete_log, follow, read_range,
};
use gdp::{ErrorKind, SigningKeyPair, parse_name};

use crate::fixtures::{Cluster, unique_human};

#[test]
fn clone_registers_replicas_behind_the_primary() {
    let cluster = Cluster::start(3);
    let client = cluster.client();
    let human = unique_human("clone");
    let log = cluster.create_log(&client, 1, &human);

    let created = clone_log(&client, log, &[cluster.server_name(2), cluster.server_name(3)])
        .expect("clone");
    assert_eq!(created, vec![cluster.server(2).addr().clone(), cluster.server(3).addr().clone()]);
    assert!(cluster.server(2).store().contains(&log));
    assert!(cluster.server(3).store().contains(&log));

    let addrs = client.resolve_all(&log).expect("resolve_all");
    assert_eq!(addrs.first(), Some(cluster.server(1).addr()));
    assert_eq!(addrs.len(), 3);
    assert_eq!(client.lookup_human(&human).expect("lookup"), log);
}

#[test]
fn delete_removes_the_log_and_its_registration() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let log = cluster.create_log(&client, 1, &unique_human("delete"));

    delete_log(&client, log).expect("delete");
    assert!(!cluster.server(1).store().contains(&log));
    assert_eq!(client.resolve(&log).expect_err("gone").kind(), ErrorKind::NotFound);

    let err = delete_log(&client, log).expect_err("second delete");
    assert_eq!(err.exit_code(), 66);
}

#[test]
fn create_with_writer_then_append_and_read() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let writer = Arc::new(SigningKeyPair::generate());
    let human = unique_human("tool");
    let created = create_log(
        &client,
        CreateRequest {
            human: Some(human.clone()),
            server: cluster.server_name(1),
            writer: Some(writer.clone()),
            creator: "tests".into(),
        },
    )
    .expect("create");
    assert_eq!(created.human.as_deref(), Some(human.as_str()));
    assert_eq!(created.addr, cluster.server(1).addr().to_string());
    let log = parse_name(&created.name).expect("printable");

    let payloads = ["a", "b", "c", "d"].map(Bytes::from);
    let report = append_payloads(&client, log, payloads, Some(writer), true).expect("append");
    assert_eq!((report.appended, report.first, report.last), (4, Some(1), Some(4)));

    let mut seen = Vec::new();
    let read = read_range(
        &client,
        log,
        ReadRange {
            start: 2,
            count: Some(2),
        },
        |datum| {
            seen.push(datum.payload.clone());
            Ok(())
        },
    )
    .expect("read range");
    assert_eq!(read, 2);
    assert_eq!(seen, vec![Bytes::from("b"), Bytes::from("c")]);

    let unsigned = append_payloads(&client, log, [Bytes::from("x")], None, false)
        .expect_err("unsigned append");
    assert_eq!(unsigned.exit_code(), 77);
}

#[test]
fn create_without_human_name_uses_metadata_name() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let created = create_log(
        &client,
        CreateRequest {
            human: None,
            server: cluster.server_name(1),
            writer: None,
            creator: "tests".into(),
        },
    )
    .expect("create");
    let log = parse_name(&created.name).expect("printable");
    assert!(cluster.server(1).store().contains(&log));
}

#[test]
fn follow_stops_at_eos() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let log = cluster.create_log(&client, 1, &unique_human("follow"));
    append_payloads(&client, log, ["1", "2", "3"].map(Bytes::from), None, false)
        .expect("append");

    let mut recnos = Vec::new();
    let end = follow(&client, log, 1, 3, None, |datum| {
        recnos.push(datum.recno);
        Ok(())
    })
    .expect("follow");
    assert_eq!(end, SubscriptionEnd::Eos { delivered: 3 });
    assert_eq!(recnos, vec![1, 2, 3]);
}

#[test]
fn follow_honors_the_stop_channel() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let log = cluster.create_log(&client, 1, &unique_human("follow-stop"));
    let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    stop_tx.send(()).expect("stop");

    let end = follow(&client, log, 0, 0, Some(&stop_rx), |_| Ok(())).expect("follow");
    assert_eq!(end, SubscriptionEnd::Stopped);
}
