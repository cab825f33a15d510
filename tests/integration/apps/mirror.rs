use std::time::{Duration, Instant};

use bytes::Bytes;
use gdp::apps::{MirrorOptions, append_payloads, mirror};
use gdp::{InternalName, ServerHandle};

use crate::fixtures::{Cluster, unique_human};

fn wait_for_head(server: &ServerHandle, log: &InternalName, highest: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let current = server.store().stat(log).expect("stat").highest_recno;
        if current >= highest {
            assert_eq!(current, highest, "mirror overshot");
            return;
        }
        assert!(Instant::now() < deadline, "mirror stuck at {current}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn payloads(range: std::ops::RangeInclusive<u64>) -> Vec<Bytes> {
    range.map(|i| Bytes::from(format!("m{i}"))).collect()
}

#[test]
fn mirror_copies_history_then_follows() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let source = cluster.create_log(&client, 1, &unique_human("mirror-src"));
    let target = cluster.create_log(&client, 2, &unique_human("mirror-dst"));
    append_payloads(&client, source, payloads(1..=5), None, false).expect("seed");

    let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    let worker = {
        let client = client.clone();
        std::thread::spawn(move || {
            mirror(
                &client,
                source,
                target,
                MirrorOptions {
                    signer: None,
                    stop: Some(stop_rx),
                },
            )
        })
    };

    wait_for_head(cluster.server(2), &target, 5);
    assert!(!worker.is_finished(), "mirror must keep following");

    append_payloads(&client, source, payloads(6..=6), None, false).expect("live");
    wait_for_head(cluster.server(2), &target, 6);

    stop_tx.send(()).expect("stop");
    let report = worker.join().expect("mirror thread").expect("mirror");
    assert_eq!(report.start, 1);
    assert_eq!(report.copied, 6);
    assert_eq!(report.last_target_recno, Some(6));

    let copied = cluster.server(2).store().read(&target, 6).expect("read");
    assert_eq!(copied.payload, Bytes::from("m6"));
}

#[test]
fn mirror_resumes_after_the_target_head() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let source = cluster.create_log(&client, 1, &unique_human("resume-src"));
    let target = cluster.create_log(&client, 2, &unique_human("resume-dst"));
    append_payloads(&client, source, payloads(1..=4), None, false).expect("seed");
    append_payloads(&client, target, payloads(1..=2), None, false).expect("partial copy");

    let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    let worker = {
        let client = client.clone();
        std::thread::spawn(move || {
            mirror(
                &client,
                source,
                target,
                MirrorOptions {
                    signer: None,
                    stop: Some(stop_rx),
                },
            )
        })
    };
    wait_for_head(cluster.server(2), &target, 4);
    stop_tx.send(()).expect("stop");

    let report = worker.join().expect("mirror thread").expect("mirror");
    assert_eq!(report.start, 3);
    assert_eq!(report.copied, 2);
}

#[test]
fn mirror_fails_when_the_source_goes_away() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let source = cluster.create_log(&client, 1, &unique_human("gone-src"));
    let target = cluster.create_log(&client, 2, &unique_human("gone-dst"));

    let (_stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    let worker = {
        let client = client.clone();
        std::thread::spawn(move || {
            mirror(
                &client,
                source,
                target,
                MirrorOptions {
                    signer: None,
                    stop: Some(stop_rx),
                },
            )
        })
    };
    // Give the mirror time to subscribe before the log disappears.
    std::thread::sleep(Duration::from_millis(300));
    gdp::apps::delete_log(&client, source).expect("delete source");

    worker
        .join()
        .expect("mirror thread")
        .expect_err("source deleted");
}
