use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use gdp::core::Limits;
use gdp::proto::{
    Ack, Envelope, FrameReader, FrameWriter, Message, Op, Reply, encode_envelope, read_message,
};
use gdp::{
    Datum, ErrorKind, GdpClient, Gin, GinState, InternalName, LogInfo, LogMetadata, OpenMode,
    OpenOptions, ServerAddr,
};

use crate::fixtures::{Cluster, fast_client_config, unique_human};

fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Answers OPEN and nothing else.
fn open_only_server() -> ServerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = ServerAddr::from(listener.local_addr().expect("local addr"));
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || serve_open_only(stream));
        }
    });
    addr
}

fn serve_open_only(stream: TcpStream) {
    let limits = Limits::default();
    let Ok(write_half) = stream.try_clone() else {
        return;
    };
    let mut reader = FrameReader::new(stream, limits.max_frame_bytes);
    let mut writer = FrameWriter::new(write_half, limits.max_frame_bytes);
    while let Ok(Some(message)) = read_message(&mut reader, &limits) {
        let Message::Request(request) = message else {
            continue;
        };
        if !matches!(request.op, Op::Open { .. }) {
            continue;
        }
        let ack = Message::Ack(Ack {
            rid: request.rid,
            reply: Reply::Opened {
                info: LogInfo::default(),
                metadata: LogMetadata::new(),
            },
        });
        let body = encode_envelope(&Envelope::new(ack)).expect("encode");
        if writer.write_frame(&body).is_err() {
            return;
        }
    }
}

#[test]
fn close_discards_calls_that_outlive_the_timeout() {
    let cluster = Cluster::start(0);
    let mut config = fast_client_config(cluster.router().clone());
    config.close_timeout = Duration::from_millis(100);
    config.request_timeout = Duration::from_secs(1);
    let client = GdpClient::new(config).expect("client");

    let name = InternalName::from_human(&unique_human("silent")).expect("name");
    client
        .register(&name, &open_only_server(), None)
        .expect("register");
    let gin = Gin::open(&client, name, OpenMode::ReadOnly, OpenOptions::new()).expect("open");

    thread::scope(|scope| {
        let blocked = scope.spawn(|| gin.refresh());
        wait_until("the refresh to be in flight", || gin.outstanding() == 1);
        gin.close().expect("close");

        let err = blocked
            .join()
            .expect("refresh thread")
            .expect_err("discarded by close");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().contains("handle closed"), "{err}");
    });
    assert_eq!(gin.state(), GinState::Closed);
    assert_eq!(gin.outstanding(), 0);
}

#[test]
fn close_waits_for_completions_then_frees_them() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let name = cluster.create_log(&client, 1, &unique_human("close-free"));
    let writer = cluster.open(&client, name, OpenMode::AppendOnly);
    let reader = cluster.open(&client, name, OpenMode::ReadOnly);
    reader.subscribe(0, 0, None).expect("subscribe");

    for i in 1..=3 {
        writer
            .append_async(Datum::new(format!("c{i}")), None, None)
            .expect("append_async");
    }
    writer.close().expect("close writer");
    assert_eq!(writer.state(), GinState::Closed);
    assert_eq!(cluster.server(1).store().stat(&name).expect("stat").highest_recno, 3);

    wait_until("DATA for every append", || client.event_queue().len() >= 3);
    reader.close().expect("close reader");

    for gin in [&writer, &reader] {
        let err = client
            .next_event(Some(gin.id()), Some(Duration::from_millis(200)))
            .expect_err("events freed by close");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
    assert!(client.event_queue().is_empty());
}
