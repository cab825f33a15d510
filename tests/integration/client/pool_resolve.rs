use gdp::{ErrorKind, InternalName, ServerAddr};

use crate::fixtures::{Cluster, unique_human};

#[test]
fn parallel_resolution_shares_connections() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    let names: Vec<(InternalName, usize)> = (0..6)
        .map(|i| {
            let server = 1 + i % 2;
            let name = cluster.create_log(&client, server, &unique_human(&format!("pool{i}")));
            (name, server)
        })
        .collect();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let client = &client;
            let names = &names;
            let cluster = &cluster;
            scope.spawn(move || {
                for _ in 0..5 {
                    for (name, server) in names {
                        let addr = client.resolve(name).expect("resolve");
                        assert_eq!(&addr, cluster.server(*server).addr());
                        let lease = client.connect(&addr).expect("connect");
                        assert!(lease.is_alive());
                    }
                }
            });
        }
    });

    // Directory plus the two log servers, one connection each.
    assert!(client.pool().len() <= 3, "pool grew to {}", client.pool().len());
}

#[test]
fn human_names_round_trip_through_the_directory() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let human = unique_human("lookup");
    let name = cluster.create_log(&client, 1, &human);

    assert_eq!(client.lookup_human(&human).expect("lookup"), name);
    assert_eq!(client.reverse_lookup(&name).expect("reverse"), Some(human.clone()));
    assert_eq!(client.parse_external(&name.printable()).expect("printable"), name);
    assert_eq!(client.parse_external(&human).expect("human"), name);
}

#[test]
fn servers_register_under_their_names() {
    let cluster = Cluster::start(2);
    let client = cluster.client();
    for index in 0..3 {
        let addr = client.resolve(&cluster.server_name(index)).expect("resolve server");
        assert_eq!(&addr, cluster.server(index).addr());
    }
}

#[test]
fn unregistered_human_names_hash_but_do_not_resolve() {
    let cluster = Cluster::start(0);
    let client = cluster.client();
    let human = unique_human("nobody");
    let name = client.lookup_human(&human).expect("hashed fallback");
    assert_eq!(name, InternalName::from_human(&human).expect("name"));
    assert_eq!(client.resolve(&name).expect_err("unregistered").kind(), ErrorKind::NotFound);
}

#[test]
fn malformed_external_names_are_rejected() {
    let cluster = Cluster::start(0);
    let client = cluster.client();
    let err = client.parse_external("has spaces").expect_err("bad syntax");
    assert_eq!(err.kind(), ErrorKind::BadNameSyntax);
}

#[test]
fn unreachable_servers_exhaust_retries() {
    let cluster = Cluster::start(0);
    let client = cluster.client();
    // Bind then drop so nothing listens on the port.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("free port")
        .port();
    let err = client
        .connect(&ServerAddr::new(format!("127.0.0.1:{port}")))
        .err()
        .expect("nothing listening");
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}
