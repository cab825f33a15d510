use crate::fixtures::{CliEnv, Cluster, unique_human};

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn create_append_read_through_the_binary() {
    let cluster = Cluster::start(1);
    let env = CliEnv::new();
    let router = cluster.router().to_string();
    let human = unique_human("cli");

    let created = env
        .gdp()
        .args(["-D", &router, "--json", "create", &human, "--server", "test.logd1"])
        .output()
        .expect("run create");
    assert!(created.status.success(), "{created:?}");
    let created = &json_lines(&created.stdout)[0];
    assert_eq!(created["human"], human.as_str());
    assert_eq!(created["addr"], cluster.server(1).addr().to_string());

    env.gdp()
        .args(["-D", &router, "append", &human])
        .write_stdin("alpha\nbeta\ngamma\n")
        .assert()
        .success();

    let read = env
        .gdp()
        .args(["-D", &router, "--json", "read", &human, "--start", "2"])
        .output()
        .expect("run read");
    assert!(read.status.success(), "{read:?}");
    let records = json_lines(&read.stdout);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["recno"], 2);
    assert_eq!(records[0]["text"], "beta");
    assert_eq!(records[1]["text"], "gamma");

    let followed = env
        .gdp()
        .args(["-D", &router, "--json", "read", &human, "--subscribe", "--max", "3"])
        .output()
        .expect("run subscribe");
    assert!(followed.status.success(), "{followed:?}");
    assert_eq!(json_lines(&followed.stdout).len(), 3);

    env.gdp()
        .args(["-D", &router, "delete", &human])
        .assert()
        .success();
    env.gdp()
        .args(["-D", &router, "read", &human])
        .assert()
        .code(66);
}

#[test]
fn signed_logs_need_the_key() {
    let cluster = Cluster::start(1);
    let env = CliEnv::new();
    let router = cluster.router().to_string();
    let human = unique_human("cli-signed");
    let key = env.path().join("writer.key");
    let key_arg = key.to_str().expect("utf-8 path");

    env.gdp().args(["keygen", "--out", key_arg]).assert().success();
    env.gdp()
        .args(["-D", &router, "create", &human, "-s", "test.logd1", "-k", key_arg])
        .assert()
        .success();

    env.gdp()
        .args(["-D", &router, "append", &human])
        .write_stdin("unsigned\n")
        .assert()
        .code(77);
    env.gdp()
        .args(["-D", &router, "append", &human, "--key", key_arg, "--chain"])
        .write_stdin("one\ntwo\n")
        .assert()
        .success();

    let log = gdp::InternalName::from_human(&human).expect("name");
    assert_eq!(
        cluster.server(1).store().stat(&log).expect("stat").highest_recno,
        2
    );
}
