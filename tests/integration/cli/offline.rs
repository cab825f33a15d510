use gdp::InternalName;

use crate::fixtures::CliEnv;

#[test]
fn name_offline_hashes_human_names() {
    let env = CliEnv::new();
    let output = env
        .gdp()
        .args(["--json", "name", "--offline", "edu.example.sensor"])
        .output()
        .expect("run gdp");
    assert!(output.status.success(), "{output:?}");

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let expected = InternalName::from_human("edu.example.sensor").expect("name");
    assert_eq!(info["printable"], expected.printable());
    assert_eq!(info["hex"], expected.to_hex());
    assert_eq!(info["human"], "edu.example.sensor");
}

#[test]
fn malformed_names_exit_with_usage() {
    let env = CliEnv::new();
    env.gdp()
        .args(["name", "--offline", "not a name"])
        .assert()
        .code(64);
}

#[test]
fn keygen_refuses_to_overwrite() {
    let env = CliEnv::new();
    let key = env.path().join("writer.key");
    let key_arg = key.to_str().expect("utf-8 path");

    let output = env
        .gdp()
        .args(["--json", "keygen", "--out", key_arg])
        .output()
        .expect("run gdp");
    assert!(output.status.success(), "{output:?}");
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let public = gdp::SigningKeyPair::load(&key).expect("load key").public_key();
    assert_eq!(info["public_key"], hex::encode(public.to_metadata_bytes()));

    env.gdp().args(["keygen", "--out", key_arg]).assert().code(77);
    env.gdp()
        .args(["keygen", "--out", key_arg, "--force"])
        .assert()
        .success();
    let replaced = gdp::SigningKeyPair::load(&key).expect("load key").public_key();
    assert_ne!(replaced, public);
}

#[test]
fn explicit_config_must_exist() {
    let env = CliEnv::new();
    env.gdp()
        .args(["--config", "missing.toml", "name", "--offline", "a.b"])
        .assert()
        .code(69);
}
