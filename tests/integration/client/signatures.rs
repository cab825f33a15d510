use std::sync::Arc;

use gdp::{Datum, ErrorKind, OpenMode, SigningKeyPair};

use crate::fixtures::{Cluster, unique_human};

#[test]
fn writer_key_gates_appends() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let writer = Arc::new(SigningKeyPair::generate());
    let name = cluster.create_signed_log(&client, 1, &unique_human("signed"), &writer);

    let signed = cluster.open_signed(&client, name, OpenMode::ReadAppend, writer.clone());
    assert_eq!(signed.append(Datum::new("trusted"), None).expect("signed append"), 1);

    let unsigned = cluster.open(&client, name, OpenMode::AppendOnly);
    let err = unsigned
        .append(Datum::new("anonymous"), None)
        .expect_err("unsigned append");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let impostor = Arc::new(SigningKeyPair::generate());
    let forged = cluster.open_signed(&client, name, OpenMode::AppendOnly, impostor);
    let err = forged
        .append(Datum::new("forged"), None)
        .expect_err("wrong key");
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    assert_eq!(signed.refresh().expect("refresh").highest_recno, 1);
}

#[test]
fn signed_records_verify_on_read() {
    let cluster = Cluster::start(1);
    let client = cluster.client();
    let writer = Arc::new(SigningKeyPair::generate());
    let name = cluster.create_signed_log(&client, 1, &unique_human("verified"), &writer);

    let gin = cluster.open_signed(&client, name, OpenMode::ReadAppend, writer.clone());
    gin.append(Datum::new("checked"), None).expect("append");

    let datum = gin.read_by_recno(1).expect("verified read");
    datum.verify(&writer.public_key()).expect("signature");
    assert_eq!(
        gin.metadata().writer_key().expect("metadata key"),
        Some(writer.public_key())
    );
}
