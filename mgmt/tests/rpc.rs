// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Exercises the management protocol end to end over a unix socket.

use intentdb::db::IntentDb;
use intentdb::objects::{
    BridgePortSpec, IntentSpec, Kind, LogicalBridgeSpec, PortType, Vni, VpcSpec,
};
use intentdb::subscribe::SubscriberTable;
use intentdb::taskmanager::TaskManager;
use intentdb::taskqueue::TaskQueue;
use mgmt::api::{Request, Response, StatusCode};
use mgmt::client::ApiClient;
use mgmt::server::ApiServer;
use objstore::Store;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixStream;

/// Boot a gateway with no modules registered: intents realize trivially,
/// which is all the protocol tests need.
async fn serve(dir: &Path) -> (PathBuf, Arc<IntentDb>) {
    let registry = Arc::new(SubscriberTable::new());
    let queue = Arc::new(TaskQueue::new(64));
    let store = Store::open(dir.join("db")).unwrap();
    let db = Arc::new(IntentDb::new(store, queue.clone(), registry.clone()));
    TaskManager::new(db.clone(), queue, registry).spawn();

    let sock = dir.join("api.sock");
    let server = ApiServer::new(db.clone());
    let sock_for_server = sock.clone();
    tokio::spawn(async move { server.serve_unix(&sock_for_server).await });

    // wait for the socket to come up
    let deadline = Instant::now() + Duration::from_secs(5);
    while !sock.exists() {
        assert!(Instant::now() < deadline, "server did not bind");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (sock, db)
}

fn vpc(table: u32, vni: Option<u32>) -> IntentSpec {
    IntentSpec::Vpc(VpcSpec {
        route_table: table,
        vni: vni.map(|v| Vni::new_checked(v).unwrap()),
        loopback: None,
    })
}

fn expect_record(response: Response) -> intentdb::objects::IntentRecord {
    match response {
        Response::Record(record) => record,
        other => panic!("expected a record, got {other:?}"),
    }
}

fn expect_error(response: Response) -> StatusCode {
    match response {
        Response::Error(status) => status.code,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn create_get_list_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, _db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    let created = expect_record(
        client
            .call(&Request::Create {
                kind: Kind::Vpc,
                id: Some("blue".to_owned()),
                spec: vpc(1000, Some(3000)),
            })
            .await
            .unwrap(),
    );
    assert_eq!(created.name, Kind::Vpc.resource_name("blue"));
    assert_eq!(created.version, 1);

    let fetched = expect_record(
        client
            .call(&Request::Get {
                name: created.name.clone(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(fetched.spec, vpc(1000, Some(3000)));

    match client.call(&Request::List { kind: Kind::Vpc }).await.unwrap() {
        Response::Records(records) => assert_eq!(records.len(), 1),
        other => panic!("expected records, got {other:?}"),
    }
}

#[tokio::test]
async fn create_is_idempotent_and_conflicts_are_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, _db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    let create = Request::Create {
        kind: Kind::Vpc,
        id: Some("blue".to_owned()),
        spec: vpc(1000, None),
    };
    let first = expect_record(client.call(&create).await.unwrap());
    let replay = expect_record(client.call(&create).await.unwrap());
    assert_eq!(first, replay);

    let clash = client
        .call(&Request::Create {
            kind: Kind::Vpc,
            id: Some("blue".to_owned()),
            spec: vpc(2000, None),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(clash), StatusCode::AlreadyExists);
}

#[tokio::test]
async fn ids_are_validated_or_generated() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, _db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    let bad = client
        .call(&Request::Create {
            kind: Kind::Vpc,
            id: Some("Not_A_Valid_Id".to_owned()),
            spec: vpc(1000, None),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(bad), StatusCode::InvalidArgument);

    let generated = expect_record(
        client
            .call(&Request::Create {
                kind: Kind::Vpc,
                id: None,
                spec: vpc(1000, None),
            })
            .await
            .unwrap(),
    );
    assert!(Kind::parse_name(&generated.name).is_ok());
}

#[tokio::test]
async fn validation_failures_come_back_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, _db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    for id in ["lb1", "lb2"] {
        expect_record(
            client
                .call(&Request::Create {
                    kind: Kind::LogicalBridge,
                    id: Some(id.to_owned()),
                    spec: IntentSpec::LogicalBridge(LogicalBridgeSpec {
                        vlan_id: 100,
                        vni: None,
                    }),
                })
                .await
                .unwrap(),
        );
    }

    // an ACCESS port may only reference one bridge
    let response = client
        .call(&Request::Create {
            kind: Kind::BridgePort,
            id: Some("bp1".to_owned()),
            spec: IntentSpec::BridgePort(BridgePortSpec {
                mac: "00:11:22:33:44:55".parse().unwrap(),
                ptype: PortType::Access,
                logical_bridges: vec![
                    Kind::LogicalBridge.resource_name("lb1"),
                    Kind::LogicalBridge.resource_name("lb2"),
                ],
            }),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::InvalidArgument);

    // kind/spec mismatch
    let response = client
        .call(&Request::Create {
            kind: Kind::Subnet,
            id: Some("s1".to_owned()),
            spec: vpc(1000, None),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::InvalidArgument);

    // malformed resource name on read
    let response = client
        .call(&Request::Get {
            name: "not-a-name".to_owned(),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::InvalidArgument);

    // absent object on read
    let response = client
        .call(&Request::Get {
            name: Kind::Vpc.resource_name("nope"),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::NotFound);
}

#[tokio::test]
async fn update_merges_the_field_mask() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, _db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    let created = expect_record(
        client
            .call(&Request::Create {
                kind: Kind::Vpc,
                id: Some("blue".to_owned()),
                spec: vpc(1000, None),
            })
            .await
            .unwrap(),
    );

    let updated = expect_record(
        client
            .call(&Request::Update {
                name: created.name.clone(),
                spec: vpc(2000, Some(3000)),
                update_mask: vec!["route_table".to_owned()],
                allow_missing: false,
            })
            .await
            .unwrap(),
    );
    assert_eq!(updated.version, 2);
    assert_eq!(updated.spec, vpc(2000, None)); // vni untouched by the mask

    let bad_mask = client
        .call(&Request::Update {
            name: created.name.clone(),
            spec: vpc(1, None),
            update_mask: vec!["tos".to_owned()],
            allow_missing: false,
        })
        .await
        .unwrap();
    assert_eq!(expect_error(bad_mask), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn allow_missing_upserts_and_tolerates_absent_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, _db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    let name = Kind::Vpc.resource_name("ghost");

    // update of an absent object fails plainly...
    let response = client
        .call(&Request::Update {
            name: name.clone(),
            spec: vpc(1000, None),
            update_mask: vec![],
            allow_missing: false,
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::NotFound);

    // ...and upserts with allow_missing
    let upserted = expect_record(
        client
            .call(&Request::Update {
                name: name.clone(),
                spec: vpc(1000, None),
                update_mask: vec![],
                allow_missing: true,
            })
            .await
            .unwrap(),
    );
    assert_eq!(upserted.name, name);
    assert_eq!(upserted.version, 1);

    // delete of an absent object is a no-op only with allow_missing
    let response = client
        .call(&Request::Delete {
            name: Kind::Vpc.resource_name("never-was"),
            allow_missing: false,
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::NotFound);
    match client
        .call(&Request::Delete {
            name: Kind::Vpc.resource_name("never-was"),
            allow_missing: true,
        })
        .await
        .unwrap()
    {
        Response::Empty => {}
        other => panic!("expected empty, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_removes_after_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let (sock, db) = serve(dir.path()).await;
    let mut client = ApiClient::<UnixStream>::connect_unix(&sock).await.unwrap();

    let created = expect_record(
        client
            .call(&Request::Create {
                kind: Kind::Vpc,
                id: Some("blue".to_owned()),
                spec: vpc(1000, None),
            })
            .await
            .unwrap(),
    );

    match client
        .call(&Request::Delete {
            name: created.name.clone(),
            allow_missing: false,
        })
        .await
        .unwrap()
    {
        Response::Empty => {}
        other => panic!("expected empty, got {other:?}"),
    }

    // no stages are registered, so the teardown task finalizes promptly
    let deadline = Instant::now() + Duration::from_secs(5);
    while db.get(&created.name).is_ok() {
        assert!(Instant::now() < deadline, "teardown did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = client
        .call(&Request::Get {
            name: created.name.clone(),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(response), StatusCode::NotFound);
}
