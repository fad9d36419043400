//! Recovery test for shardcoord: snapshot, crash and restart

use shardcoord::common::{CoordinatorConfig, Error, ServerId};
use shardcoord::coordinator::context::{CONDITION_CHECKPOINT, CONDITION_CONFIG};
use shardcoord::coordinator::space::{Attribute, DataType, SpaceDefinition};
use shardcoord::coordinator::{load_snapshot, save_snapshot, Command, Configuration};
use shardcoord::{Coordinator, CoordinatorHandle, LocalHost};
use tempfile::TempDir;

fn busy_coordinator() -> (Coordinator, LocalHost) {
    let mut coord = Coordinator::default();
    let mut host = LocalHost::new();

    let mut commands = vec![Command::Initialize { token: 77 }];
    for id in 1..=3u64 {
        commands.push(Command::ServerRegister {
            id: ServerId(id),
            address: format!("127.0.0.1:{}", 2000 + id).parse().unwrap(),
        });
    }
    commands.push(Command::ServerOnline {
        id: ServerId(1),
        address: None,
    });
    commands.push(Command::SpaceAdd {
        space: SpaceDefinition {
            name: "users".into(),
            attributes: vec![
                Attribute {
                    name: "username".into(),
                    datatype: DataType::String,
                },
                Attribute {
                    name: "age".into(),
                    datatype: DataType::Int64,
                },
            ],
            fault_tolerance: 1,
            predecessor_width: 1,
            subspaces: vec![vec!["age".into()]],
            partitions: 4,
        },
    });
    commands.push(Command::ServerOnline {
        id: ServerId(2),
        address: None,
    });
    commands.push(Command::Checkpoint);

    for command in commands {
        let name = command.name();
        assert!(coord.apply(&mut host, command).is_success(), "{} failed", name);
    }

    // Leave work in flight so it has to survive the restart
    assert!(!coord.transfers().is_empty());
    assert!(!coord.intents().is_empty());
    (coord, host)
}

#[test]
fn test_recovery_after_crash() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coord.snap");

    let (coord, _host) = busy_coordinator();
    save_snapshot(&coord, &path).unwrap();
    let dump = coord.debug_dump();
    let blob = coord.config_get().unwrap();
    drop(coord);

    let restored = load_snapshot(&path).unwrap();
    assert_eq!(restored.cluster(), 77);
    assert_eq!(restored.debug_dump(), dump);
    assert_eq!(restored.config_get().unwrap(), blob);
    assert_eq!(restored.membership().permutation(), &[ServerId(1), ServerId(2)]);
    assert!(!dir.path().join("coord.tmp").exists());
}

#[test]
fn test_restart_continues_sequences() {
    let (coord, host) = busy_coordinator();
    let bytes = coord.snapshot().unwrap();

    let mut restored = Coordinator::restore(&bytes).unwrap();
    let mut resumed = LocalHost::resume(&restored);
    assert_eq!(resumed.condition(CONDITION_CONFIG), host.condition(CONDITION_CONFIG));
    assert_eq!(
        resumed.condition(CONDITION_CHECKPOINT),
        host.condition(CONDITION_CHECKPOINT)
    );

    // The published version was not bumped by the restore
    let config = Configuration::decode(&restored.config_get().unwrap()).unwrap();
    assert_eq!(config.version, coord.version());

    let version = restored.version();
    let resp = restored.apply(
        &mut resumed,
        Command::ServerOnline {
            id: ServerId(3),
            address: None,
        },
    );
    assert!(resp.is_success());
    assert_eq!(restored.version(), version + 1);
    assert_eq!(resumed.condition(CONDITION_CONFIG), version + 1);

    assert!(restored.apply(&mut resumed, Command::Checkpoint).is_success());
    assert_eq!(restored.current_checkpoint(), coord.current_checkpoint() + 1);
}

#[test]
fn test_in_flight_transfer_completes_after_restart() {
    let (coord, _host) = busy_coordinator();
    let mut restored = Coordinator::restore(&coord.snapshot().unwrap()).unwrap();
    let mut host = LocalHost::resume(&restored);

    let xfer = *restored.transfers().iter().next().unwrap();
    let version = restored.version();
    let resp = restored.apply(
        &mut host,
        Command::TransferGoLive {
            version,
            transfer: xfer.id,
        },
    );
    assert!(resp.is_success());

    let version = restored.version();
    let resp = restored.apply(
        &mut host,
        Command::TransferComplete {
            version,
            transfer: xfer.id,
        },
    );
    assert!(resp.is_success());
    assert!(restored.transfers().get(xfer.id).is_none());

    let region = restored.topology().region(xfer.region).unwrap();
    assert_eq!(region.replicas.last().unwrap().server, xfer.dst);
    assert_eq!(region.replicas.last().unwrap().virtual_server, xfer.vdst);
}

#[test]
fn test_corrupted_snapshot_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coord.snap");

    let (coord, _host) = busy_coordinator();
    save_snapshot(&coord, &path).unwrap();

    // Flip one payload byte
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[20] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        load_snapshot(&path),
        Err(Error::ChecksumMismatch { .. })
    ));

    std::fs::write(&path, b"not a snapshot at all").unwrap();
    assert!(matches!(load_snapshot(&path), Err(Error::Corrupted(_))));
}

#[tokio::test]
async fn test_handle_saves_snapshot_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coord.snap");

    let config = CoordinatorConfig {
        snapshot_path: Some(path.clone()),
        ..Default::default()
    };
    let handle = CoordinatorHandle::spawn(Coordinator::new(config));
    handle
        .apply(Command::Initialize { token: 9 })
        .await
        .unwrap();
    handle
        .apply(Command::ServerRegister {
            id: ServerId(5),
            address: "127.0.0.1:2005".parse().unwrap(),
        })
        .await
        .unwrap();

    let stopped = handle.shutdown().await.unwrap();
    assert!(path.exists());

    let loaded = load_snapshot(&path).unwrap();
    assert_eq!(loaded.version(), stopped.version());
    assert_eq!(loaded.cluster(), 9);
    assert!(loaded.membership().get(ServerId(5)).is_some());
    assert_eq!(loaded.config().snapshot_path.as_deref(), Some(path.as_path()));
}
