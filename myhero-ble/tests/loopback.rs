//! End-to-end sessions against a loopback peer with the real deferred worker

use std::time::Duration;

use myhero_ble::{
    AuthStore, Config, Endpoint, FileKeyStore, Loopback, MemoryKeyStore, PeerError,
    RecordingHooks, TransferState,
};
use myhero_mcu::LedMode;
use myhero_proto::FileKind;
use rand::RngCore;

const KEY: [u8; 32] = [0x42; 32];

fn config(home: &std::path::Path) -> Config {
    Config::default().rooted_at(home)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

fn peer(home: &std::path::Path, store: MemoryKeyStore) -> (Loopback<MemoryKeyStore>, RecordingHooks) {
    let hooks = RecordingHooks::new();
    let auth = AuthStore::load(store).unwrap();
    let mut peer = Loopback::start(&config(home), auth, hooks.clone())
        .unwrap()
        .with_timeout(Duration::from_secs(2));
    peer.connect(1).unwrap();
    (peer, hooks)
}

#[tokio::test]
async fn first_pairing_then_full_file_cycle() {
    let home = tempfile::tempdir().unwrap();
    let (mut peer, hooks) = peer(home.path(), MemoryKeyStore::default());

    assert!(peer.authenticate(&KEY).await.unwrap());

    let body = random_bytes(4_000);
    peer.upload("rec/take1.wav", &body, 490).await.unwrap();
    assert_eq!(std::fs::read(home.path().join("storage/rec/take1.wav")).unwrap(), body);

    let entries = peer.list().await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| (e.kind, e.name.as_str(), e.size)).collect();
    assert_eq!(
        names,
        vec![(FileKind::Directory, "rec", 0), (FileKind::File, "rec/take1.wav", 4_000)]
    );

    let back = peer.download("/Storage/rec/take1.wav").await.unwrap();
    assert_eq!(back, body);

    peer.delete("rec/take1.wav").unwrap();
    assert!(peer.list().await.unwrap().iter().all(|e| e.kind == FileKind::Directory));

    assert!(hooks.snapshot().rescans >= 2);
    assert_eq!(hooks.led(), Some(LedMode::BlePairing));
}

#[tokio::test]
async fn wrong_key_keeps_files_locked() {
    let home = tempfile::tempdir().unwrap();
    let (mut peer, _) = peer(home.path(), MemoryKeyStore::with_key(KEY));

    assert!(!peer.authenticate(&[0x24; 32]).await.unwrap());
    match peer.read(Endpoint::FileList) {
        Err(PeerError::Att { code, .. }) => assert_eq!(code, 0x05),
        other => panic!("expected an ATT error, got {other:?}"),
    }
    assert!(peer.authenticate(&KEY).await.unwrap());
    assert!(peer.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn authentication_does_not_survive_a_reconnect() {
    let home = tempfile::tempdir().unwrap();
    let (mut peer, _) = peer(home.path(), MemoryKeyStore::with_key(KEY));
    assert!(peer.authenticate(&KEY).await.unwrap());

    peer.disconnect().unwrap();
    peer.connect(2).unwrap();
    assert_eq!(peer.read(Endpoint::AuthStatus).unwrap(), vec![0x00]);
    assert!(matches!(peer.delete("x.wav"), Err(PeerError::Att { code: 0x05, .. })));
}

#[tokio::test]
async fn disconnect_mid_upload_leaves_no_partial_file() {
    let home = tempfile::tempdir().unwrap();
    let (mut peer, _) = peer(home.path(), MemoryKeyStore::with_key(KEY));
    assert!(peer.authenticate(&KEY).await.unwrap());

    peer.write(
        Endpoint::TransferControl,
        &myhero_proto::TransferCommand::Upload { size: 2_000, name: "cut.wav".into() }.to_bytes(),
    )
    .unwrap();
    peer.write(Endpoint::TransferData, &random_bytes(490)).unwrap();
    peer.disconnect().unwrap();

    assert!(!home.path().join("storage/cut.wav").exists());
    let state = peer.dispatcher().lock().unwrap().engine().state();
    assert_eq!(state, TransferState::Idle);
}

#[tokio::test]
async fn negotiated_mtu_shapes_download_chunks() {
    let home = tempfile::tempdir().unwrap();
    let (mut peer, _) = peer(home.path(), MemoryKeyStore::with_key(KEY));
    assert!(peer.authenticate(&KEY).await.unwrap());

    let body = random_bytes(1_000);
    std::fs::write(home.path().join("storage/a.wav"), &body).unwrap();
    peer.set_mtu(203).unwrap();

    assert_eq!(peer.download("a.wav").await.unwrap(), body);
    let ready: Vec<u32> = peer
        .history()
        .iter()
        .filter(|n| n.endpoint == Endpoint::TransferData)
        .map(|n| myhero_proto::StatusFrame::from_bytes(&n.value).unwrap().size)
        .collect();
    // Start frame, then one CHUNK_READY per refill
    assert_eq!(ready, vec![1_000, 200, 200, 200, 200]);
}

#[tokio::test]
async fn cancelled_download_can_be_restarted() {
    let home = tempfile::tempdir().unwrap();
    let (mut peer, _) = peer(home.path(), MemoryKeyStore::with_key(KEY));
    assert!(peer.authenticate(&KEY).await.unwrap());

    let body = random_bytes(3_000);
    std::fs::write(home.path().join("storage/b.wav"), &body).unwrap();

    peer.write(
        Endpoint::TransferControl,
        &myhero_proto::TransferCommand::Download { name: "b.wav".into() }.to_bytes(),
    )
    .unwrap();
    peer.read(Endpoint::TransferData).unwrap();
    peer.cancel().unwrap();

    // Let the worker run out, then forget the first attempt's notifications
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.discard_pending() >= 1);
    assert_eq!(peer.download("b.wav").await.unwrap(), body);
}

#[tokio::test]
async fn unpair_lets_a_new_key_bind() {
    let home = tempfile::tempdir().unwrap();
    let store = FileKeyStore::new(home.path().join("auth.key"));
    let auth = AuthStore::load(store).unwrap();
    let mut peer = Loopback::start(&config(home.path()), auth, RecordingHooks::new()).unwrap();
    peer.connect(1).unwrap();

    assert!(peer.authenticate(&KEY).await.unwrap());
    assert!(home.path().join("auth.key").exists());
    peer.unpair().await.unwrap();
    assert!(!home.path().join("auth.key").exists());

    assert!(peer.authenticate(&[0x77; 32]).await.unwrap());
    peer.disconnect().unwrap();
    peer.connect(2).unwrap();
    assert!(!peer.authenticate(&KEY).await.unwrap());
}
