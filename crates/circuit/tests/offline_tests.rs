//! Bank and session behavior without a device attached.

use std::sync::Arc;

use circuit::{BankError, BankStore, ConnectionState, NullBackend, SessionConfig, Track, TransportError, TransportSession};
use circuit_core::sysex;
use circuit_core::{PatchUpdate, RawPatch, encode_name, parse_syx_file};

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn offline_store() -> BankStore {
    let session = TransportSession::open(Arc::new(NullBackend), SessionConfig::default());
    BankStore::new(session)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn new_store_has_placeholder_slots() {
    let store = offline_store();
    for track in Track::ALL {
        let slots = store.list(track);
        assert_eq!(slots.len(), 64);
        assert_eq!(slots[0].name, "Patch 1");
        assert_eq!(slots[63].name, "Patch 64");
        assert!(slots.iter().all(|s| !s.has_data));
    }
}

#[test]
fn session_without_ports_cannot_connect() {
    let store = offline_store();
    let session = store.session();
    assert!(session.ports().is_empty());
    assert_eq!(session.find_device_port(), None);
    assert!(matches!(session.connect_device(), Err(TransportError::PortNotFound { .. })));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn device_operations_fail_when_not_connected() {
    let store = offline_store();
    assert_eq!(
        store.fetch_one(Track::Synth1, 0).await,
        Err(BankError::Transport(TransportError::NotConnected))
    );
    assert_eq!(
        store.fetch_current(Track::Synth2).await,
        Err(BankError::Transport(TransportError::NotConnected))
    );
    assert_eq!(
        store.audition(Track::Synth1, 0).await,
        Err(BankError::Transport(TransportError::NotConnected))
    );
}

#[test]
fn import_edit_export_cycle() {
    let store = offline_store();
    let mut file = Vec::new();
    for index in [4u8, 9] {
        let raw = encode_name(&format!("Imported {}", index), &RawPatch::init(index as usize));
        file.extend(sysex::patch_dump_message(&raw, index, 0));
    }
    assert_eq!(store.import_file(Track::Synth1, &file).count, 2);

    let update = PatchUpdate {
        reverb_send: Some(90),
        ..Default::default()
    };
    store.apply_update(Track::Synth1, 9, &update).unwrap();

    let exported = store.export_bank(Track::Synth1);
    let patches = parse_syx_file(&exported);
    assert_eq!(patches.len(), 64);
    assert_eq!(patches[4].raw.name(), "Imported 4");
    assert_eq!(patches[9].raw.params().reverb_send, 90);
    assert_eq!(patches[0].raw, RawPatch::init(0));
}
