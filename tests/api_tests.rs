//! Public API smoke tests through the `jsondb` facade crate

use jsondb::jsondb_core::path::{decode_index, encode_index};
use jsondb::{BroadcastBus, ChangeKind, DocumentStore, GetOptions, StoreConfig};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_facade_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(BroadcastBus::default());
    let mut rx = bus.subscribe();
    let store = DocumentStore::open(StoreConfig::at(dir.path().join("api.sqlite")))
        .unwrap()
        .with_bus(bus);

    store
        .set("/users/ada", r#"{"name":"Ada","langs":["en","fr"]}"#)
        .unwrap();
    store.update("/users/ada", r#"{"name":"Ada L."}"#).unwrap();

    assert_eq!(
        store
            .get_as_value("/users", &GetOptions::default())
            .unwrap(),
        Some(json!({"ada": {"name": "Ada L.", "langs": ["en", "fr"]}}))
    );

    let first = rx.try_recv().unwrap();
    assert_eq!((first.kind, first.path.as_str()), (ChangeKind::Updated, "/users/ada"));
    let second = rx.try_recv().unwrap();
    assert_eq!(second.path, "/users/ada/name");
}

#[test]
fn test_index_codec_is_exposed() {
    let encoded: Vec<String> = [0u64, 9, 10, 99, 100, 123_456_789]
        .iter()
        .map(|&i| encode_index(i))
        .collect();
    let mut sorted = encoded.clone();
    sorted.sort();
    assert_eq!(encoded, sorted);
    assert_eq!(decode_index(&encode_index(100)).unwrap(), 100);
}
