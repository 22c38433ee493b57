use arbor_core::datum::{datum_hash, empty_root_hash};
use arbor_core::{Datum, DatumKind};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Publishing and downloading
// ══════════════════════════════════════════════════════════════════════════════

/// A peer that exports nothing still answers Root with the empty root.
#[tokio::test]
async fn test_root_of_empty_peer() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    announce(&a.directory, "b", &b);

    let root = a.transport.get_root_of_peer("b").await.unwrap();
    assert_eq!(root, empty_root_hash());
    assert!(a.transport.address_book().contains("b", b.addr()));
}

/// Walk an exported tree from the root down to the file bytes.
#[tokio::test]
async fn test_download_exported_tree() {
    let shared = tempfile::tempdir().unwrap();
    std::fs::write(shared.path().join("hello.txt"), b"abc").unwrap();
    std::fs::create_dir(shared.path().join("docs")).unwrap();
    std::fs::write(shared.path().join("docs").join("notes.md"), b"# notes\n").unwrap();

    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    let exported = b.transport.store().export(shared.path()).await.unwrap();
    announce(&a.directory, "b", &b);

    let root = a.transport.get_root_of_peer("b").await.unwrap();
    assert_eq!(root, exported);

    let Datum::Directory { entries, .. } = a.transport.download_datum("b", &root).await.unwrap()
    else {
        panic!("root is not a directory");
    };
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["docs", "hello.txt"]);

    let hello = &entries[1];
    assert_eq!(hello.hash, datum_hash(DatumKind::Chunk, b"abc"));
    match a.transport.download_datum("b", &hello.hash).await.unwrap() {
        Datum::Chunk { data, .. } => assert_eq!(&data[..], b"abc"),
        other => panic!("expected a chunk, got {:?}", other.kind()),
    }

    let docs = a.transport.download_datum("b", &entries[0].hash).await.unwrap();
    assert_eq!(docs.kind(), DatumKind::Directory);
}

/// Re-exporting swaps the published root atomically.
#[tokio::test]
async fn test_reexport_changes_root() {
    let shared = tempfile::tempdir().unwrap();
    std::fs::write(shared.path().join("a.txt"), b"one").unwrap();

    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    announce(&a.directory, "b", &b);

    let first = b.transport.store().export(shared.path()).await.unwrap();
    assert_eq!(a.transport.get_root_of_peer("b").await.unwrap(), first);

    std::fs::write(shared.path().join("b.txt"), b"two").unwrap();
    let second = b.transport.store().export(shared.path()).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(a.transport.get_root_of_peer("b").await.unwrap(), second);
}
