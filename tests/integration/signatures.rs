use arbor_core::Keypair;
use arbord::RequestError;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Signed exchanges
// ══════════════════════════════════════════════════════════════════════════════

fn unsigned(peer_name: &str) -> EngineSettings {
    EngineSettings {
        sign_messages: false,
        ..fast_settings(peer_name)
    }
}

/// Replies signed with the key the directory publishes are accepted, and
/// the key is served over the wire too.
#[tokio::test]
async fn test_signed_peer_with_published_key() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    announce(&a.directory, "b", &b);

    assert_eq!(a.transport.hello(b.addr()).await.unwrap(), "b");
    assert_eq!(
        a.transport.public_key_of_peer("b").await.unwrap(),
        Some(*b.transport.public_key())
    );
    assert_eq!(
        a.transport.key_ring().cached("b"),
        Some(Some(*b.transport.public_key()))
    );
}

/// A reply signed with some other key is a bad answer.
#[tokio::test]
async fn test_wrong_published_key_rejects_reply() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    a.directory.set_addresses("b", vec![b.addr()]);
    a.directory.set_key("b", Some(Keypair::generate().public));

    let err = a.transport.hello(b.addr()).await.unwrap_err();
    assert!(matches!(err, RequestError::Signature(_)));
    assert!(err.is_soft());
    assert!(!a.transport.address_book().knows("b"));
}

/// A peer that published a key but stopped signing is caught.
#[tokio::test]
async fn test_unsigned_reply_from_signing_peer() {
    let a = spawn_node("a").await;
    let b = spawn_node_with(unsigned("b")).await;
    announce(&a.directory, "b", &b);

    let err = a.transport.get_root_of_peer("b").await.unwrap_err();
    assert!(err.is_soft(), "{err}");
}

/// Peers without a published key are taken at their word.
#[tokio::test]
async fn test_peer_without_key_is_trusted() {
    let a = spawn_node("a").await;
    let b = spawn_node_with(unsigned("b")).await;
    a.directory.set_addresses("b", vec![b.addr()]);
    a.directory.set_key("b", None);

    assert_eq!(a.transport.hello(b.addr()).await.unwrap(), "b");
    assert_eq!(a.transport.public_key_of_peer("b").await.unwrap(), None);
}

/// An unsigned Hello claiming a name with a published key is dropped, so
/// the sender hears nothing back.
#[tokio::test]
async fn test_unsigned_hello_is_dropped() {
    let impostor = spawn_node_with(unsigned("a")).await;
    let b = spawn_node("b").await;
    b.directory.set_key("a", Some(Keypair::generate().public));

    let err = impostor.transport.hello(b.addr()).await.unwrap_err();
    assert!(matches!(err, RequestError::NoReply { .. }));
    assert!(!b.transport.address_book().knows("a"));
}
