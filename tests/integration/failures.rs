use arbord::RequestError;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Silent peers and bad answers
// ══════════════════════════════════════════════════════════════════════════════

/// A missing datum is a bad answer, not silence: the address stays.
#[tokio::test]
async fn test_no_datum_is_soft_and_keeps_address() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    announce(&a.directory, "b", &b);

    let missing = [0x42u8; 32];
    let err = a.transport.download_datum("b", &missing).await.unwrap_err();
    assert!(matches!(err, RequestError::NoDatum(h) if h == missing));
    assert!(err.is_soft());
    assert!(err.to_string().starts_with("peer answered badly"));
    assert!(a.transport.address_book().contains("b", b.addr()));
}

/// A peer whose only address never answers ends up unreachable and is not
/// left in the address book.
#[tokio::test]
async fn test_silent_peer_is_unreachable() {
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let a = spawn_node("a").await;
    a.directory
        .set_addresses("ghost", vec![silent.local_addr().unwrap()]);

    let err = a.transport.get_root_of_peer("ghost").await.unwrap_err();
    assert!(matches!(err, RequestError::Unreachable { ref peer } if peer == "ghost"));
    assert!(err.is_hard());
    assert!(err.to_string().starts_with("peer did not answer"));
    assert!(!a.transport.address_book().knows("ghost"));
}

/// A stale known address is evicted and the directory's fresh one is used.
#[tokio::test]
async fn test_stale_address_replaced_by_fresh_one() {
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let stale = silent.local_addr().unwrap();

    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    announce(&a.directory, "b", &b);
    a.transport.address_book().register("b", stale);

    a.transport.get_root_of_peer("b").await.unwrap();
    assert!(!a.transport.address_book().contains("b", stale));
    assert!(a.transport.address_book().contains("b", b.addr()));
}

/// Each silent send costs exactly one request plus the configured
/// re-emissions before the caller gives up.
#[tokio::test]
async fn test_reemission_count_on_silence() {
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = silent.local_addr().unwrap();
    let a = spawn_node("a").await;

    let err = a.transport.hello(target).await.unwrap_err();
    assert!(matches!(err, RequestError::NoReply { attempts: 3, .. }));

    let mut buf = [0u8; 2048];
    let mut received = 0;
    while let Ok(Ok(_)) =
        tokio::time::timeout(Duration::from_millis(50), silent.recv_from(&mut buf)).await
    {
        received += 1;
    }
    assert_eq!(received, 3);
    assert!(a.transport.pending().is_empty());
}

/// Garbage on the socket does not stop a node from serving.
#[tokio::test]
async fn test_garbage_does_not_stop_listener() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;

    let junk = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    junk.send_to(&[0xff; 3], b.addr()).await.unwrap();
    junk.send_to(&[0, 0, 0, 1, 250, 0, 0], b.addr()).await.unwrap();
    junk.send_to(&[0, 0, 0, 1, 0, 0xff, 0xff], b.addr()).await.unwrap();

    assert_eq!(a.transport.hello(b.addr()).await.unwrap(), "b");
}
