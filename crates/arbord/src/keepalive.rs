//! Keep the rendezvous server's NAT mapping and address-book entry fresh.

use crate::transport::Transport;

/// Re-resolve and greet the server every `keep_alive` interval.
///
/// Errors are logged and the loop carries on; it never returns.
pub async fn keepalive_loop(transport: Transport) {
    let server = transport.settings().server_peer_name.clone();
    let mut interval = tokio::time::interval(transport.settings().keep_alive);

    loop {
        interval.tick().await;

        let addrs = transport.server_addresses().await;
        if addrs.is_empty() {
            tracing::warn!(%server, "keep-alive: no server address known");
            continue;
        }

        for addr in addrs {
            match transport.hello(addr).await {
                Ok(name) => {
                    transport.address_book().register(&server, addr);
                    tracing::trace!(%server, %name, %addr, "keep-alive ok");
                }
                Err(e) => {
                    tracing::warn!(%server, %addr, error = %e, "keep-alive hello failed");
                    if e.is_hard() {
                        transport.address_book().evict(&server, addr);
                    }
                }
            }
        }
    }
}
