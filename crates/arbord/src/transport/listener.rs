//! Datagram listener and pending-table reaper.

use arbor_core::wire::UDP_BUFFER_SIZE;
use arbor_core::Message;

use super::Transport;

/// Receive every datagram on the engine's socket.
///
/// Replies go to the pending table; each request gets its own handler task
/// so one slow peer never delays the others. Runs forever: cancel by
/// dropping or aborting the task handle.
pub async fn listener_loop(transport: Transport) {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];

    tracing::info!(addr = ?transport.local_addr().ok(), "listener starting");

    loop {
        let (len, from) = match transport.socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                // ICMP unreachable from an earlier send can surface here.
                tracing::debug!(error = %e, "recv_from failed");
                continue;
            }
        };

        let msg = match Message::decode(&buf, len) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(peer = %from, len, error = %e, "dropping undecodable datagram");
                continue;
            }
        };

        tracing::trace!(peer = %from, %msg, "received");

        if msg.is_request() {
            let t = transport.clone();
            tokio::spawn(async move { t.handle_request(from, msg).await });
        } else {
            let id = msg.id;
            if !transport.pending.deliver(from, msg) {
                tracing::trace!(peer = %from, id, "reply parked");
            }
        }
    }
}

/// Sweep unclaimed replies older than one full retry window.
///
/// Runs forever — cancel by dropping the task handle.
pub async fn reaper_loop(transport: Transport) {
    let max_age = transport.settings.retry_window();
    let mut interval = tokio::time::interval(transport.settings.reap_interval);

    loop {
        interval.tick().await;
        let removed = transport.pending.reap(max_age);
        if removed > 0 {
            tracing::debug!(removed, "reaped pending replies");
        }
    }
}
