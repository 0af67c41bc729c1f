// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Adaptive liveness probing and peer expiry.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::protocol::{Code, Message};
use crate::shared::EngineShared;

pub async fn run(shared: Arc<EngineShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let ping_interval = Duration::from_secs(shared.tuning.ping_interval_secs);
    let mut x: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            _ = shared.online.wait() => {}
        }

        sweep_expired(&shared).await;

        let peers = select_peers(&shared, &mut x).await;

        for address in peers {
            let shared = shared.clone();
            tokio::spawn(async move {
                send_ping(address, shared).await;
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(ping_interval) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn sweep_expired(shared: &Arc<EngineShared>) {
    let max_idle = Duration::from_secs(shared.tuning.max_idle_secs);
    let expired = shared.address_book.read().await.expired_peers(max_idle);

    for address in expired {
        let name = shared.address_book.read().await.lookup_by_address(&address);

        if let Some(name) = name {
            debug!("Peer {} goes offline", name);
            shared.address_book.write().await.set_offline(&address);
            shared.hooks.on_contact_offline(&name).await;
        }
    }
}

/// Selects the addresses to ping this cycle: every contact if uptime is
/// under 30 minutes or nothing is online yet; every contact every 6th
/// cycle to refresh a possibly-stale online set; online-only otherwise.
async fn select_peers(shared: &Arc<EngineShared>, x: &mut u32) -> Vec<String> {
    let book = shared.address_book.read().await;
    let uptime = shared.started_at.elapsed();
    let online = book.online_peers();

    if uptime < Duration::from_secs(1800) || online.is_empty() {
        book.addresses()
    } else if *x == 6 {
        *x = 0;
        book.addresses()
    } else {
        *x += 1;
        online
    }
}

async fn send_ping(address: String, shared: Arc<EngineShared>) {
    let delay = {
        let mut rng = rand::thread_rng();
        Duration::from_secs(rng.gen_range(0..shared.tuning.ping_interval_secs))
    };

    tokio::time::sleep(delay).await;

    let deadline = Duration::from_secs(shared.tuning.default_timeout_secs * 2);
    let msg = Message::new(Code::Ping, Some(address.clone()), "");

    let outcome = tokio::time::timeout(deadline, ping_once(&address, &msg, &shared)).await;

    if matches!(outcome, Ok(Ok(true))) {
        shared.mark_online(&address).await;
    }
}

async fn ping_once(
    address: &str,
    msg: &Message,
    shared: &Arc<EngineShared>,
) -> crate::error::Result<bool> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let resolved = shared.resolve_destination(address).await?;

    let mut stream = shared
        .gateway
        .stream_connect(&shared.session_name, &resolved)
        .await?;

    stream.write_all(&msg.encode()).await?;

    let mut buf = vec![0u8; crate::protocol::MAX_MESSAGE_LENGTH];
    let n = stream.read(&mut buf).await?;

    Ok(n > 0)
}
