// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Accepts inbound streams and dispatches each to a short-lived handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use crate::gateway::BoxedStream;
use crate::protocol::{Code, Message, MAX_MESSAGE_LENGTH};
use crate::shared::EngineShared;

pub async fn run(shared: Arc<EngineShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let restart_timeout = Duration::from_secs(shared.tuning.session_restart_timeout_secs);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            _ = shared.online.wait() => {}
        }

        match shared.gateway.stream_accept(&shared.session_name).await {
            Err(e) => {
                warn!("Receiver fails: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(restart_timeout) => {}
                    _ = shutdown_rx.changed() => return,
                }
            }
            Ok((remote_destination, stream)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    handle_connection(shared, remote_destination, stream).await;
                });
            }
        }
    }
}

async fn handle_connection(shared: Arc<EngineShared>, remote_destination: String, mut stream: BoxedStream) {
    let name = shared
        .address_book
        .read()
        .await
        .lookup_by_address(&remote_destination);

    if name.is_none() && shared.ignore_unauthorized {
        return;
    }

    let default_timeout = Duration::from_secs(shared.tuning.default_timeout_secs);

    let mut buf = vec![0u8; MAX_MESSAGE_LENGTH];
    let n = match tokio::time::timeout(default_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            warn!("Receiver read error from {}: {}", remote_destination, e);
            return;
        }
        Err(_) => return,
    };
    buf.truncate(n);

    let mut request = match Message::decode(&buf, Some(remote_destination.clone())) {
        Ok(m) => m,
        Err(e) => {
            warn!("Invalid request from {}: {}", remote_destination, e);
            return;
        }
    };
    request.name = name.clone();

    if shared.uuid_log.lock().unwrap().contains(&request.uuid) {
        debug!("Duplicate message from {}: {:?}", remote_destination, request.uuid);
        reply(&mut stream, Message::ok()).await;
        return;
    }

    shared.uuid_log.lock().unwrap().insert(request.uuid);
    debug!("Received message from {}: code={:?}", remote_destination, request.code);

    match request.code {
        Code::Ping | Code::Authorization => {
            reply(&mut stream, Message::ok()).await;
            drop(stream);

            match request.code {
                Code::Ping => shared.hooks.on_ping(&request).await,
                Code::Authorization => shared.hooks.on_authorization(&request).await,
                _ => unreachable!(),
            }
        }
        _ if name.is_some() => {
            reply(&mut stream, Message::ok()).await;
            drop(stream);

            match request.code {
                Code::Private => shared.hooks.on_private_message(&request).await,
                Code::Public => shared.hooks.on_public_message(&request).await,
                Code::Unauthorized => shared.hooks.on_unauthorized(&request).await,
                // Ok is never sent as a request, but a peer that does is
                // still acknowledged rather than rejected.
                _ => {}
            }
        }
        _ => {
            reply(&mut stream, Message::unauthorized()).await;
            return;
        }
    }

    shared.mark_online(&remote_destination).await;
}

async fn reply(stream: &mut BoxedStream, msg: Message) {
    if let Err(e) = stream.write_all(&msg.encode()).await {
        warn!("Failed to write reply: {}", e);
    }
}
