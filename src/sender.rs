// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Per-peer outbound queue, retry loop, and offline stash. Each contact
// gets one long-lived delivery task, cancelled cooperatively via a
// `watch::Sender<bool>` rather than `.abort()`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::protocol::{Code, Message, MAX_MESSAGE_LENGTH};
use crate::shared::EngineShared;

const PRIVATE_STASH_CAPACITY: usize = 1000;
const PUBLIC_STASH_CAPACITY: usize = 100;
const AUTHORIZATION_STASH_CAPACITY: usize = 10;

/// Bounded per-code stash. Oldest entries are evicted on overflow.
pub struct Stash {
    private: VecDeque<Message>,
    public: VecDeque<Message>,
    authorization: VecDeque<Message>,
}

impl Stash {
    pub fn new() -> Self {
        Self {
            private: VecDeque::with_capacity(PRIVATE_STASH_CAPACITY),
            public: VecDeque::with_capacity(PUBLIC_STASH_CAPACITY),
            authorization: VecDeque::with_capacity(AUTHORIZATION_STASH_CAPACITY),
        }
    }

    /// Add a message to its code's stash. Messages with any other code
    /// are discarded.
    pub fn push(&mut self, msg: Message) {
        let (deque, cap) = match msg.code {
            Code::Private => (&mut self.private, PRIVATE_STASH_CAPACITY),
            Code::Public => (&mut self.public, PUBLIC_STASH_CAPACITY),
            Code::Authorization => (&mut self.authorization, AUTHORIZATION_STASH_CAPACITY),
            _ => return,
        };

        if deque.len() >= cap {
            deque.pop_front();
        }
        deque.push_back(msg);
    }

    /// Drain all three stashes in a fixed order (PRIVATE, PUBLIC,
    /// AUTHORIZATION) for reproducible replay.
    pub fn drain_in_order(&mut self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.private.len() + self.public.len() + self.authorization.len());
        out.extend(self.private.drain(..));
        out.extend(self.public.drain(..));
        out.extend(self.authorization.drain(..));
        out
    }

    #[cfg(test)]
    pub fn len(&self, code: Code) -> usize {
        match code {
            Code::Private => self.private.len(),
            Code::Public => self.public.len(),
            Code::Authorization => self.authorization.len(),
            _ => 0,
        }
    }
}

/// Owns one contact's outbound queue and stash. Spawned when a contact is
/// added, or reconstructed for every contact loaded at startup.
pub struct PeerSender {
    address: String,
    queue_tx: mpsc::UnboundedSender<Message>,
    stash: Arc<Mutex<Stash>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSender {
    pub fn spawn(address: String, shared: Arc<EngineShared>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stash = Arc::new(Mutex::new(Stash::new()));

        let handle = tokio::spawn(run_sender(
            address.clone(),
            queue_rx,
            shared,
            shutdown_rx,
        ));

        Arc::new(Self {
            address,
            queue_tx,
            stash,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn enqueue(&self, msg: Message) {
        if self.queue_tx.send(msg).is_err() {
            warn!("Sender for {} is no longer running, dropping message", self.address);
        }
    }

    pub fn stash(&self, msg: Message) {
        self.stash.lock().unwrap().push(msg);
    }

    /// Drain the stash and re-queue every message for delivery, in the
    /// fixed PRIVATE/PUBLIC/AUTHORIZATION order.
    pub async fn replay_stash(&self) {
        let drained = self.stash.lock().unwrap().drain_in_order();

        for msg in drained {
            self.enqueue(msg);
        }
    }

    /// Cancels the sender task. Pending queue contents are discarded;
    /// anything left in the stash is lost too (in-memory only).
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    #[cfg(test)]
    pub fn stash_ref(&self) -> Arc<Mutex<Stash>> {
        self.stash.clone()
    }
}

/// This function owns the entire life of one peer's delivery loop: wait
/// for the online gate, dequeue one message, retry it, stash on
/// exhaustion, repeat. Cancellation is cooperative via `shutdown_rx`.
async fn run_sender(
    address: String,
    mut queue_rx: mpsc::UnboundedReceiver<Message>,
    shared: Arc<EngineShared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // The stash lives behind the Arc handed back by `spawn`; this task
    // only ever pushes into it via `EngineShared::senders`, never reads
    // its own `PeerSender`, so nothing to borrow here.
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            _ = shared.online.wait() => {}
        }

        let msg = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            msg = queue_rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };

        deliver_with_retries(&address, msg, &shared).await;
    }
}

async fn deliver_with_retries(address: &str, msg: Message, shared: &Arc<EngineShared>) {
    let retries = shared.tuning.send_retries;
    let per_attempt_timeout = Duration::from_secs(shared.tuning.default_timeout_secs);
    let backoff = per_attempt_timeout / 2;

    let mut delivered = false;

    for attempt in 0..retries {
        let outcome = timeout(per_attempt_timeout, send_once(address, &msg, shared)).await;

        match outcome {
            Err(_elapsed) => {
                debug!("Send to {} timed out (attempt {})", address, attempt);
            }
            Ok(Err(e)) => {
                debug!("Can't connect to {}: {}", address, e);
            }
            Ok(Ok(data)) if data.is_empty() => {
                debug!("Empty response from {}, retrying", address);
            }
            Ok(Ok(data)) => {
                match Message::decode(&data, Some(address.to_string())) {
                    Ok(mut resp) => {
                        delivered = true;
                        shared.mark_online(address).await;

                        match resp.code {
                            Code::Ok => debug!("{:?} delivered", msg.uuid),
                            Code::Unauthorized => {
                                resp.name = shared
                                    .address_book
                                    .read()
                                    .await
                                    .lookup_by_address(address);
                                shared.hooks.on_unauthorized(&resp).await;
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        warn!("Invalid response from {}: {}", address, e);
                        // An unparsable response still proves the peer is
                        // reachable; treat it as delivered rather than retry.
                        delivered = true;
                    }
                }
                break;
            }
        }

        if attempt + 1 < retries {
            tokio::time::sleep(backoff).await;
        }
    }

    if delivered {
        debug!("{:?} delivered", msg.uuid);
    } else if let Some(sender) = shared.senders.read().await.get(address).cloned() {
        sender.stash(msg);
    }
}

/// One delivery attempt: resolve destination, open a stream, write the
/// request, read up to `MAX_MESSAGE_LENGTH` bytes, close.
async fn send_once(
    address: &str,
    msg: &Message,
    shared: &Arc<EngineShared>,
) -> crate::error::Result<Vec<u8>> {
    let resolved = shared.resolve_destination(address).await?;

    let mut stream = shared
        .gateway
        .stream_connect(&shared.session_name, &resolved)
        .await?;

    stream.write_all(&msg.encode()).await?;

    let mut buf = vec![0u8; MAX_MESSAGE_LENGTH];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(code: Code) -> Message {
        Message::new(code, None, "x")
    }

    #[test]
    fn stash_evicts_oldest_past_capacity() {
        let mut stash = Stash::new();

        for _ in 0..(AUTHORIZATION_STASH_CAPACITY + 5) {
            stash.push(msg(Code::Authorization));
        }

        assert_eq!(stash.len(Code::Authorization), AUTHORIZATION_STASH_CAPACITY);
    }

    #[test]
    fn stash_ignores_non_stashable_codes() {
        let mut stash = Stash::new();
        stash.push(msg(Code::Ok));
        stash.push(msg(Code::Ping));

        assert_eq!(stash.len(Code::Private), 0);
    }

    #[test]
    fn drain_in_order_returns_private_then_public_then_authorization() {
        let mut stash = Stash::new();
        stash.push(msg(Code::Authorization));
        stash.push(msg(Code::Public));
        stash.push(msg(Code::Private));

        let drained = stash.drain_in_order();

        assert_eq!(drained[0].code, Code::Private);
        assert_eq!(drained[1].code, Code::Public);
        assert_eq!(drained[2].code, Code::Authorization);
    }
}
