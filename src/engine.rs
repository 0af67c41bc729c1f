// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// The engine facade: composes the address book, per-peer senders, session
// loop, receiver, and pinger; exposes contact management, message
// sending, and lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::addressbook::AddressBook;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::gateway::Gateway;
use crate::hooks::EventHooks;
use crate::online::OnlineGate;
use crate::persistence;
use crate::protocol::{Code, Message};
use crate::sender::PeerSender;
use crate::shared::{EngineShared, EngineTuning};
use crate::{pinger, receiver, session};

pub struct Engine {
    shared: Arc<EngineShared>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    session_handle: Mutex<Option<JoinHandle<()>>>,
    receiver_handle: Mutex<Option<JoinHandle<()>>>,
    pinger_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Load or create the local destination, load contacts, and wire up
    /// one `PeerSender` per contact. Does not start any background task
    /// yet - call `start` for that.
    pub async fn new(
        config: Config,
        gateway: Arc<dyn Gateway>,
        hooks: Arc<dyn EventHooks>,
    ) -> Result<Self> {
        let datadir = config.data_dir();
        persistence::ensure_data_dir(&datadir).await?;

        let (local_destination, _key) =
            persistence::load_or_create_destination(&datadir, gateway.as_ref()).await?;

        let contacts = persistence::load_contacts(&datadir).await?;

        let mut address_book = AddressBook::new();
        for (name, address) in &contacts {
            if let Err(e) = address_book.insert(name, address) {
                error!("Addressbook error loading contact {}: {}", name, e);
            }
        }
        debug!("Contacts: {:?}", address_book);

        let session_name = format!(
            "{}-{}",
            config.general.session_name_prefix,
            short_session_suffix()
        );

        probe_gateway(gateway.as_ref(), &session_name, &local_destination).await?;

        let tuning = EngineTuning {
            send_retries: config.general.send_retries,
            default_timeout_secs: config.general.default_timeout_secs,
            session_restart_timeout_secs: config.general.session_restart_timeout_secs,
            ping_interval_secs: config.general.ping_interval_secs,
            max_idle_secs: config.general.max_idle_secs,
        };

        let shared = Arc::new(EngineShared {
            address_book: RwLock::new(address_book),
            senders: RwLock::new(HashMap::new()),
            dest_cache: Mutex::new(HashMap::new()),
            uuid_log: Mutex::new(crate::shared::DedupRing::new(50)),
            gateway,
            session_name,
            local_destination,
            online: OnlineGate::new(),
            hooks,
            ignore_unauthorized: config.general.ignore_unauthorized,
            started_at: Instant::now(),
            tuning,
            datadir,
        });

        {
            let addresses = shared.address_book.read().await.addresses();
            let mut senders = shared.senders.write().await;
            for address in addresses {
                senders.insert(address.clone(), PeerSender::spawn(address, shared.clone()));
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            shared,
            shutdown_tx,
            shutdown_rx,
            session_handle: Mutex::new(None),
            receiver_handle: Mutex::new(None),
            pinger_handle: Mutex::new(None),
        })
    }

    /// Start the session loop, receiver, and pinger tasks.
    pub fn start(&self) {
        *self.session_handle.lock().unwrap() = Some(tokio::spawn(session::run(
            self.shared.clone(),
            self.shutdown_rx.clone(),
        )));

        *self.receiver_handle.lock().unwrap() = Some(tokio::spawn(receiver::run(
            self.shared.clone(),
            self.shutdown_rx.clone(),
        )));

        *self.pinger_handle.lock().unwrap() = Some(tokio::spawn(pinger::run(
            self.shared.clone(),
            self.shutdown_rx.clone(),
        )));

        info!("Engine started (session: {})", self.shared.session_name);
    }

    /// Clears the online gate, stops every per-peer sender, then cancels
    /// the receiver, pinger, and session-loop tasks. Contacts are never
    /// cleared.
    pub async fn stop(&self) {
        self.shared.online.clear();

        let senders: Vec<Arc<PeerSender>> =
            self.shared.senders.read().await.values().cloned().collect();
        for sender in senders {
            sender.stop().await;
        }

        let _ = self.shutdown_tx.send(true);

        for handle in [&self.session_handle, &self.receiver_handle, &self.pinger_handle] {
            let handle = handle.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }

    /// Rejects if `address` equals the local destination, or if the
    /// address book insert fails (duplicate name or address, or invalid
    /// address format). On success, persists contacts and enqueues an
    /// AUTHORIZATION handshake.
    pub async fn add_contact(&self, name: &str, address: &str, your_name: &str) -> bool {
        if address == self.shared.local_destination {
            return false;
        }

        {
            let mut book = self.shared.address_book.write().await;
            if let Err(e) = book.insert(name, address) {
                error!("Addressbook error: {}", e);
                return false;
            }
        }

        if let Err(e) = self.persist_contacts().await {
            error!("Failed to persist contacts: {}", e);
        }

        let sender = PeerSender::spawn(address.to_string(), self.shared.clone());
        sender.enqueue(Message::new(
            Code::Authorization,
            Some(address.to_string()),
            your_name,
        ));

        self.shared
            .senders
            .write()
            .await
            .insert(address.to_string(), sender);

        true
    }

    pub async fn remove_contact(&self, name: &str) -> bool {
        let Some(address) = self.shared.address_book.read().await.lookup_by_name(name) else {
            return false;
        };

        if let Some(sender) = self.shared.senders.write().await.remove(&address) {
            sender.stop().await;
        }

        if self.shared.address_book.write().await.remove(name).is_err() {
            return false;
        }

        if let Err(e) = self.persist_contacts().await {
            error!("Failed to persist contacts: {}", e);
        }

        true
    }

    /// Use only for authorized contacts. If the destination is currently
    /// online, enqueues for delivery; otherwise stashes directly, skipping
    /// the queue entirely.
    pub async fn send_message(&self, msg: Message) {
        let Some(destination) = msg.destination.clone() else {
            return;
        };

        let online = self.shared.address_book.read().await.is_online(&destination);

        let sender = self.shared.senders.read().await.get(&destination).cloned();

        let Some(sender) = sender else {
            warn!("send_message: no sender for {}", destination);
            return;
        };

        if online {
            sender.enqueue(msg);
        } else {
            sender.stash(msg);
        }
    }

    pub fn local_destination(&self) -> &str {
        &self.shared.local_destination
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    async fn persist_contacts(&self) -> Result<()> {
        let book = self.shared.address_book.read().await;

        let mut map = HashMap::new();
        for name in book.names() {
            if let Some(address) = book.lookup_by_name(&name) {
                map.insert(name, address);
            }
        }

        persistence::save_contacts(&self.shared.datadir, &map).await
    }
}

fn short_session_suffix() -> String {
    Uuid::new_v4().to_simple().to_string()[..6].to_string()
}

/// Fatal-local startup check: prove the gateway daemon is actually
/// reachable before spawning the session loop, rather than letting a dead
/// gateway surface only as a silent, endlessly-retried session failure.
/// Uses a distinct session id so the probe never collides with (or
/// prematurely tears down) the real session the session loop will open.
async fn probe_gateway(
    gateway: &dyn Gateway,
    session_name: &str,
    local_destination: &str,
) -> Result<()> {
    let probe_name = format!("{}-probe", session_name);

    match gateway.create_session(&probe_name, local_destination).await {
        Ok(mut session) => {
            session.close().await;
            Ok(())
        }
        // The destination already has a live session somewhere; that still
        // proves the gateway itself is up.
        Err(EngineError::DuplicatedDestination) => Ok(()),
        Err(e) => {
            error!("Gateway is unreachable at startup: {}", e);
            Err(EngineError::GatewayUnreachable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{General, Sources};
    use crate::gateway::{BoxedStream, Destination, Session};
    use crate::hooks::NoopHooks;
    use async_trait::async_trait;

    struct DeadGateway;

    #[async_trait]
    impl Gateway for DeadGateway {
        async fn create_session(
            &self,
            _session_name: &str,
            _local_destination: &str,
        ) -> Result<Box<dyn Session>> {
            Err(EngineError::ConnectionError("connection refused".into()))
        }

        async fn stream_connect(
            &self,
            _session_name: &str,
            _target_destination: &Destination,
        ) -> Result<BoxedStream> {
            unreachable!("not exercised by this test")
        }

        async fn stream_accept(&self, _session_name: &str) -> Result<(String, BoxedStream)> {
            unreachable!("not exercised by this test")
        }

        async fn destination_lookup(&self, _base32_address: &str) -> Result<Destination> {
            unreachable!("not exercised by this test")
        }

        async fn new_destination(&self) -> Result<(String, Vec<u8>)> {
            Ok(("a".repeat(52), vec![0u8; 32]))
        }
    }

    fn config_for(dir: &tempfile::TempDir) -> Config {
        Config {
            general: General {
                gateway_address: "unused".to_string(),
                data_dir: Some(dir.path().to_str().unwrap().to_string()),
                session_name_prefix: "murmur".to_string(),
                ignore_unauthorized: false,
                ping_interval_secs: 300,
                send_retries: 11,
                default_timeout_secs: 60,
                session_restart_timeout_secs: 30,
                max_idle_secs: 1800,
            },
            sources: Sources::default(),
        }
    }

    #[tokio::test]
    async fn new_aborts_when_gateway_is_unreachable_at_startup() {
        let dir = tempfile::tempdir().unwrap();

        let err = Engine::new(config_for(&dir), Arc::new(DeadGateway), Arc::new(NoopHooks))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::GatewayUnreachable));
    }
}
