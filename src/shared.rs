// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// State shared across the session loop, receiver, pinger, and every
// per-peer sender, grouped behind one `Arc` so every task sees the same
// address book, destination cache, and sender map.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::addressbook::AddressBook;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::hooks::EventHooks;
use crate::online::OnlineGate;
use crate::sender::PeerSender;

/// Overridable constants, sourced from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct EngineTuning {
    pub send_retries: u32,
    pub default_timeout_secs: u64,
    pub session_restart_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub max_idle_secs: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            send_retries: 11,
            default_timeout_secs: 60,
            session_restart_timeout_secs: 30,
            ping_interval_secs: 300,
            max_idle_secs: 1800,
        }
    }
}

/// Bounded FIFO of the most recently observed inbound message UUIDs,
/// capacity 50. Used to suppress re-dispatch of duplicate deliveries.
pub struct DedupRing {
    seen: VecDeque<Uuid>,
    capacity: usize,
}

impl DedupRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.seen.contains(uuid)
    }

    pub fn insert(&mut self, uuid: Uuid) {
        if self.seen.len() >= self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(uuid);
    }
}

pub struct EngineShared {
    pub address_book: RwLock<AddressBook>,
    pub senders: RwLock<HashMap<String, Arc<PeerSender>>>,
    pub dest_cache: Mutex<HashMap<String, String>>,
    pub uuid_log: Mutex<DedupRing>,
    pub gateway: Arc<dyn Gateway>,
    pub session_name: String,
    pub local_destination: String,
    pub online: OnlineGate,
    pub hooks: Arc<dyn EventHooks>,
    pub ignore_unauthorized: bool,
    pub started_at: Instant,
    pub tuning: EngineTuning,
    pub datadir: String,
}

impl EngineShared {
    /// Resolve `destination` via the cache, populating it from the
    /// gateway's naming lookup on a miss. The cache is monotonically
    /// additive: entries are never evicted.
    pub async fn resolve_destination(&self, address: &str) -> Result<String> {
        if let Some(resolved) = self.dest_cache.lock().unwrap().get(address).cloned() {
            return Ok(resolved);
        }

        let resolved = self.gateway.destination_lookup(address).await?;
        self.dest_cache
            .lock()
            .unwrap()
            .insert(address.to_string(), resolved.clone());

        Ok(resolved)
    }

    /// Triggered whenever any message or data is received from
    /// `address`. If the peer was offline, fires `on_contact_online` and
    /// replays its stash *before* flipping the online flag, so a
    /// replayed message is never observably "sent while still offline".
    ///
    /// The whole check-fire-replay-set sequence runs under one held write
    /// guard on the address book, not three separate acquisitions: two
    /// concurrent callers for the same address (e.g. a ping response and
    /// an inbound receive landing at once) would otherwise both be able to
    /// observe `online == false` and both fire the transition.
    pub async fn mark_online(&self, address: &str) {
        let mut book = self.address_book.write().await;

        let Some(name) = book.lookup_by_address(address) else {
            return;
        };

        let was_online = book.is_online(address);

        if !was_online {
            debug!("Contact becomes online: {}", name);
            self.hooks.on_contact_online(&name).await;

            if let Some(sender) = self.senders.read().await.get(address).cloned() {
                sender.replay_stash().await;
            }
        }

        book.set_online(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_ring_evicts_oldest_past_capacity() {
        let mut ring = DedupRing::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        ring.insert(a);
        ring.insert(b);
        ring.insert(c);

        assert!(!ring.contains(&a));
        assert!(ring.contains(&b));
        assert!(ring.contains(&c));
    }

    #[test]
    fn dedup_ring_detects_duplicates() {
        let mut ring = DedupRing::new(50);
        let a = Uuid::new_v4();

        assert!(!ring.contains(&a));
        ring.insert(a);
        assert!(ring.contains(&a));
    }

    #[tokio::test]
    async fn mark_online_fires_hook_exactly_once_under_concurrent_callers() {
        use crate::gateway::mock::{MockGateway, MockNetwork};
        use crate::hooks::EventHooks;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingHooks(Arc<AtomicUsize>);

        #[async_trait]
        impl EventHooks for CountingHooks {
            async fn on_contact_online(&self, _name: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let addr = "a".repeat(52);
        let mut book = AddressBook::new();
        book.insert("peer", &addr).unwrap();

        let count = Arc::new(AtomicUsize::new(0));

        let shared = Arc::new(EngineShared {
            address_book: RwLock::new(book),
            senders: RwLock::new(HashMap::new()),
            dest_cache: Mutex::new(HashMap::new()),
            uuid_log: Mutex::new(DedupRing::new(50)),
            gateway: Arc::new(MockGateway::new(MockNetwork::new())),
            session_name: "test".to_string(),
            local_destination: "local".to_string(),
            online: crate::online::OnlineGate::new(),
            hooks: Arc::new(CountingHooks(count.clone())),
            ignore_unauthorized: false,
            started_at: Instant::now(),
            tuning: EngineTuning::default(),
            datadir: String::new(),
        });

        // Simulates a ping response and an inbound receive for the same
        // peer landing at the same time.
        let (shared_a, addr_a) = (shared.clone(), addr.clone());
        let (shared_b, addr_b) = (shared.clone(), addr.clone());

        tokio::join!(
            async move { shared_a.mark_online(&addr_a).await },
            async move { shared_b.mark_online(&addr_b).await },
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
