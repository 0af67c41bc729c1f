// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// In-process `Gateway` used by integration tests to simulate several nodes
// talking to each other without a real overlay daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::duplex;
use tokio::sync::mpsc;

use super::{BoxedStream, Destination, Gateway, Session};
use crate::error::{EngineError, Result};

struct PendingConnection {
    remote_destination: String,
    stream: tokio::io::DuplexStream,
}

/// Shared registry every `MockGateway` in a test registers into, keyed by
/// destination so `stream_connect` from one node can find another's
/// `stream_accept` queue.
#[derive(Clone, Default)]
pub struct MockNetwork {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<PendingConnection>>>>,
    counter: Arc<AtomicU64>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_address(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{:0>52}", format!("mocknode{}", n))
    }
}

pub struct MockGateway {
    network: MockNetwork,
    accept_rx: Mutex<Option<mpsc::UnboundedReceiver<PendingConnection>>>,
    local_destination: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new(network: MockNetwork) -> Self {
        Self {
            network,
            accept_rx: Mutex::new(None),
            local_destination: Mutex::new(None),
        }
    }
}

pub struct MockSession {
    notify: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl Session for MockSession {
    async fn wait_closed(&mut self) {
        self.notify.notified().await;
    }

    async fn close(&mut self) {
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn create_session(
        &self,
        _session_name: &str,
        local_destination: &str,
    ) -> Result<Box<dyn Session>> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.network
            .listeners
            .lock()
            .unwrap()
            .insert(local_destination.to_string(), tx);
        *self.accept_rx.lock().unwrap() = Some(rx);
        *self.local_destination.lock().unwrap() = Some(local_destination.to_string());

        Ok(Box::new(MockSession {
            notify: Arc::new(tokio::sync::Notify::new()),
        }))
    }

    async fn stream_connect(
        &self,
        _session_name: &str,
        target_destination: &Destination,
    ) -> Result<BoxedStream> {
        let target_tx = {
            let listeners = self.network.listeners.lock().unwrap();
            listeners.get(target_destination).cloned()
        };

        let target_tx = target_tx.ok_or_else(|| {
            EngineError::PeerNotFound(target_destination.clone())
        })?;

        let local_destination = self
            .local_destination
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default();

        let (local_half, remote_half) = duplex(MAX_MESSAGE_BUFFER);

        target_tx
            .send(PendingConnection {
                remote_destination: local_destination,
                stream: remote_half,
            })
            .map_err(|_| EngineError::PeerNotFound(target_destination.clone()))?;

        Ok(Box::new(local_half))
    }

    async fn stream_accept(&self, _session_name: &str) -> Result<(String, BoxedStream)> {
        let mut guard = self.accept_rx.lock().unwrap().take().ok_or_else(|| {
            EngineError::ConnectionError("stream_accept called before create_session".into())
        })?;

        let conn = guard
            .recv()
            .await
            .ok_or_else(|| EngineError::ConnectionError("mock network closed".into()))?;

        *self.accept_rx.lock().unwrap() = Some(guard);

        Ok((conn.remote_destination, Box::new(conn.stream)))
    }

    async fn destination_lookup(&self, base32_address: &str) -> Result<Destination> {
        Ok(base32_address.to_string())
    }

    async fn new_destination(&self) -> Result<(String, Vec<u8>)> {
        Ok((self.network.next_address(), vec![0u8; 32]))
    }
}

const MAX_MESSAGE_BUFFER: usize = 4096;
