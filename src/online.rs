// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// The "online gate": a process-wide latch every long-lived task waits on
// before touching the overlay session. Built on `tokio::sync::watch` since
// the gate must be re-clearable and every waiter (the session loop, every
// sender, the receiver, and the pinger) needs its own independent cursor.

use tokio::sync::watch;

#[derive(Clone)]
pub struct OnlineGate {
    tx: watch::Sender<bool>,
}

impl OnlineGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn set(&self) {
        let _ = self.tx.send(true);
    }

    pub fn clear(&self) {
        let _ = self.tx.send(false);
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Blocks until the gate is set. Returns immediately if already set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();

        if *rx.borrow() {
            return;
        }

        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for OnlineGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let gate = OnlineGate::new();
        gate.set();

        tokio::time::timeout(Duration::from_millis(50), gate.wait())
            .await
            .expect("wait should not block once set");
    }

    #[tokio::test]
    async fn wait_blocks_while_cleared() {
        let gate = OnlineGate::new();

        let result = tokio::time::timeout(Duration::from_millis(50), gate.wait()).await;
        assert!(result.is_err(), "wait should block while gate is cleared");
    }

    #[tokio::test]
    async fn waiter_proceeds_once_set_from_elsewhere() {
        let gate = OnlineGate::new();
        let waiter_gate = gate.clone();

        let waiter = tokio::spawn(async move { waiter_gate.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.set();

        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should have completed")
            .unwrap();
    }
}
