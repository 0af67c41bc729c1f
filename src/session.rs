// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Self-healing overlay session loop: create, run until the session dies
// or shutdown is requested, back off, repeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::EngineError;
use crate::shared::EngineShared;

pub async fn run(shared: Arc<EngineShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let restart_timeout = Duration::from_secs(shared.tuning.session_restart_timeout_secs);

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match shared
            .gateway
            .create_session(&shared.session_name, &shared.local_destination)
            .await
        {
            Err(EngineError::DuplicatedDestination) => {
                error!("Overlay destination already exists");
            }
            Err(e) => {
                error!("Gateway is unavailable: {}", e);
            }
            Ok(mut session) => {
                shared.online.set();
                debug!("Session created: {}", shared.local_destination);

                tokio::select! {
                    _ = session.wait_closed() => {
                        error!("Overlay session is dead");
                    }
                    _ = shutdown_rx.changed() => {
                        session.close().await;
                        shared.online.clear();
                        return;
                    }
                }

                shared.online.clear();
            }
        }

        info!(
            "Restarting overlay session in {} seconds...",
            restart_timeout.as_secs()
        );

        tokio::select! {
            _ = tokio::time::sleep(restart_timeout) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}
