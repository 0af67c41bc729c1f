// Murmur - peer-to-peer instant messaging engine over an anonymous overlay

#[macro_use]
extern crate log;

use std::env::var;
use std::sync::Arc;

use murmur::config::Config;
use murmur::engine::Engine;
use murmur::gateway::sam::SamGateway;
use murmur::hooks::NoopHooks;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_loc = var("MURMUR_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = Config::from_toml_bytes(&std::fs::read(&config_loc)?)?;

    let gateway = Arc::new(SamGateway::new(config.general.gateway_address.clone()));

    let engine = match Engine::new(config, gateway, Arc::new(NoopHooks)).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return Err(e.into());
        }
    };

    engine.start();

    info!(
        "Murmur is running as {}. Press Ctrl-C to stop.",
        engine.local_destination()
    );

    tokio::signal::ctrl_c().await?;

    info!("Interrupted, shutting down...");
    engine.stop().await;

    Ok(())
}
