// src/main.rs
//! Acqnode Runtime Engine
//!
//! Assembles configuration, the sampling unit and the command server into
//! a running acquisition node, then serves until interrupted.

use acqnode::observability::init_tracing;
use acqnode::sampling::{SamplingInterpreter, SamplingUnit, SimulatedSensor};
use acqnode::utils::config::NodeConfig;
use acqnode::wire::CommandServer;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("starting acqnode v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load()?;
    info!("configuration loaded: {:?}", config);

    // Sampling unit: one sampler per enabled sensor. Hardware drivers are
    // supplied by the deployment; the simulated driver stands in here.
    let mut sampling = SamplingUnit::new();
    for name in &config.sampling.enabled_sensors {
        let frequency = config.sampling.custom_frequencies.get(name).copied();
        sampling.add_sensor(Box::new(SimulatedSensor::new(name.clone())), frequency)?;
    }
    sampling.init().await?;

    // Command server over the sampling buffers
    let interpreter = Arc::new(SamplingInterpreter::new(&sampling));
    let mut server =
        CommandServer::bind(&config.server.host, config.server.port, interpreter)
            .await?
            .with_max_inflight(config.server.max_inflight);
    server.run().await?;

    info!("node ready; command server at {}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, cleaning up");

    server
        .close(Duration::from_secs(config.server.shutdown_timeout_secs))
        .await?;
    sampling.stop();

    info!("node stopped");
    Ok(())
}
