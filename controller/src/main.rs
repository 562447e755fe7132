// Sauce plotter controller with a simulated gantry.
// Run with: cargo run -p controller

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};

use controller::io::SimulatedIo;
use controller::{server, Plotter};
use ssg::config::MachineConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let bind = std::env::var("SSG_BIND").unwrap_or_else(|_| "0.0.0.0:9800".to_string());

    let cfg = match std::env::var("SSG_CONFIG") {
        Ok(path) => match MachineConfig::load(&path) {
            Ok(cfg) => {
                info!(%path, "loaded machine config");
                cfg
            }
            Err(e) => {
                error!(%path, error = %e, "could not load machine config");
                return;
            }
        },
        Err(_) => MachineConfig::default(),
    };

    let listener = match TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%bind, error = %e, "could not bind");
            return;
        }
    };
    info!(%bind, "controller listening");

    let plotter = Arc::new(Mutex::new(Plotter::new(
        cfg,
        SimulatedIo::new(),
        Instant::now(),
    )));

    if let Err(e) = server::run(listener, plotter).await {
        error!(error = %e, "server stopped");
    }
}
