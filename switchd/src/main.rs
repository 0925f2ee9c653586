mod backend;
mod config;
mod error;
mod native;
mod pacmd;
mod registry;
mod shell;
mod sink;
mod ws_server;

use crate::backend::{Control, Topology};
use crate::config::Backend;
use crate::registry::SinkRegistry;
use crate::shell::ShellGateway;
use crate::ws_server::WebSocketServer;
use log::{info, warn};
use messages::shell_interface::{ShellRequest, ShellResponse};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if cfg!(debug_assertions) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }

    info!(
        "Starting {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = config::load_config("config.json")?;
    log::debug!("{:#?}", config);

    let (topology, control): (Arc<dyn Topology>, Arc<dyn Control>) = match &config.backend {
        Backend::Pacmd { binary } => {
            let client = Arc::new(pacmd::PacmdClient::new(
                binary.clone().unwrap_or_else(|| "pacmd".to_string()),
            ));
            (client.clone(), client)
        }
        Backend::Native => {
            let client = Arc::new(native::NativeClient::new());
            (client.clone(), client)
        }
    };

    let registry = Arc::new(SinkRegistry::new(topology, control, config.command_timeout()));

    // The first QuerySinks should answer from a populated registry. A dead
    // or absent server is not fatal; shells retry with Refresh.
    match registry.refresh().await {
        Ok(sinks) => info!("enumerated {} sink(s)", sinks.len()),
        Err(e) => warn!("initial sink enumeration failed: {}", e),
    }

    let gateway = Arc::new(ShellGateway::new(registry));
    let server = WebSocketServer::<ShellRequest, ShellResponse>::new(gateway);
    server.listen(config.shell_address).await
}
