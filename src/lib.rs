pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod report;
pub mod server;
pub mod session;

use bus::BusClient;
use clap::Parser;
use config::{BackendKind, BridgeConfig};
use error::Result;
use session::SessionManager;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line overrides, applied on top of the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "padbridge", version, about)]
pub struct Cli {
    /// Config file to use instead of the per-user one.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub bind: Option<IpAddr>,
    /// Directory of static files served next to the websocket.
    #[arg(long)]
    pub public_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
}

impl Cli {
    pub fn resolve_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load_from(path)?,
            None => BridgeConfig::load()?,
        };
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(dir) = &self.public_dir {
            config.public_dir = dir.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = cli.resolve_config()?;
    let driver = bus::create_driver(&config)?;
    let bus = BusClient::connect(driver)?;

    let sessions = Arc::new(SessionManager::new(Arc::new(bus)));
    let server = server::start_server(&config, sessions).await?;
    log::info!(
        "Serving {} and websocket clients on ws://{}/",
        config.public_dir.display(),
        server.local_addr()
    );

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    server.shutdown().await;
    Ok(())
}
