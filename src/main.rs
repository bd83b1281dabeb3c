//! http-over-dns - data tunnel over DNS TXT queries
//!
//! Runs the echo tunnel server, sends one request through a server, or
//! prints the frame capacities a domain leaves.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use http_over_dns::fragment::MAX_FRAMES;
use http_over_dns::{DnsTunnelClient, DnsTunnelServer, EchoHandler, TunnelConfig};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser)]
#[command(name = "http-over-dns")]
#[command(version = VERSION)]
#[command(about = "Data tunnel over DNS TXT queries", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Domain suffix for frame names (overrides the config file)
    #[arg(short, long, env = "TUNNEL_DOMAIN", global = true)]
    domain: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server (echoes every request)
    Server {
        /// Server bind address
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Send one request through a tunnel server and print the response
    Client {
        /// Tunnel server address
        #[arg(short, long)]
        server: Option<SocketAddr>,

        /// Request payload
        #[arg(long)]
        data: String,
    },

    /// Show the per-frame payload capacities
    Capacity,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => TunnelConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TunnelConfig::default(),
    };
    if let Some(domain) = cli.domain {
        config.domain = domain;
    }

    match cli.command {
        Commands::Server { bind } => {
            if let Some(bind) = bind {
                config.server.listen_addr = bind;
            }
            run_server(config).await?;
        }
        Commands::Client { server, data } => {
            if let Some(server) = server {
                config.client.server_addr = server;
            }
            run_client(config, data.as_bytes()).await?;
        }
        Commands::Capacity => {
            show_capacity(&config)?;
        }
    }

    Ok(())
}

async fn run_server(config: TunnelConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let planner = Arc::new(config.planner()?);

    info!(
        "Starting tunnel server on {} for domain {:?}",
        config.server.listen_addr,
        planner.domain()
    );
    info!(
        "Frame capacity: {} bytes uplink, {} bytes downlink",
        planner.uplink_capacity(),
        planner.resource_record_capacity()
    );

    DnsTunnelServer::new(planner, EchoHandler, config.server)
        .listen()
        .await
        .context("Tunnel server failed")?;

    Ok(())
}

async fn run_client(config: TunnelConfig, data: &[u8]) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let planner = Arc::new(config.planner()?);
    let server_addr = config.client.server_addr;

    let mut client = DnsTunnelClient::connect(planner, config.client)
        .await
        .with_context(|| format!("Failed to set up client for {}", server_addr))?;
    let response = client
        .exchange(data)
        .await
        .with_context(|| format!("Exchange with {} failed", server_addr))?;

    println!("{}", String::from_utf8_lossy(&response));
    Ok(())
}

fn show_capacity(config: &TunnelConfig) -> Result<()> {
    let planner = config.planner().context("Invalid domain or message size")?;

    println!("Domain:              {:?}", planner.domain());
    println!("Message size:        {} bytes", planner.message_size());
    println!("Frame name field:    {} bytes", planner.name_field_size());
    println!("Question field:      {} bytes", planner.question_field_size());
    println!("Uplink per frame:    {} bytes", planner.uplink_capacity());
    println!(
        "Downlink per frame:  {} bytes",
        planner.resource_record_capacity()
    );
    println!(
        "Max payload:         {} bytes up, {} bytes down",
        planner.uplink_capacity() * MAX_FRAMES,
        planner.resource_record_capacity() * MAX_FRAMES
    );
    Ok(())
}
