//! Tlsward - automatic TLS termination with ACME certificates
//!
//! This is the main entry point for the Tlsward CLI.

mod http;
mod tls;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tlsward_core::config::{ConfigLoader, TlswardConfig};
use tlsward_tls::acme::directory;
use tlsward_tls::{AutoTlsConfig, TlsManager};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tlsward - TLS termination with automatic Let's Encrypt certificates
#[derive(Parser)]
#[command(name = "tlsward")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server with a configuration file
    Run {
        /// Path to the configuration file
        #[arg(default_value = "tlsward.toml")]
        config: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "tlsward.toml")]
        config: String,
    },

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: config_path } => {
            let config = match load_config(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    init_tracing("info", cli.verbose);
                    tracing::error!("❌ Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };
            init_tracing(&config.logging.level, cli.verbose);
            tracing::info!("Starting Tlsward with config: {}", config_path);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build Tokio runtime")?;
            runtime.block_on(serve(config))?;
        }

        Commands::Validate { config } => {
            init_tracing("info", cli.verbose);
            tracing::info!("Validating config: {}", config);

            match load_config(&config) {
                Ok(_) => {
                    println!("✅ Configuration '{}' is valid!", config);
                }
                Err(e) => {
                    eprintln!("❌ Configuration Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Tlsward v{}", tlsward_core::VERSION);
            println!("Built with ❤️ in Rust");
        }
    }

    Ok(())
}

fn load_config(path: &str) -> tlsward_core::Result<TlswardConfig> {
    let config = ConfigLoader::load(path)?;
    config.validate()?;
    Ok(config)
}

fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Engine settings derived from the configuration file
fn auto_tls_config(config: &TlswardConfig) -> AutoTlsConfig {
    let directory_url = match (&config.acme.directory, config.acme.staging) {
        (Some(url), _) => url.clone(),
        (None, true) => directory::LETS_ENCRYPT_STAGING.to_string(),
        (None, false) => directory::LETS_ENCRYPT_PRODUCTION.to_string(),
    };

    AutoTlsConfig {
        storage: config.acme.storage_path(),
        contacts: config.acme.email.iter().cloned().collect(),
        directory_url,
        renewal_interval: Duration::from_secs(config.acme.renewal_interval_secs),
        allowed_hosts: Some(config.hosts()),
    }
}

async fn serve(config: TlswardConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let manager = TlsManager::new(auto_tls_config(&config), tokio::runtime::Handle::current());
    let loaded = manager.init().await;
    tracing::info!("📜 {} certificate(s) ready, {} host(s) routed", loaded, config.hosts().len());

    let http_listener = TcpListener::bind(config.listen.http)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.listen.http))?;
    let https_listener = TcpListener::bind(config.listen.https)
        .await
        .with_context(|| format!("Failed to bind HTTPS listener on {}", config.listen.https))?;

    let acceptor = tokio_rustls::TlsAcceptor::from(tls::server_config(manager.selector())?);
    let shutdown = CancellationToken::new();

    let http_state = Arc::new(http::HttpState {
        responder: manager.responder(),
        https_port: config.listen.https.port(),
        metrics: config.listen.metrics,
    });
    let http_task = tokio::spawn(http::run_http_server(http_listener, http_state, shutdown.clone()));
    let https_task = tokio::spawn(tls::run_tls_server(
        https_listener,
        acceptor,
        config.clone(),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("🛑 Received Ctrl-C, shutting down...");

    shutdown.cancel();
    manager.shutdown().await;
    let _ = tokio::join!(http_task, https_task);

    tracing::info!("👋 Tlsward stopped");
    Ok(())
}
