//! Periscope viewer — entry point.
//!
//! ```text
//! periscope-viewer --password <pw>          Connect with config defaults
//! periscope-viewer --host <addr> --port <p> Override the target host
//! periscope-viewer --config <path>          Load a custom config TOML
//! periscope-viewer --gen-config             Write default config to stdout
//! ```
//!
//! The password may also come from the PERISCOPE_PASSWORD environment
//! variable.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use periscope_core::PeriscopeError;
use periscope_viewer::app::ViewerApp;
use periscope_viewer::config::ViewerConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "periscope-viewer", about = "Periscope remote desktop viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "periscope-viewer.toml")]
    config: PathBuf,

    /// Host address, overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Host control port, overriding the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Session password (or set PERISCOPE_PASSWORD).
    #[arg(short, long, env = "PERISCOPE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.connection.host = host;
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("periscope-viewer v{}", env!("CARGO_PKG_VERSION"));

    let app = ViewerApp::new(config);
    let shutdown = app.shutdown_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, disconnecting");
        shutdown.cancel();
    });

    match app.run(&cli.password).await {
        Ok(()) => {
            println!("Session closed.");
            Ok(())
        }
        Err(PeriscopeError::AuthenticationFailed) => {
            eprintln!("Authentication failed: wrong password.");
            std::process::exit(2);
        }
        Err(PeriscopeError::AccessDenied(reason)) => {
            eprintln!("Connection refused: {reason}.");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Session failed: {e}");
            std::process::exit(1);
        }
    }
}
