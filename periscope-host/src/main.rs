//! Periscope host — entry point.
//!
//! ```text
//! periscope-host                     Run with periscope-host.toml or defaults
//! periscope-host --config <path>     Load a custom config TOML
//! periscope-host --password <pw>     Override the configured password
//! periscope-host --gen-config        Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use periscope_host::config::HostConfig;
use periscope_host::server::HostServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "periscope-host", about = "Periscope remote desktop host service")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "periscope-host.toml")]
    config: PathBuf,

    /// Session password, overriding the config file.
    #[arg(short, long)]
    password: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = HostConfig::load(&cli.config);
    if let Some(password) = cli.password {
        config.security.password = password;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.security.password.is_empty() {
        eprintln!("refusing to start without a password; set security.password or pass --password");
        std::process::exit(1);
    }

    info!("periscope-host v{}", env!("CARGO_PKG_VERSION"));
    info!("control port: {}", config.network.port);
    info!("max sessions: {}", config.security.max_sessions);
    info!("target FPS: {}", config.screen.target_fps);

    let server = HostServer::new(config);
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}
