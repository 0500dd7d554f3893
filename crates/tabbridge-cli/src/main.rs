//! `tabbridge` – MQTT to REST/WebSocket bridge.
//!
//! Startup order:
//!
//! 1. Load the configuration file (`TABBRIDGE_CONFIG`, the first argument,
//!    or `./tabbridge.json`), apply `TABBRIDGE_*` overrides and validate.
//!    Any failure exits with status 1 before a port is bound.
//! 2. Build the topic registry, sensor cache, broadcast hub and telemetry
//!    pipeline.
//! 3. Start the broker session.
//! 4. Serve HTTP + WebSocket until **Ctrl-C**, then disconnect from the
//!    broker.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tabbridge_cockpit::{AppState, CockpitServer};
use tabbridge_kernel::{ConfigValidator, ValidatedConfig};
use tabbridge_middleware::{
    BroadcastHub, BrokerConnectionManager, BrokerOptions, SensorCache, TelemetryPipeline,
    TopicRegistry,
};
use tabbridge_types::ConfigError;
use tracing::{error, info, warn};

use crate::config::{FileConfig, ServerSettings};

fn main() -> ExitCode {
    // Tracing first: the OTLP exporter must be built outside the runtime.
    let _guard = telemetry::init_tracing("tabbridge");

    print_banner();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (validated, settings) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start runtime".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(validated, settings))
}

/// Resolve, read, override and validate. Nothing is started yet.
fn load_config(args: &[String]) -> Result<(ValidatedConfig, ServerSettings), ConfigError> {
    let path = config::config_path(args);
    let mut file: FileConfig = config::load_from(&path)?;
    config::apply_env_overrides(&mut file);
    let validated = ConfigValidator::validate(file.bridge)?;

    println!("  Config loaded from {}", path.display().to_string().bold());
    Ok((validated, file.server))
}

async fn run(validated: ValidatedConfig, settings: ServerSettings) -> ExitCode {
    let config = Arc::new(validated);

    // ── Telemetry path ────────────────────────────────────────────────────
    let registry = TopicRegistry::from_config(&config);
    let cache = Arc::new(SensorCache::new());
    let hub = Arc::new(BroadcastHub::new(settings.client_queue, settings.overflow));
    let pipeline = Arc::new(TelemetryPipeline::new(
        registry,
        Arc::clone(&cache),
        Arc::clone(&hub),
    ));

    // ── Broker session ────────────────────────────────────────────────────
    let options = BrokerOptions {
        reconnect_timeout: settings.reconnect_timeout(),
        ..BrokerOptions::default()
    };
    let (broker, broker_task) =
        BrokerConnectionManager::start(&config.config().broker, pipeline, options);

    // ── HTTP + WebSocket ──────────────────────────────────────────────────
    let mut state = AppState::new(config, cache, hub, broker.clone())
        .with_max_upload_bytes(settings.max_upload_bytes);
    if let Some(dir) = settings.staging_dir.clone() {
        state = state.with_staging_dir(dir);
    }

    println!(
        "  Cockpit on {}",
        format!("http://localhost:{}", settings.port).bold().cyan()
    );

    let served = CockpitServer::new(state)
        .with_port(settings.port)
        .run_until(shutdown_signal())
        .await;

    broker.disconnect().await;
    broker_task.abort();

    match served {
        Ok(()) => {
            info!("tabbridge stopped");
            println!("{}", "  ✓ Exiting tabbridge.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server failed");
            eprintln!("{}: {}", "Server error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    println!();
    println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  _        _    _          _     _            "#.bold().cyan());
    println!("{}", r#" | |_ __ _| |__| |__  _ __(_) __| | __ _  ___ "#.bold().cyan());
    println!("{}", r#" | __/ _` | '_ \ '_ \| '__| |/ _` |/ _` |/ _ \"#.bold().cyan());
    println!("{}", r#" | || (_| | |_) | |_) | |  | | (_| | (_| |  __/"#.bold().cyan());
    println!("{}", r#"  \__\__,_|_.__/|_.__/|_|  |_|\__,_|\__, |\___|"#.bold().cyan());
    println!("{}", r#"                                    |___/      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "tabbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  MQTT telemetry and commands over REST + WebSocket");
    println!();
}
