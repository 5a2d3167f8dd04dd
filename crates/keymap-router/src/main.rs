//! Keymap Router entry point.
//!
//! Headless front end for the switching service. Logging goes to stderr
//! through `tracing`; status lines for the user go to stdout.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ TomlConfigRepository::load_or_create()
//!  └─ KeymapSwitcher::new()
//!       ├─ HidKeymapTransport  (HidApiLocator, or MockDeviceLocator for --dry-run)
//!       ├─ NativeForegroundSource
//!       └─ NativeProcessSnapshot
//!  └─ status pump          (prints every SwitchStatus)
//!  └─ Ctrl+C               → KeymapSwitcher::stop()
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keymap_router::application::switch_keymap::{
    KeymapSwitcher, KeymapTransport, SwitcherOptions,
};
use keymap_router::infrastructure::hid::mock::MockDeviceLocator;
use keymap_router::infrastructure::hid::{
    DeviceLocator, HidApiLocator, HidKeymapTransport, HidTransportConfig,
};
use keymap_router::infrastructure::os::{NativeForegroundSource, NativeProcessSnapshot};
use keymap_router::infrastructure::storage::{ConfigRepository, TomlConfigRepository};
use keymap_router_core::domain::rules::Layer;
use keymap_router_core::protocol::toggle_layer_command;

/// How long to wait for the last status lines to print on shutdown.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Switches the keyboard keymap to match the focused application.
#[derive(Debug, Parser)]
#[command(name = "keymap-router", version)]
struct Cli {
    /// Path to the configuration file (defaults to the platform config dir).
    #[arg(long, global = true, env = "KEYMAP_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run automatic switching until Ctrl+C.
    Run {
        /// Write to a simulated keyboard and log the reports instead.
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the configuration file and print the normalized form.
    Check,
    /// List attached keyboards that accept commands.
    Devices,
    /// Switch to a keymap once and exit.
    Switch {
        /// Keymap abbreviation, e.g. `DEF`.
        keymap: String,
        /// Layer to toggle after switching.
        #[arg(long, default_value = "base")]
        layer: Layer,
    },
}

impl Cli {
    fn repository(&self) -> anyhow::Result<TomlConfigRepository> {
        match &self.config {
            Some(path) => Ok(TomlConfigRepository::new(path)),
            None => TomlConfigRepository::at_default_location()
                .context("cannot locate the configuration file; pass --config"),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Run { dry_run } => run(&cli.repository()?, *dry_run).await,
        Command::Check => check(&cli.repository()?),
        Command::Devices => devices(),
        Command::Switch { keymap, layer } => switch_once(keymap, *layer).await,
    }
}

async fn run(repository: &TomlConfigRepository, dry_run: bool) -> anyhow::Result<()> {
    let config = repository
        .load_or_create()
        .with_context(|| format!("loading {}", repository.path().display()))?;
    info!(
        path = %repository.path().display(),
        rules = config.rules.len(),
        "configuration loaded"
    );

    let mock = dry_run.then(|| Arc::new(MockDeviceLocator::with_single_device()));
    let locator: Arc<dyn DeviceLocator> = match &mock {
        Some(mock) => {
            info!("dry run: reports go to a simulated keyboard");
            Arc::clone(mock) as Arc<dyn DeviceLocator>
        }
        None => Arc::new(HidApiLocator::new()),
    };

    let transport = HidKeymapTransport::new(locator, HidTransportConfig::default());
    let switcher = KeymapSwitcher::new(
        &config,
        Arc::new(transport),
        Arc::new(NativeForegroundSource::new()),
        Arc::new(NativeProcessSnapshot::new()),
        SwitcherOptions::default(),
    );

    let mut statuses = switcher.subscribe_status();
    let pump = tokio::spawn(async move {
        let mut reported = 0;
        loop {
            match statuses.recv().await {
                Ok(status) => println!("{status}"),
                Err(RecvError::Lagged(skipped)) => {
                    println!("({skipped} status updates skipped)");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }

            if let Some(mock) = &mock {
                let reports = mock.reports();
                for report in &reports[reported..] {
                    info!(path = %report.device_path, bytes = ?report.bytes, "dry-run report");
                }
                reported = reports.len();
            }
        }
    });

    switcher.start().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C signal: {e}");
    }
    info!("received Ctrl+C, shutting down");

    switcher.stop().await;
    drop(switcher);
    // The pump ends once the status channel closes.
    let _ = tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await;
    Ok(())
}

fn check(repository: &TomlConfigRepository) -> anyhow::Result<()> {
    let config = repository
        .load_strict()
        .with_context(|| format!("{} is not a usable configuration", repository.path().display()))?;

    println!("{} is valid.", repository.path().display());
    println!("default keymap: {}", config.default_keymap);
    println!("poll interval:  {} ms", config.poll_interval_ms);
    println!(
        "pause while companion agent runs: {}",
        config.pause_while_companion_running
    );
    for rule in &config.rules {
        println!("  {} -> {}/{}", rule.process_name, rule.keymap, rule.layer);
    }
    Ok(())
}

fn devices() -> anyhow::Result<()> {
    let candidates = HidApiLocator::new()
        .find_candidates()
        .context("enumerating HID devices")?;

    if candidates.is_empty() {
        println!("No supported keyboard found.");
    }
    for candidate in candidates {
        let length = match candidate.max_output_report_length {
            0 => "unreported".to_string(),
            n => format!("{n} bytes"),
        };
        println!("{} (output report: {length})", candidate.device_path);
    }
    Ok(())
}

async fn switch_once(keymap: &str, layer: Layer) -> anyhow::Result<()> {
    let transport =
        HidKeymapTransport::new(Arc::new(HidApiLocator::new()), HidTransportConfig::default());

    transport
        .switch_keymap(keymap)
        .await
        .with_context(|| format!("switching to keymap '{keymap}'"))?;
    if !layer.is_base() {
        transport
            .execute_macro_command(&toggle_layer_command(layer))
            .await
            .with_context(|| format!("toggling layer '{layer}'"))?;
    }

    println!("Switched to keymap '{}', layer '{layer}'.", keymap.trim().to_uppercase());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
