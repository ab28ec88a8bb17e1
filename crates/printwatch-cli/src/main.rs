use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use printwatch_core::{
    simulation_enabled, ChangeEvent, DeviceRegistry, LpstatRegistry, Monitor, MonitorConfig,
    SimulatedRegistry,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod exporter;

#[derive(Debug, Parser)]
#[command(name = "printwatchd")]
#[command(about = "Printer state change monitor (read-only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value_t = 2)]
    interval_secs: u64,

    #[arg(long, default_value_t = 5000)]
    query_timeout_ms: u64,

    #[arg(long)]
    simulate: bool,

    #[arg(long, default_value = "lpstat")]
    lpstat: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    Scan,
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Export {
        #[arg(long, default_value = "./data/events")]
        output_dir: String,
        #[arg(long, default_value_t = 90)]
        retention_days: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = MonitorConfig::default()
        .with_poll_interval_secs(cli.interval_secs)
        .with_query_timeout(Duration::from_millis(cli.query_timeout_ms));
    config.validate()?;

    let registry: Arc<dyn DeviceRegistry> = if cli.simulate || simulation_enabled() {
        info!("using simulated printer registry");
        Arc::new(SimulatedRegistry::with_simulated_printer())
    } else {
        Arc::new(LpstatRegistry::new(cli.lpstat.clone()))
    };

    match cli.command {
        Command::Scan => {
            let devices = registry.query_devices().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Command::Watch { format } => {
            let monitor = Monitor::with_config(registry, config)?;
            let events = forward_events(&monitor);
            watch_loop(&monitor, events, format).await?;
        }
        Command::Export {
            output_dir,
            retention_days,
        } => {
            let monitor = Monitor::with_config(registry, config)?;
            let events = forward_events(&monitor);
            exporter::run_exporter(&monitor, events, &output_dir, retention_days).await?;
        }
    }

    Ok(())
}

/// Subscribes a callback that hands every event to the async side.
fn forward_events(monitor: &Monitor) -> mpsc::UnboundedReceiver<ChangeEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    monitor.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn watch_loop(
    monitor: &Monitor,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    format: OutputFormat,
) -> Result<()> {
    info!(interval_secs = monitor.poll_interval_seconds(), "watching printers");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, format)?;
            }
        }
    }

    monitor.stop_monitoring();
    Ok(())
}

fn print_event(event: &ChangeEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(event)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(event)?);
        }
        OutputFormat::Human => {
            println!("{}", describe_event(event));
        }
    }

    Ok(())
}

fn describe_event(event: &ChangeEvent) -> String {
    let ts = event.timestamp().to_rfc3339();
    match event {
        ChangeEvent::Connected { name, .. } => format!("{ts}  {name:<24} connected"),
        ChangeEvent::Disconnected { name, .. } => format!("{ts}  {name:<24} disconnected"),
        ChangeEvent::StateChanged {
            name,
            old_state,
            new_state,
            ..
        } => format!("{ts}  {name:<24} state {old_state} -> {new_state}"),
        ChangeEvent::ReasonsChanged {
            name,
            old_reasons,
            new_reasons,
            ..
        } => format!(
            "{ts}  {name:<24} reasons [{}] -> [{}]",
            old_reasons.join(", "),
            new_reasons.join(", ")
        ),
    }
}
