use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storefront_monitor::caching::{CacheStore, MemoryStore, RedisStore, RedisStoreConfig};
use storefront_monitor::monitoring::alerts::channels_from_config;
use storefront_monitor::monitoring::collectors::{
    ApplicationCollector, CacheCollector, HttpCollector, SystemCollector,
};
use storefront_monitor::utils::logging;
use storefront_monitor::{HealthState, HealthStatus, MonitorConfig, MonitoringManager};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "storefront-monitor")]
#[command(about = "Collect metrics, check health and export metrics for a storefront deployment")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, env = "STOREFRONT_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every collector once and print the snapshot
    Collect {
        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Run the health checks
    Health {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Collect once and print the text exposition
    Export,

    /// Write a default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "storefront-monitor.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    if cli.json_logs {
        logging::init_json_logging(log_level)?;
    } else {
        logging::init_logging_with_level(log_level)?;
    }

    match cli.command {
        Commands::Init { output, force } => run_init(&output, force)?,
        command => {
            let config = load_config(cli.config.as_deref())?;
            let manager = build_manager(&config).await?;
            if manager.load_alerts().await > 0 {
                info!("Restored alert rules");
            }
            run(command, &manager).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    let mut config = match path {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn run(command: Commands, manager: &MonitoringManager) -> anyhow::Result<()> {
    match command {
        Commands::Collect { pretty } => {
            let snapshot = manager.collect_metrics().await;
            let output = if pretty {
                serde_json::to_string_pretty(&snapshot)?
            } else {
                serde_json::to_string(&snapshot)?
            };
            println!("{}", output);
        }
        Commands::Health { format } => {
            let status = manager.check_health().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Text => print_health(&status),
            }
            if status.overall == HealthState::Critical {
                std::process::exit(2);
            }
        }
        Commands::Export => {
            manager.collect_metrics().await;
            print!("{}", manager.export_prometheus_metrics().await);
        }
        Commands::Init { output, force } => run_init(&output, force)?,
    }

    Ok(())
}

/// Wire the collectors that need no host-provided connection. Database and
/// business metrics require a [`storefront_monitor::Database`] from the host
/// application and are left out of the standalone binary.
async fn build_manager(config: &MonitorConfig) -> anyhow::Result<MonitoringManager> {
    let memory: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(
        "memory",
        config.cache.memory_max_entries,
    ));
    let mut tiers = vec![Arc::clone(&memory)];
    let mut shared = memory;

    if let Some(url) = &config.cache.redis_url {
        let redis_config = RedisStoreConfig {
            redis_url: url.clone(),
            key_prefix: config.cache.key_prefix.clone(),
            ..RedisStoreConfig::default()
        };
        match RedisStore::connect("redis", redis_config).await {
            Ok(store) => {
                let store: Arc<dyn CacheStore> = Arc::new(store);
                tiers.push(Arc::clone(&store));
                shared = store;
            }
            Err(e) => warn!(error = %e, "Redis unavailable, using in-memory cache only"),
        }
    }

    let collectors = ["system", "application", "cache", "http"];
    let mut health = config.health.clone();
    health
        .expected_collectors
        .retain(|name| collectors.contains(&name.as_str()));

    let mut builder = MonitoringManager::builder()
        .config(config)
        .health_config(health)
        .cache(shared)
        .collector(Arc::new(SystemCollector::new()))
        .collector(Arc::new(ApplicationCollector::new(config.application.clone())))
        .collector(Arc::new(
            CacheCollector::new(tiers).with_benchmark(
                config.cache.benchmark_iterations,
                config.cache.benchmark_payload_bytes,
            ),
        ))
        .collector(Arc::new(HttpCollector::new(None)));

    for channel in channels_from_config(&config.alerts, None)? {
        builder = builder.channel(channel);
    }

    Ok(builder.build())
}

fn run_init(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }

    MonitorConfig::default().save_to_file(output)?;
    println!(
        "{} {}",
        "Configuration written to".green(),
        output.display().to_string().bold()
    );
    Ok(())
}

fn paint(state: HealthState) -> ColoredString {
    let label = state.as_str().to_uppercase();
    match state {
        HealthState::Healthy => label.green().bold(),
        HealthState::Warning => label.yellow().bold(),
        HealthState::Critical => label.red().bold(),
    }
}

fn print_health(status: &HealthStatus) {
    println!("{} {}", "Overall:".bold(), paint(status.overall));
    println!("{}", format!("Checked at {}", status.timestamp.to_rfc3339()).dimmed());
    println!();

    for (name, result) in &status.checks {
        println!(
            "  {:<12} {:<10} {:>8.2}ms  {}",
            name.cyan(),
            paint(result.status),
            result.duration_ms,
            result.message
        );
    }
}
