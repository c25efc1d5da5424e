use clap::{Parser, Subcommand};
use pkg_constants::paths::{DEFAULT_DATA_DIR, DEFAULT_MANAGER_CONFIG};
use pkg_constants::quota::DEFAULT_RESYNC_PERIOD_MS;
use pkg_controllers::quota::{ManagerConfig, QuotaController};
use pkg_state::client::StateStore;
use pkg_state::registry::{QuotaRegistry, StoreRegistry};
use pkg_types::config::{ManagerConfigFile, load_config_file};
use pkg_types::quota::{QuotaLimit, QuotaLimitManifest};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "quota-manager",
    about = "Keeps namespace hard limits in sync with queue quota limits"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_MANAGER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the quota controller until Ctrl-C
    Run {
        /// Drift-correction period in milliseconds
        #[arg(long)]
        resync_period_ms: Option<u64>,

        /// Let resync create missing hard limits too
        #[arg(long)]
        ensure_hard_limits: bool,

        /// Keep state in memory instead of SlateDB
        #[arg(long)]
        in_memory: bool,
    },
    /// Create or replace quota limits from a YAML manifest
    Apply {
        #[arg(long, short)]
        file: String,
    },
    /// Delete a quota limit
    Delete { namespace: String, name: String },
    /// List quota limits and hard limits
    Get,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ManagerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

    match cli.command {
        Commands::Run {
            resync_period_ms,
            ensure_hard_limits,
            in_memory,
        } => {
            let resync_ms = resync_period_ms
                .or(file_cfg.resync_period_ms)
                .unwrap_or(DEFAULT_RESYNC_PERIOD_MS);
            let config = ManagerConfig {
                resync_period: Duration::from_millis(resync_ms.max(1)),
                ensure_hard_limits: ensure_hard_limits || file_cfg.ensure_hard_limits.unwrap_or(false),
            };
            let in_memory = in_memory || file_cfg.in_memory.unwrap_or(false);
            run(data_dir, in_memory, config).await
        }
        Commands::Apply { file } => {
            let store = StateStore::new(&data_dir).await?;
            let result = apply(&StoreRegistry::new(store.clone()), &file).await;
            store.close().await?;
            result
        }
        Commands::Delete { namespace, name } => {
            let store = StateStore::new(&data_dir).await?;
            let result = StoreRegistry::new(store.clone())
                .delete_quota_limit(&namespace, &name)
                .await;
            store.close().await?;
            result?;
            println!("quotalimit {}/{} deleted", namespace, name);
            Ok(())
        }
        Commands::Get => {
            let store = StateStore::new(&data_dir).await?;
            let result = print_tables(&StoreRegistry::new(store.clone())).await;
            store.close().await?;
            result
        }
    }
}

async fn run(data_dir: String, in_memory: bool, config: ManagerConfig) -> anyhow::Result<()> {
    info!("Starting quota-manager");
    if in_memory {
        info!("  State:     in-memory");
    } else {
        info!("  Data dir:  {}", data_dir);
    }
    info!("  Resync:    {}ms", config.resync_period.as_millis());
    info!("  Ensure:    {}", config.ensure_hard_limits);

    // Failing to reach the state store is the one fatal error.
    let store = if in_memory {
        StateStore::in_memory()
    } else {
        StateStore::new(&data_dir).await?
    };
    let registry = Arc::new(StoreRegistry::new(store.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = QuotaController::new(registry, config).start(shutdown_rx);

    info!("Quota manager is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down quota manager");

    let _ = shutdown_tx.send(true);
    controller.await?;
    store.close().await?;
    Ok(())
}

async fn apply(registry: &dyn QuotaRegistry, file: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file, e))?;
    let manifest: QuotaLimitManifest = serde_yaml::from_str(&content)?;
    let existing: BTreeMap<(String, String), QuotaLimit> = registry
        .list_quota_limits()
        .await?
        .into_iter()
        .map(|q| ((q.namespace.clone(), q.name.clone()), q))
        .collect();

    for entry in manifest.quota_limits {
        let mut quota = QuotaLimit::from(entry);
        let verb = match existing.get(&(quota.namespace.clone(), quota.name.clone())) {
            Some(current) => {
                quota.created_at = current.created_at;
                "configured"
            }
            None => "created",
        };
        registry.put_quota_limit(&quota).await?;
        println!("quotalimit {}/{} {}", quota.namespace, quota.name, verb);
    }
    Ok(())
}

async fn print_tables(registry: &dyn QuotaRegistry) -> anyhow::Result<()> {
    let quotas = registry.list_quota_limits().await?;

    println!("{:<20} {:<24} {}", "NAMESPACE", "QUOTA LIMIT", "ALLOCATED");
    for quota in &quotas {
        let allocated: Vec<String> = quota
            .allocated
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "{:<20} {:<24} {}",
            quota.namespace,
            quota.name,
            allocated.join(",")
        );
    }
    if quotas.is_empty() {
        println!("(no quota limits)");
        return Ok(());
    }

    let namespaces: std::collections::BTreeSet<&str> =
        quotas.iter().map(|q| q.namespace.as_str()).collect();
    println!();
    println!(
        "{:<20} {:<24} {:<8} {}",
        "NAMESPACE", "HARD LIMIT", "VERSION", "HARD"
    );
    for ns in namespaces {
        for limit in registry.list_hard_limits(ns).await? {
            let hard: Vec<String> = limit
                .hard
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!(
                "{:<20} {:<24} {:<8} {}",
                limit.namespace,
                limit.name,
                limit.resource_version,
                hard.join(",")
            );
        }
    }
    Ok(())
}
