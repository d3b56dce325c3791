mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tickwise_core::{IndicatorKind, SampleFeed, TimeSeriesStore};
use tickwise_data::{csv_loader, db, MemoryStore, PostgresStore};
use tickwise_engine::{
    spawn_writer, IndicatorRegistry, LatestSampleFeed, Scheduler, SchedulerState,
    SchedulerStats, StatsSnapshot, TickProcessor,
};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "tickwise")]
#[command(about = "Real-time incremental technical indicator engine")]
#[command(version)]
struct Cli {
    /// Path to the TOML config (defaults to ./tickwise.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and API until Ctrl-C
    Run {
        /// Override the API bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Do not start the HTTP API
        #[arg(long)]
        no_api: bool,
    },

    /// Feed samples from a CSV file through the configured indicators
    Replay {
        /// Path to CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Keep results in memory instead of writing to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply database migrations
    Migrate,

    /// List available indicator types
    Indicators,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run { bind, no_api } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            run(config, cli.database_url, bind, no_api).await?;
        }
        Commands::Replay { file, dry_run } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            replay(config, cli.database_url, file, dry_run).await?;
        }
        Commands::Migrate => {
            let config = AppConfig::load(cli.config.as_deref())?;
            let pool = db::connect(
                &config.database_url(cli.database_url),
                config.database.max_connections,
            )
            .await
            .context("Failed to connect to database")?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
            println!("Migrations applied");
        }
        Commands::Indicators => {
            println!("Available indicators:");
            for kind in IndicatorKind::ALL {
                println!("  {:<8} - {}", kind.as_str(), kind.description());
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_store(config: &AppConfig, database_url: Option<String>) -> Result<PostgresStore> {
    let pool = db::connect(
        &config.database_url(database_url),
        config.database.max_connections,
    )
    .await
    .context("Failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    Ok(PostgresStore::new(pool))
}

fn build_registry(config: &AppConfig) -> Result<Arc<IndicatorRegistry>> {
    let registry = Arc::new(IndicatorRegistry::new());
    for spec in &config.engine.indicators {
        registry
            .register(spec.clone())
            .with_context(|| format!("Failed to register {}", spec))?;
    }
    Ok(registry)
}

async fn run(
    config: AppConfig,
    database_url: Option<String>,
    bind: Option<String>,
    no_api: bool,
) -> Result<()> {
    let store: Arc<dyn TimeSeriesStore> = Arc::new(connect_store(&config, database_url).await?);
    let registry = build_registry(&config)?;
    let feed = Arc::new(LatestSampleFeed::new());
    let scheduler = Arc::new(Scheduler::new(
        config.engine.scheduler.clone(),
        config.engine.writer.clone(),
        Arc::clone(&registry),
        feed.clone(),
        Arc::clone(&store),
    ));

    scheduler.start().await?;
    let mut scheduler_state = scheduler.subscribe_state();

    let (api_stop, mut api_stop_rx) = tokio::sync::watch::channel(false);
    let api_task = if !config.serve_api(no_api) {
        tracing::info!("HTTP API disabled");
        None
    } else {
        let state = Arc::new(tickwise_api::AppState::new(
            Arc::clone(&registry),
            feed.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&store),
        ));
        let bind = bind.unwrap_or_else(|| config.api.bind.clone());
        let shutdown = async move {
            let _ = api_stop_rx.changed().await;
        };
        Some(tokio::spawn(async move {
            tickwise_api::start_server(state, &bind, shutdown).await
        }))
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
        _ = scheduler_state.wait_for(|s| *s == SchedulerState::Stopped) => {
            tracing::error!("Scheduler halted on a fatal error");
        }
    }

    let _ = api_stop.send(true);
    let stopped = scheduler.stop().await;

    if let Some(task) = api_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "API server exited with error"),
            Err(e) => tracing::warn!(error = %e, "API server task failed"),
            Ok(Ok(())) => {}
        }
    }

    print_stats(&scheduler.stats());
    stopped?;
    Ok(())
}

async fn replay(
    config: AppConfig,
    database_url: Option<String>,
    file: PathBuf,
    dry_run: bool,
) -> Result<()> {
    let samples = csv_loader::load_samples_from_csv(&file)?;
    if samples.is_empty() {
        anyhow::bail!("No samples loaded from {}", file.display());
    }
    if config.engine.indicators.is_empty() {
        anyhow::bail!("No [[indicators]] configured; nothing to compute");
    }
    tracing::info!(samples = samples.len(), file = %file.display(), "Starting replay");

    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn TimeSeriesStore> = if dry_run {
        memory.clone()
    } else {
        Arc::new(connect_store(&config, database_url).await?)
    };

    let registry = build_registry(&config)?;
    let feed = Arc::new(LatestSampleFeed::new());
    let stats = Arc::new(SchedulerStats::new());
    let writer = spawn_writer(Arc::clone(&store), &config.engine.writer, Arc::clone(&stats));
    let mut processor = TickProcessor::new(
        Arc::clone(&registry),
        feed.clone() as Arc<dyn SampleFeed>,
        Arc::clone(&stats),
        writer.sender(),
        config.engine.writer.clone(),
    );

    // One sample per tick, in timestamp order.
    for sample in samples {
        feed.publish(sample)?;
        processor.run_tick()?;
        // Let the writer drain between ticks.
        tokio::task::yield_now().await;
    }
    processor.finish().await?;
    let flushed = writer.shutdown().await?;
    tracing::debug!(rows = flushed, "Final flush complete");

    print_stats(&stats.snapshot());
    println!("Final values:");
    for descriptor in registry.list_active()? {
        match descriptor.value {
            Some(v) => println!("  {:<28} {:.6}", descriptor.spec.to_string(), v),
            None => println!("  {:<28} (warming up)", descriptor.spec.to_string()),
        }
    }
    if dry_run {
        println!("Dry run: {} rows kept in memory", memory.len());
    }
    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    let sep = "=".repeat(48);
    println!("\n{sep}");
    println!("  ENGINE STATS");
    println!("{sep}");
    println!("  Ticks:           {}", stats.ticks);
    println!("  Updates:         {}", stats.updates);
    println!("  Values emitted:  {}", stats.values_emitted);
    println!("  Update errors:   {}", stats.update_errors);
    println!("  Feed errors:     {}", stats.feed_errors);
    println!("  Rows written:    {}", stats.rows_written);
    println!("  Flushes:         {} ({} failed)", stats.flushes, stats.flush_failures);
    println!("  Rows dropped:    {}", stats.rows_dropped);
    println!("{sep}\n");
}
