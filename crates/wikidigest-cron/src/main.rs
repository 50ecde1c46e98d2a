//! wikidigest cron binary.
//!
//! Reads `wikidigest.toml` (or the path specified with `--config`), opens the
//! SQLite store and runs one digest batch. Intended to be invoked
//! periodically by cron or a systemd timer.
//!
//! ```
//! wikidigest --config /etc/wikidigest.toml run
//! wikidigest enable 42
//! ```

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use wikidigest_core::{
  scheduler::DigestScheduler,
  store::SubscriptionStore,
  subscription::ContainerId,
};
use wikidigest_cron::{CronConfig, expand_tilde};
use wikidigest_store_sqlite::{OutboxNotifier, SqliteStore};

#[derive(Parser)]
#[command(author, version, about = "Wiki digest batch runner")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "wikidigest.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Aggregate new activity and deliver digests (the default).
  Run,
  /// Include a container in digests.
  Enable { container_id: ContainerId },
  /// Exclude a container from digests.
  Disable { container_id: ContainerId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = CronConfig::load(&cli.config).context("failed to load configuration")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command.unwrap_or(Command::Run) {
    Command::Run => run(&cfg, &store).await,
    Command::Enable { container_id } => {
      store
        .set_container_enabled(container_id, true)
        .await
        .with_context(|| format!("failed to enable container {container_id}"))?;
      tracing::info!(container_id, "container enabled for digests");
      Ok(())
    }
    Command::Disable { container_id } => {
      store
        .set_container_enabled(container_id, false)
        .await
        .with_context(|| format!("failed to disable container {container_id}"))?;
      tracing::info!(container_id, "container disabled for digests");
      Ok(())
    }
  }
}

async fn run(cfg: &CronConfig, store: &SqliteStore) -> anyhow::Result<()> {
  let enabled = store
    .enabled_containers()
    .await
    .context("failed to load enabled containers")?;

  let renderer = cfg.renderer();
  let notifier = OutboxNotifier::new(store.clone());
  let scheduler = DigestScheduler::new(store, store, &renderer, &notifier)
    .with_config(cfg.scheduler_config());

  let report = scheduler.run_with_report(&enabled).await;
  if !report.is_success() {
    anyhow::bail!(
      "digest run finished with {} failed subscriber(s) and {} undelivered digest(s)",
      report.failed,
      report.delivery_failures
    );
  }
  Ok(())
}
