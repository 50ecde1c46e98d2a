//! Configuration for the wiki digest cron job.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use wikidigest_core::scheduler::{DeliveryFailurePolicy, SchedulerConfig};
use wikidigest_render::{DEFAULT_SUBJECT, MarkdownRenderer};

/// Runtime configuration, deserialised from `wikidigest.toml` and
/// `WIKIDIGEST_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CronConfig {
  pub store_path:                PathBuf,
  /// Subscribers handled per run; `0` means all of them.
  pub users_per_run:             usize,
  /// Keep watermarks of undelivered digests so they are retried next run.
  pub hold_watermark_on_failure: bool,
  pub subject:                   String,
  /// Page headings link to `{base_url}/page/{id}` when set.
  pub base_url:                  Option<String>,
}

impl Default for CronConfig {
  fn default() -> Self {
    Self {
      store_path:                PathBuf::from("wikidigest.db"),
      users_per_run:             0,
      hold_watermark_on_failure: true,
      subject:                   DEFAULT_SUBJECT.to_string(),
      base_url:                  None,
    }
  }
}

impl CronConfig {
  /// Layer the optional TOML file at `path` under the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("WIKIDIGEST").try_parsing(true))
      .build()?
      .try_deserialize()
  }

  pub fn scheduler_config(&self) -> SchedulerConfig {
    SchedulerConfig {
      users_per_run:       (self.users_per_run > 0).then_some(self.users_per_run),
      on_delivery_failure: if self.hold_watermark_on_failure {
        DeliveryFailurePolicy::HoldWatermark
      } else {
        DeliveryFailurePolicy::Advance
      },
    }
  }

  pub fn renderer(&self) -> MarkdownRenderer {
    let renderer = MarkdownRenderer::new(self.subject.clone());
    match &self.base_url {
      Some(url) => renderer.with_base_url(url.clone()),
      None => renderer,
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
