//! Command-line and environment configuration for the server.

use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::Backoff;
use crate::selector::PROPAGATE_ON_RENAME_LABEL;

/// Options for serving the plugin.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8888)]
    pub port: u16,

    /// Log the jobs that would be created instead of creating them
    #[arg(long, env = "DRY_RUN", default_value_t = true, action = ArgAction::Set)]
    pub dry_run: bool,

    /// File holding the HMAC secret GitHub signs deliveries with
    #[arg(long, env = "HMAC_SECRET_FILE", default_value = "/etc/webhook/hmac")]
    pub hmac_secret_file: PathBuf,

    /// Path to the Prow config file
    #[arg(long, env = "CONFIG_PATH", default_value = "/etc/config/config.yaml")]
    pub config_path: PathBuf,

    /// Directory of job config files whose postsubmits are merged into the config
    #[arg(long, env = "JOB_CONFIG_PATH")]
    pub job_config_path: Option<PathBuf>,

    /// Label a postsubmit must set to "true" to be propagated
    #[arg(long, env = "JOB_SELECTION_LABEL", default_value = PROPAGATE_ON_RENAME_LABEL)]
    pub job_selection_label: String,

    /// Seconds between reloads of the Prow config (0 disables reloading)
    #[arg(long, env = "CONFIG_RELOAD_INTERVAL_SECS", default_value_t = 60)]
    pub config_reload_interval_secs: u64,

    /// Delay before the first retry of a failed job creation, in milliseconds
    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 250)]
    pub backoff_base_ms: u64,

    /// Multiplier applied to the retry delay after every attempt
    #[arg(long, env = "BACKOFF_FACTOR", default_value_t = 2.0)]
    pub backoff_factor: f64,

    /// Random spread applied to each retry delay, as a fraction of it
    #[arg(long, env = "BACKOFF_JITTER", default_value_t = 0.1)]
    pub backoff_jitter: f64,

    /// Maximum number of creation attempts per job
    #[arg(long, env = "BACKOFF_STEPS", default_value_t = 8)]
    pub backoff_steps: u32,
}

impl ServeArgs {
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            duration: Duration::from_millis(self.backoff_base_ms),
            factor: self.backoff_factor,
            jitter: self.backoff_jitter,
            steps: self.backoff_steps,
        }
    }

    /// `None` when reloading is disabled.
    #[must_use]
    pub fn reload_interval(&self) -> Option<Duration> {
        (self.config_reload_interval_secs > 0)
            .then(|| Duration::from_secs(self.config_reload_interval_secs))
    }
}
