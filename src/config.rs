use std::time::Duration;

use clap::Parser;

use crate::error::{Result, RunrunError};
use crate::services::batch::BatchOptions;
use crate::services::client::{Credentials, RunrunitClient, BASE_URL, TIMEOUT_SECS};
use crate::services::desired_date::DesiredDateRule;

/// Runtime settings. Every flag can also come from the environment (or a
/// `.env` file next to the binary).
///
/// Credentials are optional here: each request may bring its own.
#[derive(Debug, Clone, Parser)]
#[command(name = "runrun-core", version, about = "Bulk task tooling for runrun.it")]
pub struct Settings {
    #[arg(long, env = "RUNRUNIT_APP_KEY", hide_env_values = true)]
    pub app_key: Option<String>,

    #[arg(long, env = "RUNRUNIT_USER_TOKEN", hide_env_values = true)]
    pub user_token: Option<String>,

    #[arg(long, env = "RUNRUNIT_BASE_URL", default_value = BASE_URL)]
    pub base_url: String,

    #[arg(long, env = "RUNRUNIT_TIMEOUT_SECS", default_value_t = TIMEOUT_SECS)]
    pub timeout_secs: u64,

    #[arg(long, env = "RUNRUNIT_BATCH_SIZE", default_value_t = BatchOptions::default().batch_size)]
    pub batch_size: usize,

    #[arg(
        long,
        env = "RUNRUNIT_INTER_BATCH_DELAY_MS",
        default_value_t = BatchOptions::default().inter_batch_delay_ms
    )]
    pub inter_batch_delay_ms: u64,

    #[arg(long, env = "RUNRUNIT_MAX_RETRIES", default_value_t = BatchOptions::default().max_retries)]
    pub max_retries: u32,

    #[arg(
        long,
        env = "RUNRUNIT_RETRY_INTERVAL_MS",
        default_value_t = BatchOptions::default().retry_interval_ms
    )]
    pub retry_interval_ms: u64,

    #[arg(long, env = "RUNRUNIT_DESIRED_HOUR", default_value_t = DesiredDateRule::default().hour)]
    pub desired_hour: u32,

    #[arg(
        long,
        env = "RUNRUNIT_UTC_OFFSET_HOURS",
        default_value_t = DesiredDateRule::default().utc_offset_hours,
        allow_hyphen_values = true
    )]
    pub utc_offset_hours: i32,
}

impl Default for Settings {
    fn default() -> Self {
        let batch = BatchOptions::default();
        let rule = DesiredDateRule::default();

        Settings {
            app_key: None,
            user_token: None,
            base_url: BASE_URL.to_string(),
            timeout_secs: TIMEOUT_SECS,
            batch_size: batch.batch_size,
            inter_batch_delay_ms: batch.inter_batch_delay_ms,
            max_retries: batch.max_retries,
            retry_interval_ms: batch.retry_interval_ms,
            desired_hour: rule.hour,
            utc_offset_hours: rule.utc_offset_hours,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(RunrunError::Config("base url is required".into()));
        }
        if self.batch_size == 0 {
            return Err(RunrunError::Config("batch size must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(RunrunError::Config("timeout must be at least 1 second".into()));
        }
        self.desired_date_rule().validate()
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch_size,
            inter_batch_delay_ms: self.inter_batch_delay_ms,
            max_retries: self.max_retries,
            retry_interval_ms: self.retry_interval_ms,
        }
    }

    pub fn desired_date_rule(&self) -> DesiredDateRule {
        DesiredDateRule {
            hour: self.desired_hour,
            utc_offset_hours: self.utc_offset_hours,
        }
    }

    /// Explicit values win over configured ones; blanks count as absent.
    pub fn credentials(&self, app_key: Option<&str>, user_token: Option<&str>) -> Result<Credentials> {
        let pick = |explicit: Option<&str>, configured: &Option<String>| {
            explicit
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .or_else(|| configured.clone().filter(|s| !s.trim().is_empty()))
        };

        let app_key = pick(app_key, &self.app_key)
            .ok_or_else(|| RunrunError::Config("app_key is required".into()))?;
        let user_token = pick(user_token, &self.user_token)
            .ok_or_else(|| RunrunError::Config("user_token is required".into()))?;

        Ok(Credentials { app_key, user_token })
    }

    pub fn client(&self, creds: &Credentials) -> Result<RunrunitClient> {
        RunrunitClient::with_base_url(creds, &self.base_url, Duration::from_secs(self.timeout_secs))
    }
}
