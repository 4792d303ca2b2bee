//! Environment-driven configuration, loaded once at startup.

use anyhow::{Context, Result, bail};
use std::env;
use std::path::PathBuf;

const DEFAULT_FMP_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    /// Markets tracked by the pipeline, e.g. `^NDX,^GSPC`.
    pub markets: Vec<String>,
    pub fmp_base_url: String,
    pub fmp_api_key: String,
    /// Replay a recorded file instead of polling the vendor.
    pub backtest: bool,
    pub backtest_file: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Loads and validates the environment configuration.
    pub fn from_env() -> Result<Self> {
        let config = Self::from_env_unchecked();
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Loads the environment without validating, so callers can fold in
    /// overrides (CLI flags) before the final check.
    pub fn from_env_unchecked() -> Self {
        Self {
            markets: parse_markets(&env::var("MARKETS").unwrap_or_default()),
            fmp_base_url: env::var("FMP_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_FMP_BASE_URL.to_string()),
            fmp_api_key: env::var("FMP_API_KEY").unwrap_or_default(),
            backtest: env::var("BACKTEST").map(|v| parse_bool(&v)).unwrap_or(false),
            backtest_file: env::var("BACKTEST_FILE").ok().map(PathBuf::from),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.markets.is_empty() {
            bail!("MARKETS must name at least one market");
        }
        if self.backtest {
            if self.backtest_file.is_none() {
                bail!("BACKTEST requires BACKTEST_FILE");
            }
        } else if self.fmp_api_key.is_empty() {
            bail!("FMP_API_KEY is required outside backtest mode");
        }
        Ok(())
    }
}

pub fn parse_markets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
