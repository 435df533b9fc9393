use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, Result};

pub const API_URL: &str = "https://api.mercadolibre.com";

pub const DEFAULT_TOKEN_FILE: &str = "ml_tokens.json";
pub const DEFAULT_DB_URL: &str = "sqlite://./data/marketplace_analytics.db";

/// Page size used by the item-id search endpoint.
pub const ITEMS_PAGE_SIZE: usize = 100;

/// Length of the client-side rate window (seconds).
pub const RATE_WINDOW_SECS: u64 = 60;

/// Tokens are treated as stale this many seconds before nominal expiry.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 300;

/// Nominal lifetime assumed for the static fallback token.
pub const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 21_600;

/// Civil timezone used for display timestamps on enriched orders.
pub const DISPLAY_TZ: chrono_tz::Tz = chrono_tz::America::Sao_Paulo;

/// Process configuration sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    /// Per-request timeout (API_TIMEOUT)
    pub timeout_secs: u64,
    /// Calls allowed per rolling minute (RATE_LIMIT)
    pub rate_limit: u32,
    pub token_file: String,
    /// Static tokens used when no token file exists (ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRES)
    pub fallback_access: Option<String>,
    pub fallback_refresh: Option<String>,
    pub fallback_expires: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_url: API_URL.to_string(),
            timeout_secs: 30,
            rate_limit: 100,
            token_file: DEFAULT_TOKEN_FILE.to_string(),
            fallback_access: None,
            fallback_refresh: None,
            fallback_expires: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        Ok(Self {
            client_id: std::env::var("ML_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("ML_CLIENT_SECRET").unwrap_or_default(),
            api_url: std::env::var("ML_API_URL").unwrap_or(defaults.api_url),
            timeout_secs: std::env::var("API_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .map_err(|_| AppError::Config("API_TIMEOUT must be a whole number of seconds".to_string()))?,
            rate_limit: std::env::var("RATE_LIMIT")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<u32>()
                .map_err(|_| AppError::Config("RATE_LIMIT must be a positive integer".to_string()))?,
            token_file: std::env::var("TOKEN_FILE").unwrap_or(defaults.token_file),
            fallback_access: non_empty_var("ACCESS_TOKEN"),
            fallback_refresh: non_empty_var("REFRESH_TOKEN"),
            fallback_expires: non_empty_var("TOKEN_EXPIRES"),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Run-level settings for the ETL pipeline, optionally loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub db_url: String,
    /// None = every listed item
    pub max_items_per_seller: Option<usize>,
    /// None = every order the API returns
    pub max_orders_per_seller: Option<usize>,
    /// Page size for the order search endpoint
    pub api_pagination_limit: usize,
    pub orders_date_from: Option<String>,
    pub orders_date_to: Option<String>,
    pub include_descriptions: bool,
    pub include_reviews: bool,
    pub default_sellers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_string(),
            max_items_per_seller: None,
            max_orders_per_seller: None,
            api_pagination_limit: 50,
            orders_date_from: None,
            orders_date_to: None,
            include_descriptions: true,
            include_reviews: false,
            default_sellers: vec!["354140329".to_string()],
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads `path`, falling back to defaults when the file is unreadable.
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Failed to load pipeline config {}: {e}. Using defaults.", path.display());
                Self::default()
            }
        }
    }
}
