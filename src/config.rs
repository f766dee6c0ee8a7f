use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_LISTING_ENDPOINT: &str = "https://api.openchargemap.io/v3/poi/";
const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/reverse";
const DEFAULT_USER_AGENT: &str = concat!("ev-station-etl/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_CACHE_FLUSH_EVERY: usize = 50;
pub const DEFAULT_OFFLINE_THRESHOLD_DAYS: i64 = 90;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listing_endpoint: String,
    pub listing_api_key: Option<SecretString>,
    pub country_code: String,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub max_pages: Option<usize>,
    pub request_timeout_secs: u64,
    pub strict_mapping: bool,
    pub geocoder_endpoint: String,
    pub geocode_timeout_secs: u64,
    pub geocode_min_interval_ms: u64,
    pub user_agent: String,
    pub cache_path: PathBuf,
    pub cache_flush_every: usize,
    pub database_path: PathBuf,
    pub offline_threshold_days: i64,
    pub alert_threshold_pct: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub listing_endpoint: String,
    pub country_code: String,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub max_pages: Option<usize>,
    pub strict_mapping: bool,
    pub geocoder_endpoint: String,
    pub geocode_timeout_secs: u64,
    pub geocode_min_interval_ms: u64,
    pub cache_path: String,
    pub database_path: String,
    pub offline_threshold_days: i64,
    pub alert_threshold_pct: f64,
    pub has_listing_api_key: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listing_endpoint: DEFAULT_LISTING_ENDPOINT.to_string(),
            listing_api_key: None,
            country_code: "CN".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            page_delay_ms: 1_000,
            max_pages: None,
            request_timeout_secs: 30,
            strict_mapping: true,
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocode_timeout_secs: 10,
            geocode_min_interval_ms: 1_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_path: PathBuf::from("geocoding_cache.json"),
            cache_flush_every: DEFAULT_CACHE_FLUSH_EVERY,
            database_path: PathBuf::from("charging_stations.db"),
            offline_threshold_days: DEFAULT_OFFLINE_THRESHOLD_DAYS,
            alert_threshold_pct: 10.0,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            listing_endpoint: env::var("OCM_API_ENDPOINT").unwrap_or(defaults.listing_endpoint),
            listing_api_key: env::var("OCM_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            country_code: env::var("OCM_COUNTRY_CODE")
                .ok()
                .map(|v| v.trim().to_ascii_uppercase())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.country_code),
            page_size: parse_usize("OCM_PAGE_SIZE", defaults.page_size).max(1),
            page_delay_ms: parse_u64("OCM_PAGE_DELAY_MS", defaults.page_delay_ms).max(1),
            max_pages: env::var("ETL_MAX_PAGES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0),
            request_timeout_secs: parse_u64(
                "OCM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            strict_mapping: parse_bool("ETL_STRICT_MAPPING", defaults.strict_mapping),
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .unwrap_or(defaults.geocoder_endpoint),
            geocode_timeout_secs: parse_u64(
                "GEOCODE_TIMEOUT_SECS",
                defaults.geocode_timeout_secs,
            )
            .max(1),
            geocode_min_interval_ms: parse_u64(
                "GEOCODE_MIN_INTERVAL_MS",
                defaults.geocode_min_interval_ms,
            ),
            user_agent: env::var("ETL_USER_AGENT").unwrap_or(defaults.user_agent),
            cache_path: env::var("GEOCODE_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            cache_flush_every: parse_usize("GEOCODE_CACHE_FLUSH_EVERY", defaults.cache_flush_every)
                .max(1),
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            offline_threshold_days: parse_i64(
                "OFFLINE_THRESHOLD_DAYS",
                defaults.offline_threshold_days,
            ),
            alert_threshold_pct: parse_f64("ALERT_THRESHOLD_PCT", defaults.alert_threshold_pct),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            listing_endpoint: self.listing_endpoint.clone(),
            country_code: self.country_code.clone(),
            page_size: self.page_size,
            page_delay_ms: self.page_delay_ms,
            max_pages: self.max_pages,
            strict_mapping: self.strict_mapping,
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            geocode_timeout_secs: self.geocode_timeout_secs,
            geocode_min_interval_ms: self.geocode_min_interval_ms,
            cache_path: self.cache_path.to_string_lossy().to_string(),
            database_path: self.database_path.to_string_lossy().to_string(),
            offline_threshold_days: self.offline_threshold_days,
            alert_threshold_pct: self.alert_threshold_pct,
            has_listing_api_key: self.listing_api_key.is_some(),
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }

    pub fn geocode_min_interval(&self) -> Duration {
        Duration::from_millis(self.geocode_min_interval_ms)
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
