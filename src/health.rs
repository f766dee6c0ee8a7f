use std::error::Error;
use std::iter::successors;

use serde::Serialize;

use crate::cache::GeocodeCache;
use crate::config::{AppConfig, PublicAppConfig};
use crate::db::open_existing;
use crate::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub version: &'static str,
    pub checks: Vec<HealthCheck>,
    pub config: PublicAppConfig,
}

pub fn health_report(config: &AppConfig) -> HealthReport {
    let checks = vec![
        database_check(config),
        cache_check(config),
        credential_check(config),
    ];
    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    HealthReport {
        healthy,
        version: env!("CARGO_PKG_VERSION"),
        checks,
        config: config.public_profile(),
    }
}

fn database_check(config: &AppConfig) -> HealthCheck {
    if !config.database_path.exists() {
        return HealthCheck::new(
            "database",
            CheckStatus::Warn,
            format!("{} not created yet", config.database_path.display()),
        );
    }
    match count_stations(config) {
        Ok(count) => HealthCheck::new("database", CheckStatus::Ok, format!("{count} stations")),
        Err(err) => HealthCheck::new("database", CheckStatus::Fail, describe(&err)),
    }
}

fn count_stations(config: &AppConfig) -> AppResult<i64> {
    let connection = open_existing(&config.database_path)?;
    Ok(connection.query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?)
}

fn cache_check(config: &AppConfig) -> HealthCheck {
    match GeocodeCache::load(&config.cache_path, config.cache_flush_every) {
        Ok(cache) if cache.path().exists() => HealthCheck::new(
            "geocode_cache",
            CheckStatus::Ok,
            format!("{} entries", cache.len()),
        ),
        Ok(_) => HealthCheck::new(
            "geocode_cache",
            CheckStatus::Warn,
            format!("{} not created yet", config.cache_path.display()),
        ),
        Err(err) => HealthCheck::new("geocode_cache", CheckStatus::Fail, describe(&err)),
    }
}

fn describe(err: &(dyn Error + 'static)) -> String {
    successors(Some(err), |&err| err.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

fn credential_check(config: &AppConfig) -> HealthCheck {
    if config.listing_api_key.is_some() {
        HealthCheck::new("listing_credential", CheckStatus::Ok, "configured")
    } else {
        HealthCheck::new("listing_credential", CheckStatus::Fail, "OCM_API_KEY is not set")
    }
}
