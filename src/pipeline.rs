use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::cache::GeocodeCache;
use crate::config::AppConfig;
use crate::db::{bootstrap, DatabaseContext};
use crate::errors::{AppError, AppResult, Stage};
use crate::extract::Extractor;
use crate::geocode::{CityResolver, GeocoderService};
use crate::load::load;
use crate::queries::station_stats;
use crate::stations::OperatorClass;
use crate::transform::{TransformStats, Transformer};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub extracted: usize,
    pub skipped_records: usize,
    pub pages: usize,
    pub transformed: usize,
    pub loaded: usize,
    pub stored_total: i64,
    pub offline: usize,
    pub online: usize,
    pub tesla: usize,
    pub cache_entries: usize,
    pub database_path: PathBuf,
    pub cache_path: PathBuf,
    pub transform: TransformStats,
}

/// Extract, transform and load once. The first fatal error aborts the run
/// and is tagged with the stage it came from.
pub async fn run_etl(config: &AppConfig, page_limit: Option<usize>) -> AppResult<RunSummary> {
    let startup = |err: AppError| err.in_stage(Stage::Startup);

    let DatabaseContext {
        mut connection,
        path: database_path,
    } = bootstrap(&config.database_path).map_err(startup)?;
    let cache = GeocodeCache::load(&config.cache_path, config.cache_flush_every).map_err(startup)?;
    let geocoder = GeocoderService::new(config).map_err(startup)?;
    let mut extractor = Extractor::new(config).map_err(startup)?;

    info!(target: "pipeline", ?page_limit, "step 1: extracting stations");
    let records = extractor
        .extract(page_limit.or(config.max_pages))
        .await
        .map_err(|err| err.in_stage(Stage::Extract))?;
    let extract_stats = extractor.stats().clone();
    let extracted = records.len();

    info!(target: "pipeline", extracted, "step 2: transforming stations");
    let resolver = CityResolver::new(cache, geocoder, config.geocode_min_interval());
    let mut transformer = Transformer::new(resolver, config.offline_threshold_days);
    let output = transformer
        .transform(records)
        .await
        .map_err(|err| err.in_stage(Stage::Transform))?;

    info!(
        target: "pipeline",
        transformed = output.stations.len(),
        "step 3: loading stations"
    );
    let loaded = load(&output.stations, &mut connection).map_err(|err| err.in_stage(Stage::Load))?;
    let stored_total = station_stats(&connection)
        .map_err(|err| err.in_stage(Stage::Load))?
        .total;

    let offline = output.stations.iter().filter(|s| s.is_offline).count();
    let tesla = output
        .stations
        .iter()
        .filter(|s| s.operator_class == OperatorClass::Tesla)
        .count();
    let summary = RunSummary {
        extracted,
        skipped_records: extract_stats.skipped,
        pages: extract_stats.pages,
        transformed: output.stations.len(),
        loaded,
        stored_total,
        offline,
        online: output.stations.len() - offline,
        tesla,
        cache_entries: transformer.resolver().cache().len(),
        database_path,
        cache_path: config.cache_path.clone(),
        transform: output.stats,
    };
    info!(
        target: "pipeline",
        loaded = summary.loaded,
        stored_total = summary.stored_total,
        "etl run complete"
    );
    Ok(summary)
}
