mod alerts;
mod cache;
mod config;
mod db;
mod errors;
mod extract;
mod geocode;
mod health;
mod load;
mod pipeline;
mod queries;
mod stations;
mod transform;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use alerts::{check_offline, AlertReport};
pub use cache::{cache_key, GeocodeCache};
pub use config::{AppConfig, PublicAppConfig};
pub use db::{bootstrap, open_existing, DatabaseContext};
pub use errors::{AppError, AppResult, Stage};
pub use extract::{ExtractStats, Extractor};
pub use geocode::{
    CityResolution, CityResolver, GeocoderService, NominatimClient, ResolutionSource,
    ResolverStats, ReverseGeocoder,
};
pub use health::{health_report, CheckStatus, HealthCheck, HealthReport};
pub use load::load;
pub use pipeline::{run_etl, RunSummary};
pub use queries::{all_stations, offline_stations, station_stats, CityCount, StationStats};
pub use stations::{
    NormalizedStation, OperatorClass, StationRecord, StoredStation, UNKNOWN_CITY,
    UNKNOWN_OPERATOR,
};
pub use transform::{parse_timestamp, TransformOutput, TransformStats, Transformer};

pub fn init_tracing(verbose: bool) {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let default_filter = if verbose {
            "debug,ev_station_etl=trace"
        } else {
            "info,ev_station_etl=debug"
        };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
