use chrono::{Duration, Utc};
use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

use ev_station_etl::{
    all_stations, check_offline, open_existing, run_etl, station_stats, AppConfig, AppError,
    GeocodeCache, Stage,
};

fn station(id: i64, lat: f64, lon: f64, operator: &str, days_old: i64) -> Value {
    json!({
        "ID": id,
        "AddressInfo": {
            "Title": format!("Charger {id}"),
            "Latitude": lat,
            "Longitude": lon,
            "AddressLine1": format!("{id} Test Road")
        },
        "OperatorInfo": { "Title": operator },
        "DateLastConfirmed": (Utc::now() - Duration::days(days_old)).to_rfc3339(),
    })
}

fn config_for(listing: &Server, geocoder: &Server, dir: &TempDir) -> AppConfig {
    AppConfig {
        listing_endpoint: listing.url_str("/v3/poi/"),
        listing_api_key: Some(SecretString::from("integration-key".to_string())),
        page_delay_ms: 1,
        geocoder_endpoint: geocoder.url_str("/reverse"),
        geocode_timeout_secs: 2,
        geocode_min_interval_ms: 0,
        cache_path: dir.path().join("geocoding_cache.json"),
        database_path: dir.path().join("charging_stations.db"),
        ..AppConfig::default()
    }
}

fn expect_listing(server: &Server, runs: usize) {
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/v3/poi/"),
            request::query(url_decoded(contains(("skip", "0")))),
        ])
        .times(runs)
        .respond_with(json_encoded(json!([
            station(1, 31.2304, 121.4737, "Tesla Supercharger", 200),
            station(2, 39.9042, 116.4074, "Unknown Co", 5),
            station(1, 0.0, 0.0, "Duplicate", 1),
        ]))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/v3/poi/"),
            request::query(url_decoded(contains(("skip", "500")))),
        ])
        .times(runs)
        .respond_with(json_encoded(json!([]))),
    );
}

#[tokio::test]
async fn full_run_loads_stations_and_reuses_cache() {
    let listing = Server::run();
    let geocoder = Server::run();
    expect_listing(&listing, 2);

    geocoder.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/reverse"),
            request::query(url_decoded(contains(("lat", "31.2304")))),
        ])
        .times(1)
        .respond_with(json_encoded(json!({ "address": { "city": "Shanghai" } }))),
    );
    geocoder.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/reverse"),
            request::query(url_decoded(contains(("lat", "39.9042")))),
        ])
        .times(1)
        .respond_with(status_code(500)),
    );

    let dir = tempdir().unwrap();
    let config = config_for(&listing, &geocoder, &dir);

    let summary = run_etl(&config, None).await.expect("first run");
    assert_eq!(summary.extracted, 3);
    assert_eq!(summary.transformed, 2);
    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.offline, 1);
    assert_eq!(summary.tesla, 1);
    assert_eq!(summary.transform.duplicates_dropped, 1);
    assert_eq!(summary.transform.geocoding.fallbacks, 1);

    let first_rows = {
        let conn = open_existing(&config.database_path).unwrap();
        all_stations(&conn).unwrap()
    };
    assert_eq!(first_rows.len(), 2);
    assert_eq!(first_rows[0].operator_clean, "Tesla");
    assert_eq!(first_rows[0].city, "Shanghai");
    assert_eq!(first_rows[0].name, "Charger 1");
    assert!(first_rows[0].is_offline);
    assert_eq!(first_rows[1].operator_clean, "Other");
    assert_eq!(first_rows[1].city, "Unknown");
    assert!(!first_rows[1].is_offline);

    let cache = GeocodeCache::load(&config.cache_path, 50).unwrap();
    assert_eq!(cache.get("31.230,121.474"), Some("Shanghai"));
    assert_eq!(cache.get("39.904,116.407"), Some("Unknown"));

    let second = run_etl(&config, None).await.expect("second run");
    assert_eq!(second.transform.geocoding.cache_hits, 2);
    assert_eq!(second.transform.geocoding.lookups, 0);
    assert_eq!(second.stored_total, 2);

    let conn = open_existing(&config.database_path).unwrap();
    let second_rows = all_stations(&conn).unwrap();
    assert_eq!(first_rows.len(), second_rows.len());
    for (a, b) in first_rows.iter().zip(&second_rows) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.city, b.city);
        assert_eq!(a.operator_clean, b.operator_clean);
        assert_eq!(a.is_offline, b.is_offline);
    }

    let stats = station_stats(&conn).unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.offline, 1);
    assert_eq!(stats.by_city.len(), 1);
    assert_eq!(stats.by_city[0].city, "Shanghai");

    let report = check_offline(&conn, 10.0).unwrap();
    assert!(report.breached);
    assert_eq!(report.offline_stations[0].id, 1);
}

#[tokio::test]
async fn corrupt_cache_aborts_before_extraction() {
    let listing = Server::run();
    let geocoder = Server::run();
    let dir = tempdir().unwrap();
    let config = config_for(&listing, &geocoder, &dir);
    std::fs::write(&config.cache_path, "{ not json").unwrap();

    let err = run_etl(&config, None).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Startup));
    assert!(err.to_string().contains("startup stage failed"));
    assert_eq!(
        std::fs::read_to_string(&config.cache_path).unwrap(),
        "{ not json"
    );
}

#[tokio::test]
async fn listing_failure_leaves_store_untouched() {
    let listing = Server::run();
    let geocoder = Server::run();
    listing.expect(
        Expectation::matching(request::method_path("GET", "/v3/poi/"))
            .times(1)
            .respond_with(status_code(503)),
    );

    let dir = tempdir().unwrap();
    let config = config_for(&listing, &geocoder, &dir);
    let err = run_etl(&config, None).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Extract));
    match err {
        AppError::Stage { source, .. } => {
            assert!(matches!(*source, AppError::Transport(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let conn = open_existing(&config.database_path).unwrap();
    assert!(all_stations(&conn).unwrap().is_empty());
    assert!(!config.cache_path.exists());
}

#[tokio::test]
async fn cache_in_missing_directory_is_created_on_flush() {
    let listing = Server::run();
    let geocoder = Server::run();
    expect_listing(&listing, 1);
    geocoder.expect(
        Expectation::matching(request::method_path("GET", "/reverse"))
            .times(2)
            .respond_with(json_encoded(json!({ "address": { "town": "Suzhou" } }))),
    );

    let dir = tempdir().unwrap();
    let mut config = config_for(&listing, &geocoder, &dir);
    config.cache_path = dir.path().join("cachedir").join("geocoding_cache.json");

    let summary = run_etl(&config, None).await.expect("run with fresh cache dir");
    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.cache_entries, 2);

    let cache = GeocodeCache::load(&config.cache_path, 50).unwrap();
    assert_eq!(cache.get("31.230,121.474"), Some("Suzhou"));
}
