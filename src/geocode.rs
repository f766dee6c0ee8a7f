use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::cache::{cache_key, GeocodeCache};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::stations::UNKNOWN_CITY;

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// `Ok(None)` means the service answered but reported no locality.
    async fn locality(&self, latitude: f64, longitude: f64) -> AppResult<Option<String>>;
}

#[derive(Clone)]
pub struct GeocoderService {
    inner: Arc<dyn ReverseGeocoder>,
}

impl GeocoderService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            inner: Arc::new(NominatimClient::new(config)?),
        })
    }

    pub fn from_lookup(lookup: Arc<dyn ReverseGeocoder>) -> Self {
        Self { inner: lookup }
    }

    pub async fn locality(&self, latitude: f64, longitude: f64) -> AppResult<Option<String>> {
        self.inner.locality(latitude, longitude).await
    }
}

pub struct NominatimClient {
    http: reqwest::Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.geocode_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.geocoder_endpoint.clone(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimClient {
    async fn locality(&self, latitude: f64, longitude: f64) -> AppResult<Option<String>> {
        #[derive(Deserialize)]
        struct Response {
            address: Option<Address>,
        }

        #[derive(Deserialize)]
        struct Address {
            city: Option<String>,
            town: Option<String>,
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("accept-language", "en".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        let address = parsed
            .address
            .ok_or_else(|| AppError::Geocode("response missing address".into()))?;
        Ok(address
            .city
            .or(address.town)
            .filter(|value| !value.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    Cache,
    Lookup,
    Fallback,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityResolution {
    pub city: String,
    pub source: ResolutionSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub cache_hits: usize,
    pub lookups: usize,
    pub fallbacks: usize,
    pub skipped: usize,
}

impl ResolverStats {
    /// Counts accumulated since `earlier` was taken.
    pub fn since(&self, earlier: &ResolverStats) -> ResolverStats {
        ResolverStats {
            cache_hits: self.cache_hits - earlier.cache_hits,
            lookups: self.lookups - earlier.lookups,
            fallbacks: self.fallbacks - earlier.fallbacks,
            skipped: self.skipped - earlier.skipped,
        }
    }
}

struct RateLimiter {
    min_interval: Duration,
    last_tick: Option<Instant>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: None,
        }
    }

    async fn wait(&mut self) {
        if let Some(prev) = self.last_tick {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        self.last_tick = Some(Instant::now());
    }
}

/// Resolves coordinates to a city name, cache first.
pub struct CityResolver {
    cache: GeocodeCache,
    geocoder: GeocoderService,
    rate_limiter: RateLimiter,
    stats: ResolverStats,
}

impl CityResolver {
    pub fn new(cache: GeocodeCache, geocoder: GeocoderService, min_interval: Duration) -> Self {
        Self {
            cache,
            geocoder,
            rate_limiter: RateLimiter::new(min_interval),
            stats: ResolverStats::default(),
        }
    }

    pub async fn resolve_city(&mut self, latitude: f64, longitude: f64) -> CityResolution {
        if !valid_coordinates(latitude, longitude) {
            self.stats.skipped += 1;
            return CityResolution {
                city: UNKNOWN_CITY.to_string(),
                source: ResolutionSource::Skipped,
            };
        }

        let key = cache_key(latitude, longitude);
        if let Some(city) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            return CityResolution {
                city: city.to_string(),
                source: ResolutionSource::Cache,
            };
        }

        self.rate_limiter.wait().await;
        let resolution = match self.geocoder.locality(latitude, longitude).await {
            Ok(Some(city)) => {
                self.stats.lookups += 1;
                CityResolution {
                    city,
                    source: ResolutionSource::Lookup,
                }
            }
            Ok(None) => {
                self.stats.lookups += 1;
                CityResolution {
                    city: UNKNOWN_CITY.to_string(),
                    source: ResolutionSource::Lookup,
                }
            }
            Err(err) => {
                self.stats.fallbacks += 1;
                debug!(
                    target: "geocode",
                    %key,
                    error = %err,
                    "reverse lookup failed; caching Unknown"
                );
                CityResolution {
                    city: UNKNOWN_CITY.to_string(),
                    source: ResolutionSource::Fallback,
                }
            }
        };

        trace!(target: "geocode", %key, city = %resolution.city, "resolved");
        if self.cache.insert(key, resolution.city.clone()) {
            if let Err(err) = self.cache.flush() {
                warn!(
                    target: "geocode",
                    ?err,
                    pending = self.cache.pending(),
                    "periodic cache flush failed; will retry"
                );
            }
        }
        resolution
    }

    pub fn flush(&mut self) -> AppResult<()> {
        self.cache.flush()
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub fn into_cache(self) -> GeocodeCache {
        self.cache
    }
}

fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Pops scripted answers; once empty, answers with a fixed city.
    pub struct ScriptedGeocoder {
        responses: Mutex<Vec<AppResult<Option<String>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedGeocoder {
        pub fn new(mut responses: Vec<AppResult<Option<String>>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReverseGeocoder for ScriptedGeocoder {
        async fn locality(&self, _latitude: f64, _longitude: f64) -> AppResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(Some("Scripted City".into())))
        }
    }
}
