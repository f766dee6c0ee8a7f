use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::stations::{StationRecord, UNKNOWN_OPERATOR};

const BODY_SNIPPET_LEN: usize = 200;
const UNKNOWN_ID: &str = "<unknown>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub pages: usize,
    pub records: usize,
    pub skipped: usize,
}

pub struct Extractor {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    country_code: String,
    page_size: usize,
    page_delay: Duration,
    strict_mapping: bool,
    stats: ExtractStats,
}

impl Extractor {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config
            .listing_api_key
            .clone()
            .ok_or_else(|| AppError::Config("OCM_API_KEY is required to fetch stations".into()))?;
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.listing_endpoint.clone(),
            api_key,
            country_code: config.country_code.clone(),
            page_size: config.page_size.max(1),
            page_delay: config.page_delay(),
            strict_mapping: config.strict_mapping,
            stats: ExtractStats::default(),
        })
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    /// Walks every page until an empty page or `page_limit`. Any failed page
    /// discards everything gathered so far.
    pub async fn extract(&mut self, page_limit: Option<usize>) -> AppResult<Vec<StationRecord>> {
        self.stats = ExtractStats::default();
        let mut stations = Vec::new();
        let mut offset = 0_usize;
        let mut page = 0_usize;

        loop {
            if page > 0 {
                sleep(self.page_delay).await;
            }
            page += 1;
            info!(target: "extract", page, offset, "fetching listing page");

            let fetched = self.fetch_page(offset).await?;
            self.stats.pages = page;
            let Some(items) = fetched else {
                info!(target: "extract", page, "listing returned an empty body; stopping");
                break;
            };
            if items.is_empty() {
                info!(target: "extract", page, "reached the end of the listing");
                break;
            }

            let received = items.len();
            for item in items {
                match RawStation::from_value(item).and_then(RawStation::into_record) {
                    Ok(record) => stations.push(record),
                    Err(err) if !self.strict_mapping => {
                        warn!(target: "extract", error = %err, "skipping incomplete station");
                        self.stats.skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            info!(target: "extract", page, received, total = stations.len(), "page mapped");

            offset += self.page_size;
            if page_limit.is_some_and(|limit| page >= limit) {
                warn!(target: "extract", page, "stopping early at the page limit");
                break;
            }
        }

        self.stats.records = stations.len();
        Ok(stations)
    }

    async fn fetch_page(&self, offset: usize) -> AppResult<Option<Vec<Value>>> {
        let page_size = self.page_size.to_string();
        let skip = offset.to_string();
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("output", "json"),
                ("countrycode", self.country_code.as_str()),
                ("maxresults", page_size.as_str()),
                ("compact", "true"),
                ("verbose", "false"),
                ("skip", skip.as_str()),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "status {status} at offset {offset}: {}",
                snippet(&body)
            )));
        }
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str::<Vec<Value>>(&body)
            .map(Some)
            .map_err(|err| AppError::Transport(format!("malformed page at offset {offset}: {err}")))
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Transport(format!("request timed out: {err}"))
    } else {
        AppError::Transport(err.to_string())
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

// Wraps a present key so that `null` and a missing key stay distinguishable.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStation {
    #[serde(rename = "ID")]
    id: Option<i64>,
    address_info: Option<RawAddressInfo>,
    operator_info: Option<RawOperatorInfo>,
    date_last_confirmed: Option<String>,
    date_last_status_update: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAddressInfo {
    title: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    address_line1: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawOperatorInfo {
    title: Option<String>,
}

impl RawStation {
    /// Records are decoded one at a time so a badly typed record stays a
    /// mapping failure of that record alone.
    fn from_value(value: Value) -> AppResult<Self> {
        let id = value
            .get("ID")
            .and_then(Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNKNOWN_ID.to_string());
        serde_json::from_value(value).map_err(|err| AppError::Mapping {
            id,
            field: "record",
            reason: err.to_string(),
        })
    }

    fn into_record(self) -> AppResult<StationRecord> {
        let id = self
            .id
            .ok_or_else(|| AppError::missing_field(UNKNOWN_ID, "ID"))?;
        let missing = |field: &'static str| AppError::missing_field(id, field);

        let info = self.address_info.ok_or_else(|| missing("AddressInfo"))?;
        let name = info.title.ok_or_else(|| missing("AddressInfo.Title"))?;
        let latitude = info.latitude.ok_or_else(|| missing("AddressInfo.Latitude"))?;
        let longitude = info
            .longitude
            .ok_or_else(|| missing("AddressInfo.Longitude"))?;
        let address = info
            .address_line1
            .ok_or_else(|| missing("AddressInfo.AddressLine1"))?
            .unwrap_or_default();

        let operator = self
            .operator_info
            .and_then(|op| op.title)
            .unwrap_or_else(|| UNKNOWN_OPERATOR.to_string());
        let last_updated = self
            .date_last_confirmed
            .filter(|value| !value.trim().is_empty())
            .or(self.date_last_status_update)
            .filter(|value| !value.trim().is_empty());

        Ok(StationRecord {
            id,
            name,
            latitude,
            longitude,
            address,
            operator,
            last_updated,
        })
    }
}
