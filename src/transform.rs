use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::errors::AppResult;
use crate::geocode::{CityResolver, ResolverStats};
use crate::stations::{is_offline, NormalizedStation, OperatorClass, StationRecord};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    pub input_rows: usize,
    pub duplicates_dropped: usize,
    pub output_rows: usize,
    pub offline: usize,
    pub undated: usize,
    pub geocoding: ResolverStats,
}

#[derive(Debug)]
pub struct TransformOutput {
    pub stations: Vec<NormalizedStation>,
    pub stats: TransformStats,
}

pub struct Transformer {
    resolver: CityResolver,
    offline_threshold_days: i64,
}

impl Transformer {
    pub fn new(resolver: CityResolver, offline_threshold_days: i64) -> Self {
        Self {
            resolver,
            offline_threshold_days,
        }
    }

    pub async fn transform(&mut self, records: Vec<StationRecord>) -> AppResult<TransformOutput> {
        self.transform_at(records, Utc::now()).await
    }

    /// Staleness is measured against `now` for the whole pass.
    pub async fn transform_at(
        &mut self,
        records: Vec<StationRecord>,
        now: DateTime<Utc>,
    ) -> AppResult<TransformOutput> {
        let input_rows = records.len();
        let geocoding_before = self.resolver.stats().clone();
        let records = dedupe(records);
        let mut stats = TransformStats {
            input_rows,
            duplicates_dropped: input_rows - records.len(),
            ..TransformStats::default()
        };
        info!(
            target: "transform",
            input_rows,
            unique = records.len(),
            "starting transformation"
        );

        let mut stations = Vec::with_capacity(records.len());
        for record in records {
            let operator_class = OperatorClass::classify(&record.operator);
            let city = self
                .resolver
                .resolve_city(record.latitude, record.longitude)
                .await
                .city;
            let last_updated_at = record.last_updated.as_deref().and_then(parse_timestamp);
            let days_since_update = last_updated_at.map(|ts| days_between(ts, now));
            let offline = is_offline(days_since_update, self.offline_threshold_days);

            if offline {
                stats.offline += 1;
            }
            if days_since_update.is_none() {
                stats.undated += 1;
            }

            stations.push(NormalizedStation {
                id: record.id,
                name: record.name,
                latitude: record.latitude,
                longitude: record.longitude,
                address: record.address,
                operator: record.operator,
                last_updated: record.last_updated,
                operator_class,
                city,
                last_updated_at,
                days_since_update,
                is_offline: offline,
            });
        }

        self.resolver.flush()?;
        stats.output_rows = stations.len();
        stats.geocoding = self.resolver.stats().since(&geocoding_before);
        info!(
            target: "transform",
            rows = stats.output_rows,
            offline = stats.offline,
            cache_entries = self.resolver.cache().len(),
            "transformation complete"
        );

        Ok(TransformOutput { stations, stats })
    }

    pub fn resolver(&self) -> &CityResolver {
        &self.resolver
    }
}

fn dedupe(records: Vec<StationRecord>) -> Vec<StationRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.id))
        .collect()
}

/// Lenient timestamp parsing; anything unrecognized is treated as undated.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn days_between(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_days().max(0)
}
