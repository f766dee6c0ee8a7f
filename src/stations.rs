use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_CITY: &str = "Unknown";
pub const UNKNOWN_OPERATOR: &str = "Unknown";

/// A station as mapped from one listing page, before any cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub operator: String,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorClass {
    Tesla,
    #[serde(rename = "BP")]
    Bp,
    Shell,
    Other,
}

impl OperatorClass {
    const PRIORITY: [(&'static str, OperatorClass); 3] = [
        ("tesla", OperatorClass::Tesla),
        ("bp", OperatorClass::Bp),
        ("shell", OperatorClass::Shell),
    ];

    /// First case-insensitive substring hit in Tesla, BP, Shell order.
    pub fn classify(operator: &str) -> Self {
        let lowered = operator.to_lowercase();
        Self::PRIORITY
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .map(|(_, class)| *class)
            .unwrap_or(OperatorClass::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorClass::Tesla => "Tesla",
            OperatorClass::Bp => "BP",
            OperatorClass::Shell => "Shell",
            OperatorClass::Other => "Other",
        }
    }
}

impl fmt::Display for OperatorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedStation {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub operator: String,
    pub last_updated: Option<String>,
    pub operator_class: OperatorClass,
    pub city: String,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub days_since_update: Option<i64>,
    pub is_offline: bool,
}

/// A row of the `stations` table as the read side sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredStation {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub operator_clean: String,
    pub city: String,
    pub is_offline: bool,
    pub days_since_update: Option<i64>,
    pub last_updated: Option<String>,
}

pub fn is_offline(days_since_update: Option<i64>, threshold_days: i64) -> bool {
    days_since_update.is_some_and(|days| days > threshold_days)
}
