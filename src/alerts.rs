use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::AppResult;
use crate::queries::{all_stations, offline_stations};
use crate::stations::StoredStation;

#[derive(Debug, Clone, Serialize)]
pub struct AlertReport {
    pub total: usize,
    pub offline: usize,
    pub offline_pct: f64,
    pub threshold_pct: f64,
    pub breached: bool,
    pub offline_stations: Vec<StoredStation>,
}

/// One-shot health check of the stored network: breached when the offline
/// share is strictly above `threshold_pct`.
pub fn check_offline(connection: &Connection, threshold_pct: f64) -> AppResult<AlertReport> {
    let total = all_stations(connection)?.len();
    let offline_stations = offline_stations(connection)?;
    let offline = offline_stations.len();
    let offline_pct = if total == 0 {
        0.0
    } else {
        offline as f64 / total as f64 * 100.0
    };
    let breached = offline_pct > threshold_pct;

    if breached {
        warn!(
            target: "alerts",
            offline,
            total,
            offline_pct,
            threshold_pct,
            "offline share above threshold"
        );
    } else {
        info!(target: "alerts", offline, total, offline_pct, "network healthy");
    }

    Ok(AlertReport {
        total,
        offline,
        offline_pct,
        threshold_pct,
        breached,
        offline_stations,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::params;
    use tempfile::tempdir;

    use super::*;
    use crate::db::bootstrap;

    fn seed(conn: &Connection, total: i64, offline: i64) {
        for id in 1..=total {
            conn.execute(
                "INSERT INTO stations (id, name, operator_clean, city, is_offline, days_since_update)
                 VALUES (?1, 'S', 'Other', 'Beijing', ?2, ?3)",
                params![id, id <= offline, if id <= offline { 120 } else { 3 }],
            )
            .unwrap();
        }
    }

    #[test]
    fn flags_share_above_threshold() {
        let dir = tempdir().unwrap();
        let conn = bootstrap(dir.path().join("alerts.db")).unwrap().connection;
        seed(&conn, 10, 2);

        let report = check_offline(&conn, 10.0).unwrap();
        assert!(report.breached);
        assert_eq!(report.offline, 2);
        assert!((report.offline_pct - 20.0).abs() < f64::EPSILON);
        assert_eq!(report.offline_stations.len(), 2);
    }

    #[test]
    fn exactly_at_threshold_is_healthy() {
        let dir = tempdir().unwrap();
        let conn = bootstrap(dir.path().join("alerts.db")).unwrap().connection;
        seed(&conn, 10, 1);

        let report = check_offline(&conn, 10.0).unwrap();
        assert!(!report.breached);
    }

    #[test]
    fn empty_store_is_healthy() {
        let dir = tempdir().unwrap();
        let conn = bootstrap(dir.path().join("alerts.db")).unwrap().connection;
        let report = check_offline(&conn, 10.0).unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.offline_pct, 0.0);
        assert!(!report.breached);
    }
}
