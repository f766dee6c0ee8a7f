use rusqlite::{params, params_from_iter, Connection};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::stations::NormalizedStation;

// Stays well under SQLITE_MAX_VARIABLE_NUMBER on older builds.
const DELETE_CHUNK: usize = 500;

/// Replaces every row whose id appears in `records`, all or nothing.
pub fn load(records: &[NormalizedStation], connection: &mut Connection) -> AppResult<usize> {
    let loaded = upsert(records, connection).map_err(AppError::Storage)?;
    let total: i64 = connection.query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?;
    info!(target: "load", loaded, total, "stations stored");
    Ok(loaded)
}

fn upsert(records: &[NormalizedStation], connection: &mut Connection) -> rusqlite::Result<usize> {
    let tx = connection.transaction()?;
    let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
    for chunk in ids.chunks(DELETE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        tx.execute(
            &format!("DELETE FROM stations WHERE id IN ({placeholders})"),
            params_from_iter(chunk.iter()),
        )?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stations (
                id, name, latitude, longitude, address, operator_clean,
                city, is_offline, days_since_update, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for record in records {
            stmt.execute(params![
                record.id,
                record.name,
                record.latitude,
                record.longitude,
                record.address,
                record.operator_class.as_str(),
                record.city,
                record.is_offline,
                record.days_since_update,
                record.last_updated_at.map(|ts| ts.to_rfc3339()),
            ])?;
        }
    }
    tx.commit()?;
    Ok(records.len())
}
