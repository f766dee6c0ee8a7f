use std::collections::BTreeMap;

use rusqlite::{Connection, Row};
use serde::Serialize;

use crate::errors::AppResult;
use crate::stations::{StoredStation, UNKNOWN_CITY};

const TOP_CITIES: i64 = 10;
const STATION_COLUMNS: &str = "id, name, latitude, longitude, address, operator_clean, city, \
     is_offline, days_since_update, last_updated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityCount {
    pub city: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationStats {
    pub total: i64,
    pub offline: i64,
    pub online: i64,
    pub by_operator: BTreeMap<String, i64>,
    pub by_city: Vec<CityCount>,
}

pub fn all_stations(connection: &Connection) -> AppResult<Vec<StoredStation>> {
    select_stations(connection, "")
}

pub fn offline_stations(connection: &Connection) -> AppResult<Vec<StoredStation>> {
    select_stations(connection, "WHERE is_offline = 1")
}

pub fn station_stats(connection: &Connection) -> AppResult<StationStats> {
    let count = |sql: &str| -> AppResult<i64> {
        Ok(connection.query_row(sql, [], |row| row.get(0))?)
    };
    let total = count("SELECT COUNT(*) FROM stations")?;
    let offline = count("SELECT COUNT(*) FROM stations WHERE is_offline = 1")?;
    let online = count("SELECT COUNT(*) FROM stations WHERE is_offline = 0")?;

    let by_operator = {
        let mut stmt = connection.prepare(
            "SELECT operator_clean, COUNT(*) FROM stations GROUP BY operator_clean",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let operator: Option<String> = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((operator.unwrap_or_default(), count))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        rows
    };

    let by_city = {
        let mut stmt = connection.prepare(
            "SELECT city, COUNT(*) AS count FROM stations
            WHERE city IS NOT NULL AND city != ?1
            GROUP BY city
            ORDER BY count DESC, city ASC
            LIMIT ?2",
        )?;
        let rows = stmt
            .query_map((UNKNOWN_CITY, TOP_CITIES), |row| {
                Ok(CityCount {
                    city: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    Ok(StationStats {
        total,
        offline,
        online,
        by_operator,
        by_city,
    })
}

fn select_stations(connection: &Connection, filter: &str) -> AppResult<Vec<StoredStation>> {
    let sql = format!("SELECT {STATION_COLUMNS} FROM stations {filter} ORDER BY id ASC");
    let mut stmt = connection.prepare(&sql)?;
    let rows = stmt
        .query_map([], station_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn station_from_row(row: &Row<'_>) -> rusqlite::Result<StoredStation> {
    Ok(StoredStation {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        address: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        operator_clean: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        city: row
            .get::<_, Option<String>>(6)?
            .unwrap_or_else(|| UNKNOWN_CITY.to_string()),
        is_offline: row.get(7)?,
        days_since_update: row.get(8)?,
        last_updated: row.get(9)?,
    })
}
