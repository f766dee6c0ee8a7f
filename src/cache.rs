use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

/// Coordinates rounded to three decimals (~100 m).
pub fn cache_key(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.3},{longitude:.3}")
}

/// Durable map of rounded coordinates to resolved city names.
///
/// Entries are only ever added. `flush` replaces the file through a sibling
/// temp file and a rename, so an interrupted write leaves the previous
/// snapshot intact.
#[derive(Debug)]
pub struct GeocodeCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    pending: usize,
    flush_every: usize,
}

impl GeocodeCache {
    pub fn load<P: AsRef<Path>>(path: P, flush_every: usize) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<BTreeMap<String, String>>(&contents)
                .map_err(|source| AppError::CacheCorruption {
                    path: path.clone(),
                    source,
                })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(
                    target: "geocode_cache",
                    path = %path.display(),
                    "no cache file yet; starting empty"
                );
                BTreeMap::new()
            }
            Err(err) => return Err(AppError::Io(err)),
        };

        info!(
            target: "geocode_cache",
            path = %path.display(),
            entries = entries.len(),
            "geocoding cache loaded"
        );

        Ok(Self {
            path,
            entries,
            pending: 0,
            flush_every: flush_every.max(1),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Records a new entry. Returns `true` once enough unflushed entries
    /// have accumulated that the caller should flush.
    pub fn insert(&mut self, key: String, city: String) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, city);
        self.pending += 1;
        self.pending >= self.flush_every
    }

    pub fn flush(&mut self) -> AppResult<()> {
        let payload = serde_json::to_vec(&self.entries)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.tmp_path();
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(
            target: "geocode_cache",
            entries = self.entries.len(),
            flushed = self.pending,
            "geocoding cache persisted"
        );
        self.pending = 0;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut buf = self.path.clone();
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "geocoding_cache.json".into());
        buf.set_file_name(format!("{name}.tmp"));
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rounds_keys_to_three_decimals() {
        assert_eq!(cache_key(31.23456, 121.4737), "31.235,121.474");
        assert_eq!(cache_key(39.9, 116.4), "39.900,116.400");
        assert_eq!(cache_key(31.2304, 121.4731), cache_key(31.2301, 121.4734));
    }

    #[test]
    fn missing_file_is_an_empty_cache() {
        let dir = tempdir().unwrap();
        let cache = GeocodeCache::load(dir.path().join("absent.json"), 50).unwrap();
        assert!(cache.is_empty());
        assert!(!cache.path().exists());
    }

    #[test]
    fn corrupt_file_is_fatal_and_left_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"31.230,121.473\": \"Shanghai\"").unwrap();

        let err = GeocodeCache::load(&path, 50).unwrap_err();
        assert!(matches!(err, AppError::CacheCorruption { .. }));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\"31.230,121.473\": \"Shanghai\""
        );
    }

    #[test]
    fn signals_flush_after_threshold_and_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = GeocodeCache::load(&path, 2).unwrap();

        assert!(!cache.insert("1.000,2.000".into(), "Alpha".into()));
        assert!(!cache.insert("1.000,2.000".into(), "Ignored".into()));
        assert!(cache.insert("3.000,4.000".into(), "Unknown".into()));
        cache.flush().unwrap();
        assert_eq!(cache.pending(), 0);
        assert!(!dir.path().join("cache.json.tmp").exists());

        let reloaded = GeocodeCache::load(&path, 2).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("1.000,2.000"), Some("Alpha"));
        assert_eq!(reloaded.get("3.000,4.000"), Some("Unknown"));
    }

    #[test]
    fn flush_creates_missing_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache").join("geocoding_cache.json");
        let mut cache = GeocodeCache::load(&path, 50).unwrap();
        cache.insert("1.000,2.000".into(), "Alpha".into());
        cache.flush().unwrap();

        let reloaded = GeocodeCache::load(&path, 50).unwrap();
        assert_eq!(reloaded.get("1.000,2.000"), Some("Alpha"));
    }

    #[test]
    fn stale_temp_file_does_not_affect_existing_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, r#"{"1.000,2.000":"Alpha"}"#).unwrap();
        fs::write(dir.path().join("cache.json.tmp"), "{\"half").unwrap();

        let mut cache = GeocodeCache::load(&path, 50).unwrap();
        assert_eq!(cache.get("1.000,2.000"), Some("Alpha"));
        cache.insert("5.000,6.000".into(), "Beta".into());
        cache.flush().unwrap();

        let reloaded = GeocodeCache::load(&path, 50).unwrap();
        assert_eq!(reloaded.len(), 2);
    }
}
