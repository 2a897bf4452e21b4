//! Persistent result cache.
//!
//! Results live in an SQLite database with one append-only table per
//! measurement device. A row records one successful measurement; the value
//! of a (problem, transform space, configuration) key is the minimum runtime
//! over all of its rows, so re-measuring never needs an update.

use crate::error::{Result, TuneError};
use crate::params::{decode_configuration, encode_configuration, Configuration};
use chrono::Utc;
use chrono_tz::Tz;
use einforge_einsum::Fingerprint;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Timestamps are written in one fixed zone so rows from different
/// machines order consistently.
pub const TIMESTAMP_TZ: Tz = chrono_tz::America::Chicago;
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H%M%S";

/// Columns later versions added; older tables may lack them.
const OPTIONAL_COLUMNS: [&str; 3] = ["compiler_version", "giga_op_info", "timestamp"];

const FINGERPRINT_MATCH: &str = "subscripts = ?1 \
     AND index_to_length = ?2 \
     AND use_matrix = ?3 \
     AND value_to_dtype = ?4 \
     AND giga_op_info = ?5 \
     AND transform_id = ?6";

/// The device results are measured on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub compiler_version: String,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, compiler_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compiler_version: compiler_version.into(),
        }
    }

    /// SQL table holding this device's results.
    ///
    /// Names that are already lowercase identifiers are used as they are.
    /// Anything else is sanitized and suffixed with a digest of the raw
    /// name, e.g. `NVIDIA_TITAN_V_1f0c9a4e2b7d3c58`, so two devices never
    /// share a table even though SQLite compares table names without case.
    pub fn table_name(&self) -> String {
        let raw = self.name.as_str();
        let mut name: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if name.is_empty() {
            name.push_str("unknown_device");
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            name.insert_str(0, "dev_");
        }

        let verbatim = name == raw && !raw.chars().any(|c| c.is_ascii_uppercase());
        if !verbatim {
            let digest = blake3::hash(raw.as_bytes()).to_hex();
            name.push('_');
            name.push_str(&digest.as_str()[..16]);
        }
        name
    }
}

/// Outcome of a point lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    /// Best runtime in seconds over all matching rows.
    Hit(f64),
    Miss,
}

impl Lookup {
    pub fn runtime(&self) -> Option<f64> {
        match self {
            Lookup::Hit(runtime) => Some(*runtime),
            Lookup::Miss => None,
        }
    }
}

/// One stored measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRecord {
    pub id: i64,
    pub fingerprint: Fingerprint,
    pub transform_id: String,
    pub configuration: Configuration,
    pub runtime_in_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Fastest configuration recorded for one problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestEntry {
    pub fingerprint: Fingerprint,
    pub configuration: Configuration,
    pub runtime_in_sec: f64,
    pub measurements: usize,
}

pub fn timestamp_now() -> String {
    Utc::now()
        .with_timezone(&TIMESTAMP_TZ)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

#[derive(Debug)]
pub struct ResultCache {
    conn: Connection,
    table: String,
    device: DeviceInfo,
}

impl ResultCache {
    /// Open (or create) the database at `path` and ensure the device table.
    pub fn open(path: impl AsRef<Path>, device: DeviceInfo) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened result cache");
        Self::with_connection(conn, device)
    }

    pub fn open_in_memory(device: DeviceInfo) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, device)
    }

    /// Open an existing database read-only, for inspection. Nothing is
    /// created; a device without a table is an error.
    pub fn open_existing(path: impl AsRef<Path>, device: DeviceInfo) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let cache = Self {
            conn,
            table: device.table_name(),
            device,
        };
        if !cache.table_exists()? {
            return Err(TuneError::Validation(format!(
                "no results recorded for device '{}' in {}",
                cache.device.name,
                path.display()
            )));
        }
        Ok(cache)
    }

    fn with_connection(conn: Connection, device: DeviceInfo) -> Result<Self> {
        let cache = Self {
            conn,
            table: device.table_name(),
            device,
        };
        cache.ensure_table()?;
        Ok(cache)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Create the device table if missing. Returns whether it was created.
    pub fn ensure_table(&self) -> Result<bool> {
        if self.table_exists()? {
            self.add_missing_columns()?;
            return Ok(false);
        }

        info!(table = %self.table, "table not in cache database, creating one");
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\
                 ID INTEGER PRIMARY KEY AUTOINCREMENT, \
                 subscripts TEXT, \
                 index_to_length TEXT, \
                 use_matrix TEXT, \
                 value_to_dtype TEXT, \
                 transform_id TEXT, \
                 transform_params TEXT, \
                 runtime_in_sec REAL, \
                 compiler_version TEXT, \
                 giga_op_info TEXT, \
                 timestamp TEXT)",
                self.table
            ),
            [],
        )?;
        Ok(true)
    }

    fn table_exists(&self) -> Result<bool> {
        // SQLite resolves table names without regard to case.
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master \
             WHERE type = 'table' AND name = ?1 COLLATE NOCASE)",
            [&self.table],
            |row| row.get(0),
        )?)
    }

    fn add_missing_columns(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", self.table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        for column in OPTIONAL_COLUMNS {
            if !columns.contains(column) {
                warn!(table = %self.table, column, "adding column missing from older cache table");
                self.conn.execute(
                    &format!("ALTER TABLE \"{}\" ADD COLUMN {column} TEXT", self.table),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// Best runtime recorded for `config`, or [`Lookup::Miss`].
    pub fn lookup(
        &self,
        fingerprint: &Fingerprint,
        transform_id: &str,
        config: &Configuration,
    ) -> Result<Lookup> {
        let params_text = encode_configuration(config)?;
        let best: Option<f64> = self.conn.query_row(
            &format!(
                "SELECT MIN(runtime_in_sec) FROM \"{}\" WHERE {FINGERPRINT_MATCH} AND transform_params = ?7",
                self.table
            ),
            params![
                fingerprint.subscripts,
                fingerprint.index_to_length,
                fingerprint.use_matrix,
                fingerprint.value_to_dtype,
                fingerprint.op_info,
                transform_id,
                params_text,
            ],
            |row| row.get(0),
        )?;

        Ok(best.map(Lookup::Hit).unwrap_or(Lookup::Miss))
    }

    /// Append one measurement. The row is committed before returning.
    pub fn insert(
        &self,
        fingerprint: &Fingerprint,
        transform_id: &str,
        config: &Configuration,
        runtime_in_sec: f64,
    ) -> Result<i64> {
        // SQLite stores NaN as NULL, which no reader could handle.
        if !runtime_in_sec.is_finite() || runtime_in_sec < 0.0 {
            return Err(TuneError::Validation(format!(
                "runtime must be a finite non-negative number of seconds, got {runtime_in_sec}"
            )));
        }
        let params_text = encode_configuration(config)?;
        self.conn.execute(
            &format!(
                "INSERT INTO \"{}\" \
                 (subscripts, index_to_length, use_matrix, value_to_dtype, \
                  transform_id, transform_params, runtime_in_sec, \
                  compiler_version, giga_op_info, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                self.table
            ),
            params![
                fingerprint.subscripts,
                fingerprint.index_to_length,
                fingerprint.use_matrix,
                fingerprint.value_to_dtype,
                transform_id,
                params_text,
                runtime_in_sec,
                self.device.compiler_version,
                fingerprint.op_info,
                timestamp_now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every distinct configuration recorded for this problem and transform
    /// space, fastest first.
    pub fn seed_configurations(
        &self,
        transform_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<Configuration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT transform_params FROM \"{}\" WHERE {FINGERPRINT_MATCH} \
             GROUP BY transform_params ORDER BY MIN(runtime_in_sec), MIN(ID)",
            self.table
        ))?;
        let rows = stmt
            .query_map(fingerprint_params(fingerprint, transform_id), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut seeds = Vec::with_capacity(rows.len());
        for text in rows {
            seeds.push(decode_configuration(&text)?);
        }
        Ok(seeds)
    }

    /// Fastest configuration recorded for this problem and transform space.
    pub fn best(
        &self,
        transform_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<(Configuration, f64)>> {
        let row: Option<(String, f64)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT transform_params, runtime_in_sec FROM \"{}\" WHERE {FINGERPRINT_MATCH} \
                     ORDER BY runtime_in_sec ASC, ID ASC LIMIT 1",
                    self.table
                ),
                fingerprint_params(fingerprint, transform_id),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((text, runtime)) => Ok(Some((decode_configuration(&text)?, runtime))),
            None => Ok(None),
        }
    }

    /// Fastest configuration of a transform space for every problem it was
    /// measured on.
    pub fn best_per_problem(&self, transform_id: &str) -> Result<Vec<BestEntry>> {
        // SQLite takes the bare columns from the row holding the MIN().
        let mut stmt = self.conn.prepare(&format!(
            "SELECT subscripts, index_to_length, use_matrix, value_to_dtype, giga_op_info, \
                    transform_params, MIN(runtime_in_sec), COUNT(*) \
             FROM \"{}\" WHERE transform_id = ?1 \
             GROUP BY subscripts, index_to_length, use_matrix, value_to_dtype, giga_op_info \
             ORDER BY subscripts, MIN(ID)",
            self.table
        ))?;
        let rows = stmt
            .query_map([transform_id], |row| {
                Ok((
                    read_fingerprint(row, 0)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (fingerprint, text, runtime_in_sec, count) in rows {
            entries.push(BestEntry {
                fingerprint,
                configuration: decode_configuration(&text)?,
                runtime_in_sec,
                measurements: usize::try_from(count).unwrap_or(0),
            });
        }
        Ok(entries)
    }

    /// All rows, optionally restricted to one transform space, oldest first.
    pub fn records(&self, transform_id: Option<&str>) -> Result<Vec<CacheRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ID, subscripts, index_to_length, use_matrix, value_to_dtype, giga_op_info, \
                    transform_id, transform_params, runtime_in_sec, compiler_version, timestamp \
             FROM \"{}\" WHERE (?1 IS NULL OR transform_id = ?1) ORDER BY ID",
            self.table
        ))?;
        let rows = stmt
            .query_map([transform_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    read_fingerprint(row, 1)?,
                    row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                    row.get::<_, f64>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, fingerprint, transform_id, text, runtime_in_sec, compiler_version, timestamp) in rows {
            records.push(CacheRecord {
                id,
                fingerprint,
                transform_id,
                configuration: decode_configuration(&text)?,
                runtime_in_sec,
                compiler_version,
                timestamp,
            });
        }
        Ok(records)
    }

    pub fn row_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Close the connection, reporting any error from SQLite.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err.into())
    }

    /// Device tables in the database at `path` and their row counts.
    pub fn list_tables(path: impl AsRef<Path>) -> Result<Vec<(String, usize)>> {
        let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let names = {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\"")),
                [],
                |row| row.get(0),
            )?;
            tables.push((name, usize::try_from(count).unwrap_or(0)));
        }
        Ok(tables)
    }
}

fn fingerprint_params<'a>(fingerprint: &'a Fingerprint, transform_id: &'a str) -> [&'a str; 6] {
    [
        &fingerprint.subscripts,
        &fingerprint.index_to_length,
        &fingerprint.use_matrix,
        &fingerprint.value_to_dtype,
        &fingerprint.op_info,
        transform_id,
    ]
}

/// Reads subscripts, index_to_length, use_matrix, value_to_dtype and
/// giga_op_info starting at column `first`.
fn read_fingerprint(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<Fingerprint> {
    let text = |offset: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(first + offset)?.unwrap_or_default())
    };
    Ok(Fingerprint {
        subscripts: text(0)?,
        index_to_length: text(1)?,
        use_matrix: text(2)?,
        value_to_dtype: text(3)?,
        op_info: text(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use einforge_einsum::{DataType, EinsumProblem};

    fn device() -> DeviceInfo {
        DeviceInfo::new("NVIDIA TITAN V", "OpenCL 3.0 CUDA 12.2")
    }

    fn fingerprint() -> Fingerprint {
        EinsumProblem::new("ij,j->i")
            .with_unbounded_index("i")
            .with_index("j", 35)
            .with_output(vec![vec!["A"], vec!["x"]])
            .with_value("A", DataType::Float64)
            .with_value("x", DataType::Float64)
            .fingerprint(100_000)
            .unwrap()
    }

    fn config(pairs: &[(&str, ParamValue)]) -> Configuration {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(DeviceInfo::new("gfx1030", "").table_name(), "gfx1030");
        assert_eq!(DeviceInfo::new("tesla_v100", "").table_name(), "tesla_v100");

        let titan = device().table_name();
        assert!(titan.starts_with("NVIDIA_TITAN_V_"));
        assert_eq!(titan.len(), "NVIDIA_TITAN_V_".len() + 16);
        assert_eq!(titan, device().table_name());
        assert!(DeviceInfo::new("3090", "").table_name().starts_with("dev_3090_"));
        assert!(DeviceInfo::new("  ", "").table_name().starts_with("__"));
        assert!(DeviceInfo::new("", "").table_name().starts_with("unknown_device_"));
        assert!(titan
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn similar_device_names_get_distinct_tables() {
        let names = ["gfx90a:sramecc+", "gfx90a sramecc_", "Tesla V100", "tesla v100", "tesla_v100"];
        let tables: Vec<String> = names
            .iter()
            .map(|name| DeviceInfo::new(*name, "").table_name().to_lowercase())
            .collect();
        let distinct: HashSet<&String> = tables.iter().collect();
        assert_eq!(distinct.len(), names.len());

        let file = tempfile::NamedTempFile::new().unwrap();
        let fp = fingerprint();
        let upper = ResultCache::open(file.path(), DeviceInfo::new("Tesla V100", "")).unwrap();
        upper
            .insert(&fp, "grad.so", &config(&[("tile", ParamValue::Int(4))]), 1.0)
            .unwrap();
        upper.close().unwrap();

        let lower = ResultCache::open(file.path(), DeviceInfo::new("tesla v100", "")).unwrap();
        assert_eq!(lower.row_count().unwrap(), 0);
        lower.close().unwrap();

        let reopened = ResultCache::open(file.path(), DeviceInfo::new("Tesla V100", "")).unwrap();
        assert!(!reopened.ensure_table().unwrap());
        assert_eq!(reopened.row_count().unwrap(), 1);
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cache = ResultCache::open(file.path(), device()).unwrap();
        let fp = fingerprint();
        cache
            .insert(&fp, "grad.so", &config(&[("tile", ParamValue::Int(4))]), 1.0)
            .unwrap();

        assert!(!cache.ensure_table().unwrap());
        assert!(!cache.ensure_table().unwrap());
        assert_eq!(cache.row_count().unwrap(), 1);
        cache.close().unwrap();

        let reopened = ResultCache::open(file.path(), device()).unwrap();
        assert_eq!(reopened.row_count().unwrap(), 1);
    }

    #[test]
    fn lookup_ignores_parameter_order() {
        let cache = ResultCache::open_in_memory(device()).unwrap();
        let fp = fingerprint();
        let mut stored = Configuration::new();
        stored.insert("a".into(), ParamValue::Int(1));
        stored.insert("b".into(), ParamValue::Bool(true));
        cache.insert(&fp, "grad.so", &stored, 0.25).unwrap();

        let mut queried = Configuration::new();
        queried.insert("b".into(), ParamValue::Bool(true));
        queried.insert("a".into(), ParamValue::Int(1));
        assert_eq!(cache.lookup(&fp, "grad.so", &queried).unwrap(), Lookup::Hit(0.25));
    }

    #[test]
    fn lookup_takes_minimum_runtime() {
        let cache = ResultCache::open_in_memory(device()).unwrap();
        let fp = fingerprint();
        let tile = config(&[("tile", ParamValue::Int(8))]);
        cache.insert(&fp, "grad.so", &tile, 2.5).unwrap();
        cache.insert(&fp, "grad.so", &tile, 1.7).unwrap();
        assert_eq!(cache.lookup(&fp, "grad.so", &tile).unwrap(), Lookup::Hit(1.7));
        assert_eq!(cache.row_count().unwrap(), 2);
    }

    #[test]
    fn misses_are_distinguished() {
        let cache = ResultCache::open_in_memory(device()).unwrap();
        let fp = fingerprint();
        let tile = config(&[("tile", ParamValue::Int(8))]);
        assert_eq!(cache.lookup(&fp, "grad.so", &tile).unwrap(), Lookup::Miss);

        cache.insert(&fp, "grad.so", &tile, 1.0).unwrap();
        assert_eq!(cache.lookup(&fp, "other.so", &tile).unwrap(), Lookup::Miss);

        let other_length = EinsumProblem::new("ij,j->i")
            .with_unbounded_index("i")
            .with_index("j", 35)
            .with_output(vec![vec!["A"], vec!["x"]])
            .with_value("A", DataType::Float64)
            .with_value("x", DataType::Float64)
            .fingerprint(200_000)
            .unwrap();
        assert_eq!(cache.lookup(&other_length, "grad.so", &tile).unwrap(), Lookup::Miss);
    }

    #[test]
    fn seeds_are_distinct_and_fastest_first() {
        let cache = ResultCache::open_in_memory(device()).unwrap();
        let fp = fingerprint();
        let slow = config(&[("tile", ParamValue::Int(2))]);
        let fast = config(&[("tile", ParamValue::Int(16))]);
        cache.insert(&fp, "grad.so", &slow, 3.0).unwrap();
        cache.insert(&fp, "grad.so", &fast, 1.0).unwrap();
        cache.insert(&fp, "grad.so", &slow, 2.0).unwrap();
        cache
            .insert(&fp, "other.so", &config(&[("tile", ParamValue::Int(1))]), 0.1)
            .unwrap();

        let seeds = cache.seed_configurations("grad.so", &fp).unwrap();
        assert_eq!(seeds, vec![fast.clone(), slow]);
        assert_eq!(cache.best("grad.so", &fp).unwrap(), Some((fast, 1.0)));
        assert_eq!(cache.best("missing.so", &fp).unwrap(), None);
    }

    #[test]
    fn records_and_best_per_problem() {
        let cache = ResultCache::open_in_memory(device()).unwrap();
        let fp = fingerprint();
        cache
            .insert(&fp, "grad.so", &config(&[("tile", ParamValue::Int(2))]), 3.0)
            .unwrap();
        cache
            .insert(&fp, "grad.so", &config(&[("tile", ParamValue::Int(4))]), 1.5)
            .unwrap();
        cache
            .insert(&fp, "other.so", &config(&[("tile", ParamValue::Int(4))]), 1.0)
            .unwrap();

        let records = cache.records(Some("grad.so")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fingerprint, fp);
        assert_eq!(records[0].compiler_version.as_deref(), Some("OpenCL 3.0 CUDA 12.2"));
        assert_eq!(records[0].timestamp.as_ref().map(String::len), Some(17));
        assert_eq!(cache.records(None).unwrap().len(), 3);

        let best = cache.best_per_problem("grad.so").unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].runtime_in_sec, 1.5);
        assert_eq!(best[0].configuration, config(&[("tile", ParamValue::Int(4))]));
        assert_eq!(best[0].measurements, 2);
    }

    #[test]
    fn older_tables_gain_optional_columns() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let conn = Connection::open(file.path()).unwrap();
            conn.execute(
                "CREATE TABLE titan_v (ID INTEGER PRIMARY KEY AUTOINCREMENT, \
                 subscripts TEXT, index_to_length TEXT, use_matrix TEXT, value_to_dtype TEXT, \
                 transform_id TEXT, transform_params TEXT, runtime_in_sec REAL)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO titan_v (subscripts, transform_id, transform_params, runtime_in_sec) \
                 VALUES ('ij,j->i', 'grad.so', '{\"tile\": 4}', 2.0)",
                [],
            )
            .unwrap();
        }

        let cache = ResultCache::open(file.path(), DeviceInfo::new("titan_v", "cl 1.2")).unwrap();
        assert_eq!(cache.table_name(), "titan_v");
        let records = cache.records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, None);
        assert_eq!(records[0].configuration, config(&[("tile", ParamValue::Int(4))]));

        cache
            .insert(&fingerprint(), "grad.so", &config(&[("tile", ParamValue::Int(8))]), 1.0)
            .unwrap();
        assert_eq!(cache.row_count().unwrap(), 2);
    }

    #[test]
    fn tables_are_listed_per_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let titan = ResultCache::open(file.path(), device()).unwrap();
        let titan_table = titan.table_name().to_string();
        titan
            .insert(&fingerprint(), "grad.so", &config(&[("tile", ParamValue::Int(4))]), 1.0)
            .unwrap();
        titan.close().unwrap();
        ResultCache::open(file.path(), DeviceInfo::new("v100", ""))
            .unwrap()
            .close()
            .unwrap();

        let tables = ResultCache::list_tables(file.path()).unwrap();
        assert_eq!(tables, vec![(titan_table, 1), ("v100".to_string(), 0)]);
    }

    #[test]
    fn unusable_runtimes_are_refused() {
        let cache = ResultCache::open_in_memory(device()).unwrap();
        let fp = fingerprint();
        let tile = config(&[("tile", ParamValue::Int(4))]);
        for runtime in [f64::NAN, f64::INFINITY, -1.0] {
            let err = cache.insert(&fp, "grad.so", &tile, runtime).unwrap_err();
            assert!(matches!(err, TuneError::Validation(_)));
        }
        assert_eq!(cache.row_count().unwrap(), 0);

        cache.insert(&fp, "grad.so", &tile, 0.0).unwrap();
        assert_eq!(cache.records(None).unwrap().len(), 1);
        assert_eq!(cache.best_per_problem("grad.so").unwrap().len(), 1);
    }

    #[test]
    fn inspection_does_not_create_tables() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cache = ResultCache::open(file.path(), device()).unwrap();
        cache
            .insert(&fingerprint(), "grad.so", &config(&[("tile", ParamValue::Int(4))]), 1.0)
            .unwrap();
        cache.close().unwrap();

        let existing = ResultCache::open_existing(file.path(), device()).unwrap();
        assert_eq!(existing.records(None).unwrap().len(), 1);
        existing.close().unwrap();

        let err = ResultCache::open_existing(file.path(), DeviceInfo::new("NVIDIA TITAN X", ""))
            .unwrap_err();
        assert!(matches!(err, TuneError::Validation(msg) if msg.contains("NVIDIA TITAN X")));
        assert_eq!(ResultCache::list_tables(file.path()).unwrap().len(), 1);
    }

    #[test]
    fn timestamps_use_fixed_layout() {
        let stamp = timestamp_now();
        assert_eq!(stamp.len(), "2024_01_31_235959".len());
        assert_eq!(&stamp[4..5], "_");
        assert_eq!(&stamp[7..8], "_");
        assert_eq!(&stamp[10..11], "_");
    }
}
