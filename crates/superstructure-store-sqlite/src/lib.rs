use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use superstructure_core::{
    ActivityGateway, ActivityQuery, CanonicalKey, Categories, ReconcileError, RecordPayload,
    RegistryRecord,
};
use time::OffsetDateTime;
use tracing::debug;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Upper bound on bound parameters per statement in the bundled `SQLite`.
const MAX_QUERY_PARAMETERS: usize = 32_766;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS activities (
  database TEXT NOT NULL,
  code TEXT NOT NULL,
  name TEXT NOT NULL,
  product TEXT,
  location TEXT,
  kind TEXT NOT NULL CHECK (kind IN ('process','flow')),
  flow_type TEXT,
  categories_json TEXT,
  PRIMARY KEY (database, code)
);

CREATE INDEX IF NOT EXISTS idx_activities_name ON activities(name);
CREATE INDEX IF NOT EXISTS idx_activities_database_name ON activities(database, name);
";

const SELECT_ACTIVITY_COLUMNS: &str = "SELECT database, code, name, product, location, kind, \
     flow_type, categories_json FROM activities";

/// `SQLite`-backed activity registry.
pub struct SqliteRegistry {
    conn: Connection,
}

/// Counts from one batch of registry writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_records: usize,
    pub replaced_records: usize,
}

struct ActivityRow {
    database: String,
    code: String,
    name: String,
    product: Option<String>,
    location: Option<String>,
    kind: String,
    flow_type: Option<String>,
    categories_json: Option<String>,
}

impl ActivityRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            database: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            product: row.get(3)?,
            location: row.get(4)?,
            kind: row.get(5)?,
            flow_type: row.get(6)?,
            categories_json: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<RegistryRecord> {
        let payload = match self.kind.as_str() {
            "process" => RecordPayload::Process,
            "flow" => {
                let categories = self
                    .categories_json
                    .as_deref()
                    .map(serde_json::from_str::<Categories>)
                    .transpose()
                    .with_context(|| {
                        format!("invalid categories_json for ({}, {})", self.database, self.code)
                    })?;
                RecordPayload::Flow { flow_type: self.flow_type, categories }
            }
            other => {
                return Err(anyhow!(
                    "unknown activity kind {other} for ({}, {})",
                    self.database,
                    self.code
                ))
            }
        };

        Ok(RegistryRecord {
            database: self.database,
            code: self.code,
            name: self.name,
            product: self.product,
            location: self.location,
            payload,
        })
    }
}

impl SqliteRegistry {
    /// Open a SQLite-backed registry and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration 1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration 1")
    }

    /// Insert or replace one registry record. Returns `true` when a record with
    /// the same key already existed.
    ///
    /// # Errors
    /// Returns an error when serialization or the write fails.
    pub fn write_activity(&mut self, record: &RegistryRecord) -> Result<bool> {
        let existed = activity_exists(&self.conn, &record.key())?;
        upsert_activity(&self.conn, record)?;
        Ok(existed)
    }

    /// Upsert many records in one transaction.
    ///
    /// # Errors
    /// Returns an error when any write fails; nothing is committed in that case.
    pub fn write_activities(&mut self, records: &[RegistryRecord]) -> Result<ImportSummary> {
        let tx = self.conn.transaction().context("failed to start activity write transaction")?;
        let mut summary = ImportSummary::default();
        for record in records {
            if activity_exists(&tx, &record.key())? {
                summary.replaced_records += 1;
            } else {
                summary.imported_records += 1;
            }
            upsert_activity(&tx, record)?;
        }
        tx.commit().context("failed to commit activity writes")?;
        Ok(summary)
    }

    /// # Errors
    /// Returns an error when the lookup fails or the stored row cannot be decoded.
    pub fn get_activity(&self, key: &CanonicalKey) -> Result<Option<RegistryRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_ACTIVITY_COLUMNS} WHERE database = ?1 AND code = ?2"),
                params![key.database, key.code],
                ActivityRow::read,
            )
            .optional()
            .with_context(|| format!("failed to read activity {key}"))?;
        row.map(ActivityRow::into_record).transpose()
    }

    /// All records ordered by key.
    ///
    /// # Errors
    /// Returns an error when the scan fails or a stored row cannot be decoded.
    pub fn list_activities(&self) -> Result<Vec<RegistryRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_ACTIVITY_COLUMNS} ORDER BY database, code"))
            .context("failed to prepare activity listing")?;
        let rows = stmt.query_map([], ActivityRow::read)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn activity_count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get::<_, i64>(0))
            .context("failed to count activities")?;
        usize::try_from(count).context("activity count out of range")
    }

    /// Run a set-membership query against the `activities` table.
    ///
    /// # Errors
    /// Returns an error when the query binds too many values, fails to run, or
    /// returns an undecodable row.
    pub fn query_activities(&self, query: &ActivityQuery) -> Result<Vec<RegistryRecord>> {
        if query.is_unsatisfiable() {
            debug!("activity query has an empty constraint set; skipping sqlite");
            return Ok(Vec::new());
        }

        let (sql, values) = select_sql(query);
        if values.len() > MAX_QUERY_PARAMETERS {
            return Err(anyhow!(
                "activity query binds {} values; sqlite supports at most {MAX_QUERY_PARAMETERS}",
                values.len()
            ));
        }

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare activity query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), ActivityRow::read)
            .context("failed to run activity query")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        debug!(parameters = values.len(), records = records.len(), "sqlite activity query");
        Ok(records)
    }

    /// Upsert every record of an NDJSON file (one `RegistryRecord` per line).
    ///
    /// # Errors
    /// Returns an error when migration, parsing, or writes fail.
    pub fn import_ndjson(&mut self, path: &Path) -> Result<ImportSummary> {
        self.migrate()?;
        let records = read_ndjson_file::<RegistryRecord>(path)?;
        self.write_activities(&records)
    }
}

impl ActivityGateway for SqliteRegistry {
    fn query(&self, query: &ActivityQuery) -> Result<Vec<RegistryRecord>, ReconcileError> {
        self.query_activities(query).map_err(|err| ReconcileError::Gateway(format!("{err:#}")))
    }
}

/// One `IN (...)` clause per constrained dimension, joined with `AND`.
fn select_sql(query: &ActivityQuery) -> (String, Vec<&str>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for (dimension, admissible) in query.constraints() {
        let placeholders = (values.len() + 1..=values.len() + admissible.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!("{} IN ({placeholders})", dimension.as_str()));
        values.extend(admissible.iter().map(String::as_str));
    }

    let mut sql = SELECT_ACTIVITY_COLUMNS.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY database, code");
    (sql, values)
}

fn upsert_activity(conn: &Connection, record: &RegistryRecord) -> Result<()> {
    let (flow_type, categories_json) = match &record.payload {
        RecordPayload::Process => (None, None),
        RecordPayload::Flow { flow_type, categories } => (
            flow_type.clone(),
            categories
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("failed to serialize flow categories")?,
        ),
    };

    conn.execute(
        "INSERT INTO activities(
            database, code, name, product, location, kind, flow_type, categories_json
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(database, code) DO UPDATE SET
            name = excluded.name,
            product = excluded.product,
            location = excluded.location,
            kind = excluded.kind,
            flow_type = excluded.flow_type,
            categories_json = excluded.categories_json",
        params![
            record.database,
            record.code,
            record.name,
            record.product,
            record.location,
            record.payload.kind_str(),
            flow_type,
            categories_json,
        ],
    )
    .with_context(|| format!("failed to write activity {}", record.key()))?;
    Ok(())
}

fn activity_exists(conn: &Connection, key: &CanonicalKey) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM activities WHERE database = ?1 AND code = ?2)",
            params![key.database, key.code],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if activity exists: {key}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn read_ndjson_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse NDJSON row {} from {}", index + 1, path.display())
        })?;
        values.push(value);
    }

    Ok(values)
}
