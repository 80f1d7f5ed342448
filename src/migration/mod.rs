//! Versioned schema migrations.
//!
//! A partition (the catalog schema or one base's schema) carries an integer
//! watermark: the highest applied unit. [`run_migrations`] applies every
//! unit above the watermark in ascending order and stops at the first
//! failure, keeping the units already committed.
//!
//! Units are plain SQL with a `{schema}` placeholder, either compiled in
//! ([`MigrationSet::catalog`], [`MigrationSet::tenant`]) or read from a
//! directory of `NNNN_name.sql` files ([`MigrationSet::from_dir`]).

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::interfaces::{Result, StorageError};

/// Placeholder replaced by the quoted partition name.
pub const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// One migration unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(version: u32, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// SQL with the placeholder bound to `schema` (already quoted).
    pub fn render(&self, schema: &str) -> String {
        self.sql.replace(SCHEMA_PLACEHOLDER, schema)
    }
}

static CATALOG_UNITS: &[(u32, &str, &str)] = &[
    (
        1,
        "catalog",
        include_str!("../../migrations/postgres/catalog/0001_catalog.sql"),
    ),
    (
        2,
        "customer_stripe_index",
        include_str!("../../migrations/postgres/catalog/0002_customer_stripe_index.sql"),
    ),
];

static TENANT_UNITS: &[(u32, &str, &str)] = &[
    (
        1,
        "system_tables",
        include_str!("../../migrations/postgres/tenant/0001_system_tables.sql"),
    ),
    (
        2,
        "function_trigger_index",
        include_str!("../../migrations/postgres/tenant/0002_function_trigger_index.sql"),
    ),
];

/// An ordered, gap-free sequence of units starting at version 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSet {
    units: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set, rejecting duplicates and gaps.
    pub fn new(mut units: Vec<Migration>) -> Result<Self> {
        units.sort_by_key(|m| m.version);

        if let Some(first) = units.first() {
            if first.version != 1 {
                return Err(StorageError::validation(format!(
                    "migrations must start at version 1, found {}",
                    first.version
                )));
            }
        }
        for window in units.windows(2) {
            if window[1].version != window[0].version + 1 {
                return Err(StorageError::validation(format!(
                    "migration sequence broken between {} and {}",
                    window[0].version, window[1].version
                )));
            }
        }

        Ok(Self { units })
    }

    /// Units applied to the system catalog partition.
    pub fn catalog() -> Self {
        Self::embedded(CATALOG_UNITS)
    }

    /// Units applied to every base partition.
    pub fn tenant() -> Self {
        Self::embedded(TENANT_UNITS)
    }

    fn embedded(units: &[(u32, &str, &str)]) -> Self {
        Self {
            units: units
                .iter()
                .map(|(version, name, sql)| Migration::new(*version, *name, *sql))
                .collect(),
        }
    }

    /// Read every `NNNN_name.sql` file of `dir`. Other files are ignored.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            StorageError::Backend(format!("cannot read migrations in {}: {}", dir.display(), e))
        })?;

        let mut units = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((version, name)) = parse_file_name(file_name) else {
                debug!(file = %file_name, "Skipping non-migration file");
                continue;
            };
            let sql = std::fs::read_to_string(&path).map_err(|e| {
                StorageError::Backend(format!("cannot read {}: {}", path.display(), e))
            })?;
            units.push(Migration::new(version, name, sql));
        }

        Self::new(units)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Highest version in the set, 0 when empty.
    pub fn latest(&self) -> u32 {
        self.units.last().map(|m| m.version).unwrap_or(0)
    }

    /// Units above `watermark`, ascending.
    pub fn pending(&self, watermark: u32) -> impl Iterator<Item = &Migration> {
        self.units.iter().filter(move |m| m.version > watermark)
    }
}

/// Split `0003_add_index.sql` into `(3, "add_index")`.
pub fn parse_file_name(file_name: &str) -> Option<(u32, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (digits, name) = stem.split_once('_')?;
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    let version: u32 = digits.parse().ok()?;
    if version == 0 {
        return None;
    }
    Some((version, name.to_string()))
}

/// A partition that can be migrated.
#[async_trait]
pub trait MigrationTarget: Send + Sync {
    /// Partition name, for reporting and locking.
    fn partition(&self) -> &str;

    /// Create the partition and its watermark table when missing.
    async fn prepare(&self) -> Result<()>;

    /// Highest applied version, 0 for a fresh partition.
    async fn watermark(&self) -> Result<u32>;

    /// Apply one unit and record it, atomically.
    ///
    /// Returns `false` when another process already recorded this unit.
    async fn apply(&self, migration: &Migration) -> Result<bool>;
}

/// Outcome of one migration run on one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub partition: String,
    /// Watermark before the run.
    pub from: u32,
    /// Watermark after the run.
    pub to: u32,
    /// Versions applied by this run.
    pub applied: Vec<u32>,
    /// Versions found already applied by a concurrent run.
    pub skipped: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.skipped.is_empty()
    }
}

/// Bring `target` up to the latest version of `set`.
#[tracing::instrument(name = "migrations.run", skip_all, fields(partition = %target.partition()))]
pub async fn run_migrations<T>(target: &T, set: &MigrationSet) -> Result<MigrationReport>
where
    T: MigrationTarget + ?Sized,
{
    let partition = target.partition().to_string();
    let as_migration_error = |version: u32, e: StorageError| match e {
        StorageError::Migration { .. } => e,
        other => StorageError::Migration {
            partition: partition.clone(),
            version,
            message: other.to_string(),
        },
    };

    target.prepare().await.map_err(|e| as_migration_error(0, e))?;
    let from = target.watermark().await.map_err(|e| as_migration_error(0, e))?;

    let mut report = MigrationReport {
        partition: partition.clone(),
        from,
        to: from,
        applied: Vec::new(),
        skipped: Vec::new(),
    };

    for migration in set.pending(from) {
        info!(
            partition = %partition,
            version = migration.version,
            name = %migration.name,
            "Applying migration"
        );

        let applied = target
            .apply(migration)
            .await
            .map_err(|e| as_migration_error(migration.version, e))?;

        if applied {
            report.applied.push(migration.version);
        } else {
            debug!(
                partition = %partition,
                version = migration.version,
                "Migration already applied concurrently"
            );
            report.skipped.push(migration.version);
        }
        report.to = migration.version;
    }

    if report.is_noop() {
        debug!(partition = %partition, version = from, "Schema up to date");
    } else {
        info!(
            partition = %partition,
            from = report.from,
            to = report.to,
            "Migrations complete"
        );
    }

    Ok(report)
}
