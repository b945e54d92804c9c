use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime};

use crate::{
    config::EnvConfig,
    error::{Error, Result},
};

/// Body of a freshly created migration.
pub const EMPTY_MIGRATION: &str = "-- +migrate Up
-- SQL in section 'Up' is executed when this migration is applied


-- +migrate Down
-- SQL section 'Down' is executed when this migration is rolled back

";

/// `{dir}/{YYYYMMDDHHMMSS}_{name}.sql`
pub fn migration_path(dir: &Path, name: &str, at: NaiveDateTime) -> PathBuf {
    dir.join(format!("{}_{}.sql", at.format("%Y%m%d%H%M%S"), name))
}

/// Writes an empty migration named `name` into the configured directory,
/// stamped with the local clock.
pub fn create(name: &str, config: &EnvConfig) -> Result<PathBuf> {
    create_at(name, &config.dir, Local::now().naive_local())
}

/// Writes an empty migration stamped with `at`.
///
/// The directory must already exist. A file with the same name is
/// overwritten.
pub fn create_at(name: &str, dir: &Path, at: NaiveDateTime) -> Result<PathBuf> {
    let path = migration_path(dir, name, at);

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    options
        .open(&path)
        .and_then(|mut file| file.write_all(EMPTY_MIGRATION.as_bytes()))
        .map_err(|source| Error::FileWrite {
            path: path.clone(),
            source,
        })?;

    tracing::info!(
        operation = "migration_create",
        path = %path.display(),
        "created migration file"
    );
    Ok(path)
}
