use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Result alias for vigrate operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every way a single vigrate invocation can fail.
///
/// All variants are terminal for the current command; [`Error::exit_code`]
/// gives each kind its own process exit status.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration file could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not a valid `env -> {dsn, driver, dir}` mapping.
    #[error("malformed config file {}: {source}", path.display())]
    ConfigMalformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The requested environment has no entry in the configuration.
    #[error("environment `{env}` is not defined in {}", path.display())]
    EnvironmentNotFound { env: String, path: PathBuf },

    /// The driver is unknown or the database could not be reached.
    #[error("cannot connect with driver `{driver}`: {source}")]
    Connection {
        driver: String,
        #[source]
        source: sqlx::Error,
    },

    /// A migration file could not be written.
    #[error("cannot write migration file {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The migration engine failed.
    #[error(transparent)]
    MigrationExecution(#[from] MigrateError),
}

/// Failures inside the migration engine.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The migration directory or one of its files could not be read.
    #[error("cannot read migrations from {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration file does not follow the `-- +migrate` annotation format.
    #[error("invalid migration {id} at line {line}: {message}")]
    Parse {
        id: String,
        line: usize,
        message: String,
    },

    /// The bookkeeping table records a migration that is not in the directory.
    #[error("unknown migration in database: {id}")]
    UnknownMigration { id: String },

    /// A migration step failed and was rolled back. Earlier steps stay applied.
    #[error("migration {id} failed after {applied} applied: {source}")]
    Execute {
        id: String,
        applied: usize,
        #[source]
        source: sqlx::Error,
    },

    /// The bookkeeping table could not be created or read.
    #[error("migration bookkeeping failed: {0}")]
    Bookkeeping(#[source] sqlx::Error),

    /// The run did not finish within the configured timeout.
    #[error("migration run timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Process exit status for this error kind.
    ///
    /// `1` is left for unexpected failures and `2` for usage errors reported
    /// by the argument parser.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigUnreadable { .. } => 3,
            Self::ConfigMalformed { .. } => 4,
            Self::EnvironmentNotFound { .. } => 5,
            Self::Connection { .. } => 6,
            Self::FileWrite { .. } => 7,
            Self::MigrationExecution(_) => 8,
        }
    }

    pub(crate) fn connection(driver: &str, source: sqlx::Error) -> Self {
        Self::Connection {
            driver: driver.to_owned(),
            source,
        }
    }
}
