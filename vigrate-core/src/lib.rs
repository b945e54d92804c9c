//! Core of the `vigrate` migration tool: per-environment configuration,
//! migration file scaffolding, and a migration engine for `-- +migrate`
//! annotated SQL files.
//!
//! ```no_run
//! # async fn demo() -> vigrate_core::Result<()> {
//! use std::path::Path;
//!
//! use vigrate_core::{Direction, Timeouts, config, executor};
//!
//! let env = config::resolve(Path::new("dbconfig.yml"), "development")?;
//! let applied = executor::execute(&env, "public", Direction::Up, 0, Timeouts::default()).await?;
//! println!("{applied} migration(s) applied");
//! # Ok(())
//! # }
//! ```

pub use sqlx;

pub mod config;
pub mod create;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod migrator;
pub mod source;

pub use config::EnvConfig;
pub use error::{Error, MigrateError, Result};
pub use executor::{Driver, Timeouts};
pub use migrator::{Direction, Migrate, Migrator};
pub use source::Migration;
