use std::{collections::HashSet, fmt, future::Future};

use sqlx::{Connection, Database};

use crate::{dialect::MigrationDialect, error::MigrateError, source::Migration};

/// Which half of a migration to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Migrations to run for `direction`, given the ids already applied.
///
/// Up yields unapplied migrations in source order, Down yields applied ones
/// newest first. `max == 0` means no bound.
pub fn plan<'a>(
    source: &'a [Migration],
    applied: &[String],
    direction: Direction,
    max: usize,
) -> Result<Vec<&'a Migration>, MigrateError> {
    let known: HashSet<&str> = source.iter().map(|m| m.id.as_str()).collect();
    if let Some(unknown) = applied.iter().find(|id| !known.contains(id.as_str())) {
        return Err(MigrateError::UnknownMigration {
            id: unknown.clone(),
        });
    }

    let applied: HashSet<&str> = applied.iter().map(String::as_str).collect();
    let mut planned: Vec<&Migration> = match direction {
        Direction::Up => source
            .iter()
            .filter(|m| !applied.contains(m.id.as_str()))
            .collect(),
        Direction::Down => source
            .iter()
            .rev()
            .filter(|m| applied.contains(m.id.as_str()))
            .collect(),
    };
    if max > 0 {
        planned.truncate(max);
    }
    Ok(planned)
}

/// A migrator bound to a concrete backend.
pub trait Migrate {
    /// Applies up to `max` migrations from `source` in `direction` (`0` =
    /// all) and returns how many ran.
    ///
    /// Each migration runs in its own transaction unless it opted out with
    /// `notransaction`. On failure, migrations completed before the failing
    /// one stay applied.
    fn exec_max(
        &mut self,
        source: &[Migration],
        direction: Direction,
        max: usize,
    ) -> impl Future<Output = Result<usize, MigrateError>>;
}

/// Runs migrations over a single connection and records them in the
/// bookkeeping table.
pub struct Migrator<DB: Database> {
    conn: DB::Connection,
    schema: Option<String>,
}

impl<DB: Database> Migrator<DB> {
    pub fn new(conn: DB::Connection) -> Self {
        Self { conn, schema: None }
    }

    /// Keeps the bookkeeping table and unqualified names inside `schema`.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn connection(&mut self) -> &mut DB::Connection {
        &mut self.conn
    }

    /// Closes the underlying connection.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

// The bodies only differ in the concrete connection type, so one macro keeps
// the backends in step.
macro_rules! impl_migrator {
    ($db:ty) => {
        impl Migrate for Migrator<$db> {
            async fn exec_max(
                &mut self,
                source: &[Migration],
                direction: Direction,
                max: usize,
            ) -> Result<usize, MigrateError> {
                if let Some(sql) = self
                    .schema
                    .as_deref()
                    .and_then(<$db as MigrationDialect>::scope_sql)
                {
                    sqlx::raw_sql(&sql)
                        .execute(&mut self.conn)
                        .await
                        .map_err(MigrateError::Bookkeeping)?;
                }

                let table = <$db as MigrationDialect>::bookkeeping_table(self.schema.as_deref());
                let create_sql = <$db as MigrationDialect>::create_bookkeeping_sql(&table);
                sqlx::raw_sql(&create_sql)
                    .execute(&mut self.conn)
                    .await
                    .map_err(MigrateError::Bookkeeping)?;

                let select_sql = format!("SELECT id FROM {table}");
                let applied: Vec<String> = sqlx::query_scalar::<$db, String>(&select_sql)
                    .fetch_all(&mut self.conn)
                    .await
                    .map_err(MigrateError::Bookkeeping)?;

                let planned = plan(source, &applied, direction, max)?;
                let record_sql = match direction {
                    Direction::Up => format!(
                        "INSERT INTO {table} (id) VALUES ({})",
                        <$db as MigrationDialect>::placeholder(1)
                    ),
                    Direction::Down => format!(
                        "DELETE FROM {table} WHERE id = {}",
                        <$db as MigrationDialect>::placeholder(1)
                    ),
                };

                let mut done = 0;
                for migration in planned {
                    tracing::info!(
                        operation = "migration_step",
                        id = %migration.id,
                        direction = %direction,
                        "vigrate migration"
                    );
                    self.step(migration, direction, &record_sql)
                        .await
                        .map_err(|source| MigrateError::Execute {
                            id: migration.id.clone(),
                            applied: done,
                            source,
                        })?;
                    done += 1;
                }
                Ok(done)
            }
        }

        impl Migrator<$db> {
            async fn step(
                &mut self,
                migration: &Migration,
                direction: Direction,
                record_sql: &str,
            ) -> Result<(), sqlx::Error> {
                let statements = migration.statements(direction);
                if migration.transactional(direction) {
                    let mut tx = self.conn.begin().await?;
                    for statement in statements {
                        sqlx::raw_sql(statement).execute(&mut *tx).await?;
                    }
                    sqlx::query(record_sql)
                        .bind(&migration.id)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                } else {
                    for statement in statements {
                        sqlx::raw_sql(statement).execute(&mut self.conn).await?;
                    }
                    sqlx::query(record_sql)
                        .bind(&migration.id)
                        .execute(&mut self.conn)
                        .await?;
                }
                Ok(())
            }
        }
    };
}

#[cfg(feature = "sqlite")]
impl_migrator!(sqlx::Sqlite);

#[cfg(feature = "postgres")]
impl_migrator!(sqlx::Postgres);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn migration(id: &str, table: &str) -> Migration {
        source::parse(
            id,
            &format!(
                "-- +migrate Up\nCREATE TABLE {table} (id INTEGER PRIMARY KEY);\n-- +migrate Down\nDROP TABLE {table};\n"
            ),
        )
        .unwrap()
    }

    fn three() -> Vec<Migration> {
        vec![
            migration("20240101000000_a.sql", "a"),
            migration("20240102000000_b.sql", "b"),
            migration("20240103000000_c.sql", "c"),
        ]
    }

    fn ids(planned: &[&Migration]) -> Vec<String> {
        planned.iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn plan_up_skips_applied_and_honours_bound() {
        let source = three();
        let applied = vec!["20240101000000_a.sql".to_owned()];

        let all = plan(&source, &applied, Direction::Up, 0).unwrap();
        assert_eq!(ids(&all), ["20240102000000_b.sql", "20240103000000_c.sql"]);

        let one = plan(&source, &applied, Direction::Up, 1).unwrap();
        assert_eq!(ids(&one), ["20240102000000_b.sql"]);
    }

    #[test]
    fn plan_up_fills_gaps_before_newer_migrations() {
        let source = three();
        let applied = vec!["20240103000000_c.sql".to_owned()];
        let planned = plan(&source, &applied, Direction::Up, 0).unwrap();
        assert_eq!(ids(&planned), ["20240101000000_a.sql", "20240102000000_b.sql"]);
    }

    #[test]
    fn plan_down_goes_newest_first() {
        let source = three();
        let applied = vec![
            "20240101000000_a.sql".to_owned(),
            "20240102000000_b.sql".to_owned(),
        ];
        let planned = plan(&source, &applied, Direction::Down, 0).unwrap();
        assert_eq!(ids(&planned), ["20240102000000_b.sql", "20240101000000_a.sql"]);

        let bounded = plan(&source, &applied, Direction::Down, 5).unwrap();
        assert_eq!(bounded.len(), 2);
    }

    #[test]
    fn plan_rejects_unknown_applied_ids() {
        let source = three();
        let applied = vec!["20231231000000_gone.sql".to_owned()];
        let err = plan(&source, &applied, Direction::Up, 0).unwrap_err();
        assert!(
            matches!(err, MigrateError::UnknownMigration { ref id } if id == "20231231000000_gone.sql")
        );
    }

    #[cfg(feature = "sqlite")]
    mod sqlite {
        use sqlx::{Connection, SqliteConnection};

        use super::*;

        async fn migrator() -> Migrator<sqlx::Sqlite> {
            let conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
            Migrator::new(conn).with_schema("public")
        }

        async fn recorded(migrator: &mut Migrator<sqlx::Sqlite>) -> Vec<String> {
            sqlx::query_scalar("SELECT id FROM vigrate_migrations ORDER BY id")
                .fetch_all(migrator.connection())
                .await
                .unwrap()
        }

        async fn table_exists(migrator: &mut Migrator<sqlx::Sqlite>, name: &str) -> bool {
            let found: Option<String> =
                sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                    .bind(name)
                    .fetch_optional(migrator.connection())
                    .await
                    .unwrap();
            found.is_some()
        }

        #[tokio::test]
        async fn up_applies_all_then_nothing() {
            let mut migrator = migrator().await;
            let source = three();

            assert_eq!(migrator.exec_max(&source, Direction::Up, 0).await.unwrap(), 3);
            assert_eq!(migrator.exec_max(&source, Direction::Up, 0).await.unwrap(), 0);
            assert_eq!(recorded(&mut migrator).await.len(), 3);
            assert!(table_exists(&mut migrator, "c").await);
        }

        #[tokio::test]
        async fn down_one_reverts_most_recent() {
            let mut migrator = migrator().await;
            let source = three();
            migrator.exec_max(&source, Direction::Up, 0).await.unwrap();

            assert_eq!(migrator.exec_max(&source, Direction::Down, 1).await.unwrap(), 1);
            assert_eq!(
                recorded(&mut migrator).await,
                ["20240101000000_a.sql", "20240102000000_b.sql"]
            );
            assert!(!table_exists(&mut migrator, "c").await);
            assert!(table_exists(&mut migrator, "b").await);
        }

        #[tokio::test]
        async fn down_then_up_with_same_bound_reapplies_same_steps() {
            let mut migrator = migrator().await;
            let source = three();
            migrator.exec_max(&source, Direction::Up, 0).await.unwrap();

            assert_eq!(migrator.exec_max(&source, Direction::Down, 2).await.unwrap(), 2);
            assert_eq!(recorded(&mut migrator).await, ["20240101000000_a.sql"]);
            assert_eq!(migrator.exec_max(&source, Direction::Up, 2).await.unwrap(), 2);
            assert_eq!(recorded(&mut migrator).await.len(), 3);
        }

        #[tokio::test]
        async fn reset_reverts_everything() {
            let mut migrator = migrator().await;
            let source = three();
            migrator.exec_max(&source, Direction::Up, 0).await.unwrap();

            assert_eq!(migrator.exec_max(&source, Direction::Down, 0).await.unwrap(), 3);
            assert!(recorded(&mut migrator).await.is_empty());
            assert!(!table_exists(&mut migrator, "a").await);
        }

        #[tokio::test]
        async fn failing_step_keeps_earlier_steps() {
            let mut migrator = migrator().await;
            let mut source = three();
            source[1] = source::parse(
                "20240102000000_b.sql",
                "-- +migrate Up\nCREATE TABLE b (id INTEGER PRIMARY KEY);\nINVALID SQL;\n-- +migrate Down\nDROP TABLE b;\n",
            )
            .unwrap();

            let err = migrator
                .exec_max(&source, Direction::Up, 0)
                .await
                .unwrap_err();
            match err {
                MigrateError::Execute { id, applied, .. } => {
                    assert_eq!(id, "20240102000000_b.sql");
                    assert_eq!(applied, 1);
                }
                other => panic!("unexpected error: {other}"),
            }

            assert_eq!(recorded(&mut migrator).await, ["20240101000000_a.sql"]);
            assert!(table_exists(&mut migrator, "a").await);
            // the failing step rolled back as a whole
            assert!(!table_exists(&mut migrator, "b").await);
        }

        #[tokio::test]
        async fn notransaction_step_still_records() {
            let mut migrator = migrator().await;
            let source = vec![
                source::parse(
                    "1_plain.sql",
                    "-- +migrate Up notransaction\nCREATE TABLE plain (id INTEGER);\n-- +migrate Down notransaction\nDROP TABLE plain;\n",
                )
                .unwrap(),
            ];

            assert_eq!(migrator.exec_max(&source, Direction::Up, 0).await.unwrap(), 1);
            assert_eq!(recorded(&mut migrator).await, ["1_plain.sql"]);
            assert_eq!(migrator.exec_max(&source, Direction::Down, 0).await.unwrap(), 1);
            assert!(recorded(&mut migrator).await.is_empty());
        }

        #[tokio::test]
        async fn unknown_recorded_migration_aborts_before_running() {
            let mut migrator = migrator().await;
            let source = three();
            migrator.exec_max(&source, Direction::Up, 1).await.unwrap();

            let err = migrator
                .exec_max(&source[1..], Direction::Up, 0)
                .await
                .unwrap_err();
            assert!(matches!(err, MigrateError::UnknownMigration { .. }));
            assert!(!table_exists(&mut migrator, "b").await);
        }

        #[tokio::test]
        async fn empty_sections_only_touch_bookkeeping() {
            let mut migrator = migrator().await;
            let source = vec![
                source::parse("1_empty.sql", crate::create::EMPTY_MIGRATION).unwrap(),
            ];
            assert_eq!(migrator.exec_max(&source, Direction::Up, 0).await.unwrap(), 1);
            assert_eq!(migrator.exec_max(&source, Direction::Down, 0).await.unwrap(), 1);
            migrator.close().await.unwrap();
        }
    }
}
