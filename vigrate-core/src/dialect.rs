use sqlx::Database;

/// SQL differences between the backends the migrator runs against.
pub trait MigrationDialect: Database {
    /// Returns the placeholder for the `n`-th bound parameter ("?" or "$1").
    fn placeholder(n: usize) -> String;

    /// Statement that points unqualified names at `schema`, if the backend
    /// has namespaces.
    fn scope_sql(schema: &str) -> Option<String>;

    /// Name of the bookkeeping table, qualified by `schema` where supported.
    fn bookkeeping_table(schema: Option<&str>) -> String;

    /// DDL creating the bookkeeping table if it is missing.
    fn create_bookkeeping_sql(table: &str) -> String;

    /// Quotes an identifier (schema/table name).
    fn quote_identifier(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Table recording which migrations have been applied.
pub const MIGRATIONS_TABLE: &str = "vigrate_migrations";

#[cfg(feature = "sqlite")]
impl MigrationDialect for sqlx::Sqlite {
    fn placeholder(_n: usize) -> String {
        "?".to_owned()
    }

    // attached databases are not namespaces for our purposes
    fn scope_sql(_schema: &str) -> Option<String> {
        None
    }

    fn bookkeeping_table(_schema: Option<&str>) -> String {
        Self::quote_identifier(MIGRATIONS_TABLE)
    }

    fn create_bookkeeping_sql(table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                applied_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"
        )
    }
}

#[cfg(feature = "postgres")]
impl MigrationDialect for sqlx::Postgres {
    fn placeholder(n: usize) -> String {
        format!("${}", n)
    }

    fn scope_sql(schema: &str) -> Option<String> {
        Some(format!("SET search_path TO {}", Self::quote_identifier(schema)))
    }

    fn bookkeeping_table(schema: Option<&str>) -> String {
        let table = Self::quote_identifier(MIGRATIONS_TABLE);
        match schema {
            Some(schema) => format!("{}.{}", Self::quote_identifier(schema), table),
            None => table,
        }
    }

    fn create_bookkeeping_sql(table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"
        )
    }
}
