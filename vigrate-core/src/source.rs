//! Migration files on disk.
//!
//! A migration is a `.sql` file whose name starts with a numeric version
//! (`20240101120000_create_users.sql`). Its body is split into sections by
//! annotation comments:
//!
//! ```sql
//! -- +migrate Up
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- +migrate Down
//! DROP TABLE users;
//! ```
//!
//! `-- +migrate Up notransaction` runs that section outside a transaction.
//! `-- +migrate StatementBegin` / `-- +migrate StatementEnd` wrap statements
//! with inner semicolons, such as function bodies.

use std::{
    cmp::Ordering,
    fs, io,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{error::MigrateError, migrator::Direction};

const COMMAND_PREFIX: &str = "-- +migrate ";
const NO_TRANSACTION: &str = "notransaction";

/// A parsed migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// File name, also the key in the bookkeeping table.
    pub id: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub up_transactional: bool,
    pub down_transactional: bool,
}

impl Migration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            up: Vec::new(),
            down: Vec::new(),
            up_transactional: true,
            down_transactional: true,
        }
    }

    /// Numeric prefix of the id, if any.
    pub fn version(&self) -> Option<u64> {
        version_of(&self.id)
    }

    pub fn statements(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    pub fn transactional(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up_transactional,
            Direction::Down => self.down_transactional,
        }
    }
}

fn version_of(id: &str) -> Option<u64> {
    let digits = id.len() - id.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    id[..digits].parse().ok()
}

/// Application order of two migration ids.
///
/// Numeric versions compare as numbers and sort before ids without one;
/// ties and non-numeric ids fall back to plain string order.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (version_of(a), version_of(b)) {
        (Some(va), Some(vb)) if va != vb => va.cmp(&vb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

/// Loads every `*.sql` file directly inside `dir`, in application order.
pub fn load_dir(dir: &Path) -> Result<Vec<Migration>, MigrateError> {
    let source_error = |path: &Path, source: io::Error| MigrateError::Source {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(dir).map_err(|err| source_error(dir, err))?;
    if !metadata.is_dir() {
        return Err(source_error(
            dir,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let mut migrations = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| source_error(dir, err.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        if !id.ends_with(".sql") {
            continue;
        }

        let path: PathBuf = entry.into_path();
        let content = fs::read_to_string(&path).map_err(|err| source_error(&path, err))?;
        migrations.push(parse(&id, &content)?);
    }

    migrations.sort_by(|a, b| compare_ids(&a.id, &b.id));
    tracing::debug!(
        operation = "migration_load",
        dir = %dir.display(),
        count = migrations.len(),
        "loaded migration source"
    );
    Ok(migrations)
}

/// Parses the body of migration `id`.
pub fn parse(id: &str, content: &str) -> Result<Migration, MigrateError> {
    let parse_error = |line: usize, message: &str| MigrateError::Parse {
        id: id.to_owned(),
        line,
        message: message.to_owned(),
    };

    let mut migration = Migration::new(id);
    let mut section: Option<Direction> = None;
    let mut annotated = false;
    let mut in_block = false;
    let mut buf = String::new();
    let mut last_line = 0;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        last_line = line_no;

        if let Some(command) = line.trim_end().strip_prefix(COMMAND_PREFIX) {
            let mut words = command.split_whitespace();
            match words.next() {
                Some(name @ ("Up" | "Down")) => {
                    if in_block {
                        return Err(parse_error(line_no, "section change inside StatementBegin"));
                    }
                    if !buf.trim().is_empty() {
                        return Err(parse_error(line_no, "unterminated statement, missing semicolon"));
                    }
                    buf.clear();

                    let direction = if name == "Up" { Direction::Up } else { Direction::Down };
                    let transactional = !words.any(|option| option == NO_TRANSACTION);
                    match direction {
                        Direction::Up => migration.up_transactional = transactional,
                        Direction::Down => migration.down_transactional = transactional,
                    }
                    section = Some(direction);
                    annotated = true;
                }
                Some("StatementBegin") => {
                    if section.is_some() {
                        in_block = true;
                    }
                }
                Some("StatementEnd") => {
                    let Some(direction) = section else {
                        continue;
                    };
                    if !in_block {
                        return Err(parse_error(line_no, "StatementEnd without StatementBegin"));
                    }
                    in_block = false;
                    push_statement(&mut migration, direction, &mut buf);
                }
                _ => return Err(parse_error(line_no, "unknown +migrate command")),
            }
            continue;
        }

        if line.starts_with("-- ") && !line.starts_with("-- +") {
            continue;
        }
        let Some(direction) = section else {
            continue;
        };

        buf.push_str(line);
        buf.push('\n');
        if !in_block && ends_with_semicolon(line) {
            push_statement(&mut migration, direction, &mut buf);
        }
    }

    if in_block {
        return Err(parse_error(last_line, "StatementBegin without StatementEnd"));
    }
    if !annotated {
        return Err(parse_error(
            last_line,
            "no `-- +migrate Up` or `-- +migrate Down` annotation found",
        ));
    }
    if !buf.trim().is_empty() {
        return Err(parse_error(last_line, "unterminated statement, missing semicolon"));
    }

    Ok(migration)
}

fn push_statement(migration: &mut Migration, direction: Direction, buf: &mut String) {
    let statement = buf.trim();
    if !statement.is_empty() {
        let statement = statement.to_owned();
        match direction {
            Direction::Up => migration.up.push(statement),
            Direction::Down => migration.down.push(statement),
        }
    }
    buf.clear();
}

/// True when the code part of `line` (before a `--` comment) ends in `;`.
fn ends_with_semicolon(line: &str) -> bool {
    line.split_whitespace()
        .take_while(|word| !word.starts_with("--"))
        .last()
        .is_some_and(|word| word.ends_with(';'))
}
