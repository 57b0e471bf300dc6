// ------------- Database -------------
// The persistence context: one backend plus the configuration that governs
// it. Nothing here is global, so any number of contexts can coexist.

use std::cell::Cell;
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::bean::Bean;
use crate::config::{Configuration, DependencyMap, Mode};
use crate::datatype::Value;
use crate::error::{BeanbaseError, Result};
use crate::persist::{Backend, PersistenceMode, Persistor, Row};
use crate::schema::check_identifier;

pub struct Database {
    backend: Box<dyn Backend>,
    config: Configuration,
    // nesting level of transaction()
    depth: Cell<usize>,
}

impl Database {
    pub fn new(mode: PersistenceMode, config: Configuration) -> Result<Self> {
        Ok(Self::with_backend(Box::new(Persistor::new(mode)?), config))
    }
    pub fn in_memory() -> Result<Self> {
        Self::new(PersistenceMode::InMemory, Configuration::default())
    }
    pub fn with_backend(backend: Box<dyn Backend>, config: Configuration) -> Self {
        info!(mode = ?config.mode, strict = config.strict_type_names, "database opened");
        Self {
            backend,
            config,
            depth: Cell::new(0),
        }
    }
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    // ------------- Settings -------------
    /// Switches between fluid, frozen and chilly mode.
    pub fn freeze(&mut self, mode: Mode) {
        info!(?mode, "mode changed");
        self.config.mode = mode;
    }
    pub fn is_frozen(&self, kind: &str) -> bool {
        self.config.mode.is_frozen(kind)
    }
    pub fn dependencies(&mut self, dependencies: DependencyMap) {
        self.config.dependencies = dependencies;
    }
    pub fn set_strict_typing(&mut self, strict: bool) {
        self.config.strict_type_names = strict;
    }
    pub fn set_unique_links(&mut self, unique: bool) {
        self.config.unique_links = unique;
    }

    // Reads against a schema that does not exist yet find nothing, unless
    // the context is frozen, where the schema is supposed to be complete.
    pub(crate) fn tolerate<T: Default>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if e.is_missing_schema() && self.config.mode != Mode::Frozen => {
                debug!(error = %e, "missing schema read as empty");
                Ok(T::default())
            }
            other => other,
        }
    }

    // ------------- Transactions -------------
    // Transactions only make sense once the schema holds still, so in fluid
    // mode these do nothing and report false.
    pub fn begin(&self) -> Result<bool> {
        if self.config.mode.is_fluid() {
            return Ok(false);
        }
        self.backend.begin_transaction()?;
        Ok(true)
    }
    pub fn commit(&self) -> Result<bool> {
        if self.config.mode.is_fluid() {
            return Ok(false);
        }
        self.backend.commit()?;
        Ok(true)
    }
    pub fn rollback(&self) -> Result<bool> {
        if self.config.mode.is_fluid() {
            return Ok(false);
        }
        self.backend.rollback()?;
        Ok(true)
    }
    /// Runs `work` inside a transaction. Nested calls join the outermost one;
    /// an error rolls everything back and is handed to the caller.
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let depth = self.depth.get();
        if depth == 0 {
            self.begin()?;
        }
        let result = {
            let _level = Nesting::enter(self, depth);
            work(self)
        };
        match result {
            Ok(value) => {
                if depth == 0 {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(e) => {
                if depth == 0 {
                    if let Err(rollback) = self.rollback() {
                        warn!(error = %rollback, "rollback failed");
                        return Err(BeanbaseError::Transaction(format!(
                            "{} (rollback failed: {})",
                            e, rollback
                        )));
                    }
                }
                Err(e)
            }
        }
    }

    // ------------- Queries -------------
    pub fn exec(&self, sql: &str, bindings: &[Value]) -> Result<usize> {
        self.tolerate(self.backend.execute(sql, bindings))
    }
    pub fn get_all(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        self.tolerate(self.backend.query(sql, bindings))
    }
    pub fn get_row(&self, sql: &str, bindings: &[Value]) -> Result<Option<Row>> {
        Ok(self.get_all(sql, bindings)?.into_iter().next())
    }
    /// The first column of every row.
    pub fn get_col(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Value>> {
        Ok(self
            .get_all(sql, bindings)?
            .into_iter()
            .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
            .collect())
    }
    /// The first column keyed to the second, or to itself when only one
    /// column is selected. Keys are rendered as text; a repeated key keeps
    /// the last row.
    pub fn get_assoc(&self, sql: &str, bindings: &[Value]) -> Result<BTreeMap<String, Value>> {
        let mut assoc = BTreeMap::new();
        for row in self.get_all(sql, bindings)? {
            let mut columns = row.into_iter().map(|(_, value)| value);
            let Some(key) = columns.next() else {
                continue;
            };
            let value = columns.next().unwrap_or_else(|| key.clone());
            assoc.insert(key.to_string(), value);
        }
        Ok(assoc)
    }
    /// Whole rows keyed by their first column, rendered as text.
    pub fn get_assoc_row(&self, sql: &str, bindings: &[Value]) -> Result<BTreeMap<String, Row>> {
        let mut assoc = BTreeMap::new();
        for row in self.get_all(sql, bindings)? {
            let Some(key) = row.first().map(|(_, value)| value.to_string()) else {
                continue;
            };
            assoc.insert(key, row);
        }
        Ok(assoc)
    }
    /// The first column of the first row, `Null` when there is none.
    pub fn get_cell(&self, sql: &str, bindings: &[Value]) -> Result<Value> {
        Ok(self.get_col(sql, bindings)?.into_iter().next().unwrap_or(Value::Null))
    }

    // ------------- Schema -------------
    /// Every table in the backend.
    pub fn inspect(&self) -> Result<Vec<String>> {
        self.backend.get_tables()
    }
    pub fn get_columns(&self, kind: &str) -> Result<Vec<(String, String)>> {
        check_identifier(kind)?;
        Ok(self.backend.get_columns(kind)?.into_iter().collect())
    }
    /// Drops every table. Only in fluid mode; returns whether it happened.
    pub fn nuke(&self) -> Result<bool> {
        if !self.config.mode.is_fluid() {
            return Ok(false);
        }
        warn!("dropping every table");
        self.backend.wipe_all()?;
        Ok(true)
    }

    /// Turns rows of `kind` into beans; the `id` column becomes the key.
    pub fn convert_to_beans(&self, kind: &str, rows: Vec<Row>) -> Vec<Bean> {
        rows.into_iter().map(|row| bean_from_row(kind, row)).collect()
    }
}

// Holds one level of transaction() and gives it back when dropped, so a
// panicking closure cannot leave the context nested forever. An outermost
// level left by unwinding rolls back.
struct Nesting<'d> {
    db: &'d Database,
    depth: usize,
}

impl<'d> Nesting<'d> {
    fn enter(db: &'d Database, depth: usize) -> Self {
        db.depth.set(depth + 1);
        Self { db, depth }
    }
}

impl Drop for Nesting<'_> {
    fn drop(&mut self) {
        self.db.depth.set(self.depth);
        if self.depth == 0 && std::thread::panicking() {
            if let Err(e) = self.db.rollback() {
                warn!(error = %e, "rollback after panic failed");
            }
        }
    }
}

pub(crate) fn bean_from_row(kind: &str, row: Row) -> Bean {
    let mut bean = Bean::new(kind);
    for (column, value) in row {
        bean.set(&column, value);
    }
    bean.untaint();
    bean
}

/// Where a caller's SQL snippet lands in a statement.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Glue {
    /// The statement has no condition yet.
    Where,
    /// The statement already has a condition.
    And,
}

const TRAILING_CLAUSES: [&str; 4] = ["order by", "limit", "group by", "having"];

/// Appends a snippet, prefixing `WHERE`/`AND` unless it is a trailing clause.
pub(crate) fn glue(sql: &str, glue: Glue) -> String {
    let snippet = sql.trim();
    if snippet.is_empty() {
        return String::new();
    }
    let lower = snippet.to_lowercase();
    let lower = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    if TRAILING_CLAUSES.iter().any(|clause| lower.starts_with(clause)) {
        return format!(" {}", snippet);
    }
    match glue {
        Glue::Where => format!(" where {}", snippet),
        Glue::And => format!(" and {}", snippet),
    }
}

/// `?, ?, ?` for `amount` bindings.
pub(crate) fn placeholders(amount: usize) -> String {
    vec!["?"; amount].join(", ")
}

/// Whether a snippet pins down an order.
pub(crate) fn has_order(sql: &str) -> bool {
    sql.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .windows(2)
        .any(|w| w == ["order", "by"])
}
