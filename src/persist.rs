//! The backend seam and its SQLite implementation.
//!
//! The engine only talks to a backend through two traits: [`Adapter`] executes
//! statements and [`QueryWriter`] reads and changes the schema. The
//! [`Persistor`] implements both on top of a `rusqlite` connection.
//!
//! SQLite cannot retype a column, so widening rebuilds the table under a
//! savepoint. The rebuild keeps the rows, the `autoincrement` counter, each
//! column's `not null` and `default`, and the table's indexes. Check
//! constraints, foreign keys and triggers declared on the table are not
//! carried over.

// used for persistence
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crate::datatype::{TypeRank, Value};
use crate::error::Result;

/// A result row: column names with their values, in select order.
pub type Row = Vec<(String, Value)>;

/// Executes statements.
pub trait Adapter {
    fn execute(&self, sql: &str, bindings: &[Value]) -> Result<usize>;
    fn query(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>>;
    fn last_insert_id(&self) -> i64;
    fn begin_transaction(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

/// Reads and changes the schema. Identifiers reaching a writer have already
/// been validated.
pub trait QueryWriter {
    fn get_tables(&self) -> Result<Vec<String>>;
    /// Column name to declared type; empty when the table does not exist.
    fn get_columns(&self, table: &str) -> Result<BTreeMap<String, String>>;
    fn create_table(&self, table: &str) -> Result<()>;
    fn add_column(&self, table: &str, column: &str, rank: TypeRank) -> Result<()>;
    fn widen_column(&self, table: &str, column: &str, rank: TypeRank) -> Result<()>;
    /// Removes every row of a table.
    fn wipe(&self, table: &str) -> Result<()>;
    /// Drops every table.
    fn wipe_all(&self) -> Result<()>;
}

pub trait Backend: Adapter + QueryWriter {
    fn writer(&self) -> &dyn QueryWriter;
}
impl<T: Adapter + QueryWriter> Backend for T {
    fn writer(&self) -> &dyn QueryWriter {
        self
    }
}

/// Quotes an identifier for use in a statement.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

// a column as `pragma table_info` reports it
struct Column {
    name: String,
    declared: String,
    not_null: bool,
    default: Option<String>,
}

impl Column {
    fn definition(&self, declared: &str) -> String {
        let mut definition = format!("{} {}", quote(&self.name), declared);
        if self.not_null {
            definition.push_str(" not null");
        }
        if let Some(default) = &self.default {
            definition.push_str(&format!(" default ({})", default));
        }
        definition
    }
}

// ------------- Persistence -------------
pub enum PersistenceMode {
    InMemory,
    File(String),
}

pub struct Persistor {
    pub db: Connection,
}

impl Persistor {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        let db = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        Ok(Self::from_connection(db))
    }
    pub fn from_connection(db: Connection) -> Self {
        Self { db }
    }
    // columns as declared, in table order
    fn column_list(&self, table: &str) -> Result<Vec<Column>> {
        let mut statement = self
            .db
            .prepare(&format!("pragma table_info({})", quote(table)))?;
        let columns = statement
            .query_map([], |row| {
                Ok(Column {
                    name: row.get(1)?,
                    declared: row.get(2)?,
                    not_null: row.get(3)?,
                    default: match row.get::<_, Value>(4)? {
                        Value::Null => None,
                        expression => Some(expression.to_string()),
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
    // index definitions, recreated after a rebuild
    fn index_list(&self, table: &str) -> Result<Vec<String>> {
        let mut statement = self.db.prepare(
            "
            select sql
                from sqlite_master
                where type = 'index'
                and tbl_name = ?
                and sql is not null
            ",
        )?;
        let indexes = statement
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(indexes)
    }
    // Runs `work` under a savepoint; on failure nothing it did remains.
    fn atomically(&self, name: &str, work: impl FnOnce() -> Result<()>) -> Result<()> {
        self.db.execute_batch(&format!("savepoint {}", name))?;
        match work() {
            Ok(()) => {
                self.db.execute_batch(&format!("release {}", name))?;
                Ok(())
            }
            Err(e) => {
                if let Err(undo) = self
                    .db
                    .execute_batch(&format!("rollback to {name}; release {name}"))
                {
                    warn!(error = %undo, savepoint = name, "rollback to savepoint failed");
                }
                Err(e)
            }
        }
    }
    fn rebuild(&self, table: &str, column: &str, rank: TypeRank) -> Result<()> {
        let columns = self.column_list(table)?;
        let indexes = self.index_list(table)?;
        let temporary = format!("{}_widen", table);
        let mut definitions = Vec::new();
        let mut names = Vec::new();
        for current in &columns {
            names.push(quote(&current.name));
            if current.name == "id" {
                definitions.push(format!("{} integer primary key autoincrement", quote("id")));
            } else if current.name == column {
                definitions.push(current.definition(rank.declared()));
            } else {
                definitions.push(current.definition(&current.declared));
            }
        }
        let names = names.join(", ");
        self.ddl(&format!(
            "create table {} ({})",
            quote(&temporary),
            definitions.join(", ")
        ))?;
        // the counter outlives deleted rows; max(id) alone would hand them out again
        let sequence: Option<i64> = self
            .db
            .query_row(
                "select seq from sqlite_sequence where name = ?",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        self.ddl(&format!(
            "insert into {} ({}) select {} from {}",
            quote(&temporary),
            names,
            names,
            quote(table)
        ))?;
        self.ddl(&format!("drop table {}", quote(table)))?;
        self.ddl(&format!(
            "alter table {} rename to {}",
            quote(&temporary),
            quote(table)
        ))?;
        if let Some(sequence) = sequence {
            self.db.execute(
                "delete from sqlite_sequence where name in (?1, ?2)",
                params![table, temporary],
            )?;
            self.db.execute(
                "insert into sqlite_sequence (name, seq) values (?1, ?2)",
                params![table, sequence],
            )?;
        }
        for index in indexes {
            self.ddl(&index)?;
        }
        Ok(())
    }
    fn ddl(&self, sql: &str) -> Result<()> {
        debug!(%sql, "schema change");
        self.db.execute_batch(sql)?;
        Ok(())
    }
}

impl Adapter for Persistor {
    fn execute(&self, sql: &str, bindings: &[Value]) -> Result<usize> {
        trace!(%sql, bindings = bindings.len(), "execute");
        let mut statement = self.db.prepare(sql)?;
        Ok(statement.execute(params_from_iter(bindings.iter()))?)
    }
    fn query(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        trace!(%sql, bindings = bindings.len(), "query");
        let mut statement = self.db.prepare(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let mut rows = statement.query(params_from_iter(bindings.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                record.push((column.clone(), row.get::<_, Value>(i)?));
            }
            result.push(record);
        }
        Ok(result)
    }
    fn last_insert_id(&self) -> i64 {
        self.db.last_insert_rowid()
    }
    fn begin_transaction(&self) -> Result<()> {
        self.db.execute_batch("begin transaction")?;
        Ok(())
    }
    fn commit(&self) -> Result<()> {
        self.db.execute_batch("commit")?;
        Ok(())
    }
    fn rollback(&self) -> Result<()> {
        self.db.execute_batch("rollback")?;
        Ok(())
    }
}

impl QueryWriter for Persistor {
    fn get_tables(&self) -> Result<Vec<String>> {
        let mut statement = self.db.prepare(
            "
            select name
                from sqlite_master
                where type = 'table'
                and name not like 'sqlite\\_%' escape '\\'
                order by name
            ",
        )?;
        let tables = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }
    fn get_columns(&self, table: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .column_list(table)?
            .into_iter()
            .map(|column| (column.name, column.declared))
            .collect())
    }
    fn create_table(&self, table: &str) -> Result<()> {
        self.ddl(&format!(
            "create table {} (\"id\" integer primary key autoincrement)",
            quote(table)
        ))
    }
    fn add_column(&self, table: &str, column: &str, rank: TypeRank) -> Result<()> {
        self.ddl(&format!(
            "alter table {} add column {} {}",
            quote(table),
            quote(column),
            rank.declared()
        ))
    }
    fn widen_column(&self, table: &str, column: &str, rank: TypeRank) -> Result<()> {
        self.atomically("widen", || self.rebuild(table, column, rank))
    }
    fn wipe(&self, table: &str) -> Result<()> {
        self.db
            .execute(&format!("delete from {}", quote(table)), [])?;
        Ok(())
    }
    fn wipe_all(&self) -> Result<()> {
        for table in self.get_tables()? {
            self.ddl(&format!("drop table if exists {}", quote(&table)))?;
        }
        Ok(())
    }
}
