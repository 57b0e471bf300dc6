//! Schema synchronization: makes a table fit the bean about to be written.
//!
//! A plan is computed first and only applied once the mode allows every step
//! of it, so a frozen rejection never leaves a half-changed table behind.
//! Two contexts widening the same column at the same time is not guarded
//! against; callers sharing a backend must serialize their writes.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::Mode;
use crate::datatype::{infer, rank_of, widen, TypeRank, Value};
use crate::error::{BeanbaseError, Result};
use crate::persist::QueryWriter;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[a-z0-9_]+$").expect("identifier pattern");
    static ref STRICT_TYPE: Regex = Regex::new(r"^[a-z0-9]+$").expect("type pattern");
}

/// Rejects anything that could not be a table or column name.
pub fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(BeanbaseError::validation(format!(
            "invalid identifier: '{}'",
            name
        )))
    }
}

/// Bean types are identifiers; strict typing also forbids underscores.
pub fn check_type(kind: &str, strict: bool) -> Result<()> {
    if strict && !STRICT_TYPE.is_match(kind) {
        return Err(BeanbaseError::validation(format!("invalid type: '{}'", kind)));
    }
    check_identifier(kind)
}

// ------------- Action -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateTable,
    AddColumn { column: String, rank: TypeRank },
    WidenColumn { column: String, from: TypeRank, to: TypeRank },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::CreateTable => write!(f, "create table"),
            Action::AddColumn { column, rank } => write!(f, "add column {} as {}", column, rank),
            Action::WidenColumn { column, from, to } => {
                write!(f, "widen column {} from {} to {}", column, from, to)
            }
        }
    }
}

// ------------- Synchronizer -------------
pub struct Synchronizer<'w> {
    writer: &'w dyn QueryWriter,
}

impl<'w> Synchronizer<'w> {
    pub fn new(writer: &'w dyn QueryWriter) -> Self {
        Self { writer }
    }

    /// What `table` needs before `properties` can be written to it.
    pub fn plan(&self, table: &str, properties: &BTreeMap<String, Value>) -> Result<Vec<Action>> {
        check_identifier(table)?;
        let columns = self.writer.get_columns(table)?;
        let mut actions = Vec::new();
        // every table has an id column, so no columns means no table
        if columns.is_empty() {
            actions.push(Action::CreateTable);
        }
        for (name, value) in properties {
            check_identifier(name)?;
            if name == "id" {
                continue;
            }
            let required = infer(value);
            match columns.get(name) {
                None => actions.push(Action::AddColumn {
                    column: name.clone(),
                    rank: widen(required, TypeRank::Bool),
                }),
                Some(declared) => {
                    let current = rank_of(declared);
                    if required > current {
                        actions.push(Action::WidenColumn {
                            column: name.clone(),
                            from: current,
                            to: widen(current, required),
                        });
                    }
                }
            }
        }
        Ok(actions)
    }

    /// Plans and, when `mode` allows it, applies the changes `table` needs.
    /// Returns what was applied.
    pub fn ensure_compatible(
        &self,
        table: &str,
        properties: &BTreeMap<String, Value>,
        mode: &Mode,
    ) -> Result<Vec<Action>> {
        let actions = self.plan(table, properties)?;
        if actions.is_empty() {
            return Ok(actions);
        }
        if mode.is_frozen(table) {
            warn!(%table, first = %actions[0], "schema change refused");
            return Err(BeanbaseError::schema(
                table,
                format!(
                    "'{}' is frozen but needs: {}",
                    table,
                    actions
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        self.apply(table, &actions)?;
        Ok(actions)
    }

    pub fn apply(&self, table: &str, actions: &[Action]) -> Result<()> {
        for action in actions {
            debug!(%table, %action, "synchronizing");
            match action {
                Action::CreateTable => self.writer.create_table(table)?,
                Action::AddColumn { column, rank } => {
                    self.writer.add_column(table, column, *rank)?
                }
                Action::WidenColumn { column, to, .. } => {
                    self.writer.widen_column(table, column, *to)?
                }
            }
        }
        Ok(())
    }
}
