//! The bean lifecycle: dispense, store, load and trash, including the
//! cascades into parents, owned lists and shared lists.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;
use tracing::{debug, info, trace};

use crate::bean::{foreign_key, Bean};
use crate::database::{bean_from_row, glue, has_order, placeholders, Database, Glue};
use crate::datatype::Value;
use crate::error::{BeanbaseError, Result};
use crate::persist::quote;
use crate::schema::{check_identifier, check_type, Synchronizer};

/// The list types a bean type takes part in, as found in the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations {
    /// Types whose table carries a `<type>_id` column.
    pub owned: Vec<String>,
    /// Types sharing a link table with the type.
    pub shared: Vec<String>,
}

pub(crate) const BY_ID: &str = "order by \"id\"";

// a link table is named after two existing tables joined by an underscore
fn split_link<'t>(table: &'t str, tables: &BTreeSet<String>) -> Option<(&'t str, &'t str)> {
    table
        .match_indices('_')
        .map(|(at, _)| (&table[..at], &table[at + 1..]))
        .find(|(a, b)| tables.contains(*a) && tables.contains(*b))
}

impl Database {
    // ------------- Dispense -------------
    pub fn dispense(&self, kind: &str) -> Result<Bean> {
        check_type(kind, self.config().strict_type_names)?;
        Ok(Bean::new(kind))
    }
    pub fn dispense_many(&self, kind: &str, amount: usize) -> Result<Vec<Bean>> {
        (0..amount).map(|_| self.dispense(kind)).collect()
    }
    /// Dispenses from an order like `"book,page*3"`, one list per entry.
    pub fn dispense_all(&self, order: &str) -> Result<Vec<Vec<Bean>>> {
        order
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (kind, amount) = match entry.split_once('*') {
                    Some((kind, amount)) => match amount.trim().parse::<usize>() {
                        Ok(amount) if amount > 0 => (kind.trim(), amount),
                        _ => {
                            return Err(BeanbaseError::validation(format!(
                                "invalid amount in '{}'",
                                entry
                            )));
                        }
                    },
                    None => (entry, 1),
                };
                self.dispense_many(kind, amount)
            })
            .collect()
    }

    // ------------- Store -------------
    /// Writes a bean and everything hanging off it. Returns the id, which is
    /// also set on the bean when it was inserted.
    pub fn store(&self, bean: &mut Bean) -> Result<i64> {
        if bean.is_stub() {
            return Ok(bean.id());
        }
        check_type(bean.kind(), false)?;

        let mut parents = bean.take_parents();
        let stored = self.store_parents(bean, &mut parents);
        bean.restore_parents(parents);
        stored?;

        self.store_row(bean)?;

        let mut owned = bean.take_owned();
        let stored = self.store_owned(bean, &mut owned);
        let kinds: Vec<String> = owned.keys().cloned().collect();
        bean.restore_owned(owned);
        stored?;
        for kind in &kinds {
            bean.remember_own(kind);
        }

        let mut shared = bean.take_shared();
        let stored = self.store_shared(bean, &mut shared);
        let kinds: Vec<String> = shared.keys().cloned().collect();
        bean.restore_shared(shared);
        stored?;
        for kind in &kinds {
            bean.remember_shared(kind);
        }

        bean.untaint();
        trace!(kind = bean.kind(), id = bean.id(), "stored");
        Ok(bean.id())
    }

    pub fn store_all(&self, beans: &mut [Bean]) -> Result<Vec<i64>> {
        beans.iter_mut().map(|bean| self.store(bean)).collect()
    }

    /// Exchanges the values of `property` between two beans and stores both.
    pub fn swap(&self, a: &mut Bean, b: &mut Bean, property: &str) -> Result<()> {
        check_identifier(property)?;
        let first = a.get(property).clone();
        let second = b.get(property).clone();
        a.set(property, second);
        b.set(property, first);
        self.transaction(|db| {
            db.store(a)?;
            db.store(b)
        })?;
        debug!(kind = a.kind(), a = a.id(), b = b.id(), %property, "swapped");
        Ok(())
    }

    fn store_parents(&self, bean: &mut Bean, parents: &mut BTreeMap<String, Bean>) -> Result<()> {
        for (name, parent) in parents.iter_mut() {
            check_identifier(name)?;
            if parent.is_new() || parent.is_tainted() {
                self.store(parent)?;
            }
            bean.set(&foreign_key(name), parent.id());
        }
        Ok(())
    }

    /// Writes the scalars of a bean as one insert or update, after making
    /// the table fit them.
    pub(crate) fn store_row(&self, bean: &mut Bean) -> Result<()> {
        let table = bean.kind().to_owned();
        Synchronizer::new(self.backend().writer()).ensure_compatible(
            &table,
            bean.properties(),
            &self.config().mode,
        )?;
        let columns: Vec<String> = bean.properties().keys().map(|c| quote(c)).collect();
        let mut values: Vec<Value> = bean.properties().values().cloned().collect();
        if bean.is_new() {
            let sql = if columns.is_empty() {
                format!("insert into {} default values", quote(&table))
            } else {
                format!(
                    "insert into {} ({}) values ({})",
                    quote(&table),
                    columns.join(", "),
                    placeholders(columns.len())
                )
            };
            self.backend().execute(&sql, &values)?;
            let id = self.backend().last_insert_id();
            bean.set_id(id);
            debug!(%table, id, "inserted");
        } else if !columns.is_empty() {
            let assignments = columns
                .iter()
                .map(|column| format!("{} = ?", column))
                .collect::<Vec<_>>()
                .join(", ");
            values.push(Value::Integer(bean.id()));
            self.backend().execute(
                &format!("update {} set {} where \"id\" = ?", quote(&table), assignments),
                &values,
            )?;
            debug!(%table, id = bean.id(), "updated");
        }
        Ok(())
    }

    fn store_owned(&self, bean: &Bean, owned: &mut BTreeMap<String, Vec<Bean>>) -> Result<()> {
        let key = foreign_key(bean.kind());
        for (kind, children) in owned.iter_mut() {
            check_type(kind, false)?;
            for child in children.iter_mut() {
                if child.kind() != kind {
                    return Err(BeanbaseError::validation(format!(
                        "a '{}' bean cannot be in the owned list of '{}'",
                        child.kind(),
                        kind
                    )));
                }
                if child.is_stub() {
                    continue;
                }
                child.set(&key, bean.id());
                self.store(child)?;
            }
            let kept: BTreeSet<i64> = children.iter().map(Bean::id).collect();
            let dependent = self.config().is_dependent(kind, bean.kind());
            for id in bean.own_shadow(kind).iter().filter(|id| !kept.contains(*id)) {
                if dependent {
                    debug!(%kind, id, owner = bean.kind(), "dropped dependent trashed");
                    self.trash_by_id(kind, *id)?;
                } else {
                    debug!(%kind, id, owner = bean.kind(), "dropped child released");
                    self.tolerate(self.backend().execute(
                        &format!(
                            "update {} set {} = null where \"id\" = ?",
                            quote(kind),
                            quote(&key)
                        ),
                        &[Value::Integer(*id)],
                    ))?;
                }
            }
        }
        Ok(())
    }

    fn store_shared(&self, bean: &Bean, shared: &mut BTreeMap<String, Vec<Bean>>) -> Result<()> {
        for (kind, members) in shared.iter_mut() {
            check_type(kind, false)?;
            for member in members.iter_mut() {
                if member.kind() != kind {
                    return Err(BeanbaseError::validation(format!(
                        "a '{}' bean cannot be in the shared list of '{}'",
                        member.kind(),
                        kind
                    )));
                }
                if !member.is_stub() && (member.is_new() || member.is_tainted()) {
                    self.store(member)?;
                }
            }
            let mut linked = self.linked_ids(bean, kind)?;
            for member in members.iter() {
                if linked.insert(member.id()) {
                    self.insert_link(bean.kind(), bean.id(), kind, member.id(), None)?;
                }
            }
            let current: BTreeSet<i64> = members.iter().map(Bean::id).collect();
            for id in bean.shared_shadow(kind).iter().filter(|id| !current.contains(*id)) {
                self.delete_links(bean.kind(), bean.id(), kind, *id)?;
            }
        }
        Ok(())
    }

    // ------------- Load -------------
    /// The stored bean, or a fresh one with id 0 when there is no such row.
    pub fn load(&self, kind: &str, id: i64) -> Result<Bean> {
        check_type(kind, false)?;
        let row = self.get_row(
            &format!("select * from {} where \"id\" = ? limit 1", quote(kind)),
            &[Value::Integer(id)],
        )?;
        Ok(match row {
            Some(row) => bean_from_row(kind, row),
            None => {
                trace!(%kind, id, "not found");
                Bean::new(kind)
            }
        })
    }

    /// Loads the same id from several tables, for one-to-one records.
    pub fn load_multi(&self, kinds: &[&str], id: i64) -> Result<Vec<Bean>> {
        kinds.iter().map(|kind| self.load(kind, id)).collect()
    }

    /// Loads many beans in one query. The result follows `ids`, with a fresh
    /// bean where a row is missing.
    pub fn batch(&self, kind: &str, ids: &[i64]) -> Result<Vec<Bean>> {
        check_type(kind, false)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let bindings: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
        let rows = self.get_all(
            &format!(
                "select * from {} where \"id\" in ({})",
                quote(kind),
                placeholders(ids.len())
            ),
            &bindings,
        )?;
        let found: BTreeMap<i64, Bean> = rows
            .into_iter()
            .map(|row| bean_from_row(kind, row))
            .map(|bean| (bean.id(), bean))
            .collect();
        Ok(ids
            .iter()
            .map(|id| found.get(id).cloned().unwrap_or_else(|| Bean::new(kind)))
            .collect())
    }

    pub fn load_all(&self, kind: &str, ids: &[i64]) -> Result<Vec<Bean>> {
        self.batch(kind, ids)
    }

    // ------------- Trash -------------
    /// Deletes a bean and resets its id. Owned children are trashed when they
    /// depend on it and released otherwise; links are left alone.
    pub fn trash(&self, bean: &mut Bean) -> Result<()> {
        check_type(bean.kind(), false)?;
        if bean.is_new() {
            return Ok(());
        }
        self.trash_by_id(bean.kind(), bean.id())?;
        bean.set_id(0);
        Ok(())
    }

    pub fn trash_all(&self, beans: &mut [Bean]) -> Result<()> {
        for bean in beans.iter_mut() {
            self.trash(bean)?;
        }
        Ok(())
    }

    pub(crate) fn trash_by_id(&self, kind: &str, id: i64) -> Result<()> {
        self.tolerate(self.backend().execute(
            &format!("delete from {} where \"id\" = ?", quote(kind)),
            &[Value::Integer(id)],
        ))?;
        debug!(%kind, id, "trashed");
        let key = foreign_key(kind);
        for child in self.relations_of(kind)?.owned {
            if self.config().is_dependent(&child, kind) {
                let ids = self.get_col(
                    &format!("select \"id\" from {} where {} = ?", quote(&child), quote(&key)),
                    &[Value::Integer(id)],
                )?;
                for child_id in ids.iter().filter_map(Value::as_i64) {
                    self.trash_by_id(&child, child_id)?;
                }
            } else {
                self.tolerate(self.backend().execute(
                    &format!(
                        "update {} set {} = null where {} = ?",
                        quote(&child),
                        quote(&key),
                        quote(&key)
                    ),
                    &[Value::Integer(id)],
                ))?;
            }
        }
        Ok(())
    }

    // ------------- Count and wipe -------------
    pub fn count(&self, kind: &str, sql: &str, bindings: &[Value]) -> Result<i64> {
        check_type(kind, false)?;
        let cell = self.get_cell(
            &format!("select count(*) from {}{}", quote(kind), glue(sql, Glue::Where)),
            bindings,
        )?;
        Ok(cell.as_i64().unwrap_or(0))
    }

    /// Empties a table. Does nothing for frozen types or missing tables.
    pub fn wipe(&self, kind: &str) -> Result<bool> {
        check_type(kind, false)?;
        if self.is_frozen(kind) || self.backend().get_columns(kind)?.is_empty() {
            return Ok(false);
        }
        self.backend().wipe(kind)?;
        info!(%kind, "wiped");
        Ok(true)
    }

    // ------------- Opening lists -------------
    /// Fills the owned list of `kind` from storage, in id order.
    pub fn open_own<'b>(&self, bean: &'b mut Bean, kind: &str) -> Result<&'b [Bean]> {
        self.open_own_where(bean, kind, BY_ID, &[])
    }

    /// Fills the owned list of `kind` with the children matching a snippet.
    /// Only those children are tracked, so storing the bean can release or
    /// trash nothing else.
    pub fn open_own_where<'b>(
        &self,
        bean: &'b mut Bean,
        kind: &str,
        sql: &str,
        bindings: &[Value],
    ) -> Result<&'b [Bean]> {
        check_type(kind, false)?;
        let children = self.owned_children(bean, kind, sql, bindings)?;
        bean.open_own_list(kind, children);
        Ok(bean.own(kind))
    }

    /// Fills the shared list of `kind` from storage.
    pub fn open_shared<'b>(&self, bean: &'b mut Bean, kind: &str) -> Result<&'b [Bean]> {
        check_type(kind, false)?;
        let members = self.related(bean, kind, "", &[])?;
        bean.open_shared_list(kind, members);
        Ok(bean.shared(kind))
    }

    /// Loads the parent referenced by `<name>_id`, a bean of type `name`.
    pub fn open_parent<'b>(&self, bean: &'b mut Bean, name: &str) -> Result<Option<&'b Bean>> {
        self.open_parent_as(bean, name, name)
    }

    /// Loads the parent referenced by `<name>_id` as a bean of type `kind`,
    /// for references named after their role (`author_id` pointing at `person`).
    pub fn open_parent_as<'b>(
        &self,
        bean: &'b mut Bean,
        name: &str,
        kind: &str,
    ) -> Result<Option<&'b Bean>> {
        check_identifier(name)?;
        let id = match bean.get(&foreign_key(name)).as_i64() {
            Some(id) if id != 0 => id,
            _ => return Ok(None),
        };
        let parent = self.load(kind, id)?;
        if parent.is_new() {
            return Ok(None);
        }
        bean.attach_parent(name, parent);
        Ok(bean.parent(name))
    }

    pub(crate) fn owned_children(
        &self,
        bean: &Bean,
        kind: &str,
        sql: &str,
        bindings: &[Value],
    ) -> Result<Vec<Bean>> {
        if bean.is_new() {
            return Ok(Vec::new());
        }
        let mut values = Vec::with_capacity(bindings.len() + 1);
        values.push(Value::Integer(bean.id()));
        values.extend_from_slice(bindings);
        let rows = self.get_all(
            &format!(
                "select * from {} where {} = ?{}",
                quote(kind),
                quote(&foreign_key(bean.kind())),
                glue(sql, Glue::And)
            ),
            &values,
        )?;
        Ok(self.convert_to_beans(kind, rows))
    }

    // ------------- Finders -------------
    pub fn find(&self, kind: &str, sql: &str, bindings: &[Value]) -> Result<Vec<Bean>> {
        check_type(kind, false)?;
        let rows = self.get_all(
            &format!("select * from {}{}", quote(kind), glue(sql, Glue::Where)),
            bindings,
        )?;
        Ok(self.convert_to_beans(kind, rows))
    }
    pub fn find_one(&self, kind: &str, sql: &str, bindings: &[Value]) -> Result<Option<Bean>> {
        Ok(self.find(kind, sql, bindings)?.into_iter().next())
    }
    /// The last match. Without an `ORDER BY` there is no last one.
    pub fn find_last(&self, kind: &str, sql: &str, bindings: &[Value]) -> Result<Option<Bean>> {
        if !has_order(sql) {
            return Err(BeanbaseError::validation(
                "find_last needs an ORDER BY to know which bean is last",
            ));
        }
        Ok(self.find(kind, sql, bindings)?.pop())
    }
    /// The matches, or a single fresh bean when nothing matches.
    pub fn find_or_dispense(&self, kind: &str, sql: &str, bindings: &[Value]) -> Result<Vec<Bean>> {
        let found = self.find(kind, sql, bindings)?;
        if found.is_empty() {
            return Ok(vec![self.dispense(kind)?]);
        }
        Ok(found)
    }
    pub fn find_and_export(&self, kind: &str, sql: &str, bindings: &[Value]) -> Result<Vec<Json>> {
        let found = self.find(kind, sql, bindings)?;
        self.export_all(&found, false, &[])
    }

    // ------------- Reflection -------------
    /// Which types own beans of `kind` or share link tables with it.
    pub fn relations_of(&self, kind: &str) -> Result<Relations> {
        let tables: BTreeSet<String> = self.inspect()?.into_iter().collect();
        let key = foreign_key(kind);
        let mut relations = Relations::default();
        for table in &tables {
            if let Some((a, b)) = split_link(table, &tables) {
                if a == kind {
                    relations.shared.push(b.to_owned());
                } else if b == kind {
                    relations.shared.push(a.to_owned());
                }
                continue;
            }
            if self.backend().get_columns(table)?.contains_key(&key) {
                relations.owned.push(table.clone());
            }
        }
        Ok(relations)
    }
}
