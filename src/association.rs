//! Many-to-many associations.
//!
//! Two bean types share one link table named after the sorted pair
//! (`book_tag`), holding a `<type>_id` column for each side. A type linked
//! to itself uses `<type>_id` and `<type>2_id`, and a link may then be
//! stored in either orientation, so every lookup checks both.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::bean::{foreign_key, Bean};
use crate::database::{bean_from_row, glue, has_order, placeholders, Database, Glue};
use crate::datatype::Value;
use crate::error::{BeanbaseError, Result};
use crate::persist::quote;
use crate::schema::{check_identifier, check_type};

// carries the source id through a related() query
const LINKED_BY: &str = "linked:by";

/// The link table between two types, the same whichever comes first.
pub fn link_table(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort();
    pair.join("_")
}

/// The columns of the link table holding the ids of `from` and `to`.
pub fn link_columns(from: &str, to: &str) -> (String, String) {
    if from == to {
        (foreign_key(from), format!("{}2_id", to))
    } else {
        (foreign_key(from), foreign_key(to))
    }
}

// matches the link rows of one pair, in both orientations for self-links
fn pair_condition(from: &str, from_id: i64, to: &str, to_id: i64) -> (String, Vec<Value>) {
    let (a, b) = link_columns(from, to);
    let (a, b) = (quote(&a), quote(&b));
    if from == to {
        (
            format!("({a} = ? and {b} = ?) or ({a} = ? and {b} = ?)"),
            vec![
                Value::Integer(from_id),
                Value::Integer(to_id),
                Value::Integer(to_id),
                Value::Integer(from_id),
            ],
        )
    } else {
        (format!("{a} = ? and {b} = ?"), vec![Value::Integer(from_id), Value::Integer(to_id)])
    }
}

// beans of `target` linked to any of `ids` of `source`, with the source id
// in the LINKED_BY column
fn related_query(source: &str, ids: usize, target: &str) -> String {
    let link = quote(&link_table(source, target));
    let (source_column, target_column) = link_columns(source, target);
    let select = |from: &str, to: &str| {
        format!(
            "select \"t\".*, \"l\".{from} as {by} from {table} as \"t\" \
             inner join {link} as \"l\" on \"l\".{to} = \"t\".\"id\" \
             where \"l\".{from} in ({marks})",
            from = quote(from),
            to = quote(to),
            by = quote(LINKED_BY),
            table = quote(target),
            link = link,
            marks = placeholders(ids),
        )
    };
    if source == target {
        format!(
            "{} union all {}",
            select(&source_column, &target_column),
            select(&target_column, &source_column)
        )
    } else {
        select(&source_column, &target_column)
    }
}

impl Database {
    // ------------- Linking -------------
    /// Links two beans, storing either first when it is new. Scalars of
    /// `extra` become columns of the link row. Returns the link row id.
    pub fn link(&self, a: &mut Bean, b: &mut Bean, extra: Option<&Bean>) -> Result<i64> {
        if a.is_new() {
            self.store(a)?;
        }
        if b.is_new() {
            self.store(b)?;
        }
        if self.config().unique_links {
            if let Some(id) = self.link_id(a, b)? {
                debug!(from = a.kind(), to = b.kind(), link = id, "already linked");
                return Ok(id);
            }
        }
        self.insert_link(a.kind(), a.id(), b.kind(), b.id(), extra)
    }

    /// Links every bean of `left` to every bean of `right` and returns the
    /// link row ids in that order.
    pub fn associate(
        &self,
        left: &mut [Bean],
        right: &mut [Bean],
        extra: Option<&Bean>,
    ) -> Result<Vec<i64>> {
        let mut links = Vec::with_capacity(left.len() * right.len());
        for a in left.iter_mut() {
            for b in right.iter_mut() {
                links.push(self.link(a, b, extra)?);
            }
        }
        Ok(links)
    }

    /// Unlinks every pair across `left` and `right`; returns how many link
    /// rows went.
    pub fn unassociate(&self, left: &[Bean], right: &[Bean], fast: bool) -> Result<usize> {
        let mut removed = 0;
        for a in left {
            for b in right {
                removed += self.unlink(a, b, fast)?;
            }
        }
        Ok(removed)
    }

    pub(crate) fn insert_link(
        &self,
        from: &str,
        from_id: i64,
        to: &str,
        to_id: i64,
        extra: Option<&Bean>,
    ) -> Result<i64> {
        let table = link_table(from, to);
        check_identifier(&table)?;
        let (from_column, to_column) = link_columns(from, to);
        let mut row = Bean::new(&table);
        if let Some(extra) = extra {
            for (name, value) in extra.properties() {
                if *name != from_column && *name != to_column {
                    row.set(name, value.clone());
                }
            }
        }
        row.set(&from_column, from_id).set(&to_column, to_id);
        self.store_row(&mut row)?;
        debug!(%table, from_id, to_id, link = row.id(), "linked");
        Ok(row.id())
    }

    /// Removes the links between two beans and returns how many went.
    /// Unless `fast`, an existing link is checked for first.
    pub fn unlink(&self, a: &Bean, b: &Bean, fast: bool) -> Result<usize> {
        if a.is_new() || b.is_new() {
            return Ok(0);
        }
        if !fast && !self.are_related(a, b)? {
            return Ok(0);
        }
        self.delete_links(a.kind(), a.id(), b.kind(), b.id())
    }

    pub(crate) fn delete_links(&self, from: &str, from_id: i64, to: &str, to_id: i64) -> Result<usize> {
        let table = link_table(from, to);
        let (condition, bindings) = pair_condition(from, from_id, to, to_id);
        let removed = self.exec(
            &format!("delete from {} where {}", quote(&table), condition),
            &bindings,
        )?;
        debug!(%table, from_id, to_id, removed, "unlinked");
        Ok(removed)
    }

    fn link_id(&self, a: &Bean, b: &Bean) -> Result<Option<i64>> {
        let (condition, bindings) = pair_condition(a.kind(), a.id(), b.kind(), b.id());
        let cell = self.get_cell(
            &format!(
                "select \"id\" from {} where {} limit 1",
                quote(&link_table(a.kind(), b.kind())),
                condition
            ),
            &bindings,
        )?;
        Ok(cell.as_i64())
    }

    pub fn are_related(&self, a: &Bean, b: &Bean) -> Result<bool> {
        if a.is_new() || b.is_new() {
            return Ok(false);
        }
        Ok(self.link_id(a, b)?.is_some())
    }

    /// Removes every link between `bean` and beans of `kind`.
    pub fn clear_relations(&self, bean: &Bean, kind: &str) -> Result<usize> {
        check_type(kind, false)?;
        if bean.is_new() {
            return Ok(0);
        }
        let table = link_table(bean.kind(), kind);
        let (own, other) = link_columns(bean.kind(), kind);
        let removed = if bean.kind() == kind {
            self.exec(
                &format!(
                    "delete from {} where {} = ? or {} = ?",
                    quote(&table),
                    quote(&own),
                    quote(&other)
                ),
                &[Value::Integer(bean.id()), Value::Integer(bean.id())],
            )?
        } else {
            self.exec(
                &format!("delete from {} where {} = ?", quote(&table), quote(&own)),
                &[Value::Integer(bean.id())],
            )?
        };
        debug!(%table, id = bean.id(), removed, "relations cleared");
        Ok(removed)
    }

    // ids of the `kind` beans linked to `bean`
    pub(crate) fn linked_ids(&self, bean: &Bean, kind: &str) -> Result<BTreeSet<i64>> {
        if bean.is_new() {
            return Ok(BTreeSet::new());
        }
        let table = quote(&link_table(bean.kind(), kind));
        let (own, other) = link_columns(bean.kind(), kind);
        let (own, other) = (quote(&own), quote(&other));
        let ids = if bean.kind() == kind {
            self.get_col(
                &format!(
                    "select {other} from {table} where {own} = ? \
                     union select {own} from {table} where {other} = ?"
                ),
                &[Value::Integer(bean.id()), Value::Integer(bean.id())],
            )?
        } else {
            self.get_col(
                &format!("select {other} from {table} where {own} = ?"),
                &[Value::Integer(bean.id())],
            )?
        };
        Ok(ids.iter().filter_map(Value::as_i64).collect())
    }

    // ------------- Related -------------
    /// Beans of `kind` linked to `bean`. The snippet filters or orders the
    /// joined rows by the columns of `kind`.
    pub fn related(&self, bean: &Bean, kind: &str, sql: &str, bindings: &[Value]) -> Result<Vec<Bean>> {
        let mut grouped = self.related_batch(std::slice::from_ref(bean), kind, sql, bindings)?;
        Ok(grouped
            .remove(&(bean.kind().to_owned(), bean.id()))
            .unwrap_or_default())
    }

    /// The related beans of many beans at once, keyed by source type and id.
    /// Issues one query per source type.
    pub fn related_batch(
        &self,
        beans: &[Bean],
        kind: &str,
        sql: &str,
        bindings: &[Value],
    ) -> Result<BTreeMap<(String, i64), Vec<Bean>>> {
        check_type(kind, false)?;
        let mut result: BTreeMap<(String, i64), Vec<Bean>> = BTreeMap::new();
        let mut sources: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for bean in beans.iter().filter(|bean| !bean.is_new()) {
            check_type(bean.kind(), false)?;
            sources.entry(bean.kind()).or_default().push(bean.id());
            result.entry((bean.kind().to_owned(), bean.id())).or_default();
        }
        for (source, ids) in sources {
            let copies = if source == kind { 2 } else { 1 };
            let mut values: Vec<Value> = Vec::with_capacity(ids.len() * copies + bindings.len());
            for _ in 0..copies {
                values.extend(ids.iter().map(|id| Value::Integer(*id)));
            }
            values.extend_from_slice(bindings);
            let statement = format!(
                "select * from ({}){}",
                related_query(source, ids.len(), kind),
                glue(sql, Glue::Where)
            );
            let rows = self.get_all(&statement, &values)?;
            debug!(%source, target = %kind, sources = ids.len(), rows = rows.len(), "related");
            for row in rows {
                let mut owner = 0;
                let mut record = Vec::with_capacity(row.len());
                for (column, value) in row {
                    if column == LINKED_BY {
                        owner = value.as_i64().unwrap_or(0);
                    } else {
                        record.push((column, value));
                    }
                }
                let related = bean_from_row(kind, record);
                let list = result.entry((source.to_owned(), owner)).or_default();
                if !list.iter().any(|known| known.id() == related.id()) {
                    list.push(related);
                }
            }
        }
        Ok(result)
    }

    pub fn related_count(&self, bean: &Bean, kind: &str, sql: &str, bindings: &[Value]) -> Result<i64> {
        check_type(kind, false)?;
        if bean.is_new() {
            return Ok(0);
        }
        let mut values: Vec<Value> = vec![Value::Integer(bean.id())];
        if bean.kind() == kind {
            values.push(Value::Integer(bean.id()));
        }
        values.extend_from_slice(bindings);
        let cell = self.get_cell(
            &format!(
                "select count(distinct \"id\") from ({}){}",
                related_query(bean.kind(), 1, kind),
                glue(sql, Glue::Where)
            ),
            &values,
        )?;
        Ok(cell.as_i64().unwrap_or(0))
    }

    pub fn related_one(&self, bean: &Bean, kind: &str, sql: &str, bindings: &[Value]) -> Result<Option<Bean>> {
        Ok(self.related(bean, kind, sql, bindings)?.into_iter().next())
    }

    /// The last related bean. Without an `ORDER BY` there is no last one.
    pub fn related_last(&self, bean: &Bean, kind: &str, sql: &str, bindings: &[Value]) -> Result<Option<Bean>> {
        if !has_order(sql) {
            return Err(BeanbaseError::validation(
                "related_last needs an ORDER BY to know which bean is last",
            ));
        }
        Ok(self.related(bean, kind, sql, bindings)?.pop())
    }
}
