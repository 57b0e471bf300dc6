//! Deep copies, exports and imports of bean graphs.
//!
//! A walk visits a bean, copies its scalars and then descends into its owned
//! lists. Shared lists are copied as references. Lists already in memory are
//! used as they are; for a stored bean the remaining lists are found through
//! the schema. Every stored bean entered is recorded in a [`DuplicationTrail`]
//! and a second visit yields a stub, which is what ends cycles.
//!
//! [`Database::graph`] goes the other way and builds beans from records
//! shaped like the ones [`Database::export_all`] produces.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::BuildHasherDefault;

use seahash::SeaHasher;
use serde_json::Value as Json;
use tracing::trace;

use crate::bean::{foreign_key, list_of_key, own_key, shared_key, Bean, ListKind};
use crate::database::Database;
use crate::datatype::Value;
use crate::error::{BeanbaseError, Result};
use crate::schema::check_type;
use crate::repository::{Relations, BY_ID};

pub type TrailHasher = BuildHasherDefault<SeaHasher>;

// ------------- DuplicationTrail -------------
/// The `(type, id)` pairs a walk has entered.
#[derive(Debug, Default)]
pub struct DuplicationTrail {
    visited: HashSet<(String, i64), TrailHasher>,
    // relations per type, so each type is reflected on once per walk
    relations: HashMap<String, Relations, TrailHasher>,
}

impl DuplicationTrail {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn contains(&self, kind: &str, id: i64) -> bool {
        self.visited.contains(&(kind.to_owned(), id))
    }
    pub fn len(&self) -> usize {
        self.visited.len()
    }
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
    // true when the bean was not on the trail yet
    fn enter(&mut self, bean: &Bean) -> bool {
        self.visited.insert((bean.kind().to_owned(), bean.id()))
    }
    fn relations(&mut self, db: &Database, kind: &str) -> Result<Relations> {
        if let Some(relations) = self.relations.get(kind) {
            return Ok(relations.clone());
        }
        let relations = db.relations_of(kind)?;
        self.relations.insert(kind.to_owned(), relations.clone());
        Ok(relations)
    }
}

fn included(filters: &[&str], kind: &str) -> bool {
    filters.is_empty() || filters.contains(&kind)
}

impl Database {
    /// A new, unstored copy of `bean` and everything it owns.
    pub fn duplicate(&self, bean: &Bean) -> Result<Bean> {
        self.duplicate_with(bean, &mut DuplicationTrail::new(), &[])
    }

    /// Like [`Database::duplicate`], following only lists of the given types.
    pub fn duplicate_filtered(&self, bean: &Bean, filters: &[&str]) -> Result<Bean> {
        self.duplicate_with(bean, &mut DuplicationTrail::new(), filters)
    }

    /// Duplicates along an existing trail; beans already on it become stubs.
    pub fn duplicate_with(
        &self,
        bean: &Bean,
        trail: &mut DuplicationTrail,
        filters: &[&str],
    ) -> Result<Bean> {
        self.walk(bean, trail, filters, false)
    }

    // keep_ids leaves ids and foreign keys as they are, for exports
    fn walk(
        &self,
        bean: &Bean,
        trail: &mut DuplicationTrail,
        filters: &[&str],
        keep_ids: bool,
    ) -> Result<Bean> {
        if bean.is_stub() {
            return Ok(bean.clone());
        }
        if !bean.is_new() && !trail.enter(bean) {
            trace!(kind = bean.kind(), id = bean.id(), "already on the trail");
            return Ok(Bean::stub(bean.kind(), bean.id()));
        }

        let mut copy = bean.shallow();
        if !keep_ids {
            copy.set_id(0);
        }
        for (name, parent) in bean.parents() {
            copy.set_parent(name, parent.clone());
        }

        let mut owned: BTreeSet<String> = bean.owned().keys().cloned().collect();
        let mut shared: BTreeSet<String> = bean.shares().keys().cloned().collect();
        if !bean.is_new() {
            let relations = trail.relations(self, bean.kind())?;
            owned.extend(relations.owned);
            shared.extend(relations.shared);
        }

        let key = foreign_key(bean.kind());
        for kind in owned.iter().filter(|kind| included(filters, kind)) {
            let loaded;
            let children = match bean.owned().get(kind) {
                Some(children) => children.as_slice(),
                None => {
                    loaded = self.owned_children(bean, kind, BY_ID, &[])?;
                    loaded.as_slice()
                }
            };
            let mut list = Vec::with_capacity(children.len());
            for child in children {
                let mut child = self.walk(child, trail, filters, keep_ids)?;
                if !keep_ids && !child.is_stub() {
                    child.unset(&key);
                }
                list.push(child);
            }
            *copy.own_mut(kind) = list;
        }

        for kind in shared.iter().filter(|kind| included(filters, kind)) {
            let members: Vec<Bean> = match bean.shares().get(kind) {
                Some(members) => members.iter().map(Bean::shallow).collect(),
                None => self.related(bean, kind, "", &[])?,
            };
            *copy.shared_mut(kind) = members;
        }
        Ok(copy)
    }

    // ------------- Export -------------
    /// Plain records of bean graphs: scalars, owned lists under `own<Type>`,
    /// the scalars of shared beans under `shared<Type>` and, when asked for,
    /// the direct parents under their names.
    pub fn export_all(
        &self,
        beans: &[Bean],
        include_parents: bool,
        filters: &[&str],
    ) -> Result<Vec<Json>> {
        beans
            .iter()
            .map(|bean| {
                let tree = self.walk(bean, &mut DuplicationTrail::new(), filters, true)?;
                let mut record = export_tree(&tree);
                if include_parents {
                    self.export_parents(bean, &mut record)?;
                }
                Ok(record)
            })
            .collect()
    }

    // parents held in memory, then those only referenced by a `<type>_id`
    fn export_parents(&self, bean: &Bean, record: &mut Json) -> Result<()> {
        let Some(fields) = record.as_object_mut() else {
            return Ok(());
        };
        for (name, parent) in bean.parents() {
            fields.insert(name.clone(), parent.export());
        }
        let tables: BTreeSet<String> = self.inspect()?.into_iter().collect();
        for (column, value) in bean.properties() {
            let Some(name) = column.strip_suffix("_id") else {
                continue;
            };
            if bean.parent(name).is_some() || !tables.contains(name) {
                continue;
            }
            let Some(id) = value.as_i64() else {
                continue;
            };
            let parent = self.load(name, id)?;
            if !parent.is_new() {
                fields.insert(name.to_owned(), parent.export());
            }
        }
        Ok(())
    }

    // ------------- Import -------------
    /// Builds beans from plain records. Each record names its type under
    /// `type` and a record with an `id` starts from the stored bean.
    /// `own<Type>` and `shared<Type>` arrays become lists whose entries take
    /// the list's type; any other nested record becomes a parent under its
    /// key, typed by the key unless it names a type. With `filter_empty`,
    /// new list entries without a non-empty scalar are left out.
    pub fn graph(&self, records: &[Json], filter_empty: bool) -> Result<Vec<Bean>> {
        records
            .iter()
            .map(|record| self.graph_record(record, None, filter_empty))
            .collect()
    }

    fn graph_record(&self, record: &Json, implied: Option<&str>, filter_empty: bool) -> Result<Bean> {
        let Some(fields) = record.as_object() else {
            return Err(BeanbaseError::validation(format!(
                "a bean record must be an object, not {}",
                record
            )));
        };
        let kind = match fields.get("type").and_then(Json::as_str).or(implied) {
            Some(kind) => kind,
            None => return Err(BeanbaseError::validation("a bean record needs a type")),
        };
        let mut bean = match fields.get("id").and_then(Json::as_i64) {
            Some(id) if id > 0 => {
                check_type(kind, self.config().strict_type_names)?;
                self.load(kind, id)?
            }
            _ => self.dispense(kind)?,
        };
        for (key, value) in fields {
            if key == "type" || key == "id" {
                continue;
            }
            match value {
                Json::Array(entries) => {
                    let Some((list, kind)) = list_of_key(key) else {
                        return Err(BeanbaseError::validation(format!(
                            "'{}' holds a list but names no own or shared list",
                            key
                        )));
                    };
                    let mut beans = Vec::with_capacity(entries.len());
                    for entry in entries {
                        let member = self.graph_record(entry, Some(kind.as_str()), filter_empty)?;
                        if !(filter_empty && is_blank(&member)) {
                            beans.push(member);
                        }
                    }
                    trace!(list = %key, members = beans.len(), "graph list");
                    match list {
                        ListKind::Own => *bean.own_mut(&kind) = beans,
                        ListKind::Shared => *bean.shared_mut(&kind) = beans,
                    }
                }
                Json::Object(_) => {
                    let parent = self.graph_record(value, Some(key.as_str()), filter_empty)?;
                    bean.set_parent(key, parent);
                }
                scalar => {
                    bean.set(key, scalar_value(scalar));
                }
            }
        }
        Ok(bean)
    }
}

fn scalar_value(scalar: &Json) -> Value {
    match scalar {
        Json::Bool(b) => Value::from(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        Json::String(s) => Value::from(s.as_str()),
        _ => Value::Null,
    }
}

// a new bean with nothing worth storing
fn is_blank(bean: &Bean) -> bool {
    bean.is_new()
        && bean.parents().is_empty()
        && bean.owned().values().all(Vec::is_empty)
        && bean.shares().values().all(Vec::is_empty)
        && bean
            .properties()
            .values()
            .all(|value| value.is_null() || value.as_str() == Some(""))
}

fn export_tree(bean: &Bean) -> Json {
    let mut record = bean.export();
    if let Some(fields) = record.as_object_mut() {
        for (kind, children) in bean.owned() {
            fields.insert(
                own_key(kind),
                Json::Array(children.iter().map(export_tree).collect()),
            );
        }
        for (kind, members) in bean.shares() {
            fields.insert(
                shared_key(kind),
                Json::Array(members.iter().map(Bean::export).collect()),
            );
        }
    }
    record
}
