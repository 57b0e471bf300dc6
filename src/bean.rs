//! The bean: a typed record with scalar properties, parent references and
//! two kinds of bean lists.
//!
//! Owned lists (`own<Type>`) hold children that carry this bean's id in a
//! `<type>_id` column. Shared lists (`shared<Type>`) hold beans linked through
//! a link table. Both remember the ids they held when last loaded or stored,
//! which is how a removal from a list is told apart from a list that was never
//! loaded.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use crate::datatype::Value;

static NULL: Value = Value::Null;

/// The foreign key column a child of `kind` carries.
pub fn foreign_key(kind: &str) -> String {
    format!("{}_id", kind)
}

/// `page` becomes `Page`, used for the `ownPage` and `sharedPage` keys.
pub fn capitalize(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub fn own_key(kind: &str) -> String {
    format!("own{}", capitalize(kind))
}

pub fn shared_key(kind: &str) -> String {
    format!("shared{}", capitalize(kind))
}

/// The two kinds of bean lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Own,
    Shared,
}

/// Reads `ownPage` back as `(Own, "page")`; `None` for any other key.
pub fn list_of_key(key: &str) -> Option<(ListKind, String)> {
    let (list, rest) = if let Some(rest) = key.strip_prefix("own") {
        (ListKind::Own, rest)
    } else if let Some(rest) = key.strip_prefix("shared") {
        (ListKind::Shared, rest)
    } else {
        return None;
    };
    let mut chars = rest.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            Some((list, first.to_ascii_lowercase().to_string() + chars.as_str()))
        }
        _ => None,
    }
}

// ------------- Bean -------------
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bean {
    kind: String,
    id: i64,
    properties: BTreeMap<String, Value>,
    parents: BTreeMap<String, Bean>,
    own: BTreeMap<String, Vec<Bean>>,
    shared: BTreeMap<String, Vec<Bean>>,
    own_shadow: BTreeMap<String, Vec<i64>>,
    shared_shadow: BTreeMap<String, Vec<i64>>,
    tainted: bool,
    stub: bool,
}

impl Bean {
    // Beans are only handed out by the database, which validates the type.
    pub(crate) fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            ..Self::default()
        }
    }
    // A reference to an already duplicated bean.
    pub(crate) fn stub(kind: &str, id: i64) -> Self {
        Self {
            kind: kind.to_owned(),
            id,
            stub: true,
            ..Self::default()
        }
    }
    pub fn kind(&self) -> &str {
        &self.kind
    }
    pub fn id(&self) -> i64 {
        self.id
    }
    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    pub fn is_new(&self) -> bool {
        self.id == 0
    }
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }
    pub(crate) fn untaint(&mut self) {
        self.tainted = false;
    }
    /// True for the placeholders duplication leaves where it met a bean twice.
    pub fn is_stub(&self) -> bool {
        self.stub
    }

    // ------------- Scalars -------------
    /// The value of a property, `Null` when it was never set.
    pub fn get(&self, name: &str) -> &Value {
        self.properties.get(name).unwrap_or(&NULL)
    }
    pub fn has(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }
    /// Sets a scalar. Setting `id` changes the primary key instead.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if name == "id" {
            self.id = value.as_i64().unwrap_or(0);
        } else {
            self.properties.insert(name.to_owned(), value);
        }
        self.tainted = true;
        self
    }
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.tainted = true;
        self.properties.remove(name)
    }
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    // ------------- Parents -------------
    /// References `parent` under `name`; stored as the `<name>_id` column.
    pub fn set_parent(&mut self, name: &str, parent: Bean) -> &mut Self {
        self.parents.insert(name.to_owned(), parent);
        self.tainted = true;
        self
    }
    pub fn parent(&self, name: &str) -> Option<&Bean> {
        self.parents.get(name)
    }
    pub fn parents(&self) -> &BTreeMap<String, Bean> {
        &self.parents
    }
    pub(crate) fn take_parents(&mut self) -> BTreeMap<String, Bean> {
        std::mem::take(&mut self.parents)
    }
    pub(crate) fn restore_parents(&mut self, parents: BTreeMap<String, Bean>) {
        self.parents = parents;
    }
    pub(crate) fn attach_parent(&mut self, name: &str, parent: Bean) {
        self.parents.insert(name.to_owned(), parent);
    }

    // ------------- Owned lists -------------
    pub fn own(&self, kind: &str) -> &[Bean] {
        self.own.get(kind).map_or(&[], Vec::as_slice)
    }
    /// Mutable access to the owned list of `kind`, created empty if absent.
    pub fn own_mut(&mut self, kind: &str) -> &mut Vec<Bean> {
        self.tainted = true;
        self.own.entry(kind.to_owned()).or_default()
    }
    pub fn owned(&self) -> &BTreeMap<String, Vec<Bean>> {
        &self.own
    }
    pub(crate) fn take_owned(&mut self) -> BTreeMap<String, Vec<Bean>> {
        std::mem::take(&mut self.own)
    }
    pub(crate) fn restore_owned(&mut self, own: BTreeMap<String, Vec<Bean>>) {
        self.own = own;
    }
    // a list as found in storage, which is also what the shadow remembers
    pub(crate) fn open_own_list(&mut self, kind: &str, children: Vec<Bean>) {
        self.own.insert(kind.to_owned(), children);
        self.remember_own(kind);
    }
    pub(crate) fn own_shadow(&self, kind: &str) -> &[i64] {
        self.own_shadow.get(kind).map_or(&[], Vec::as_slice)
    }
    pub(crate) fn remember_own(&mut self, kind: &str) {
        let ids = ids_of(self.own(kind));
        self.own_shadow.insert(kind.to_owned(), ids);
    }

    // ------------- Shared lists -------------
    pub fn shared(&self, kind: &str) -> &[Bean] {
        self.shared.get(kind).map_or(&[], Vec::as_slice)
    }
    /// Mutable access to the shared list of `kind`, created empty if absent.
    pub fn shared_mut(&mut self, kind: &str) -> &mut Vec<Bean> {
        self.tainted = true;
        self.shared.entry(kind.to_owned()).or_default()
    }
    pub fn shares(&self) -> &BTreeMap<String, Vec<Bean>> {
        &self.shared
    }
    pub(crate) fn take_shared(&mut self) -> BTreeMap<String, Vec<Bean>> {
        std::mem::take(&mut self.shared)
    }
    pub(crate) fn restore_shared(&mut self, shared: BTreeMap<String, Vec<Bean>>) {
        self.shared = shared;
    }
    pub(crate) fn open_shared_list(&mut self, kind: &str, members: Vec<Bean>) {
        self.shared.insert(kind.to_owned(), members);
        self.remember_shared(kind);
    }
    pub(crate) fn shared_shadow(&self, kind: &str) -> &[i64] {
        self.shared_shadow.get(kind).map_or(&[], Vec::as_slice)
    }
    pub(crate) fn remember_shared(&mut self, kind: &str) {
        let ids = ids_of(self.shared(kind));
        self.shared_shadow.insert(kind.to_owned(), ids);
    }

    /// The same record without lists or parents, as a reference to it.
    pub(crate) fn shallow(&self) -> Bean {
        Bean {
            kind: self.kind.clone(),
            id: self.id,
            properties: self.properties.clone(),
            stub: self.stub,
            ..Bean::default()
        }
    }

    /// The scalars of this bean (and its id) as a plain JSON object.
    pub fn export(&self) -> Json {
        let mut record = Map::new();
        record.insert("id".to_owned(), Json::from(self.id));
        for (name, value) in &self.properties {
            record.insert(
                name.clone(),
                serde_json::to_value(value).unwrap_or(Json::Null),
            );
        }
        Json::Object(record)
    }
}

fn ids_of(beans: &[Bean]) -> Vec<i64> {
    beans.iter().map(Bean::id).filter(|id| *id != 0).collect()
}
