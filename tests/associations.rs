use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use beanbase::persist::{Adapter, Persistor, QueryWriter, Row};
use beanbase::{Configuration, Database, PersistenceMode, TypeRank, Value};

fn tagged(db: &Database, names: &[&str]) -> (beanbase::Bean, Vec<beanbase::Bean>) {
    let mut book = db.dispense("book").expect("book");
    book.set("title", "Dune");
    let mut tags = Vec::new();
    for name in names {
        let mut tag = db.dispense("tag").expect("tag");
        tag.set("name", *name);
        db.link(&mut book, &mut tag, None).expect("link");
        tags.push(tag);
    }
    (book, tags)
}

#[test]
fn link_unlink_round_trip() {
    let db = Database::in_memory().expect("db");
    let (book, tags) = tagged(&db, &["scifi"]);
    assert!(db.are_related(&book, &tags[0]).expect("related"));
    assert!(db.are_related(&tags[0], &book).expect("related"));
    assert_eq!(db.unlink(&book, &tags[0], false).expect("unlink"), 1);
    assert!(!db.are_related(&book, &tags[0]).expect("related"));
    // a second unlink finds nothing to do
    assert_eq!(db.unlink(&book, &tags[0], false).expect("noop"), 0);
    assert_eq!(db.unlink(&tags[0], &book, true).expect("fast"), 0);
}

#[test]
fn both_directions_use_one_link_table() {
    let db = Database::in_memory().expect("db");
    let mut book = db.dispense("book").expect("book");
    let mut tag = db.dispense("tag").expect("tag");
    db.link(&mut book, &mut tag, None).expect("link");
    db.link(&mut tag, &mut book, None).expect("link back");
    let tables = db.inspect().expect("tables");
    assert_eq!(tables, vec!["book", "book_tag", "tag"]);
    assert_eq!(db.count("book_tag", "", &[]).expect("links"), 2);
    // duplicate links read as one related bean
    assert_eq!(db.related(&book, "tag", "", &[]).expect("related").len(), 1);
    assert_eq!(db.related_count(&book, "tag", "", &[]).expect("count"), 1);
}

#[test]
fn unique_links_are_reused() {
    let config = Configuration::default().with_unique_links(true);
    let db = Database::new(PersistenceMode::InMemory, config).expect("db");
    let mut book = db.dispense("book").expect("book");
    let mut tag = db.dispense("tag").expect("tag");
    let first = db.link(&mut book, &mut tag, None).expect("link");
    let second = db.link(&mut tag, &mut book, None).expect("link again");
    assert_eq!(first, second);
    assert_eq!(db.count("book_tag", "", &[]).expect("links"), 1);
}

#[test]
fn link_payload_becomes_link_columns() {
    let db = Database::in_memory().expect("db");
    let mut person = db.dispense("person").expect("person");
    let mut project = db.dispense("project").expect("project");
    let mut role = db.dispense("role").expect("role");
    role.set("role", "lead").set("hours", 12);
    let id = db.link(&mut person, &mut project, Some(&role)).expect("link");
    let link = db.load("person_project", id).expect("link row");
    assert_eq!(link.get("role").as_str(), Some("lead"));
    assert_eq!(link.get("hours"), &Value::Integer(12));
    assert_eq!(link.get("person_id"), &Value::Integer(person.id()));
    assert_eq!(link.get("project_id"), &Value::Integer(project.id()));
}

#[test]
fn related_counts_and_clearing() {
    let db = Database::in_memory().expect("db");
    let (book, _) = tagged(&db, &["scifi", "classic", "desert"]);
    assert_eq!(db.related_count(&book, "tag", "", &[]).expect("count"), 3);
    assert_eq!(
        db.related_count(&book, "tag", "name like ?", &[Value::from("%c%")])
            .expect("filtered"),
        2
    );
    assert_eq!(db.clear_relations(&book, "tag").expect("clear"), 3);
    assert_eq!(db.related_count(&book, "tag", "", &[]).expect("count"), 0);
    assert_eq!(db.count("tag", "", &[]).expect("tags kept"), 3);
}

#[test]
fn related_filters_and_orders() {
    let db = Database::in_memory().expect("db");
    let (book, _) = tagged(&db, &["b", "c", "a"]);
    let ordered = db.related(&book, "tag", "order by name", &[]).expect("related");
    let names: Vec<_> = ordered.iter().map(|t| t.get("name").to_string()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert!(ordered.iter().all(|tag| !tag.has("linked:by")));

    let one = db.related_one(&book, "tag", "name = ?", &[Value::from("c")]).expect("one");
    assert_eq!(one.expect("tag").get("name").as_str(), Some("c"));
    let last = db.related_last(&book, "tag", "order by name", &[]).expect("last");
    assert_eq!(last.expect("tag").get("name").as_str(), Some("c"));
    assert!(db.related_last(&book, "tag", "", &[]).is_err());
    assert!(db.related(&book, "author", "", &[]).expect("none").is_empty());
}

// Counts the queries reaching the SQLite persistor.
struct CountingBackend {
    inner: Persistor,
    queries: Rc<Cell<usize>>,
}

impl Adapter for CountingBackend {
    fn execute(&self, sql: &str, bindings: &[Value]) -> beanbase::Result<usize> {
        self.inner.execute(sql, bindings)
    }
    fn query(&self, sql: &str, bindings: &[Value]) -> beanbase::Result<Vec<Row>> {
        self.queries.set(self.queries.get() + 1);
        self.inner.query(sql, bindings)
    }
    fn last_insert_id(&self) -> i64 {
        self.inner.last_insert_id()
    }
    fn begin_transaction(&self) -> beanbase::Result<()> {
        self.inner.begin_transaction()
    }
    fn commit(&self) -> beanbase::Result<()> {
        self.inner.commit()
    }
    fn rollback(&self) -> beanbase::Result<()> {
        self.inner.rollback()
    }
}

impl QueryWriter for CountingBackend {
    fn get_tables(&self) -> beanbase::Result<Vec<String>> {
        self.inner.get_tables()
    }
    fn get_columns(&self, table: &str) -> beanbase::Result<BTreeMap<String, String>> {
        self.inner.get_columns(table)
    }
    fn create_table(&self, table: &str) -> beanbase::Result<()> {
        self.inner.create_table(table)
    }
    fn add_column(&self, table: &str, column: &str, rank: TypeRank) -> beanbase::Result<()> {
        self.inner.add_column(table, column, rank)
    }
    fn widen_column(&self, table: &str, column: &str, rank: TypeRank) -> beanbase::Result<()> {
        self.inner.widen_column(table, column, rank)
    }
    fn wipe(&self, table: &str) -> beanbase::Result<()> {
        self.inner.wipe(table)
    }
    fn wipe_all(&self) -> beanbase::Result<()> {
        self.inner.wipe_all()
    }
}

#[test]
fn related_batch_issues_one_query_per_type() {
    let queries = Rc::new(Cell::new(0));
    let backend = CountingBackend {
        inner: Persistor::new(PersistenceMode::InMemory).expect("persistor"),
        queries: Rc::clone(&queries),
    };
    let db = Database::with_backend(Box::new(backend), Configuration::default());
    let (first, _) = tagged(&db, &["a", "b"]);
    let (second, _) = tagged(&db, &["c"]);
    let untagged = {
        let mut book = db.dispense("book").expect("book");
        db.store(&mut book).expect("store");
        book
    };
    let mut shelf = db.dispense("shelf").expect("shelf");
    for name in ["d", "e", "f"] {
        let mut tag = db.dispense("tag").expect("tag");
        tag.set("name", name);
        db.link(&mut shelf, &mut tag, None).expect("link");
    }

    queries.set(0);
    let grouped = db
        .related_batch(
            &[first.clone(), shelf.clone(), second.clone(), untagged.clone()],
            "tag",
            "",
            &[],
        )
        .expect("batch");
    assert_eq!(queries.get(), 2);
    assert_eq!(grouped[&("book".to_string(), first.id())].len(), 2);
    assert_eq!(grouped[&("book".to_string(), second.id())].len(), 1);
    assert!(grouped[&("book".to_string(), untagged.id())].is_empty());
    assert_eq!(grouped[&("shelf".to_string(), shelf.id())].len(), 3);
}

#[test]
fn self_links_are_found_from_either_side() {
    let db = Database::in_memory().expect("db");
    let mut ann = db.dispense("person").expect("ann");
    ann.set("name", "Ann");
    let mut bob = db.dispense("person").expect("bob");
    bob.set("name", "Bob");
    db.link(&mut ann, &mut bob, None).expect("link");

    let columns = db.get_columns("person_person").expect("columns");
    assert!(columns.iter().any(|(name, _)| name == "person2_id"));
    let friends_of_bob = db.related(&bob, "person", "", &[]).expect("related");
    assert_eq!(friends_of_bob.len(), 1);
    assert_eq!(friends_of_bob[0].get("name").as_str(), Some("Ann"));
    assert_eq!(db.related_count(&ann, "person", "", &[]).expect("count"), 1);
    assert!(db.are_related(&bob, &ann).expect("related"));
    assert_eq!(db.unlink(&bob, &ann, false).expect("unlink"), 1);
    assert!(!db.are_related(&ann, &bob).expect("related"));
}

#[test]
fn shared_lists_are_reconciled_on_store() {
    let db = Database::in_memory().expect("db");
    let mut book = db.dispense("book").expect("book");
    book.set("title", "Dune");
    for name in ["scifi", "classic"] {
        let mut tag = db.dispense("tag").expect("tag");
        tag.set("name", name);
        book.shared_mut("tag").push(tag);
    }
    db.store(&mut book).expect("store");
    assert_eq!(db.related_count(&book, "tag", "", &[]).expect("count"), 2);

    // storing again adds nothing
    db.store(&mut book).expect("store again");
    assert_eq!(db.count("book_tag", "", &[]).expect("links"), 2);

    let mut loaded = db.load("book", book.id()).expect("load");
    assert_eq!(db.open_shared(&mut loaded, "tag").expect("open").len(), 2);
    loaded.shared_mut("tag").retain(|tag| tag.get("name").as_str() == Some("scifi"));
    db.store(&mut loaded).expect("store removal");
    assert_eq!(db.related_count(&book, "tag", "", &[]).expect("count"), 1);
    assert_eq!(db.count("tag", "", &[]).expect("tags kept"), 2);
}

#[test]
fn links_survive_trash() {
    let db = Database::in_memory().expect("db");
    let (mut book, _) = tagged(&db, &["scifi"]);
    db.trash(&mut book).expect("trash");
    assert_eq!(db.count("book_tag", "", &[]).expect("links"), 1);
}

#[test]
fn associate_links_every_pair() {
    let db = Database::in_memory().expect("db");
    let mut books = db.dispense_many("book", 2).expect("books");
    let mut tags = db.dispense_many("tag", 3).expect("tags");
    for (i, tag) in tags.iter_mut().enumerate() {
        tag.set("name", format!("tag{}", i));
    }
    let links = db.associate(&mut books, &mut tags, None).expect("associate");
    assert_eq!(links.len(), 6);
    assert!(books.iter().all(|book| !book.is_new()));
    assert_eq!(db.count("book_tag", "", &[]).expect("links"), 6);
    assert_eq!(db.related_count(&books[1], "tag", "", &[]).expect("count"), 3);

    let removed = db
        .unassociate(&books[..1], &tags[..2], false)
        .expect("unassociate");
    assert_eq!(removed, 2);
    assert_eq!(db.related_count(&books[0], "tag", "", &[]).expect("count"), 1);
    assert_eq!(db.related_count(&books[1], "tag", "", &[]).expect("count"), 3);
}
