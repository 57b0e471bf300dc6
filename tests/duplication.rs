use beanbase::{Database, DuplicationTrail, Value};

#[test]
fn stored_graphs_are_copied_without_ids() {
    let db = Database::in_memory().expect("db");
    let mut book = db.dispense("book").expect("book");
    book.set("title", "Dune");
    for number in 1..=2 {
        let mut page = db.dispense("page").expect("page");
        page.set("number", number);
        book.own_mut("page").push(page);
    }
    let mut tag = db.dispense("tag").expect("tag");
    tag.set("name", "scifi");
    book.shared_mut("tag").push(tag);
    let original = db.store(&mut book).expect("store");

    let loaded = db.load("book", original).expect("load");
    let mut copy = db.duplicate(&loaded).expect("duplicate");
    assert!(copy.is_new());
    assert_eq!(copy.get("title").as_str(), Some("Dune"));
    assert_eq!(copy.own("page").len(), 2);
    assert!(copy.own("page").iter().all(|page| page.is_new() && !page.has("book_id")));
    // shared beans are referenced, not copied
    assert_eq!(copy.shared("tag").len(), 1);
    assert!(!copy.shared("tag")[0].is_new());

    let id = db.store(&mut copy).expect("store copy");
    assert_ne!(id, original);
    assert_eq!(db.count("book", "", &[]).expect("books"), 2);
    assert_eq!(db.count("page", "", &[]).expect("pages"), 4);
    assert_eq!(db.count("tag", "", &[]).expect("tags"), 1);
    assert_eq!(db.related_count(&copy, "tag", "", &[]).expect("links"), 1);
}

#[test]
fn cycles_end_in_stubs() {
    let db = Database::in_memory().expect("db");
    let mut folder = db.dispense("folder").expect("folder");
    folder.set("name", "root");
    let root = db.store(&mut folder).expect("store");
    let mut child = db.dispense("folder").expect("folder");
    child.set("name", "child").set("folder_id", root);
    let child_id = db.store(&mut child).expect("store");
    // the root is owned by its own child as well
    db.exec(
        "update \"folder\" set \"folder_id\" = ? where \"id\" = ?",
        &[Value::Integer(child_id), Value::Integer(root)],
    )
    .expect("cycle");

    let loaded = db.load("folder", root).expect("load");
    let mut trail = DuplicationTrail::new();
    let copy = db.duplicate_with(&loaded, &mut trail, &[]).expect("duplicate");
    assert_eq!(trail.len(), 2);
    assert!(trail.contains("folder", root));
    assert!(trail.contains("folder", child_id));

    let children = copy.own("folder");
    assert_eq!(children.len(), 1);
    let grandchildren = children[0].own("folder");
    assert_eq!(grandchildren.len(), 1);
    assert!(grandchildren[0].is_stub());
    assert_eq!(grandchildren[0].id(), root);

    // the same trail keeps handing out stubs
    let again = db.duplicate_with(&loaded, &mut trail, &[]).expect("again");
    assert!(again.is_stub());
    assert_eq!(again.id(), root);
}

#[test]
fn filters_restrict_the_lists_followed() {
    let db = Database::in_memory().expect("db");
    let mut book = db.dispense("book").expect("book");
    let mut page = db.dispense("page").expect("page");
    page.set("number", 1);
    book.own_mut("page").push(page);
    let mut note = db.dispense("note").expect("note");
    note.set("text", "signed");
    book.own_mut("note").push(note);
    let id = db.store(&mut book).expect("store");

    let loaded = db.load("book", id).expect("load");
    let copy = db.duplicate_filtered(&loaded, &["page"]).expect("duplicate");
    assert_eq!(copy.own("page").len(), 1);
    assert!(copy.owned().get("note").is_none());
}

#[test]
fn exports_nest_lists_and_parents() {
    let db = Database::in_memory().expect("db");
    let mut author = db.dispense("author").expect("author");
    author.set("name", "Herbert");
    let mut book = db.dispense("book").expect("book");
    book.set("title", "Dune").set_parent("author", author);
    let mut page = db.dispense("page").expect("page");
    page.set("number", 1);
    book.own_mut("page").push(page);
    let mut tag = db.dispense("tag").expect("tag");
    tag.set("name", "scifi");
    book.shared_mut("tag").push(tag);
    let id = db.store(&mut book).expect("store");

    let loaded = db.load("book", id).expect("load");
    let plain = db.export_all(&[loaded.clone()], false, &[]).expect("export");
    assert_eq!(plain[0]["id"], id);
    assert_eq!(plain[0]["title"], "Dune");
    assert_eq!(plain[0]["ownPage"][0]["number"], 1);
    assert_eq!(plain[0]["ownPage"][0]["book_id"], id);
    assert_eq!(plain[0]["sharedTag"][0]["name"], "scifi");
    assert!(plain[0].get("author").is_none());

    let with_parents = db.export_all(&[loaded], true, &[]).expect("export");
    assert_eq!(with_parents[0]["author"]["name"], "Herbert");

    let filtered = db.export_all(&[book], false, &["tag"]).expect("export");
    assert!(filtered[0].get("ownPage").is_none());
    assert_eq!(filtered[0]["sharedTag"].as_array().map(Vec::len), Some(1));
}

#[test]
fn graphs_build_beans_from_records() {
    let db = Database::in_memory().expect("db");
    let records = vec![serde_json::json!({
        "type": "book",
        "title": "Dune",
        "pages": 412,
        "author": { "type": "person", "name": "Herbert" },
        "ownPage": [
            { "number": 1, "text": "intro" },
            { "number": "", "text": "" }
        ],
        "sharedTag": [ { "name": "scifi" } ]
    })];
    let mut beans = db.graph(&records, true).expect("graph");
    assert_eq!(beans.len(), 1);
    let book = &mut beans[0];
    assert_eq!(book.kind(), "book");
    assert_eq!(book.own("page").len(), 1);
    assert_eq!(book.parent("author").expect("author").kind(), "person");
    let id = db.store(book).expect("store");

    let mut loaded = db.load("book", id).expect("load");
    assert_eq!(loaded.get("pages"), &Value::Integer(412));
    assert_eq!(db.open_own(&mut loaded, "page").expect("pages").len(), 1);
    assert_eq!(db.related_count(&loaded, "tag", "", &[]).expect("tags"), 1);
    let author = db.open_parent_as(&mut loaded, "author", "person").expect("open");
    assert_eq!(author.expect("author").get("name").as_str(), Some("Herbert"));

    // unfiltered, the blank page is kept
    assert_eq!(db.graph(&records, false).expect("graph")[0].own("page").len(), 2);
}

#[test]
fn graphs_update_stored_beans_by_id() {
    let db = Database::in_memory().expect("db");
    let mut book = db.dispense("book").expect("book");
    book.set("title", "Dune").set("pages", 412);
    let id = db.store(&mut book).expect("store");

    let mut exported = db.export_all(&[book], false, &[]).expect("export");
    exported[0]["type"] = serde_json::json!("book");
    exported[0]["title"] = serde_json::json!("Dune Messiah");
    let mut beans = db.graph(&exported, false).expect("graph");
    assert_eq!(beans[0].id(), id);
    db.store(&mut beans[0]).expect("store");

    let loaded = db.load("book", id).expect("load");
    assert_eq!(loaded.get("title").as_str(), Some("Dune Messiah"));
    assert_eq!(loaded.get("pages"), &Value::Integer(412));
    assert_eq!(db.count("book", "", &[]).expect("count"), 1);
}

#[test]
fn graph_records_need_a_type() {
    let db = Database::in_memory().expect("db");
    assert!(db.graph(&[serde_json::json!({ "title": "Dune" })], false).is_err());
    assert!(db.graph(&[serde_json::json!(["book"])], false).is_err());
    let listed = serde_json::json!({ "type": "book", "pages": [1, 2] });
    assert!(db.graph(&[listed], false).is_err());
}
