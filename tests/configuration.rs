use beanbase::{Configuration, Database, Mode, PersistenceMode, Value};

#[test]
fn configuration_loads_from_a_file() {
    let path = std::env::temp_dir().join("beanbase_test_configuration.toml");
    std::fs::write(
        &path,
        r#"
strict_type_names = false
unique_links = true
mode = { chilly = ["book"] }

[dependencies]
page = ["book", "magazine"]
"#,
    )
    .expect("write config");
    let config = Configuration::load(path.to_str()).expect("load");
    let _ = std::fs::remove_file(&path);

    assert!(!config.strict_type_names);
    assert!(config.unique_links);
    assert_eq!(config.mode, Mode::chilly(["book"]));
    assert!(config.is_dependent("page", "magazine"));
}

#[test]
fn defaults_apply_without_a_file() {
    let config = Configuration::load(None).expect("load");
    assert_eq!(config.mode, Mode::Fluid);
    assert!(config.strict_type_names);
    assert!(!config.unique_links);
    assert!(config.dependencies.is_empty());
}

#[test]
fn a_missing_file_is_a_config_error() {
    let err = Configuration::load(Some("/nonexistent/beanbase.toml")).expect_err("missing");
    assert!(matches!(err, beanbase::BeanbaseError::Config(_)));
}

#[test]
fn transactions_only_act_outside_fluid_mode() {
    let mut db = Database::in_memory().expect("db");
    assert!(!db.begin().expect("begin"));
    assert!(!db.commit().expect("commit"));
    assert!(!db.rollback().expect("rollback"));

    let mut book = db.dispense("book").expect("book");
    book.set("title", "Dune");
    db.store(&mut book).expect("store");
    db.freeze(Mode::Frozen);
    assert!(db.begin().expect("begin"));
    db.exec("delete from \"book\"", &[]).expect("delete");
    assert!(db.rollback().expect("rollback"));
    assert_eq!(db.count("book", "", &[]).expect("count"), 1);
}

#[test]
fn failed_transactions_roll_back_nested_work() {
    let config = Configuration::default().with_mode(Mode::Frozen);
    let db = Database::new(PersistenceMode::InMemory, config).expect("db");
    db.exec(
        "create table \"book\" (\"id\" integer primary key autoincrement, \"title\" text)",
        &[],
    )
    .expect("table");

    let result: beanbase::Result<()> = db.transaction(|db| {
        let mut book = db.dispense("book")?;
        book.set("title", "Dune");
        db.store(&mut book)?;
        db.transaction(|db| {
            let mut other = db.dispense("book")?;
            other.set("isbn", "0441013597");
            db.store(&mut other).map(|_| ())
        })
    });
    assert!(result.is_err());
    assert_eq!(db.count("book", "", &[]).expect("count"), 0);

    let stored = db
        .transaction(|db| {
            let mut book = db.dispense("book")?;
            book.set("title", "Emma");
            db.store(&mut book)
        })
        .expect("commit");
    assert_eq!(
        db.load("book", stored).expect("load").get("title"),
        &Value::from("Emma")
    );
}

#[test]
fn logging_can_be_installed_twice() {
    beanbase::logging::init_for_tests();
    assert!(!beanbase::logging::init_for_tests());
}

#[test]
fn a_panicking_transaction_does_not_leave_the_context_nested() {
    let config = Configuration::default().with_mode(Mode::Frozen);
    let db = Database::new(PersistenceMode::InMemory, config).expect("db");
    db.exec(
        "create table \"book\" (\"id\" integer primary key autoincrement, \"title\" text)",
        &[],
    )
    .expect("table");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        db.transaction(|db| -> beanbase::Result<()> {
            db.exec("insert into \"book\" (\"title\") values ('Dune')", &[])?;
            panic!("closure gave up");
        })
    }));
    assert!(outcome.is_err());
    assert_eq!(db.count("book", "", &[]).expect("rolled back"), 0);

    db.transaction(|db| {
        let mut book = db.dispense("book")?;
        book.set("title", "Emma");
        db.store(&mut book)
    })
    .expect("commit");
    // the second transaction committed, so nothing is left to roll back
    assert!(db.rollback().is_err());
    assert_eq!(db.count("book", "", &[]).expect("count"), 1);
}
