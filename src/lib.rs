//! Beanbase – a schema-adaptive object-relational persistence core.
//!
//! Beanbase stores *beans*: typed records of scalar properties that need no
//! declared schema. The tables and columns a bean needs are created when it
//! is first stored, and widened when a later value no longer fits:
//! * A [`bean::Bean`] has a type (its table), an id and scalar
//!   [`datatype::Value`]s.
//! * A bean may reference *parents*, stored as `<name>_id` columns.
//! * An *owned list* (`ownPage` on a `book`) holds children carrying a
//!   `book_id` column.
//! * A *shared list* (`sharedTag`) holds beans linked through the `book_tag`
//!   link table.
//!
//! Storing a bean cascades through all of these. Removing a child from an
//! owned list releases it (its foreign key becomes `NULL`) or, when the child
//! type depends on the owner, trashes it.
//!
//! ## Modules
//! * [`datatype`] – The [`datatype::Value`] enum and the [`datatype::TypeRank`]
//!   inference that decides column types.
//! * [`schema`] – The [`schema::Synchronizer`] planning and applying schema
//!   changes, and the identifier rules.
//! * [`persist`] – The [`persist::Adapter`] / [`persist::QueryWriter`] seam and
//!   the SQLite [`persist::Persistor`] behind it.
//! * [`database`] – The [`database::Database`] context: configuration,
//!   transactions and raw queries.
//! * [`repository`] – Dispense, store, load, trash and the finders.
//! * [`association`] – Linking beans and querying what they are linked to.
//! * [`duplication`] – Deep copies, exports and imports of bean graphs.
//!
//! ## Modes
//! A context is *fluid* (the schema follows the data), *frozen* (no schema
//! change at all) or *chilly* (frozen for a listed set of types). Writes that
//! would change a frozen schema fail with [`error::BeanbaseError::Schema`].
//! Reads of tables that do not exist yet return nothing unless frozen.
//!
//! ## Quick Start
//! ```
//! use beanbase::Database;
//! let db = Database::in_memory().unwrap();
//! let mut book = db.dispense("book").unwrap();
//! book.set("title", "Dune").set("pages", 412);
//! let mut page = db.dispense("page").unwrap();
//! page.set("number", 1);
//! book.own_mut("page").push(page);
//! let id = db.store(&mut book).unwrap();
//! let mut loaded = db.load("book", id).unwrap();
//! assert_eq!(loaded.get("title").as_str(), Some("Dune"));
//! assert_eq!(db.open_own(&mut loaded, "page").unwrap().len(), 1);
//! ```
//!
//! ## Configuration
//! See [`config::Configuration`]; it can be built in code or loaded from a
//! file and `BEANBASE_` environment variables. Logging goes through
//! `tracing`, and [`logging::init`] installs a subscriber for it.

pub mod association;
pub mod bean;
pub mod config;
pub mod database;
pub mod datatype;
pub mod duplication;
pub mod error;
pub mod logging;
pub mod persist;
pub mod repository;
pub mod schema;

pub use bean::Bean;
pub use config::{Configuration, DependencyMap, Mode};
pub use database::Database;
pub use datatype::{TypeRank, Value};
pub use duplication::DuplicationTrail;
pub use error::{BeanbaseError, Result};
pub use persist::PersistenceMode;
