//! Configuration of a persistence context.
//!
//! A configuration can be built in code or read through the `config` crate
//! from a file (any format it understands) overlaid with `BEANBASE_`
//! environment variables:
//!
//! ```toml
//! strict_type_names = true
//! unique_links = false
//! mode = { chilly = ["book"] }
//!
//! [dependencies]
//! page = ["book", "magazine"]
//! ```

use std::collections::{BTreeMap, BTreeSet};

use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// How far the schema may follow the data.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Tables and columns are created and widened as needed.
    #[default]
    Fluid,
    /// No schema change, ever.
    Frozen,
    /// Fluid, except for the listed types.
    Chilly(BTreeSet<String>),
}

impl Mode {
    pub fn chilly<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Mode::Chilly(types.into_iter().map(Into::into).collect())
    }
    /// Whether the schema of `kind` must be left alone.
    pub fn is_frozen(&self, kind: &str) -> bool {
        match self {
            Mode::Fluid => false,
            Mode::Frozen => true,
            Mode::Chilly(types) => types.contains(kind),
        }
    }
    pub fn is_fluid(&self) -> bool {
        matches!(self, Mode::Fluid)
    }
}

/// Dependent type -> the parent types whose lists it cannot outlive.
pub type DependencyMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub mode: Mode,
    pub dependencies: DependencyMap,
    pub strict_type_names: bool,
    pub unique_links: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            mode: Mode::Fluid,
            dependencies: DependencyMap::new(),
            strict_type_names: true,
            unique_links: false,
        }
    }
}

impl Configuration {
    /// Reads the configuration from an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("BEANBASE").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
    pub fn with_dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = dependencies;
        self
    }
    pub fn with_strict_type_names(mut self, strict: bool) -> Self {
        self.strict_type_names = strict;
        self
    }
    pub fn with_unique_links(mut self, unique: bool) -> Self {
        self.unique_links = unique;
        self
    }
    /// Whether an owned `child` must be deleted once its `parent` lets go of it.
    pub fn is_dependent(&self, child: &str, parent: &str) -> bool {
        self.dependencies
            .get(child)
            .is_some_and(|parents| parents.iter().any(|p| p == parent))
    }
}
