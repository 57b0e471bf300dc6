use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeanbaseError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Schema error: {message}")]
    Schema { table: String, message: String },
    #[error("Missing schema: {0}")]
    MissingSchema(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
}

pub type Result<T> = std::result::Result<T, BeanbaseError>;

impl BeanbaseError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
    pub fn schema(table: &str, message: impl Into<String>) -> Self {
        Self::Schema {
            table: table.to_owned(),
            message: message.into(),
        }
    }
    // "no such table" and "no such column" are what fluid reads tolerate
    pub fn is_missing_schema(&self) -> bool {
        matches!(self, Self::MissingSchema(_))
    }
}

// Helper conversions
impl From<rusqlite::Error> for BeanbaseError {
    fn from(e: rusqlite::Error) -> Self {
        let message = e.to_string();
        if message.contains("no such table") || message.contains("no such column") {
            Self::MissingSchema(message)
        } else {
            Self::Backend(message)
        }
    }
}
impl From<::config::ConfigError> for BeanbaseError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
