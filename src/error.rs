use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Warehouse error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required staging source missing: {0}")]
    MissingSource(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
