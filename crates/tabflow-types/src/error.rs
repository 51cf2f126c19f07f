use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabflowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Statistic '{kind}' for column '{column}' has not been computed")]
    StatsNotReady { kind: String, column: String },
}

pub type Result<T> = std::result::Result<T, TabflowError>;
