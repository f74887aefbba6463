use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("link already exists: {0}")]
    DuplicateUrl(String),

    #[error("link not found: {0}")]
    LinkNotFound(String),

    #[error("OpenAI API error: {0}")]
    OpenAi(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(tokio_rusqlite::Error::Rusqlite(e))
    }
}

impl AppError {
    /// True when the error is a SQLite UNIQUE constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(tokio_rusqlite::Error::Rusqlite(
                rusqlite::Error::SqliteFailure(err, _),
            )) => err.code == rusqlite::ErrorCode::ConstraintViolation,
            _ => false,
        }
    }
}
