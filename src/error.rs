use thiserror::Error;

impl From<sqlx::Error> for ConsentError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(format!("unique constraint violated: {}", db.message()))
            }
            other => Self::Database(format!("{}", other)),
        }
    }
}

impl From<serde_json::Error> for ConsentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Audit chain integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConsentError {
    pub fn study_not_found(slug: &str) -> Self {
        Self::NotFound(format!("study '{}' not found", slug))
    }

    pub fn not_owner() -> Self {
        Self::Forbidden("actor does not own this study".to_string())
    }

    pub fn invalid_join_code() -> Self {
        Self::Conflict("join code does not match".to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsentError>;
