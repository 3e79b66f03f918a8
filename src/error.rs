use thiserror::Error;

/// Failures raised from inside a database closure. They travel through
/// `tokio_rusqlite::Error::Other` and are unwrapped again by `From` below.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("feed {0} not found")]
    FeedNotFound(i64),

    #[error("item {0} not found")]
    ItemNotFound(i64),

    #[error("feed {0} is not a group")]
    NotAGroup(i64),

    #[error("invalid move: {0}")]
    InvalidMove(String),
}

impl StoreError {
    pub(crate) fn into_db(self) -> tokio_rusqlite::Error {
        tokio_rusqlite::Error::Other(Box::new(self))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("OPML error: {0}")]
    Opml(#[from] opml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Other(inner) => match inner.downcast::<StoreError>() {
                Ok(store) => AppError::Store(*store),
                Err(other) => AppError::Database(tokio_rusqlite::Error::Other(other)),
            },
            tokio_rusqlite::Error::Rusqlite(sqlite) => AppError::Sqlite(sqlite),
            other => AppError::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_survive_the_connection_boundary() {
        let err: AppError = StoreError::FeedNotFound(7).into_db().into();
        assert!(matches!(err, AppError::Store(StoreError::FeedNotFound(7))));
    }

    #[test]
    fn foreign_boxed_errors_stay_database_errors() {
        let boxed = tokio_rusqlite::Error::Other(Box::new(std::io::Error::other("boom")));
        let err: AppError = boxed.into();
        assert!(matches!(err, AppError::Database(_)));
    }
}
