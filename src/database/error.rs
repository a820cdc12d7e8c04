use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound,
    UniqueViolation,
    Connection,
    Query,
    Mapping,
}

/// Database failure with enough classification for callers to decide
/// between retrying and surfacing.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Mapping, message)
    }

    pub fn from_sqlx(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound, e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::new(DatabaseErrorKind::UniqueViolation, e.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::Connection, e.to_string())
            }
            _ => Self::new(DatabaseErrorKind::Query, e.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == DatabaseErrorKind::NotFound
    }
}
