use thiserror::Error;

/// Failures a blog operation can report back to the web layer.
#[derive(Debug, Error)]
pub enum BlogError {
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("you are not the author of this blog")]
    NotAuthorized,
    #[error("not found")]
    NotFound,
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl BlogError {
    /// True for errors a handler is expected to recover from.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BlogError::Database(_) | BlogError::PasswordHash(_))
    }
}
