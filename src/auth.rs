use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use rand_core::OsRng;
use tracing::{info, instrument};

use crate::db::{Database, User};
use crate::error::BlogError;
use crate::routes::{AppError, AppState};
use crate::session::{Flash, Session, SessionStore};

pub const LOGIN_PATH: &str = "/login";

pub fn hash_password(password: &str) -> Result<String, BlogError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| BlogError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// A stored hash that cannot be parsed never matches.
pub fn verify_password(user: &User, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(&user.password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// Keeps argon2 work off the async worker threads.
async fn run_blocking<T, F>(work: F) -> Result<T, BlogError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BlogError::PasswordHash(e.to_string()))
}

/// Create an account for `email`, storing only the derived hash.
#[instrument(skip(db, password))]
pub async fn register(db: &Database, email: &str, password: &str) -> Result<User, BlogError> {
    let password = password.to_string();
    let hash = run_blocking(move || hash_password(&password)).await??;
    db.insert_user(email, &hash).await
}

#[instrument(skip(db, password))]
pub async fn authenticate(db: &Database, email: &str, password: &str) -> Result<User, BlogError> {
    let user = db
        .find_user_by_email(email)
        .await?
        .ok_or(BlogError::InvalidCredentials)?;

    let password = password.to_string();
    let (user, verified) = run_blocking(move || {
        let verified = verify_password(&user, &password);
        (user, verified)
    })
    .await?;
    if !verified {
        return Err(BlogError::InvalidCredentials);
    }

    info!(user_id = user.id, "user authenticated");
    Ok(user)
}

/// Whoever is making the request, signed in or not.
pub struct Visitor {
    pub session: Option<Session>,
    pub user: Option<User>,
}

impl Visitor {
    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    pub async fn take_flash(&self, sessions: &SessionStore) -> Result<Option<Flash>, BlogError> {
        match &self.session {
            Some(session) => sessions.take_flash(session).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Visitor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = state.sessions.load(&parts.headers).await?;
        let user = match session.as_ref().and_then(|s| s.user_id) {
            Some(user_id) => state.db.find_user_by_id(user_id).await?,
            None => None,
        };
        Ok(Visitor { session, user })
    }
}

/// Guard for pages that need a signed-in user; everyone else is sent to the
/// login form.
pub struct SignedIn {
    pub user: User,
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for SignedIn {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let visitor = Visitor::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match visitor {
            Visitor {
                session: Some(session),
                user: Some(user),
            } => Ok(SignedIn { user, session }),
            _ => Err(Redirect::to(LOGIN_PATH).into_response()),
        }
    }
}
