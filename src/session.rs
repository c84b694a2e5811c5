//! Cookie-addressed server-side sessions.
//!
//! The cookie only carries a random token and its HMAC signature; the
//! signed-in user and the pending flash notice live in the `sessions` table.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::BlogError;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Success,
    Info,
    Danger,
}

impl FlashLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Info => "info",
            FlashLevel::Danger => "danger",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(FlashLevel::Success),
            "info" => Some(FlashLevel::Info),
            "danger" => Some(FlashLevel::Danger),
            _ => None,
        }
    }
}

/// A one-time notice shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Info,
            message: message.into(),
        }
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Danger,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: Option<i64>,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    mac: HmacSha256,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Arc<Database>, secret: &str, ttl_secs: u64) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid session secret: {}", e))?;
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .filter(|ttl| Utc::now().checked_sub_signed(*ttl).is_some())
            .ok_or_else(|| anyhow::anyhow!("session lifetime of {}s is out of range", ttl_secs))?;
        Ok(Self { db, mac, ttl })
    }

    // Anything issued at or before this instant has expired.
    fn issued_after(&self) -> DateTime<Utc> {
        Utc::now() - self.ttl
    }

    /// Issue a brand new session, optionally bound to a user.
    pub async fn start(
        &self,
        user_id: Option<i64>,
        flash: Option<&Flash>,
    ) -> Result<Session, BlogError> {
        let expired = self.db.delete_expired_sessions(self.issued_after()).await?;
        if expired > 0 {
            debug!(expired, "pruned expired sessions");
        }

        let token = Uuid::new_v4().simple().to_string();
        self.db
            .insert_session(
                &token,
                user_id,
                flash.map(|f| (f.level.as_str(), f.message.as_str())),
            )
            .await?;
        debug!(?user_id, "session started");
        Ok(Session { token, user_id })
    }

    /// Resolve the session named by the request's cookie, if it is genuine,
    /// still exists and has not expired.
    pub async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>, BlogError> {
        let Some(value) = session_cookie(headers) else {
            return Ok(None);
        };
        let Some(token) = self.verify(&value) else {
            warn!("rejected session cookie with a bad signature");
            return Ok(None);
        };

        let session = self
            .db
            .find_session(token, self.issued_after())
            .await?
            .map(|row| Session {
                token: row.token,
                user_id: row.user_id,
            });
        Ok(session)
    }

    pub async fn end(&self, session: &Session) -> Result<(), BlogError> {
        self.db.delete_session(&session.token).await?;
        debug!(user_id = ?session.user_id, "session ended");
        Ok(())
    }

    pub async fn flash(&self, session: &Session, flash: Flash) -> Result<(), BlogError> {
        self.db
            .set_session_flash(&session.token, flash.level.as_str(), &flash.message)
            .await
    }

    pub async fn take_flash(&self, session: &Session) -> Result<Option<Flash>, BlogError> {
        let flash = self
            .db
            .take_session_flash(&session.token)
            .await?
            .and_then(|(level, message)| {
                FlashLevel::parse(&level).map(|level| Flash { level, message })
            });
        Ok(flash)
    }

    /// `Set-Cookie` value that hands the session to the browser.
    pub fn set_cookie(&self, session: &Session) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            SESSION_COOKIE,
            self.sign(&session.token),
            self.ttl.num_seconds()
        )
    }

    fn sign(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        format!("{}.{}", token, hex::encode(mac.finalize().into_bytes()))
    }

    fn verify<'a>(&self, value: &'a str) -> Option<&'a str> {
        let (token, signature) = value.rsplit_once('.')?;
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(token)
    }
}

/// Extract the raw session cookie value from request headers.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}
