use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::{debug, info};

use crate::error::BlogError;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
}

/// A blog post together with its author's email.
#[derive(Debug, Clone, FromRow)]
pub struct Content {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub pub_date: DateTime<Utc>,
    pub author_id: i64,
    pub author_email: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub token: String,
    pub user_id: Option<i64>,
    pub flash_level: Option<String>,
    pub flash_message: Option<String>,
}

const CONTENT_COLUMNS: &str = r#"
    SELECT content.id, content.title, content.description, content.pub_date,
           content.author_id, users.email AS author_email
    FROM content
    JOIN users ON users.id = content.author_id
"#;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to `sqlite::memory:` opens a fresh database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_content_author_pub_date
            ON content(author_id, pub_date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                flash_level TEXT,
                flash_message TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users

    pub async fn insert_user(&self, email: &str, password_hash: &str) -> Result<User, BlogError> {
        let email = normalize_email(email);

        let result = sqlx::query("INSERT INTO users (email, password_hash) VALUES (?, ?)")
            .bind(&email)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db_err) if db_err.is_unique_violation() => BlogError::DuplicateEmail,
                _ => BlogError::Database(e),
            })?;

        let id = result.last_insert_rowid();
        info!(user_id = id, email = %email, "user created");

        Ok(User {
            id,
            email,
            password_hash: password_hash.to_string(),
        })
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, BlogError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, BlogError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    // Content

    pub async fn create_content(
        &self,
        title: &str,
        description: &str,
        author_id: i64,
    ) -> Result<Content, BlogError> {
        let title = require("title", title)?;
        let description = require("description", description)?;
        let pub_date = timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO content (title, description, pub_date, author_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(&pub_date)
        .bind(author_id)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(content_id = id, author_id, "blog created");

        self.get_content(id).await
    }

    /// Every blog, newest first.
    pub async fn list_content(&self) -> Result<Vec<Content>, BlogError> {
        let content = sqlx::query_as::<_, Content>(&format!(
            "{CONTENT_COLUMNS} ORDER BY content.pub_date DESC, content.id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(content)
    }

    pub async fn list_content_by_author(&self, author_id: i64) -> Result<Vec<Content>, BlogError> {
        let content = sqlx::query_as::<_, Content>(&format!(
            r#"{CONTENT_COLUMNS}
            WHERE content.author_id = ?
            ORDER BY content.pub_date DESC, content.id DESC"#
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(content)
    }

    pub async fn get_content(&self, id: i64) -> Result<Content, BlogError> {
        sqlx::query_as::<_, Content>(&format!("{CONTENT_COLUMNS} WHERE content.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(BlogError::NotFound)
    }

    /// Look up a blog and make sure `caller_id` wrote it.
    pub async fn get_owned_content(&self, id: i64, caller_id: i64) -> Result<Content, BlogError> {
        let content = self.get_content(id).await?;
        if content.author_id != caller_id {
            return Err(BlogError::NotAuthorized);
        }
        Ok(content)
    }

    pub async fn update_content(
        &self,
        id: i64,
        caller_id: i64,
        title: &str,
        description: &str,
    ) -> Result<Content, BlogError> {
        self.get_owned_content(id, caller_id).await?;
        let title = require("title", title)?;
        let description = require("description", description)?;

        sqlx::query(
            r#"
            UPDATE content
            SET title = ?, description = ?
            WHERE id = ? AND author_id = ?
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(id)
        .bind(caller_id)
        .execute(&self.pool)
        .await?;

        info!(content_id = id, "blog updated");
        self.get_content(id).await
    }

    pub async fn delete_content(&self, id: i64, caller_id: i64) -> Result<(), BlogError> {
        let deleted = sqlx::query("DELETE FROM content WHERE id = ? AND author_id = ?")
            .bind(id)
            .bind(caller_id)
            .execute(&self.pool)
            .await?;

        if deleted.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM content WHERE id = ?)")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;

            return if exists {
                Err(BlogError::NotAuthorized)
            } else {
                Err(BlogError::NotFound)
            };
        }

        info!(content_id = id, "blog deleted");
        Ok(())
    }

    // Sessions

    pub async fn insert_session(
        &self,
        token: &str,
        user_id: Option<i64>,
        flash: Option<(&str, &str)>,
    ) -> Result<(), BlogError> {
        let (flash_level, flash_message) = flash.unzip();
        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id, flash_level, flash_message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(flash_level)
        .bind(flash_message)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sessions issued at or before `issued_after` count as expired.
    pub async fn find_session(
        &self,
        token: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<Option<SessionRow>, BlogError> {
        let session = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT token, user_id, flash_level, flash_message
            FROM sessions
            WHERE token = ? AND created_at > ?
            "#,
        )
        .bind(token)
        .bind(timestamp(issued_after))
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn delete_expired_sessions(
        &self,
        issued_after: DateTime<Utc>,
    ) -> Result<u64, BlogError> {
        let result = sqlx::query("DELETE FROM sessions WHERE created_at <= ?")
            .bind(timestamp(issued_after))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_session(&self, token: &str) -> Result<(), BlogError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_session_flash(
        &self,
        token: &str,
        level: &str,
        message: &str,
    ) -> Result<(), BlogError> {
        sqlx::query("UPDATE sessions SET flash_level = ?, flash_message = ? WHERE token = ?")
            .bind(level)
            .bind(message)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read and clear the pending flash notice. Only the request whose
    /// conditional clear matches the notice it read gets to show it.
    pub async fn take_session_flash(
        &self,
        token: &str,
    ) -> Result<Option<(String, String)>, BlogError> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT flash_level, flash_message FROM sessions WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        let Some((Some(level), Some(message))) = row else {
            return Ok(None);
        };

        let cleared = sqlx::query(
            r#"
            UPDATE sessions SET flash_level = NULL, flash_message = NULL
            WHERE token = ? AND flash_level = ? AND flash_message = ?
            "#,
        )
        .bind(token)
        .bind(&level)
        .bind(&message)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if cleared == 0 {
            return Ok(None);
        }
        debug!("flash notice consumed");
        Ok(Some((level, message)))
    }
}

// Fixed-width UTC so stored timestamps compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str, BlogError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BlogError::EmptyField(field));
    }
    Ok(value)
}
