//! Integration tests for the Broad View blog
//!
//! These tests drive the full router over a file-backed database, with
//! the news API replaced by a mock server.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use broad_view::config::{Config, NewsConfig};
use broad_view::db::Database;
use broad_view::routes::{self, AppState};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header as match_header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common {
    use super::*;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub fn news_disabled() -> NewsConfig {
        NewsConfig {
            api_url: "http://127.0.0.1:1/v2/top-headlines".to_string(),
            api_key: String::new(),
            timeout_secs: 1,
        }
    }

    pub fn news_from(server: &MockServer) -> NewsConfig {
        NewsConfig {
            api_url: format!("{}/v2/top-headlines", server.uri()),
            api_key: "integration-key".to_string(),
            timeout_secs: 2,
        }
    }

    pub async fn build_server(database_url: &str, news: NewsConfig) -> (TestServer, Arc<AppState>) {
        let config = Config {
            listen_addr: "127.0.0.1:0".to_string(),
            database_url: database_url.to_string(),
            session_secret: "integration-secret".to_string(),
            session_ttl_secs: 3600,
            news,
        };
        config.validate().unwrap();

        let db = Database::new(&config.database_url).await.unwrap();
        db.initialize().await.unwrap();

        let state = Arc::new(AppState::from_config(Arc::new(db), &config).unwrap());
        let server = TestServer::new(routes::router(state.clone())).unwrap();
        (server, state)
    }

    pub fn session_cookie(response: &TestResponse) -> Option<String> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|pair| pair.to_string())
    }

    pub fn cookie_value(cookie: &str) -> HeaderValue {
        HeaderValue::from_str(cookie).unwrap()
    }

    pub async fn sign_up(server: &TestServer, email: &str, password: &str) -> String {
        let response = server
            .post("/sign-up")
            .form(&[
                ("email", email),
                ("password", password),
                ("confirm_password", password),
            ])
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
        session_cookie(&response).expect("sign-up should start a session")
    }

    pub async fn write_blog(server: &TestServer, cookie: &str, title: &str, body: &str) {
        let response = server
            .post("/write-blog")
            .add_header(header::COOKIE, cookie_value(cookie))
            .form(&[("blog_title", title), ("main_content", body)])
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    }
}

#[cfg(test)]
mod config_integration_tests {
    use std::io::Write;

    use broad_view::config::Config;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_shipped_config() {
        let config = Config::load("broad_view.toml");
        assert!(config.is_ok(), "Failed to load broad_view.toml: {:?}", config.err());

        let config = config.unwrap();
        assert!(config.validate().is_ok());
        assert!(config.news.timeout_secs > 0);
    }

    #[test]
    fn test_config_round_trip() {
        let toml_content = r#"
            listen_addr = "127.0.0.1:4000"
            session_secret = "s3cret"

            [news]
            api_key = "abc"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.session_secret, "s3cret");
        assert_eq!(config.news.api_key, "abc");
        assert_eq!(config.news.timeout_secs, 10);
    }
}

#[cfg(test)]
mod account_tests {
    use super::common::*;
    use super::*;

    #[tokio::test]
    async fn test_sign_up_then_login() {
        let temp_dir = create_temp_dir();
        let (server, _state) = build_server(&create_db_path(&temp_dir), news_disabled()).await;

        sign_up(&server, "a@x.com", "pw1").await;

        let response = server
            .post("/login")
            .form(&[("email", "a@x.com"), ("password", "pw1")])
            .await;
        assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
        assert!(session_cookie(&response).is_some());

        let again = server
            .post("/sign-up")
            .form(&[
                ("email", "a@x.com"),
                ("password", "pw1"),
                ("confirm_password", "pw1"),
            ])
            .await;
        assert_eq!(again.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_wrong_password_issues_no_session() {
        let temp_dir = create_temp_dir();
        let (server, _state) = build_server(&create_db_path(&temp_dir), news_disabled()).await;
        sign_up(&server, "a@x.com", "pw1").await;

        let response = server
            .post("/login")
            .form(&[("email", "a@x.com"), ("password", "pw2")])
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
        assert!(response.text().contains("Invalid credentials"));
    }

    #[tokio::test]
    async fn test_sign_up_requires_confirmation() {
        let temp_dir = create_temp_dir();
        let (server, state) = build_server(&create_db_path(&temp_dir), news_disabled()).await;

        let response = server
            .post("/sign-up")
            .form(&[("email", "a@x.com"), ("password", "pw1")])
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(session_cookie(&response).is_none());
        assert!(state.db.find_user_by_email("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sessions_survive_restart() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        let cookie = {
            let (server, _state) = build_server(&db_url, news_disabled()).await;
            sign_up(&server, "a@x.com", "pw1").await
        };

        let (server, _state) = build_server(&db_url, news_disabled()).await;
        let response = server
            .get("/profile")
            .add_header(header::COOKIE, cookie_value(&cookie))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response.text().contains("a@x.com"));
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use super::*;

    #[tokio::test]
    async fn test_blog_visible_on_home_but_not_other_profiles() {
        let temp_dir = create_temp_dir();
        let (server, _state) = build_server(&create_db_path(&temp_dir), news_disabled()).await;

        let alice = sign_up(&server, "a@x.com", "pw1").await;
        write_blog(&server, &alice, "Hello", "World").await;
        let bob = sign_up(&server, "b@x.com", "pw2").await;

        let home = server.get("/").await;
        assert_eq!(home.status_code(), StatusCode::OK);
        let body = home.text();
        assert!(body.contains("Hello"));
        assert!(body.contains("World"));
        assert!(body.contains("a@x.com"));

        let profile = server
            .get("/profile")
            .add_header(header::COOKIE, cookie_value(&bob))
            .await;
        assert_eq!(profile.status_code(), StatusCode::OK);
        assert!(!profile.text().contains("Hello"));
    }

    #[tokio::test]
    async fn test_other_user_cannot_touch_blog() {
        let temp_dir = create_temp_dir();
        let (server, state) = build_server(&create_db_path(&temp_dir), news_disabled()).await;

        let alice = sign_up(&server, "a@x.com", "pw1").await;
        write_blog(&server, &alice, "Hello", "World").await;
        let bob = sign_up(&server, "b@x.com", "pw2").await;
        let id = state.db.list_content().await.unwrap()[0].id;

        let edit = server
            .post(&format!("/edit-blog/{}", id))
            .add_header(header::COOKIE, cookie_value(&bob))
            .form(&[("blog_title", "Mine now"), ("main_content", "x")])
            .await;
        assert_eq!(edit.status_code(), StatusCode::SEE_OTHER);

        let delete = server
            .post(&format!("/delete-blog/{}", id))
            .add_header(header::COOKIE, cookie_value(&bob))
            .await;
        assert_eq!(delete.status_code(), StatusCode::SEE_OTHER);

        let blog = state.db.get_content(id).await.unwrap();
        assert_eq!(blog.title, "Hello");
        assert_eq!(blog.description, "World");
    }

    #[tokio::test]
    async fn test_full_blog_lifecycle() {
        let temp_dir = create_temp_dir();
        let (server, state) = build_server(&create_db_path(&temp_dir), news_disabled()).await;

        let cookie = sign_up(&server, "a@x.com", "pw1").await;
        write_blog(&server, &cookie, "Draft", "First version").await;
        let id = state.db.list_content().await.unwrap()[0].id;

        let edit = server
            .post(&format!("/edit-blog/{}", id))
            .add_header(header::COOKIE, cookie_value(&cookie))
            .form(&[("blog_title", "Final"), ("main_content", "Second version")])
            .await;
        assert_eq!(edit.status_code(), StatusCode::SEE_OTHER);

        let profile = server
            .get("/profile")
            .add_header(header::COOKIE, cookie_value(&cookie))
            .await;
        let body = profile.text();
        assert!(body.contains("Blog updated successfully!"));
        assert!(body.contains("Final"));
        assert!(!body.contains("Draft"));

        let delete = server
            .post(&format!("/delete-blog/{}", id))
            .add_header(header::COOKIE, cookie_value(&cookie))
            .await;
        assert_eq!(delete.status_code(), StatusCode::SEE_OTHER);
        assert!(state.db.list_content().await.unwrap().is_empty());

        let logout = server
            .get("/logout")
            .add_header(header::COOKIE, cookie_value(&cookie))
            .await;
        assert_eq!(logout.status_code(), StatusCode::SEE_OTHER);

        let profile = server
            .get("/profile")
            .add_header(header::COOKIE, cookie_value(&cookie))
            .await;
        assert_eq!(profile.status_code(), StatusCode::SEE_OTHER);
    }
}

#[cfg(test)]
mod news_feed_tests {
    use super::common::*;
    use super::*;

    #[tokio::test]
    async fn test_headlines_merged_with_local_blogs() {
        let news = MockServer::start().await;
        Mock::given(method("GET"))
            .and(match_header("Authorization", "integration-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "articles": [{
                    "title": "Chip shortage ends",
                    "description": "Finally",
                    "author": "Tech Desk",
                    "publishedAt": "2024-12-09T12:00:00Z",
                    "url": "https://news.example.com/chips"
                }]
            })))
            .mount(&news)
            .await;

        let temp_dir = create_temp_dir();
        let (server, _state) = build_server(&create_db_path(&temp_dir), news_from(&news)).await;
        let cookie = sign_up(&server, "a@x.com", "pw1").await;
        write_blog(&server, &cookie, "Local story", "From a reader").await;

        let body = server.get("/").await.text();

        let headline = body.find("Chip shortage ends").unwrap();
        let local = body.find("Local story").unwrap();
        assert!(headline < local);
        assert!(body.contains("Tech Desk"));
    }

    #[tokio::test]
    async fn test_news_outage_keeps_local_feed() {
        let news = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&news)
            .await;

        let temp_dir = create_temp_dir();
        let (server, _state) = build_server(&create_db_path(&temp_dir), news_from(&news)).await;
        let cookie = sign_up(&server, "a@x.com", "pw1").await;
        write_blog(&server, &cookie, "Older", "one").await;
        write_blog(&server, &cookie, "Newer", "two").await;

        let response = server.get("/").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.text();
        let newer = body.find("Newer").unwrap();
        let older = body.find("Older").unwrap();
        assert!(newer < older);
    }

    #[tokio::test]
    async fn test_unreachable_news_api_keeps_local_feed() {
        let temp_dir = create_temp_dir();
        let news = NewsConfig {
            api_url: "http://127.0.0.1:1/v2/top-headlines".to_string(),
            api_key: "key".to_string(),
            timeout_secs: 1,
        };
        let (server, _state) = build_server(&create_db_path(&temp_dir), news).await;
        let cookie = sign_up(&server, "a@x.com", "pw1").await;
        write_blog(&server, &cookie, "Still here", "body").await;

        let response = server.get("/").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response.text().contains("Still here"));
    }
}
