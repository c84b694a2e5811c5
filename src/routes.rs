use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::auth::{self, SignedIn, Visitor};
use crate::config::Config;
use crate::db::{Content, Database};
use crate::error::BlogError;
use crate::news::{Article, NewsClient};
use crate::session::{Flash, Session, SessionStore};

const PROFILE_PATH: &str = "/profile";

pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: SessionStore,
    pub news: Arc<NewsClient>,
}

impl AppState {
    pub fn from_config(db: Arc<Database>, config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            sessions: SessionStore::new(
                db.clone(),
                &config.session_secret,
                config.session_ttl_secs,
            )?,
            news: Arc::new(NewsClient::new(&config.news)?),
            db,
        })
    }
}

/// The application's routing table.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/create_account", get(create_account))
        .route("/login", get(login_form).post(login))
        .route("/sign-up", get(sign_up_form).post(sign_up))
        .route("/profile", get(profile))
        .route("/about", get(about))
        .route("/books", get(books))
        .route("/write-blog", get(write_blog_form).post(write_blog))
        .route("/edit-blog/:id", get(edit_blog_form).post(edit_blog))
        .route("/delete-blog/:id", post(delete_blog))
        .route("/logout", get(logout))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
    pub entries: Vec<FeedEntry>,
}

/// One row of the home feed, either a headline or a local blog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub published_at: String,
    pub url: Option<String>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
    pub email: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "sign_up.html")]
pub struct SignUpTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
    pub email: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
    pub email: String,
    pub blogs: Vec<Content>,
}

#[derive(Template)]
#[template(path = "write_blog.html")]
pub struct WriteBlogTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
    pub title: String,
    pub description: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "edit_blog.html")]
pub struct EditBlogTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
    pub id: i64,
    pub title: String,
    pub description: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "create_account.html")]
pub struct CreateAccountTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
}

#[derive(Template)]
#[template(path = "about.html")]
pub struct AboutTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
}

#[derive(Template)]
#[template(path = "books.html")]
pub struct BooksTemplate {
    pub signed_in: bool,
    pub flash: Option<Flash>,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<BlogError>() {
            Some(BlogError::NotFound) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            Some(err) if err.is_recoverable() => {
                warn!("Unhandled request error: {}", err);
                (StatusCode::BAD_REQUEST, format!("Error: {}", err)).into_response()
            }
            _ => {
                error!("Request failed: {:#}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

// Forms
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !looks_like_email(&self.email) {
            return Err("Please enter a valid email address");
        }
        if self.password.is_empty() {
            return Err("Password is required");
        }
        if self.confirm_password != self.password {
            return Err("Passwords must match");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct BlogForm {
    #[serde(default)]
    pub blog_title: String,
    #[serde(default)]
    pub main_content: String,
}

fn looks_like_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

/// Headlines first, then every local blog in store order.
pub fn build_feed(articles: Vec<Article>, blogs: Vec<Content>) -> Vec<FeedEntry> {
    let headlines = articles.into_iter().map(|article| FeedEntry {
        title: article.title,
        description: article.description.unwrap_or_default(),
        author: article.author,
        published_at: article.published_at.unwrap_or_default(),
        url: article.url.filter(|url| is_web_link(url)),
    });
    let local = blogs.into_iter().map(|blog| FeedEntry {
        published_at: blog.pub_date.format("%Y-%m-%d %H:%M:%S").to_string(),
        title: blog.title,
        description: blog.description,
        author: Some(blog.author_email),
        url: None,
    });
    headlines.chain(local).collect()
}

// Third-party links are only rendered for plain web URLs.
fn is_web_link(url: &str) -> bool {
    let url = url.trim_start().to_ascii_lowercase();
    url.starts_with("http://") || url.starts_with("https://")
}

fn with_session(sessions: &SessionStore, session: &Session, to: &str) -> Response {
    (
        [(header::SET_COOKIE, sessions.set_cookie(session))],
        Redirect::to(to),
    )
        .into_response()
}

async fn redirect_with_flash(
    state: &AppState,
    session: &Session,
    flash: Flash,
    to: &str,
) -> Result<Response, AppError> {
    state.sessions.flash(session, flash).await?;
    Ok(Redirect::to(to).into_response())
}

// Route handlers
pub async fn index(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    let (articles, blogs) = tokio::join!(state.news.fetch_top_headlines(), state.db.list_content());
    let entries = build_feed(articles, blogs?);

    Ok(HtmlTemplate(HomeTemplate {
        signed_in: visitor.is_signed_in(),
        flash: visitor.take_flash(&state.sessions).await?,
        entries,
    }))
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    Ok(CreateAccountTemplate {
        signed_in: visitor.is_signed_in(),
        flash: visitor.take_flash(&state.sessions).await?,
    })
}

pub async fn about(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    Ok(AboutTemplate {
        signed_in: visitor.is_signed_in(),
        flash: visitor.take_flash(&state.sessions).await?,
    })
}

pub async fn books(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    Ok(BooksTemplate {
        signed_in: visitor.is_signed_in(),
        flash: visitor.take_flash(&state.sessions).await?,
    })
}

pub async fn login_form(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    Ok(HtmlTemplate(LoginTemplate {
        signed_in: visitor.is_signed_in(),
        flash: visitor.take_flash(&state.sessions).await?,
        email: String::new(),
        error: None,
    }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    match auth::authenticate(&state.db, &form.email, &form.password).await {
        Ok(user) => {
            if let Some(previous) = &visitor.session {
                state.sessions.end(previous).await?;
            }
            let session = state
                .sessions
                .start(Some(user.id), Some(&Flash::success("Login Successfully!")))
                .await?;
            info!(user_id = user.id, "user logged in");
            Ok(with_session(&state.sessions, &session, "/"))
        }
        Err(BlogError::InvalidCredentials) => {
            warn!(email = %form.email, "failed login attempt");
            Ok(HtmlTemplate(LoginTemplate {
                signed_in: visitor.is_signed_in(),
                flash: None,
                email: form.email,
                error: Some("Invalid credentials".to_string()),
            })
            .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn sign_up_form(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    Ok(HtmlTemplate(SignUpTemplate {
        signed_in: visitor.is_signed_in(),
        flash: visitor.take_flash(&state.sessions).await?,
        email: String::new(),
        error: None,
    }))
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Form(form): Form<SignUpForm>,
) -> Result<Response, AppError> {
    let rejected = |status: StatusCode, email: String, error: &str| {
        (
            status,
            HtmlTemplate(SignUpTemplate {
                signed_in: visitor.is_signed_in(),
                flash: None,
                email,
                error: Some(error.to_string()),
            }),
        )
            .into_response()
    };

    if let Err(reason) = form.validate() {
        return Ok(rejected(StatusCode::UNPROCESSABLE_ENTITY, form.email, reason));
    }

    match auth::register(&state.db, &form.email, &form.password).await {
        Ok(user) => {
            if let Some(previous) = &visitor.session {
                state.sessions.end(previous).await?;
            }
            let session = state
                .sessions
                .start(
                    Some(user.id),
                    Some(&Flash::success("Account Created Successfully!")),
                )
                .await?;
            Ok(with_session(&state.sessions, &session, "/"))
        }
        Err(BlogError::DuplicateEmail) => {
            warn!(email = %form.email, "sign-up with an existing email");
            Ok(rejected(
                StatusCode::CONFLICT,
                form.email,
                "An account with this email already exists",
            ))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
) -> Result<impl IntoResponse, AppError> {
    let blogs = state.db.list_content_by_author(signed_in.user.id).await?;

    Ok(HtmlTemplate(ProfileTemplate {
        signed_in: true,
        flash: state.sessions.take_flash(&signed_in.session).await?,
        email: signed_in.user.email,
        blogs,
    }))
}

pub async fn write_blog_form(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
) -> Result<impl IntoResponse, AppError> {
    Ok(HtmlTemplate(WriteBlogTemplate {
        signed_in: true,
        flash: state.sessions.take_flash(&signed_in.session).await?,
        title: String::new(),
        description: String::new(),
        error: None,
    }))
}

pub async fn write_blog(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
    Form(form): Form<BlogForm>,
) -> Result<Response, AppError> {
    match state
        .db
        .create_content(&form.blog_title, &form.main_content, signed_in.user.id)
        .await
    {
        Ok(_) => {
            redirect_with_flash(
                &state,
                &signed_in.session,
                Flash::success("Blog posted successfully!"),
                "/",
            )
            .await
        }
        Err(err @ BlogError::EmptyField(_)) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            HtmlTemplate(WriteBlogTemplate {
                signed_in: true,
                flash: None,
                title: form.blog_title,
                description: form.main_content,
                error: Some(err.to_string()),
            }),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn edit_blog_form(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    match state.db.get_owned_content(id, signed_in.user.id).await {
        Ok(blog) => Ok(HtmlTemplate(EditBlogTemplate {
            signed_in: true,
            flash: state.sessions.take_flash(&signed_in.session).await?,
            id: blog.id,
            title: blog.title,
            description: blog.description,
            error: None,
        })
        .into_response()),
        Err(BlogError::NotAuthorized) => {
            redirect_with_flash(
                &state,
                &signed_in.session,
                Flash::danger("You are not authorized to edit this blog"),
                PROFILE_PATH,
            )
            .await
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn edit_blog(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<BlogForm>,
) -> Result<Response, AppError> {
    match state
        .db
        .update_content(id, signed_in.user.id, &form.blog_title, &form.main_content)
        .await
    {
        Ok(_) => {
            redirect_with_flash(
                &state,
                &signed_in.session,
                Flash::success("Blog updated successfully!"),
                PROFILE_PATH,
            )
            .await
        }
        Err(BlogError::NotAuthorized) => {
            warn!(content_id = id, user_id = signed_in.user.id, "edit by non-author refused");
            redirect_with_flash(
                &state,
                &signed_in.session,
                Flash::danger("You are not authorized to edit this blog"),
                PROFILE_PATH,
            )
            .await
        }
        Err(err @ BlogError::EmptyField(_)) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            HtmlTemplate(EditBlogTemplate {
                signed_in: true,
                flash: None,
                id,
                title: form.blog_title,
                description: form.main_content,
                error: Some(err.to_string()),
            }),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_blog(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    match state.db.delete_content(id, signed_in.user.id).await {
        Ok(()) => {
            redirect_with_flash(
                &state,
                &signed_in.session,
                Flash::success("Blog deleted successfully!"),
                PROFILE_PATH,
            )
            .await
        }
        Err(BlogError::NotAuthorized) => {
            warn!(content_id = id, user_id = signed_in.user.id, "delete by non-author refused");
            redirect_with_flash(
                &state,
                &signed_in.session,
                Flash::danger("You are not authorized to delete this blog"),
                PROFILE_PATH,
            )
            .await
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    signed_in: SignedIn,
) -> Result<Response, AppError> {
    state.sessions.end(&signed_in.session).await?;
    let session = state
        .sessions
        .start(None, Some(&Flash::info("You Have Been Logged Out!")))
        .await?;
    info!(user_id = signed_in.user.id, "user logged out");
    Ok(with_session(&state.sessions, &session, "/"))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
