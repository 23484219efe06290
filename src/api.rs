//! HTTP surface: registration, login, summarization, and history.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use eyre::{Result, WrapErr};
use log::{error, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{CurrentUser, TokenKeys, hash_password, verify_password};
use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::store::{HistoryEntry, Store, StoreError};
use crate::summarize::{ChunkSummarizer, LlmClient, Model, summarize_transcript};
use crate::transcript::{TranscriptCascade, TranscriptError};
use crate::{extract_video_id, is_live_stream};

/// How often expired rate-limit windows are dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Could not validate credentials")]
    Unauthorized,

    #[error("Incorrect username or password")]
    BadCredentials,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    TranscriptUnavailable(#[from] TranscriptError),

    #[error("Error processing video: {0}")]
    Processing(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::BadCredentials => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::TranscriptUnavailable(_) | ApiError::Processing(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Internal(msg) => {
                error!("Internal error: {msg}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(serde_json::json!({ "detail": detail }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run a blocking store operation off the async runtime
pub(crate) async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Shared state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tokens: Arc<TokenKeys>,
    pub limiter: Arc<RateLimiter>,
    pub transcripts: Arc<TranscriptCascade>,
    pub summarizer: Arc<dyn ChunkSummarizer>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let secret = config
            .secret_key
            .as_deref()
            .ok_or_else(|| eyre::eyre!("secret_key is not set"))?;

        let client = http_client(config)?;
        let db_path = config.database_path();
        let store = Store::open(&db_path).wrap_err_with(|| format!("could not open database {}", db_path.display()))?;

        Ok(Self {
            store: Arc::new(store),
            tokens: Arc::new(TokenKeys::new(secret, config.access_token_expire_minutes)),
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            transcripts: Arc::new(TranscriptCascade::from_config(&client, &config.transcript)),
            summarizer: Arc::new(LlmClient::from_config(client, config)),
        })
    }
}

/// Shared outbound client with the fixed per-call timeout
pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    Ok(client)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/token", post(login))
        .route("/summarize", post(summarize))
        .route("/history", get(history))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    config.validate_for_serve()?;
    let state = AppState::from_config(&config)?;

    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.prune().await;
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .wrap_err_with(|| format!("could not bind {}", config.bind))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserOut {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub link: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummarizeParams {
    #[serde(default)]
    pub model: Model,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<UserCreate>, JsonRejection>,
) -> ApiResult<Json<UserOut>> {
    let Json(req) = payload?;
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::Validation("username must not be empty".to_string()));
    }
    if req.password.is_empty() {
        return Err(ApiError::Validation("password must not be empty".to_string()));
    }

    let store = state.store.clone();
    let user = run_blocking(move || {
        let hashed = hash_password(&req.password);
        store.create_user(&username, &email, &hashed)
    })
    .await?;

    info!("Registered user {} ({})", user.username, user.id);
    Ok(Json(UserOut {
        id: user.id,
        username: user.username,
        email: user.email,
    }))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Form<LoginForm>, FormRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Form(form) = payload?;
    let store = state.store.clone();
    let username = form.username.clone();
    let verified = run_blocking(move || {
        let user = store.find_user(&username)?;
        Ok(user.filter(|u| verify_password(&form.password, &u.hashed_password)))
    })
    .await?;

    let user = verified.ok_or(ApiError::BadCredentials)?;
    let access_token = state
        .tokens
        .issue(&user.username)
        .map_err(|e| ApiError::Internal(format!("could not issue token: {e}")))?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

async fn summarize(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Result<Query<SummarizeParams>, QueryRejection>,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> ApiResult<Json<SummarizeResponse>> {
    let Query(params) = params?;
    let Json(req) = payload?;
    let link = req.link.trim().to_string();
    validate_link(&link)?;

    if !state.limiter.check(user.id).await {
        warn!("Rate limit exceeded for user {}", user.id);
        return Err(ApiError::RateLimited);
    }

    let video_id = extract_video_id(&link).map_err(|e| ApiError::Processing(format!("{e:#}")))?;
    if is_live_stream(&link) {
        info!("{link} looks like a live stream; captions may be incomplete");
    }

    let transcript = state.transcripts.fetch(&video_id).await.inspect_err(|e| {
        error!("Transcript error: {e}");
    })?;

    let model = params.model;
    let summary = summarize_transcript(state.summarizer.as_ref(), &transcript.text, model).await;
    info!(
        "Summarized {video_id} for user {} with {model}: {}/{} chunks{}",
        user.id,
        summary.chunks_summarized,
        summary.chunks_total,
        if summary.rate_limited { " (rate limited)" } else { "" }
    );

    let store = state.store.clone();
    let text = summary.text.clone();
    run_blocking(move || store.add_history(user.id, &link, &text))
        .await
        .map_err(|e| ApiError::Processing(e.to_string()))?;

    Ok(Json(SummarizeResponse { summary: summary.text }))
}

async fn history(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let store = state.store.clone();
    let entries = run_blocking(move || store.list_history(user.id)).await?;
    Ok(Json(entries))
}

fn validate_link(link: &str) -> ApiResult<()> {
    match Url::parse(link) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        _ => Err(ApiError::Validation(format!("link is not a valid http(s) URL: {link}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::Processing("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
        let unavailable = ApiError::from(TranscriptError::Unavailable {
            video_id: "abc".into(),
        });
        assert_eq!(unavailable.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            unavailable.to_string(),
            "Transcript not available for video abc after trying all methods"
        );
    }

    #[test]
    fn test_processing_message() {
        let e = ApiError::Processing("boom".into());
        assert_eq!(e.to_string(), "Error processing video: boom");
    }

    #[test]
    fn test_duplicate_maps_to_bad_request() {
        let e = ApiError::from(StoreError::Duplicate("Username"));
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.to_string(), "Username already registered");
    }

    #[test]
    fn test_unauthorized_sets_www_authenticate() {
        let resp = ApiError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[test]
    fn test_validate_link() {
        assert!(validate_link("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
        assert!(validate_link("http://youtu.be/dQw4w9WgXcQ").is_ok());
        assert!(validate_link("dQw4w9WgXcQ").is_err());
        assert!(validate_link("ftp://youtube.com/x").is_err());
        assert!(validate_link("").is_err());
    }

    #[test]
    fn test_default_model_param() {
        assert_eq!(SummarizeParams::default().model, Model::Gemini);
    }
}
