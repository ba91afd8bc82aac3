use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::assistant::Assistant;
use crate::config::Config;
use crate::dialog::ActiveTask;
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{ImageSource, PaymentService};
use crate::scheduler::Scheduler;
use crate::seo::SeoWorkflow;
use crate::users::{ClientInfo, NewUser, User, UserStore};

pub const CHECKSUM_HEADER: &str = "x-event-checksum";

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub users: Arc<UserStore>,
    pub payments: Option<Arc<dyn PaymentService>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct AuthMessage {
    success: bool,
    message: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RegisterRequest {
    username: String,
    email: Option<String>,
    password: String,
    confirm_password: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    success: bool,
    message: String,
    user_id: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    success: bool,
    message: String,
    token: String,
    user: User,
}

#[derive(Serialize)]
struct MeResponse {
    authenticated: bool,
    user: User,
}

#[derive(Deserialize)]
struct ChatMessageRequest {
    #[serde(default)]
    message: String,
    image_url: Option<String>,
}

#[derive(Serialize)]
struct ChatMessageResponse {
    response: String,
    active_task: Option<ActiveTask>,
}

#[derive(Serialize)]
struct ChatResetResponse {
    success: bool,
    reset: bool,
}

#[derive(Serialize)]
struct WebhookResponse {
    received: bool,
}

type Rejection = (StatusCode, Json<ErrorResponse>);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/chat/message", post(chat_message))
        .route("/api/chat/reset", post(chat_reset))
        .route("/api/wompi/webhook", post(wompi_webhook))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::version_string(),
    })
}

fn auth_message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(AuthMessage {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

fn internal_error(err: &AvaBotError) -> Response {
    warn!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    ClientInfo {
        ip_address: header("x-forwarded-for")
            .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
            .or_else(|| header("x-real-ip")),
        user_agent: header("user-agent"),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn unauthorized() -> Rejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Unauthorized".to_string(),
        }),
    )
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<User, Rejection> {
    let token = bearer_token(headers).ok_or_else(unauthorized)?;
    match state.users.session_user(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized()),
        Err(err) => {
            warn!(error = %err, "session lookup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            ))
        }
    }
}

async fn register(State(state): State<AppState>, Json(payload): Json<RegisterRequest>) -> Response {
    let new = NewUser {
        username: payload.username,
        email: payload.email,
        password: payload.password,
        confirm_password: payload.confirm_password,
        first_name: payload.first_name,
        last_name: payload.last_name,
        is_admin: false,
    };
    match state.users.create_user(&new).await {
        Ok(user) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                success: true,
                message: "Usuario registrado correctamente. Ahora puedes iniciar sesión."
                    .to_string(),
                user_id: user.id,
            }),
        )
            .into_response(),
        Err(AvaBotError::Validation(message)) => auth_message(StatusCode::BAD_REQUEST, message),
        Err(err) => internal_error(&err),
    }
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return auth_message(
            StatusCode::BAD_REQUEST,
            "Por favor ingresa usuario y contraseña",
        );
    }
    let client = client_info(&headers);

    match state.users.is_locked_out(username).await {
        Ok(true) => {
            warn!(username, "login locked out after repeated failures");
            return auth_message(
                StatusCode::TOO_MANY_REQUESTS,
                "Demasiados intentos fallidos. Intenta de nuevo en unos minutos.",
            );
        }
        Ok(false) => {}
        Err(err) => return internal_error(&err),
    }

    let user = match state.users.authenticate(username, &payload.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            state.users.log_login_attempt(username, false, &client).await;
            warn!(username, "login failed");
            return auth_message(StatusCode::UNAUTHORIZED, "Usuario o contraseña incorrectos");
        }
        Err(err) => return internal_error(&err),
    };
    state.users.log_login_attempt(username, true, &client).await;

    match state.users.create_session(&user.id, &client).await {
        Ok(token) => {
            info!(user_id = %user.id, "login succeeded");
            Json(LoginResponse {
                success: true,
                message: format!("Bienvenido, {}!", user.display_name()),
                token,
                user,
            })
            .into_response()
        }
        Err(err) => internal_error(&err),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized().into_response();
    };
    match state.users.revoke_session(token).await {
        Ok(true) => Json(AuthMessage {
            success: true,
            message: "Has cerrado sesión correctamente".to_string(),
        })
        .into_response(),
        Ok(false) => unauthorized().into_response(),
        Err(err) => internal_error(&err),
    }
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authorize(&state, &headers).await {
        Ok(user) => Json(MeResponse {
            authenticated: true,
            user,
        })
        .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatMessageRequest>,
) -> Response {
    let user = match authorize(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection.into_response(),
    };
    let image_url = payload
        .image_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    let reply = match image_url {
        Some(url) => {
            state
                .assistant
                .handle_with_image(&user.id, &payload.message, ImageSource::Url(url))
                .await
        }
        None if payload.message.trim().is_empty() => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "message is required".to_string(),
                }),
            )
                .into_response();
        }
        None => state.assistant.handle(&user.id, &payload.message).await,
    };
    Json(ChatMessageResponse {
        response: reply.response,
        active_task: reply.active_task,
    })
    .into_response()
}

async fn chat_reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authorize(&state, &headers).await {
        Ok(user) => Json(ChatResetResponse {
            success: true,
            reset: state.assistant.reset(&user.id).await,
        })
        .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Verifies the checksum against the raw body before anything is parsed.
async fn wompi_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(CHECKSUM_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let verified = state
        .payments
        .as_ref()
        .is_some_and(|payments| payments.verify_webhook(&body, signature));
    if !verified {
        warn!(bytes = body.len(), "rejected wompi webhook with invalid checksum");
        return unauthorized().into_response();
    }

    match serde_json::from_slice::<Value>(&body) {
        Ok(event) => info!(
            event = event.get("event").and_then(|v| v.as_str()).unwrap_or("unknown"),
            transaction = event
                .pointer("/data/transaction/id")
                .and_then(|v| v.as_str())
                .unwrap_or("-"),
            status = event
                .pointer("/data/transaction/status")
                .and_then(|v| v.as_str())
                .unwrap_or("-"),
            "wompi event received"
        ),
        Err(err) => warn!(error = %err, "verified wompi webhook is not JSON"),
    }
    Json(WebhookResponse { received: true }).into_response()
}

pub async fn run(host: &str, port: u16, config: Config) -> Result<()> {
    run_with_shutdown(host, port, config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(host: &str, port: u16, config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let users = Arc::new(UserStore::from_config(&config).await?);
    let assistant = Arc::new(Assistant::from_config(&config)?);
    let payments = assistant.services().payments.clone();

    let mut scheduler = Scheduler::new();
    if SeoWorkflow::is_enabled(&config) {
        scheduler.register_job(Arc::new(SeoWorkflow::from_config(&config)?));
    }
    scheduler.start();
    info!(jobs = scheduler.job_count(), "scheduler started");

    let app = build_router(AppState {
        assistant,
        users,
        payments,
    });

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    info!(addr = %addr, version = %crate::version_string(), "ava-botd listening");
    let shutdown = async move {
        shutdown.await;
        scheduler.stop().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;

    Ok(())
}
