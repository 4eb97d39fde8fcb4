//! Authentication API Endpoints
//! Mission: Expose registration, login, recovery, session and privilege administration over HTTP

use crate::auth::{
    classic::ClassicAuth,
    guard::RequestGuard,
    jwt::TokenService,
    middleware::{
        access_cookie, api_auth_middleware, privilege_gate, site_auth_middleware, PrivilegeGate,
        ACCESS_COOKIE,
    },
    models::{
        ChangeCredentialsRequest, Identity, IdentityResponse, LoginRequest, RecoverRequest,
        RecoveryRequest, RefreshRequest, RegisterRequest, RegistrationRequest, TokenResponse,
    },
    session::SessionLedger,
};
use crate::error::{AuthError, StoreError};
use crate::privilege::{PrivilegeCache, PrivilegeKey, PrivilegeMask};
use crate::store::AccountStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use axum_extra::{
    extract::cookie::{Cookie, CookieJar},
    headers::UserAgent,
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Module the administration routes are authorized against
pub const ADMIN_MODULE: &str = "admin";

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub classic: Arc<ClassicAuth>,
    pub tokens: Arc<TokenService>,
    pub sessions: SessionLedger,
    pub guard: RequestGuard,
    pub privileges: Arc<PrivilegeCache>,
    pub accounts: Arc<dyn AccountStore>,
}

impl AuthState {
    pub fn new(
        classic: Arc<ClassicAuth>,
        tokens: Arc<TokenService>,
        accounts: Arc<dyn AccountStore>,
        privileges: Arc<PrivilegeCache>,
    ) -> Self {
        let sessions = SessionLedger::new(accounts.clone());
        let guard = RequestGuard::new(tokens.clone(), sessions.clone());

        Self {
            classic,
            tokens,
            sessions,
            guard,
            privileges,
            accounts,
        }
    }
}

/// Every auth and admin route, with guards and privilege gates attached
pub fn router(state: AuthState) -> Router {
    let site = Router::new()
        .route("/api/auth/me", get(get_current_identity))
        .route_layer(from_fn_with_state(state.guard.clone(), site_auth_middleware));

    let api = Router::new()
        .route("/api/auth/session", get(check_session))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/credentials", put(change_credentials))
        .route_layer(from_fn_with_state(state.guard.clone(), api_auth_middleware));

    let privilege_admin = Router::new()
        .route("/api/admin/privileges", post(update_privileges))
        .route_layer(from_fn_with_state(
            PrivilegeGate {
                cache: state.privileges.clone(),
                module: ADMIN_MODULE,
                required: PrivilegeMask::PUBLIC_WRITE | PrivilegeMask::PUBLIC_UPDATE,
            },
            privilege_gate,
        ))
        .route_layer(from_fn_with_state(state.guard.clone(), api_auth_middleware));

    let account_admin = Router::new()
        .route("/api/admin/accounts/:id", delete(delete_account))
        .route_layer(from_fn_with_state(
            PrivilegeGate {
                cache: state.privileges.clone(),
                module: ADMIN_MODULE,
                required: PrivilegeMask::PUBLIC_DELETE,
            },
            privilege_gate,
        ))
        .route_layer(from_fn_with_state(state.guard.clone(), api_auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register/request", post(request_registration))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/recovery/request", post(request_recovery))
        .route("/api/auth/recovery", post(recover))
        .route("/api/auth/refresh", post(refresh))
        .merge(site)
        .merge(api)
        .merge(privilege_admin)
        .merge(account_admin)
        .with_state(state)
}

/// Health check - GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// Start registration - POST /api/auth/register/request
pub async fn request_registration(
    State(state): State<AuthState>,
    Json(payload): Json<RegistrationRequest>,
) -> Result<StatusCode, AuthApiError> {
    state.classic.request_registration(&payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Finish registration - POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    user_agent: Option<TypedHeader<UserAgent>>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), AuthApiError> {
    let session = SessionLedger::create(&session_name(payload.session_name, user_agent));
    let (_, token) = state
        .classic
        .register_user(&payload.token, &payload.password, &session)
        .await?;

    Ok(issue_response(&state, jar, token))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    user_agent: Option<TypedHeader<UserAgent>>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), AuthApiError> {
    info!("🔐 Login attempt");

    let session = SessionLedger::create(&session_name(payload.session_name, user_agent));
    let (_, token) = state
        .classic
        .login_user(&payload.email, &payload.password, &session)
        .await?;

    Ok(issue_response(&state, jar, token))
}

/// Start password recovery - POST /api/auth/recovery/request
pub async fn request_recovery(
    State(state): State<AuthState>,
    Json(payload): Json<RecoveryRequest>,
) -> Result<StatusCode, AuthApiError> {
    state.classic.request_password_recovery(&payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Finish password recovery - POST /api/auth/recovery
pub async fn recover(
    State(state): State<AuthState>,
    Json(payload): Json<RecoverRequest>,
) -> Result<StatusCode, AuthApiError> {
    state
        .classic
        .recover_user_password(&payload.token, &payload.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Exchange an expired token for a fresh one - POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AuthApiError> {
    let (token, claims) = state
        .tokens
        .refresh(&payload.token, &state.sessions)
        .await
        .map_err(|e| match AuthApiError::from(e) {
            AuthApiError::BackendUnavailable => AuthApiError::BackendUnavailable,
            AuthApiError::InternalError => AuthApiError::InternalError,
            _ => AuthApiError::Unauthorized,
        })?;

    info!("🔄 Token refreshed for {}", claims.subject);

    Ok(Json(TokenResponse {
        token,
        expires_in: state.tokens.access_ttl_secs(),
    }))
}

/// Current identity, guest included - GET /api/auth/me
pub async fn get_current_identity(identity: Identity) -> Json<IdentityResponse> {
    Json(IdentityResponse::from_identity(&identity))
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub live: bool,
}

/// Explicit session liveness check - GET /api/auth/session
pub async fn check_session(
    State(state): State<AuthState>,
    identity: Identity,
) -> Result<Json<SessionStatus>, AuthApiError> {
    let live = state
        .sessions
        .is_live(identity.subject(), identity.session_key())
        .await?;
    Ok(Json(SessionStatus { live }))
}

/// Logout everywhere - POST /api/auth/logout
pub async fn logout(
    State(state): State<AuthState>,
    identity: Identity,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AuthApiError> {
    state.sessions.revoke_all(identity.subject()).await?;
    Ok((
        jar.remove(Cookie::build(ACCESS_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    ))
}

/// Replace email and password - PUT /api/auth/credentials
pub async fn change_credentials(
    State(state): State<AuthState>,
    identity: Identity,
    Json(payload): Json<ChangeCredentialsRequest>,
) -> Result<StatusCode, AuthApiError> {
    state
        .classic
        .change_credentials(identity.subject(), &payload.email, &payload.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Privilege mutation body. `subject` is a group name or an account id.
#[derive(Debug, Deserialize)]
pub struct PrivilegeUpdate {
    pub subject: String,
    pub module: String,
    #[serde(default)]
    pub grant: Vec<String>,
    #[serde(default)]
    pub revoke: Vec<String>,
    /// Drop the override entirely; grant/revoke are ignored
    #[serde(default)]
    pub remove: bool,
}

#[derive(Debug, Serialize)]
pub struct PrivilegeUpdateResponse {
    pub key: String,
    pub changed: bool,
    pub mask: Option<u32>,
}

/// Grant, revoke or remove privileges - POST /api/admin/privileges (gated)
pub async fn update_privileges(
    State(state): State<AuthState>,
    identity: Identity,
    Json(payload): Json<PrivilegeUpdate>,
) -> Result<Json<PrivilegeUpdateResponse>, AuthApiError> {
    if payload.subject.is_empty() || payload.subject.contains('.') || payload.module.is_empty() {
        return Err(AuthApiError::InvalidPrivilegeKey);
    }
    let key = PrivilegeKey::new(payload.subject, payload.module);

    let changed = if payload.remove {
        state.privileges.remove(&key)
    } else {
        let grant = parse_flags(&payload.grant)?;
        let revoke = parse_flags(&payload.revoke)?;
        let granted = !grant.is_empty() && state.privileges.set(&key, grant);
        let revoked = !revoke.is_empty() && state.privileges.unset(&key, revoke);
        granted || revoked
    };

    let mask = state.privileges.mask(&key);
    info!(
        "🛡️  Privileges for {} updated by {} (changed: {})",
        key,
        identity.subject(),
        changed
    );

    Ok(Json(PrivilegeUpdateResponse {
        key: key.to_string(),
        changed,
        mask: mask.map(|m| m.bits()),
    }))
}

/// Delete an account - DELETE /api/admin/accounts/:id (gated)
pub async fn delete_account(
    State(state): State<AuthState>,
    identity: Identity,
    Path(account_id): Path<String>,
) -> Result<StatusCode, AuthApiError> {
    let uuid = Uuid::parse_str(&account_id).map_err(|_| AuthApiError::InvalidAccountId)?;

    // Don't allow deleting yourself
    if uuid == identity.subject() {
        return Err(AuthApiError::CannotDeleteSelf);
    }

    state
        .accounts
        .delete_account(uuid)
        .await
        .map_err(AuthError::from)?;
    let dropped = state.privileges.remove_subject(&uuid.to_string());

    info!("🗑️  Account deleted: {} ({} privilege overrides dropped)", uuid, dropped);

    Ok(StatusCode::NO_CONTENT)
}

fn parse_flags(names: &[String]) -> Result<PrivilegeMask, AuthApiError> {
    names.iter().try_fold(PrivilegeMask::empty(), |mask, name| {
        PrivilegeMask::parse_flag(name)
            .map(|flag| mask | flag)
            .ok_or(AuthApiError::UnknownPrivilege)
    })
}

fn session_name(requested: Option<String>, user_agent: Option<TypedHeader<UserAgent>>) -> String {
    requested
        .filter(|name| !name.trim().is_empty())
        .or_else(|| user_agent.map(|TypedHeader(agent)| agent.as_str().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn issue_response(state: &AuthState, jar: CookieJar, token: String) -> (CookieJar, Json<TokenResponse>) {
    let jar = jar.add(access_cookie(token.clone()));
    (
        jar,
        Json(TokenResponse {
            token,
            expires_in: state.tokens.access_ttl_secs(),
        }),
    )
}

/// Auth API errors
#[derive(Debug, PartialEq, Eq)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    InvalidToken,
    InvalidAddress,
    WeakPassword(usize),
    AddressUnavailable,
    AddressNotRegistered,
    UnknownPrivilege,
    InvalidPrivilegeKey,
    InvalidAccountId,
    CannotDeleteSelf,
    AccountNotFound,
    BackendUnavailable,
    InternalError,
}

impl From<AuthError> for AuthApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthenticationFailed => AuthApiError::InvalidCredentials,
            AuthError::SessionInvalid => AuthApiError::Unauthorized,
            AuthError::Token(_) | AuthError::Claim(_) | AuthError::PurposeMismatch => {
                AuthApiError::InvalidToken
            }
            AuthError::InvalidAddress => AuthApiError::InvalidAddress,
            AuthError::WeakPassword(min) => AuthApiError::WeakPassword(min),
            AuthError::AddressUnavailable => AuthApiError::AddressUnavailable,
            AuthError::AddressNotRegistered => AuthApiError::AddressNotRegistered,
            AuthError::Store(StoreError::NotFound) => AuthApiError::AccountNotFound,
            AuthError::Store(StoreError::Unavailable) => {
                warn!("Store unavailable while serving auth request");
                AuthApiError::BackendUnavailable
            }
            other => {
                error!("Auth request failed: {}", other);
                AuthApiError::InternalError
            }
        }
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string())
            }
            AuthApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
            AuthApiError::InvalidToken => {
                (StatusCode::BAD_REQUEST, "Invalid or expired token".to_string())
            }
            AuthApiError::InvalidAddress => {
                (StatusCode::BAD_REQUEST, "Invalid email address".to_string())
            }
            AuthApiError::WeakPassword(min) => (
                StatusCode::BAD_REQUEST,
                format!("Password must be at least {} characters", min),
            ),
            AuthApiError::AddressUnavailable => {
                (StatusCode::CONFLICT, "Email address unavailable".to_string())
            }
            AuthApiError::AddressNotRegistered => {
                (StatusCode::NOT_FOUND, "Email address not registered".to_string())
            }
            AuthApiError::UnknownPrivilege => {
                (StatusCode::BAD_REQUEST, "Unknown privilege flag".to_string())
            }
            AuthApiError::InvalidPrivilegeKey => {
                (StatusCode::BAD_REQUEST, "Invalid privilege subject or module".to_string())
            }
            AuthApiError::InvalidAccountId => {
                (StatusCode::BAD_REQUEST, "Invalid account ID format".to_string())
            }
            AuthApiError::CannotDeleteSelf => {
                (StatusCode::BAD_REQUEST, "Cannot delete your own account".to_string())
            }
            AuthApiError::AccountNotFound => {
                (StatusCode::NOT_FOUND, "Account not found".to_string())
            }
            AuthApiError::BackendUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Identity backend unavailable".to_string(),
            ),
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
