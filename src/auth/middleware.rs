//! Authentication Middleware
//! Mission: Resolve the caller on every request and gate handlers on privileges

use crate::auth::guard::{RequestGuard, Resolution};
use crate::auth::models::Identity;
use crate::privilege::{PrivilegeCache, PrivilegeMask};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Cookie carrying the access token for browser flows
pub const ACCESS_COOKIE: &str = "access_token";

/// Cookie lifetime; the token's own expiry is what authorizes
pub const COOKIE_MAX_AGE_SECS: i64 = 172_800;

/// Header carrying a refreshed token back to API clients
pub const REFRESHED_TOKEN_HEADER: &str = "x-refreshed-token";

/// Browser-facing guard. Never rejects on credential problems: the request
/// proceeds as guest and the cookie is rewritten or cleared as needed.
pub async fn site_auth_middleware(
    State(guard): State<RequestGuard>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardRejection> {
    let presented = jar.get(ACCESS_COOKIE).map(|c| c.value().to_string());
    let resolution = guard
        .resolve(presented.as_deref())
        .await
        .map_err(|e| GuardRejection::backend(&e))?;

    req.extensions_mut().insert(resolution.identity());
    let response = next.run(req).await;

    let jar = match resolution {
        Resolution::Refreshed { token, .. } => jar.add(access_cookie(token)),
        Resolution::Guest {
            clear_credential: true,
        } => jar.remove(Cookie::build(ACCESS_COOKIE).path("/")),
        _ => return Ok(response),
    };

    Ok((jar, response).into_response())
}

/// API-facing guard. Absent or unrecoverable credentials end the request
/// with 401; recoverable ones with 412 plus the refreshed token.
pub async fn api_auth_middleware(
    State(guard): State<RequestGuard>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardRejection> {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    if presented.is_none() {
        return Err(GuardRejection::MissingCredential);
    }

    let resolution = guard
        .resolve(presented.as_deref())
        .await
        .map_err(|e| GuardRejection::backend(&e))?;

    match resolution {
        Resolution::Verified(claims) => {
            req.extensions_mut().insert(Identity::Authenticated(claims));
            Ok(next.run(req).await)
        }
        Resolution::Refreshed { token, .. } => Err(GuardRejection::Refreshed(token)),
        Resolution::Guest { .. } => Err(GuardRejection::Unrecoverable),
    }
}

/// Privileges a route requires within a module
#[derive(Clone)]
pub struct PrivilegeGate {
    pub cache: Arc<PrivilegeCache>,
    pub module: &'static str,
    pub required: PrivilegeMask,
}

/// Runs after a guard; 423 when the resolved identity lacks the privileges
pub async fn privilege_gate(
    State(gate): State<PrivilegeGate>,
    identity: Identity,
    req: Request,
    next: Next,
) -> Result<Response, GuardRejection> {
    if !gate
        .cache
        .check(identity.subject(), identity.group(), gate.module, gate.required)
    {
        warn!(
            subject = %identity.subject(),
            group = identity.group(),
            module = gate.module,
            required = %gate.required,
            "🔒 Insufficient privileges"
        );
        return Err(GuardRejection::InsufficientPrivilege);
    }

    Ok(next.run(req).await)
}

pub(crate) fn access_cookie(token: String) -> Cookie<'static> {
    Cookie::build((ACCESS_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(COOKIE_MAX_AGE_SECS))
        .build()
}

/// Identity resolved by a guard, guest when no guard ran
#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Identity>()
            .cloned()
            .unwrap_or(Identity::Guest))
    }
}

/// Guard outcomes that end the request
#[derive(Debug)]
pub enum GuardRejection {
    MissingCredential,
    Unrecoverable,
    Refreshed(String),
    InsufficientPrivilege,
    BackendUnavailable,
}

impl GuardRejection {
    fn backend(err: &crate::error::AuthError) -> Self {
        error!("Identity backend unavailable: {}", err);
        GuardRejection::BackendUnavailable
    }
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            GuardRejection::MissingCredential => {
                (StatusCode::UNAUTHORIZED, "Missing authorization token")
            }
            GuardRejection::Unrecoverable => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            GuardRejection::Refreshed(token) => {
                debug!("Answering 412 with refreshed token");
                let mut response = (
                    StatusCode::PRECONDITION_FAILED,
                    "Token refreshed, retry with the new token",
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&token) {
                    response.headers_mut().insert(REFRESHED_TOKEN_HEADER, value);
                }
                return response;
            }
            GuardRejection::InsufficientPrivilege => (StatusCode::LOCKED, "Insufficient privileges"),
            GuardRejection::BackendUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Identity backend unavailable",
            ),
        };

        (status, message).into_response()
    }
}
