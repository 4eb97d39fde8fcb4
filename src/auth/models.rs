//! Authentication Models
//! Mission: Define accounts, credentials, sessions, claims and resolved identities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GUEST_GROUP: &str = "guest";
pub const USER_GROUP: &str = "user";
pub const ADMIN_GROUP: &str = "admin";

/// Account record as held by the account store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub group: String,
    #[serde(skip_serializing)]
    pub sessions: Vec<Session>,
    pub created_at: String,
}

/// Classic (email/password) credential. Replaced wholesale, never patched.
#[derive(Debug, Clone)]
pub struct Credential {
    pub account_id: Uuid,
    pub group: String,
    pub email: String,
    pub password_hash: String, // bcrypt hash - never serialize
}

/// A server-recorded, revocable login instance
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    /// Free-form label, usually the user agent or device name
    pub name: String,
    /// Bearer secret; enough to mint a replacement token
    #[serde(skip_serializing)]
    pub key: String,
    pub last_update: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .field("last_update", &self.last_update)
            .finish()
    }
}

/// Access token payload as written on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaimsWire {
    pub subject_id: String,
    pub group: String,
    pub session_key: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verified (or recovered) access token claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub subject: Uuid,
    pub group: String,
    pub session_key: String,
    pub expires_at: i64,
}

/// What an out-of-band action token may be used for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionPurpose {
    Registration,
    PasswordRecovery,
}

impl ActionPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPurpose::Registration => "registration",
            ActionPurpose::PasswordRecovery => "password_recovery",
        }
    }
}

/// Out-of-band action token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionClaims {
    pub target_identifier: String,
    pub purpose: ActionPurpose,
    pub iat: i64,
    pub exp: i64,
}

/// Identity resolved for one request by the request guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Guest,
    Authenticated(AuthClaims),
}

impl Identity {
    pub fn subject(&self) -> Uuid {
        match self {
            Identity::Guest => Uuid::nil(),
            Identity::Authenticated(claims) => claims.subject,
        }
    }

    pub fn group(&self) -> &str {
        match self {
            Identity::Guest => GUEST_GROUP,
            Identity::Authenticated(claims) => &claims.group,
        }
    }

    pub fn session_key(&self) -> &str {
        match self {
            Identity::Guest => "",
            Identity::Authenticated(claims) => &claims.session_key,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest)
    }
}

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
}

/// Registration completion body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub token: String,
    pub password: String,
    pub session_name: Option<String>,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub session_name: Option<String>,
}

/// Password recovery request body
#[derive(Debug, Deserialize)]
pub struct RecoveryRequest {
    pub email: String,
}

/// Password recovery completion body
#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub token: String,
    pub password: String,
}

/// Credential replacement body
#[derive(Debug, Deserialize)]
pub struct ChangeCredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh body
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

/// Issued access token
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: i64, // seconds until expiration
}

/// Resolved identity (sanitized)
#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub id: String,
    pub group: String,
    pub authenticated: bool,
}

impl IdentityResponse {
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.subject().to_string(),
            group: identity.group().to_string(),
            authenticated: !identity.is_guest(),
        }
    }
}
