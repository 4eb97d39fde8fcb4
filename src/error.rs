//! Error Taxonomy
//! Mission: Keep token, claim, session, credential and backend failures distinct

use thiserror::Error;

/// Failures decoding or verifying a signed token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    SignatureInvalid,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
            _ => TokenError::Malformed,
        }
    }
}

/// Failures extracting a claim field. Never coerced to a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("claim `{0}` is missing")]
    Missing(&'static str),
    #[error("claim `{0}` has the wrong type")]
    InvalidType(&'static str),
    #[error("claim `{0}` is not a valid identifier")]
    InvalidIdentifier(&'static str),
}

/// Durable store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Timeout or connectivity fault. Must never be read as "deny" or "guest".
    #[error("backend unavailable")]
    Unavailable,
    #[error("record not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                StoreError::Unavailable
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("corrupt record: {err}"))
    }
}

/// Umbrella error for identity operations
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error("no matching live session")]
    SessionInvalid,
    #[error("address is not a valid email")]
    InvalidAddress,
    #[error("address is already in use")]
    AddressUnavailable,
    #[error("address is not registered")]
    AddressNotRegistered,
    /// Login failure. Deliberately does not say whether the address or the secret was wrong.
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("token was not issued for this action")]
    PurposeMismatch,
    #[error("password must be at least {0} characters")]
    WeakPassword(usize),
    #[error("password hashing failed: {0}")]
    HashingFailure(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("message delivery failed: {0}")]
    Mail(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// True when the failure came from the backend rather than from the caller
    pub fn is_backend(&self) -> bool {
        matches!(self, AuthError::Store(StoreError::Unavailable | StoreError::Backend(_)))
    }
}
