//! Request Guard
//! Mission: Turn a presented credential into a resolved identity, recovering
//! expired tokens whose session is still live

use crate::auth::jwt::TokenService;
use crate::auth::models::{AuthClaims, Identity};
use crate::auth::session::SessionLedger;
use crate::error::AuthError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal state of the guard for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No usable credential. `clear_credential` is set when one was presented
    /// but could not be recovered, so the caller's stored copy should go.
    Guest { clear_credential: bool },
    /// Strict verification passed
    Verified(AuthClaims),
    /// Strict verification failed but the session was live; `token` replaces
    /// the presented credential
    Refreshed { claims: AuthClaims, token: String },
}

impl Resolution {
    pub fn identity(&self) -> Identity {
        match self {
            Resolution::Guest { .. } => Identity::Guest,
            Resolution::Verified(claims) | Resolution::Refreshed { claims, .. } => {
                Identity::Authenticated(claims.clone())
            }
        }
    }
}

#[derive(Clone)]
pub struct RequestGuard {
    tokens: Arc<TokenService>,
    sessions: SessionLedger,
}

impl RequestGuard {
    pub fn new(tokens: Arc<TokenService>, sessions: SessionLedger) -> Self {
        Self { tokens, sessions }
    }

    /// Resolve the presented credential. Only backend failures are returned
    /// as errors; every other failure ends as a guest resolution.
    pub async fn resolve(&self, presented: Option<&str>) -> Result<Resolution, AuthError> {
        let Some(token) = presented.map(strip_bearer).filter(|t| !t.is_empty()) else {
            return Ok(Resolution::Guest {
                clear_credential: false,
            });
        };

        match self.tokens.verify_strict(token) {
            Ok(claims) => return Ok(Resolution::Verified(claims)),
            Err(e) => debug!("Strict verification failed: {}", e),
        }

        match self.tokens.refresh(token, &self.sessions).await {
            Ok((token, claims)) => {
                info!("🔄 Session recovered for {}", claims.subject);
                Ok(Resolution::Refreshed { claims, token })
            }
            Err(e) if e.is_backend() => Err(e),
            Err(e) => {
                warn!("❌ Credential recovery failed: {}", e);
                Ok(Resolution::Guest {
                    clear_credential: true,
                })
            }
        }
    }
}

fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    if raw == "Bearer" {
        return "";
    }
    raw.strip_prefix("Bearer ").unwrap_or(raw).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{AccountStore, SqliteStore};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<SqliteStore>,
        sessions: SessionLedger,
        _temp: NamedTempFile,
    }

    fn fixture() -> Fixture {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(
            SqliteStore::new(temp.path().to_str().unwrap(), Duration::from_secs(3)).unwrap(),
        );
        Fixture {
            sessions: SessionLedger::new(store.clone()),
            store,
            _temp: temp,
        }
    }

    fn guard(f: &Fixture, tokens: TokenService) -> RequestGuard {
        RequestGuard::new(Arc::new(tokens), f.sessions.clone())
    }

    fn expired_tokens() -> TokenService {
        TokenService::new("guard-secret".to_string())
            .with_ttls(ChronoDuration::seconds(-10), ChronoDuration::hours(24))
    }

    #[tokio::test]
    async fn test_no_credential_is_guest() {
        let f = fixture();
        let guard = guard(&f, TokenService::new("guard-secret".to_string()));

        for presented in [None, Some(""), Some("Bearer "), Some("Bearer"), Some("  Bearer   ")] {
            let resolution = guard.resolve(presented).await.unwrap();
            assert_eq!(
                resolution,
                Resolution::Guest {
                    clear_credential: false
                }
            );
            assert_eq!(resolution.identity().group(), "guest");
            assert_eq!(resolution.identity().subject(), Uuid::nil());
        }
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("  Bearer   abc "), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
        assert_eq!(strip_bearer("Bearer "), "");
        assert_eq!(strip_bearer("Bearer"), "");
    }

    #[tokio::test]
    async fn test_valid_token_resolves_directly() {
        let f = fixture();
        let tokens = TokenService::new("guard-secret".to_string());
        let session = SessionLedger::create("laptop");
        let id = f.store.create_account("alice", "user", &session).await.unwrap();
        let token = tokens.issue(id, "user", &session.key).unwrap();
        let guard = guard(&f, tokens);

        let bearer = format!("Bearer {}", token);
        match guard.resolve(Some(&bearer)).await.unwrap() {
            Resolution::Verified(claims) => {
                assert_eq!(claims.subject, id);
                assert_eq!(claims.group, "user");
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_token_with_live_session_is_refreshed() {
        let f = fixture();
        let session = SessionLedger::create("laptop");
        let id = f.store.create_account("bob", "user", &session).await.unwrap();
        let stale = expired_tokens().issue(id, "user", &session.key).unwrap();

        let guard = guard(&f, TokenService::new("guard-secret".to_string()));
        match guard.resolve(Some(&stale)).await.unwrap() {
            Resolution::Refreshed { claims, token } => {
                assert_eq!(claims.subject, id);
                assert_ne!(token, stale);
                let fresh = TokenService::new("guard-secret".to_string())
                    .verify_strict(&token)
                    .unwrap();
                assert_eq!(fresh.session_key, session.key);
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revoked_session_falls_back_to_guest() {
        let f = fixture();
        let session = SessionLedger::create("laptop");
        let id = f.store.create_account("carol", "user", &session).await.unwrap();
        let stale = expired_tokens().issue(id, "user", &session.key).unwrap();
        f.sessions.revoke_all(id).await.unwrap();

        let guard = guard(&f, TokenService::new("guard-secret".to_string()));
        assert_eq!(
            guard.resolve(Some(&stale)).await.unwrap(),
            Resolution::Guest {
                clear_credential: true
            }
        );
        assert_eq!(
            guard.resolve(Some("not-a-token")).await.unwrap(),
            Resolution::Guest {
                clear_credential: true
            }
        );
    }

    #[tokio::test]
    async fn test_stale_group_claim_is_not_recovered() {
        let f = fixture();
        let session = SessionLedger::create("laptop");
        let id = f.store.create_account("dave", "user", &session).await.unwrap();
        let stale = expired_tokens().issue(id, "admin", &session.key).unwrap();

        let guard = guard(&f, TokenService::new("guard-secret".to_string()));
        let resolution = guard.resolve(Some(&stale)).await.unwrap();
        assert!(resolution.identity().is_guest());
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_guest() {
        use async_trait::async_trait;
        use crate::auth::models::{Account, Credential, Session};
        use crate::store::AccountFilter;
        use chrono::{DateTime, Utc};

        struct DownStore;

        #[async_trait]
        impl AccountStore for DownStore {
            async fn create_account(&self, _: &str, _: &str, _: &Session) -> Result<Uuid, StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn delete_account(&self, _: Uuid) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn load_account(&self, _: Uuid) -> Result<Option<Account>, StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn count_accounts(&self, _: AccountFilter) -> Result<u64, StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn load_credential(&self, _: &str) -> Result<Credential, StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn save_credential(&self, _: Uuid, _: &str, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn reserve_identifier(&self, _: &str, _: DateTime<Utc>) -> Result<bool, StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn release_identifier(&self, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn append_session(&self, _: Uuid, _: &Session) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn clear_sessions(&self, _: Uuid) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn count_sessions(&self, _: Uuid, _: &str) -> Result<u64, StoreError> {
                Err(StoreError::Unavailable)
            }
            async fn touch_session(&self, _: Uuid, _: &str, _: DateTime<Utc>) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
        }

        let guard = RequestGuard::new(
            Arc::new(TokenService::new("guard-secret".to_string())),
            SessionLedger::new(Arc::new(DownStore)),
        );
        let stale = expired_tokens().issue(Uuid::new_v4(), "user", "key").unwrap();

        let result = guard.resolve(Some(&stale)).await;
        assert!(matches!(result, Err(AuthError::Store(StoreError::Unavailable))));
    }
}
