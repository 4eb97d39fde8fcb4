//! Session Ledger
//! Mission: Per-account list of revocable login sessions

use crate::auth::models::{AuthClaims, Session};
use crate::error::AuthError;
use crate::store::AccountStore;
use chrono::Utc;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// 62^32 keys, roughly 190 bits
const SESSION_KEY_LEN: usize = 32;

/// Session operations over the account store. Holds no cache of its own.
#[derive(Clone)]
pub struct SessionLedger {
    accounts: Arc<dyn AccountStore>,
}

impl SessionLedger {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// New session with a fresh random key. Not persisted until attached.
    pub fn create(name: &str) -> Session {
        let key: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(SESSION_KEY_LEN)
            .map(char::from)
            .collect();

        Session {
            name: name.to_string(),
            key,
            last_update: Utc::now(),
        }
    }

    pub async fn attach(&self, account_id: Uuid, session: &Session) -> Result<(), AuthError> {
        self.accounts.append_session(account_id, session).await?;
        info!("🔑 Session '{}' attached to account {}", session.name, account_id);
        Ok(())
    }

    /// Logout everywhere. Tokens carrying a removed key fail recovery afterwards.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<(), AuthError> {
        self.accounts.clear_sessions(account_id).await?;
        info!("🚪 All sessions revoked for account {}", account_id);
        Ok(())
    }

    /// Exactly one session with this key must exist under the account
    pub async fn is_live(&self, account_id: Uuid, session_key: &str) -> Result<bool, AuthError> {
        if session_key.is_empty() {
            return Ok(false);
        }
        let count = self.accounts.count_sessions(account_id, session_key).await?;
        Ok(count == 1)
    }

    /// Recovery check: the session is live AND the account's recorded group
    /// still equals the group claim.
    pub async fn confirm(&self, claims: &AuthClaims) -> Result<bool, AuthError> {
        let Some(account) = self.accounts.load_account(claims.subject).await? else {
            debug!("Recovery rejected: account {} not found", claims.subject);
            return Ok(false);
        };

        if account.group != claims.group {
            debug!(
                "Recovery rejected: stale group claim for {} ({} != {})",
                claims.subject, claims.group, account.group
            );
            return Ok(false);
        }

        self.is_live(claims.subject, &claims.session_key).await
    }

    pub async fn touch(&self, account_id: Uuid, session_key: &str) -> Result<(), AuthError> {
        self.accounts
            .touch_session(account_id, session_key, Utc::now())
            .await?;
        Ok(())
    }
}
