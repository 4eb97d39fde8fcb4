//! Credential Store Adapter
//! Mission: Salted, slow one-way hashing of account secrets

use crate::error::AuthError;
use bcrypt::{hash, verify, DEFAULT_COST};

// bcrypt's accepted work-factor range
const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// bcrypt hasher with a tunable work factor. Hashing runs on the blocking
/// pool so a slow work factor never stalls the async workers.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
    /// Zero accepts any secret
    min_length: usize,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_COST,
            min_length: 0,
        }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
            min_length: 0,
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub async fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let secret = secret.to_string();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || hash(secret, cost))
            .await
            .map_err(|e| AuthError::HashingFailure(e.to_string()))?
            .map_err(|e| AuthError::HashingFailure(e.to_string()))
    }

    /// A digest that fails to parse is a mismatch, never a match
    pub async fn verify(&self, digest: &str, secret: &str) -> bool {
        let digest = digest.to_string();
        let secret = secret.to_string();

        tokio::task::spawn_blocking(move || verify(secret, &digest).unwrap_or(false))
            .await
            .unwrap_or(false)
    }

    /// Reject secrets below the configured minimum length
    pub fn check_strength(&self, secret: &str) -> Result<(), AuthError> {
        if secret.chars().count() < self.min_length {
            return Err(AuthError::WeakPassword(self.min_length));
        }
        Ok(())
    }
}
