//! Process Configuration
//! Mission: Read every startup knob from the environment once

use anyhow::{Context, Result};
use dotenv::dotenv;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use std::{env, path::Path, time::Duration};
use tracing::warn;

const GENERATED_SECRET_LEN: usize = 64;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub jwt_secret: String,
    pub bcrypt_cost: u32,
    /// Zero disables the length check
    pub min_password_len: usize,
    pub store_timeout: Duration,
    pub privilege_sync_interval: Duration,
    pub privilege_sync_enabled: bool,
    /// First admin account, created only when no admin exists yet
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("min_password_len", &self.min_password_len)
            .field("store_timeout", &self.store_timeout)
            .field("privilege_sync_interval", &self.privilege_sync_interval)
            .field("privilege_sync_enabled", &self.privilege_sync_enabled)
            .field("admin_email", &self.admin_email)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Build from the environment. `JWT_SECRET` and the bootstrap admin
    /// password are removed from the environment once read.
    pub fn from_env() -> Result<Self> {
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("⚠️ JWT_SECRET not set, generating a per-process secret (tokens won't survive restarts)");
                OsRng
                    .sample_iter(&Alphanumeric)
                    .take(GENERATED_SECRET_LEN)
                    .map(char::from)
                    .collect()
            }
        };
        env::remove_var("JWT_SECRET");

        let admin_password = env::var("WARDEN_ADMIN_PASSWORD").ok();
        env::remove_var("WARDEN_ADMIN_PASSWORD");

        Ok(Self {
            bind_addr: env::var("WARDEN_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            db_path: env::var("WARDEN_DB_PATH").unwrap_or_else(|_| "warden.db".to_string()),
            jwt_secret,
            bcrypt_cost: parse_var("BCRYPT_COST")?.unwrap_or(bcrypt::DEFAULT_COST),
            min_password_len: parse_var("MIN_PASSWORD_LEN")?.unwrap_or(0),
            store_timeout: Duration::from_secs(parse_var("STORE_TIMEOUT_SECS")?.unwrap_or(3)),
            privilege_sync_interval: Duration::from_secs(
                parse_var::<u64>("PRIVILEGE_SYNC_SECS")?
                    .filter(|&secs| secs > 0)
                    .unwrap_or(10),
            ),
            privilege_sync_enabled: env::var("PRIVILEGE_SYNC_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            admin_email: env::var("WARDEN_ADMIN_EMAIL").ok(),
            admin_password,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "on" | "ON")
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(None),
    }
}

/// Load `.env` from the working directory and the crate root
pub fn load_env() {
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
