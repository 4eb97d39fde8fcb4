//! Durable Store Interfaces
//! Mission: Narrow collaborator seams for accounts, the privilege table and named config

pub mod sqlite;

use crate::auth::models::{Account, Credential, Session};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use sqlite::SqliteStore;

/// Well-known identifier of the single privilege table record
pub const PRIVILEGE_RECORD_ID: &str = "privileges";

/// Predicate for `count_accounts`
#[derive(Debug, Clone)]
pub enum AccountFilter {
    Email(String),
    Group(String),
}

/// Account persistence, consumed by the session ledger and classic auth flows
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(
        &self,
        name: &str,
        group: &str,
        initial_session: &Session,
    ) -> Result<Uuid, StoreError>;

    async fn delete_account(&self, account_id: Uuid) -> Result<(), StoreError>;

    async fn load_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn count_accounts(&self, filter: AccountFilter) -> Result<u64, StoreError>;

    /// Fails with `NotFound` when no credential uses the address
    async fn load_credential(&self, email: &str) -> Result<Credential, StoreError>;

    async fn save_credential(
        &self,
        account_id: Uuid,
        email: &str,
        password_hash: &str,
    ) -> Result<(), StoreError>;

    /// Holds an identifier for a pending registration. False when already held.
    async fn reserve_identifier(
        &self,
        identifier: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn release_identifier(&self, identifier: &str) -> Result<(), StoreError>;

    /// Fails with `NotFound` when the account is missing
    async fn append_session(&self, account_id: Uuid, session: &Session) -> Result<(), StoreError>;

    async fn clear_sessions(&self, account_id: Uuid) -> Result<(), StoreError>;

    async fn count_sessions(&self, account_id: Uuid, session_key: &str) -> Result<u64, StoreError>;

    async fn touch_session(
        &self,
        account_id: Uuid,
        session_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Persisted privilege table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivilegeRecord {
    pub id: String,
    /// "subject.module" -> integer bitmask
    pub rules: BTreeMap<String, i64>,
    pub time: DateTime<Utc>,
}

#[async_trait]
pub trait PrivilegeStore: Send + Sync {
    async fn load_privileges(&self) -> Result<Option<PrivilegeRecord>, StoreError>;

    async fn privileges_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Writes only if the durable timestamp still equals `expected`
    /// (`None` = no record yet). Returns false when another writer got there first.
    async fn save_privileges(
        &self,
        record: &PrivilegeRecord,
        expected: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;
}

/// Per-module configuration blobs
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_named_config(&self, module: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn save_named_config(&self, module: &str, blob: &serde_json::Value)
        -> Result<(), StoreError>;
}

/// Load a typed module config, `None` when the module was never saved
pub async fn load_config<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    module: &str,
) -> Result<Option<T>, StoreError> {
    match store.load_named_config(module).await? {
        Some(blob) => Ok(Some(serde_json::from_value(blob)?)),
        None => Ok(None),
    }
}

pub async fn save_config<T: Serialize>(
    store: &dyn ConfigStore,
    module: &str,
    value: &T,
) -> Result<(), StoreError> {
    let blob = serde_json::to_value(value)?;
    store.save_named_config(module, &blob).await
}
