//! SQLite Store
//! Mission: Durable accounts, sessions, privileges and config with bounded call time

use crate::auth::models::{Account, Credential, Session};
use crate::error::StoreError;
use crate::store::{
    AccountFilter, AccountStore, ConfigStore, PrivilegeRecord, PrivilegeStore,
    PRIVILEGE_RECORD_ID,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

/// SQLite-backed implementation of every collaborator store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) the database and initialize the schema
    pub fn new(db_path: &str, timeout: Duration) -> Result<Self> {
        let conn = Connection::open(db_path).context("open warden db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(timeout).context("set busy timeout")?;

        Self::init_db(&conn)?;

        info!("💾 Store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    fn init_db(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                grp TEXT NOT NULL,
                email TEXT UNIQUE,
                password_hash TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Keys are globally unique so a key can never be reused across accounts
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                account_id TEXT NOT NULL,
                name TEXT NOT NULL,
                key TEXT UNIQUE NOT NULL,
                last_update TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_identifiers (
                identifier TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS system_privileges (
                id TEXT PRIMARY KEY,
                rules TEXT NOT NULL,
                time INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS named_config (
                module TEXT PRIMARY KEY,
                blob TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Run a blocking operation off the async workers, failing with
    /// `Unavailable` once the store timeout elapses.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Backend(join_err.to_string())),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Store call timed out");
                Err(StoreError::Unavailable)
            }
        }
    }
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp {value}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Backend(format!("invalid account id: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid session time: {e}")))
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn create_account(
        &self,
        name: &str,
        group: &str,
        initial_session: &Session,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let name = name.to_string();
        let group = group.to_string();
        let session = initial_session.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO accounts (id, name, grp, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), name, group, Utc::now().to_rfc3339()],
            )?;
            tx.execute(
                "INSERT INTO sessions (account_id, name, key, last_update) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    session.name,
                    session.key,
                    session.last_update.to_rfc3339()
                ],
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<(), StoreError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM sessions WHERE account_id = ?1",
                params![account_id.to_string()],
            )?;
            let rows = tx.execute(
                "DELETE FROM accounts WHERE id = ?1",
                params![account_id.to_string()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound);
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT name, grp, created_at FROM accounts WHERE id = ?1",
                    params![account_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((name, group, created_at)) = row else {
                return Ok(None);
            };

            let mut stmt = conn.prepare_cached(
                "SELECT name, key, last_update FROM sessions WHERE account_id = ?1",
            )?;
            let raw = stmt
                .query_map(params![account_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let sessions = raw
                .into_iter()
                .map(|(name, key, last_update)| {
                    Ok(Session {
                        name,
                        key,
                        last_update: parse_time(&last_update)?,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            Ok(Some(Account {
                id: account_id,
                name,
                group,
                sessions,
                created_at,
            }))
        })
        .await
    }

    async fn count_accounts(&self, filter: AccountFilter) -> Result<u64, StoreError> {
        self.run(move |conn| {
            let count: i64 = match filter {
                AccountFilter::Email(email) => conn.query_row(
                    "SELECT COUNT(*) FROM accounts WHERE email = ?1",
                    params![email],
                    |row| row.get(0),
                )?,
                AccountFilter::Group(group) => conn.query_row(
                    "SELECT COUNT(*) FROM accounts WHERE grp = ?1",
                    params![group],
                    |row| row.get(0),
                )?,
            };
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn load_credential(&self, email: &str) -> Result<Credential, StoreError> {
        let email = email.to_string();
        self.run(move |conn| {
            let (id, group, email, password_hash) = conn.query_row(
                "SELECT id, grp, email, password_hash FROM accounts
                 WHERE email = ?1 AND password_hash IS NOT NULL",
                params![email],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?;

            Ok(Credential {
                account_id: parse_uuid(&id)?,
                group,
                email,
                password_hash,
            })
        })
        .await
    }

    async fn save_credential(
        &self,
        account_id: Uuid,
        email: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let email = email.to_string();
        let password_hash = password_hash.to_string();
        self.run(move |conn| {
            let rows = conn.execute(
                "UPDATE accounts SET email = ?1, password_hash = ?2 WHERE id = ?3",
                params![email, password_hash, account_id.to_string()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn reserve_identifier(
        &self,
        identifier: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let identifier = identifier.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM pending_identifiers WHERE expires_at <= ?1",
                params![Utc::now().timestamp()],
            )?;
            let rows = tx.execute(
                "INSERT OR IGNORE INTO pending_identifiers (identifier, expires_at) VALUES (?1, ?2)",
                params![identifier, until.timestamp()],
            )?;
            tx.commit()?;
            Ok(rows == 1)
        })
        .await
    }

    async fn release_identifier(&self, identifier: &str) -> Result<(), StoreError> {
        let identifier = identifier.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM pending_identifiers WHERE identifier = ?1",
                params![identifier],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_session(&self, account_id: Uuid, session: &Session) -> Result<(), StoreError> {
        let session = session.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM accounts WHERE id = ?1",
                params![account_id.to_string()],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::NotFound);
            }
            tx.execute(
                "INSERT INTO sessions (account_id, name, key, last_update) VALUES (?1, ?2, ?3, ?4)",
                params![
                    account_id.to_string(),
                    session.name,
                    session.key,
                    session.last_update.to_rfc3339()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn clear_sessions(&self, account_id: Uuid) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM sessions WHERE account_id = ?1",
                params![account_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_sessions(&self, account_id: Uuid, session_key: &str) -> Result<u64, StoreError> {
        let session_key = session_key.to_string();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE account_id = ?1 AND key = ?2",
                params![account_id.to_string(), session_key],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn touch_session(
        &self,
        account_id: Uuid,
        session_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let session_key = session_key.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE sessions SET last_update = ?1 WHERE account_id = ?2 AND key = ?3",
                params![at.to_rfc3339(), account_id.to_string(), session_key],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PrivilegeStore for SqliteStore {
    async fn load_privileges(&self) -> Result<Option<PrivilegeRecord>, StoreError> {
        self.run(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, rules, time FROM system_privileges WHERE id = ?1",
                    params![PRIVILEGE_RECORD_ID],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((id, rules, time)) => Ok(Some(PrivilegeRecord {
                    id,
                    rules: serde_json::from_str(&rules)?,
                    time: from_micros(time)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    async fn privileges_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.run(|conn| {
            let time = conn
                .query_row(
                    "SELECT time FROM system_privileges WHERE id = ?1",
                    params![PRIVILEGE_RECORD_ID],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            time.map(from_micros).transpose()
        })
        .await
    }

    async fn save_privileges(
        &self,
        record: &PrivilegeRecord,
        expected: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let rules = serde_json::to_string(&record.rules)?;
        let id = record.id.clone();
        let time = micros(record.time);

        self.run(move |conn| {
            let rows = match expected {
                Some(previous) => conn.execute(
                    "UPDATE system_privileges SET rules = ?1, time = ?2 WHERE id = ?3 AND time = ?4",
                    params![rules, time, id, micros(previous)],
                )?,
                None => conn.execute(
                    "INSERT OR IGNORE INTO system_privileges (id, rules, time) VALUES (?1, ?2, ?3)",
                    params![id, rules, time],
                )?,
            };
            Ok(rows == 1)
        })
        .await
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn load_named_config(&self, module: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let module = module.to_string();
        self.run(move |conn| {
            let blob = conn
                .query_row(
                    "SELECT blob FROM named_config WHERE module = ?1",
                    params![module],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            blob.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn save_named_config(
        &self,
        module: &str,
        blob: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let module = module.to_string();
        let blob = serde_json::to_string(blob)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO named_config (module, blob) VALUES (?1, ?2)
                 ON CONFLICT(module) DO UPDATE SET blob = excluded.blob",
                params![module, blob],
            )?;
            Ok(())
        })
        .await
    }
}
