//! Classic Authentication
//! Mission: Email/password registration, login, recovery and credential changes

use crate::auth::jwt::TokenService;
use crate::auth::mailer::{action_link, MailSettings, Mailer, OutgoingMessage};
use crate::auth::models::{ActionPurpose, Session, ADMIN_GROUP, USER_GROUP};
use crate::auth::password::PasswordHasher;
use crate::auth::session::SessionLedger;
use crate::error::{AuthError, StoreError};
use crate::store::{AccountFilter, AccountStore};
use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

// Stands in for a stored secret so unknown addresses pay the same bcrypt cost
const DUMMY_SECRET: &str = "warden-absent-account";

/// Email/password flows over the account store
pub struct ClassicAuth {
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<TokenService>,
    sessions: SessionLedger,
    hasher: PasswordHasher,
    mailer: Arc<dyn Mailer>,
    mail: MailSettings,
    dummy_digest: OnceLock<String>,
}

impl ClassicAuth {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
        mailer: Arc<dyn Mailer>,
        mail: MailSettings,
    ) -> Self {
        Self {
            sessions: SessionLedger::new(accounts.clone()),
            accounts,
            tokens,
            hasher,
            mailer,
            mail,
            dummy_digest: OnceLock::new(),
        }
    }

    /// Issue a 24h registration token for an address nobody uses or is
    /// currently registering.
    pub async fn new_registration_request(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email)?;
        self.ensure_unregistered(&email).await?;

        let until = Utc::now() + Duration::seconds(crate::auth::jwt::ACTION_TOKEN_TTL_SECS);
        if !self.accounts.reserve_identifier(&email, until).await? {
            return Err(AuthError::AddressUnavailable);
        }

        self.tokens.issue_action(&email, ActionPurpose::Registration)
    }

    /// Registration request plus delivery of the confirmation link
    pub async fn request_registration(&self, email: &str) -> Result<(), AuthError> {
        let token = self.new_registration_request(email).await?;
        let email = normalize_email(email)?;

        let delivery = self
            .mailer
            .send(OutgoingMessage {
                to: email.clone(),
                subject: "Confirm your email".to_string(),
                body: format!(
                    "Finish creating your account: {}",
                    action_link(&self.mail, &token)
                ),
            })
            .await;

        if let Err(e) = delivery {
            // Undelivered tokens must not keep the address reserved
            self.accounts.release_identifier(&email).await?;
            return Err(e);
        }

        Ok(())
    }

    /// Create the account behind a registration token and log it in
    pub async fn register_user(
        &self,
        token: &str,
        password: &str,
        session: &Session,
    ) -> Result<(Uuid, String), AuthError> {
        self.hasher.check_strength(password)?;
        let email = self
            .tokens
            .verify_action(token, ActionPurpose::Registration)?;
        self.ensure_unregistered(&email).await?;

        let hash = self.hasher.hash(password).await?;
        let account_id = self
            .accounts
            .create_account(&generated_name(), USER_GROUP, session)
            .await?;

        if let Err(e) = self.accounts.save_credential(account_id, &email, &hash).await {
            // Lost a race for the address; undo the half-created account
            if let Err(cleanup) = self.accounts.delete_account(account_id).await {
                warn!("⚠️ Failed to remove half-created account {}: {}", account_id, cleanup);
            }
            return match self.ensure_unregistered(&email).await {
                Err(taken) => Err(taken),
                Ok(()) => Err(e.into()),
            };
        }
        self.accounts.release_identifier(&email).await?;

        info!("✅ Registered account {} ({})", account_id, USER_GROUP);

        let access = self.tokens.issue(account_id, USER_GROUP, &session.key)?;
        Ok((account_id, access))
    }

    /// Any failure that depends on the caller's input collapses to
    /// `AuthenticationFailed`. Backend faults still surface as such.
    pub async fn login_user(
        &self,
        email: &str,
        password: &str,
        session: &Session,
    ) -> Result<(Uuid, String), AuthError> {
        let Ok(email) = normalize_email(email) else {
            return Err(AuthError::AuthenticationFailed);
        };

        let credential = match self.accounts.load_credential(&email).await {
            Ok(credential) => credential,
            Err(StoreError::NotFound) => {
                if let Ok(digest) = self.dummy_digest().await {
                    self.hasher.verify(&digest, password).await;
                }
                warn!("❌ Failed login attempt");
                return Err(AuthError::AuthenticationFailed);
            }
            Err(e) => return Err(e.into()),
        };

        if !self.hasher.verify(&credential.password_hash, password).await {
            warn!("❌ Failed login attempt for account {}", credential.account_id);
            return Err(AuthError::AuthenticationFailed);
        }

        self.sessions.attach(credential.account_id, session).await?;
        let access = self
            .tokens
            .issue(credential.account_id, &credential.group, &session.key)?;

        info!(
            "✅ Login successful: {} ({})",
            credential.account_id, credential.group
        );

        Ok((credential.account_id, access))
    }

    /// Issue a 24h password recovery token for a registered address
    pub async fn new_password_recovery_request(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email)?;
        if self
            .accounts
            .count_accounts(AccountFilter::Email(email.clone()))
            .await?
            == 0
        {
            return Err(AuthError::AddressNotRegistered);
        }

        self.tokens
            .issue_action(&email, ActionPurpose::PasswordRecovery)
    }

    pub async fn request_password_recovery(&self, email: &str) -> Result<(), AuthError> {
        let token = self.new_password_recovery_request(email).await?;

        self.mailer
            .send(OutgoingMessage {
                to: normalize_email(email)?,
                subject: "Reset your password".to_string(),
                body: format!(
                    "Choose a new password: {}",
                    action_link(&self.mail, &token)
                ),
            })
            .await
    }

    /// Replace the credential behind a recovery token and log out everywhere
    pub async fn recover_user_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.hasher.check_strength(new_password)?;
        let email = self
            .tokens
            .verify_action(token, ActionPurpose::PasswordRecovery)?;

        let credential = match self.accounts.load_credential(&email).await {
            Ok(credential) => credential,
            Err(StoreError::NotFound) => return Err(AuthError::AddressNotRegistered),
            Err(e) => return Err(e.into()),
        };

        let hash = self.hasher.hash(new_password).await?;
        self.accounts
            .save_credential(credential.account_id, &email, &hash)
            .await?;
        self.sessions.revoke_all(credential.account_id).await?;

        info!("🔐 Password recovered for account {}", credential.account_id);
        Ok(())
    }

    /// Wholesale replacement of a logged-in account's email and password
    pub async fn change_credentials(
        &self,
        account_id: Uuid,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        self.hasher.check_strength(password)?;
        let email = normalize_email(email)?;

        match self.accounts.load_credential(&email).await {
            Ok(existing) if existing.account_id != account_id => {
                return Err(AuthError::AddressUnavailable)
            }
            Ok(_) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let hash = self.hasher.hash(password).await?;
        self.accounts.save_credential(account_id, &email, &hash).await?;

        info!("🔐 Credentials replaced for account {}", account_id);
        Ok(())
    }

    /// Create the first admin account when none exists. Returns its id when created.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Uuid>, AuthError> {
        if self
            .accounts
            .count_accounts(AccountFilter::Group(ADMIN_GROUP.to_string()))
            .await?
            > 0
        {
            return Ok(None);
        }

        self.hasher.check_strength(password)?;
        let email = normalize_email(email)?;
        self.ensure_unregistered(&email).await?;

        let hash = self.hasher.hash(password).await?;
        let bootstrap = SessionLedger::create("bootstrap");
        let account_id = self
            .accounts
            .create_account("admin", ADMIN_GROUP, &bootstrap)
            .await?;
        self.accounts.save_credential(account_id, &email, &hash).await?;
        self.sessions.revoke_all(account_id).await?;

        info!("🔐 Admin account created: {}", account_id);
        Ok(Some(account_id))
    }

    async fn dummy_digest(&self) -> Result<String, AuthError> {
        if let Some(digest) = self.dummy_digest.get() {
            return Ok(digest.clone());
        }
        let digest = self.hasher.hash(DUMMY_SECRET).await?;
        Ok(self.dummy_digest.get_or_init(|| digest).clone())
    }

    async fn ensure_unregistered(&self, email: &str) -> Result<(), AuthError> {
        let count = self
            .accounts
            .count_accounts(AccountFilter::Email(email.to_string()))
            .await?;
        if count != 0 {
            return Err(AuthError::AddressUnavailable);
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AuthError::InvalidAddress),
    }
}

fn generated_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("user-{}", suffix.to_lowercase())
}
