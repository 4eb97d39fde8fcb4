//! Token Service
//! Mission: Issue, verify, decode and refresh signed claim sets

use crate::auth::models::{AccessClaimsWire, ActionClaims, ActionPurpose, AuthClaims};
use crate::auth::session::SessionLedger;
use crate::error::{AuthError, ClaimError, TokenError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
pub const ACTION_TOKEN_TTL_SECS: i64 = 24 * 3600;

type RawClaims = Map<String, Value>;

/// HS256 token service shared by the guard and the auth flows
pub struct TokenService {
    secret: String,
    access_ttl: Duration,
    action_ttl: Duration,
}

impl TokenService {
    /// Create a token service with the default lifetimes (1h access, 24h action)
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            access_ttl: Duration::seconds(ACCESS_TOKEN_TTL_SECS),
            action_ttl: Duration::seconds(ACTION_TOKEN_TTL_SECS),
        }
    }

    pub fn with_ttls(mut self, access_ttl: Duration, action_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.action_ttl = action_ttl;
        self
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Mint an access token for a (subject, group, session) triple
    pub fn issue(&self, subject: Uuid, group: &str, session_key: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = AccessClaimsWire {
            subject_id: subject.to_string(),
            group: group.to_string(),
            session_key: session_key.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };

        debug!(
            "Issuing access token for {} ({}), expires in {}s",
            subject,
            group,
            self.access_ttl.num_seconds()
        );

        self.sign(&claims)
    }

    /// Mint a 24h token for an out-of-band email flow
    pub fn issue_action(&self, target: &str, purpose: ActionPurpose) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = ActionClaims {
            target_identifier: target.to_string(),
            purpose,
            iat: now.timestamp(),
            exp: (now + self.action_ttl).timestamp(),
        };

        debug!("Issuing {} token", purpose.as_str());

        self.sign(&claims)
    }

    /// Signature and expiry checked
    pub fn verify_strict(&self, token: &str) -> Result<AuthClaims, AuthError> {
        let raw = self.decode_checked(token)?;
        Ok(access_claims(&raw)?)
    }

    /// Structure only. Used solely to attempt recovery after strict failure,
    /// never to authorize an action directly.
    pub fn decode_unverified(&self, token: &str) -> Result<AuthClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let raw = decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| TokenError::Malformed)?
            .claims;

        Ok(access_claims(&raw)?)
    }

    /// Verify an action token and return its target identifier.
    /// Tokens minted for another purpose are rejected.
    pub fn verify_action(&self, token: &str, purpose: ActionPurpose) -> Result<String, AuthError> {
        let raw = self.decode_checked(token)?;

        let target = string_claim(&raw, "target_identifier")?;
        let found = string_claim(&raw, "purpose")?;
        if found != purpose.as_str() {
            return Err(AuthError::PurposeMismatch);
        }

        Ok(target.to_string())
    }

    /// Re-issue a token for an expired-but-still-logged-in caller.
    /// Succeeds only when the embedded session is live for the claimed group.
    pub async fn refresh(
        &self,
        token: &str,
        ledger: &SessionLedger,
    ) -> Result<(String, AuthClaims), AuthError> {
        let claims = self.decode_unverified(token)?;

        if !ledger.confirm(&claims).await? {
            return Err(AuthError::SessionInvalid);
        }
        ledger.touch(claims.subject, &claims.session_key).await?;

        let fresh = self.issue(claims.subject, &claims.group, &claims.session_key)?;
        let refreshed = AuthClaims {
            expires_at: (Utc::now() + self.access_ttl).timestamp(),
            ..claims
        };

        Ok((fresh, refreshed))
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Signing(e.to_string()))
    }

    fn decode_checked(&self, token: &str) -> Result<RawClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let decoded = decode::<RawClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;

        Ok(decoded.claims)
    }
}

fn string_claim<'a>(raw: &'a RawClaims, field: &'static str) -> Result<&'a str, ClaimError> {
    match raw.get(field) {
        None => Err(ClaimError::Missing(field)),
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ClaimError::InvalidType(field)),
    }
}

fn access_claims(raw: &RawClaims) -> Result<AuthClaims, ClaimError> {
    let subject = Uuid::parse_str(string_claim(raw, "subject_id")?)
        .map_err(|_| ClaimError::InvalidIdentifier("subject_id"))?;
    let group = string_claim(raw, "group")?.to_string();
    let session_key = string_claim(raw, "session_key")?.to_string();
    let expires_at = match raw.get("exp") {
        None => return Err(ClaimError::Missing("exp")),
        Some(value) => value.as_i64().ok_or(ClaimError::InvalidType("exp"))?,
    };

    Ok(AuthClaims {
        subject,
        group,
        session_key,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret-key-12345";

    fn raw_token(claims: Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let service = TokenService::new(SECRET.to_string());
        let subject = Uuid::new_v4();

        let token = service.issue(subject, "user", "session-key").unwrap();
        let claims = service.verify_strict(&token).unwrap();

        assert_eq!(claims.subject, subject);
        assert_eq!(claims.group, "user");
        assert_eq!(claims.session_key, "session-key");
        assert!(claims.expires_at > Utc::now().timestamp());
        assert_eq!(service.access_ttl_secs(), 3600);
    }

    #[test]
    fn test_expired_token_fails_strict_but_decodes_unverified() {
        let service = TokenService::new(SECRET.to_string())
            .with_ttls(Duration::seconds(-10), Duration::hours(24));
        let subject = Uuid::new_v4();
        let token = service.issue(subject, "user", "k").unwrap();

        assert!(matches!(
            service.verify_strict(&token),
            Err(AuthError::Token(TokenError::Expired))
        ));

        let recovered = service.decode_unverified(&token).unwrap();
        assert_eq!(recovered.subject, subject);
    }

    #[test]
    fn test_different_secrets_reject() {
        let issuer = TokenService::new("secret1".to_string());
        let verifier = TokenService::new("secret2".to_string());
        let token = issuer.issue(Uuid::new_v4(), "user", "k").unwrap();

        assert!(matches!(
            verifier.verify_strict(&token),
            Err(AuthError::Token(TokenError::SignatureInvalid))
        ));
        // Structure is still readable for the recovery path
        assert!(verifier.decode_unverified(&token).is_ok());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = TokenService::new(SECRET.to_string());

        assert!(matches!(
            service.verify_strict("invalid.token.here"),
            Err(AuthError::Token(TokenError::Malformed))
        ));
        assert!(matches!(
            service.decode_unverified("not-a-token"),
            Err(AuthError::Token(TokenError::Malformed))
        ));
    }

    #[test]
    fn test_claims_fail_closed() {
        let service = TokenService::new(SECRET.to_string());
        let exp = Utc::now().timestamp() + 60;

        let missing_group = raw_token(
            json!({ "subject_id": Uuid::new_v4().to_string(), "session_key": "k", "exp": exp }),
            SECRET,
        );
        assert!(matches!(
            service.verify_strict(&missing_group),
            Err(AuthError::Claim(ClaimError::Missing("group")))
        ));

        let numeric_session = raw_token(
            json!({ "subject_id": Uuid::new_v4().to_string(), "group": "user", "session_key": 7, "exp": exp }),
            SECRET,
        );
        assert!(matches!(
            service.verify_strict(&numeric_session),
            Err(AuthError::Claim(ClaimError::InvalidType("session_key")))
        ));

        let bad_subject = raw_token(
            json!({ "subject_id": "not-a-uuid", "group": "user", "session_key": "k", "exp": exp }),
            SECRET,
        );
        assert!(matches!(
            service.decode_unverified(&bad_subject),
            Err(AuthError::Claim(ClaimError::InvalidIdentifier("subject_id")))
        ));
    }

    #[test]
    fn test_action_tokens_are_bound_to_purpose() {
        let service = TokenService::new(SECRET.to_string());
        let token = service
            .issue_action("a@x.com", ActionPurpose::Registration)
            .unwrap();

        assert_eq!(
            service
                .verify_action(&token, ActionPurpose::Registration)
                .unwrap(),
            "a@x.com"
        );
        assert!(matches!(
            service.verify_action(&token, ActionPurpose::PasswordRecovery),
            Err(AuthError::PurposeMismatch)
        ));
        // Never usable as an access token
        assert!(matches!(
            service.verify_strict(&token),
            Err(AuthError::Claim(ClaimError::Missing("subject_id")))
        ));
    }

    #[test]
    fn test_access_token_is_not_an_action_token() {
        let service = TokenService::new(SECRET.to_string());
        let token = service.issue(Uuid::new_v4(), "user", "k").unwrap();

        assert!(matches!(
            service.verify_action(&token, ActionPurpose::PasswordRecovery),
            Err(AuthError::Claim(ClaimError::Missing("target_identifier")))
        ));
    }
}
