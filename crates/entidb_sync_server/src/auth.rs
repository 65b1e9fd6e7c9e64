//! Bearer token authentication for the sync server.
//!
//! Tokens are opaque to the client: a claims payload (subject, optional
//! device/db scoping, expiry) signed with HMAC-SHA256, base64-encoded for
//! transport in an `Authorization: Bearer <token>` header. Same signing
//! primitive as the original device/db-keyed token, generalized to the
//! string identifiers the rest of the sync protocol uses and to an
//! arbitrary subject rather than a fixed device+db pair.
//!
//! ## Token format
//!
//! `base64(claims || hmac_sha256(claims))`, claims encoded as
//! `subject\0device_id\0db_id\0expires_at_millis` (`device_id`/`db_id` may
//! be empty to mean "unscoped").

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Identifies the authenticated caller (a user or service account).
    pub subject: String,
    /// Restricts the token to one device, if present.
    pub device_id: Option<String>,
    /// Restricts the token to one database, if present.
    pub db_id: Option<String>,
}

impl Claims {
    /// Fails if the token is scoped to a different device than `device_id`.
    pub fn check_device(&self, device_id: &str) -> ServerResult<()> {
        match &self.device_id {
            Some(scoped) if scoped != device_id => {
                Err(ServerError::NotAuthorized(format!("token is scoped to device {scoped:?}")))
            }
            _ => Ok(()),
        }
    }

    /// Fails if the token is scoped to a different database than `db_id`.
    pub fn check_db(&self, db_id: &str) -> ServerResult<()> {
        match &self.db_id {
            Some(scoped) if scoped != db_id => {
                Err(ServerError::NotAuthorized(format!("token is scoped to database {scoped:?}")))
            }
            _ => Ok(()),
        }
    }
}

fn encode_claims(claims: &Claims, expires_at_millis: u64) -> Vec<u8> {
    format!(
        "{}\0{}\0{}\0{}",
        claims.subject,
        claims.device_id.as_deref().unwrap_or(""),
        claims.db_id.as_deref().unwrap_or(""),
        expires_at_millis
    )
    .into_bytes()
}

fn decode_claims(bytes: &[u8]) -> ServerResult<(Claims, u64)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ServerError::NotAuthorized("malformed token claims".into()))?;
    let mut parts = text.splitn(4, '\0');
    let subject = parts.next().unwrap_or_default().to_string();
    let device_id = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let db_id = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let expires_at_millis: u64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ServerError::NotAuthorized("malformed token expiry".into()))?;
    if subject.is_empty() {
        return Err(ServerError::NotAuthorized("malformed token subject".into()));
    }
    Ok((Claims { subject, device_id, db_id }, expires_at_millis))
}

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret, token_expiry: Duration::from_secs(24 * 60 * 60) }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `claims`, valid for this validator's configured
    /// expiry from now.
    pub fn issue_token(&self, claims: &Claims) -> String {
        let expires_at_millis = now_millis() + self.config.token_expiry.as_millis() as u64;
        let payload = encode_claims(claims, expires_at_millis);
        let signature = self.sign(&payload);

        let mut token = payload;
        token.extend_from_slice(&signature);
        BASE64.encode(&token)
    }

    /// Validates a bearer token and returns its claims.
    pub fn validate_token(&self, token: &str) -> ServerResult<Claims> {
        let raw = BASE64
            .decode(token)
            .map_err(|_| ServerError::NotAuthorized("malformed token encoding".into()))?;
        if raw.len() < 32 {
            return Err(ServerError::NotAuthorized("token too short".into()));
        }
        let (payload, signature) = raw.split_at(raw.len() - 32);

        let expected_signature = self.sign(payload);
        if signature != expected_signature.as_slice() {
            return Err(ServerError::NotAuthorized("invalid signature".into()));
        }

        let (claims, expires_at_millis) = decode_claims(payload)?;
        if now_millis() > expires_at_millis {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }
        Ok(claims)
    }

    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.config.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn issue_and_validate_token() {
        let v = validator();
        let claims = Claims { subject: "user-1".into(), device_id: Some("dev1".into()), db_id: Some("db1".into()) };
        let token = v.issue_token(&claims);
        let validated = v.validate_token(&token).unwrap();
        assert_eq!(validated, claims);
    }

    #[test]
    fn scoping_rejects_mismatched_device() {
        let v = validator();
        let claims = Claims { subject: "user-1".into(), device_id: Some("dev1".into()), db_id: None };
        let token = v.issue_token(&claims);
        let validated = v.validate_token(&token).unwrap();
        assert!(validated.check_device("dev1").is_ok());
        assert!(validated.check_device("dev2").is_err());
    }

    #[test]
    fn unscoped_claims_accept_any_device_and_db() {
        let claims = Claims { subject: "user-1".into(), device_id: None, db_id: None };
        assert!(claims.check_device("anything").is_ok());
        assert!(claims.check_db("anything").is_ok());
    }

    #[test]
    fn reject_tampered_token() {
        let v = validator();
        let claims = Claims { subject: "user-1".into(), device_id: None, db_id: None };
        let token = v.issue_token(&claims);
        let mut raw = BASE64.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(&raw);
        assert!(v.validate_token(&tampered).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let v = TokenValidator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()).with_expiry(Duration::from_secs(0)),
        );
        let claims = Claims { subject: "user-1".into(), device_id: None, db_id: None };
        let token = v.issue_token(&claims);
        std::thread::sleep(Duration::from_millis(5));
        assert!(v.validate_token(&token).is_err());
    }

    #[test]
    fn reject_garbage_token() {
        let v = validator();
        assert!(v.validate_token("not-a-valid-token").is_err());
    }
}
