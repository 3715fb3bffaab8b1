//! Capability tokens: `"<id>.<secret>"` bearer credentials with hashed
//! secrets at rest and constant-time verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use chrono::Utc;
use codex_agent_protocol::TokenRecord;
use constant_time_eq::constant_time_eq;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

use crate::AgentError;
use crate::Result;
use crate::store::TokenStore;

const SECRET_BYTES: usize = 24;

/// Everything a token can be scoped to. Wildcards cover all operations
/// under their prefix; fine-grained scopes may also be granted directly.
pub const SESSION_CREATE: &str = "session:create";
pub const SESSION_READ: &str = "session:read";
pub const SESSION_CANCEL: &str = "session:cancel";

const OPEN_PREFIXES: &[&str] = &["group", "queue", "bookmark"];

pub fn is_valid_scope(scope: &str) -> bool {
    match scope {
        SESSION_CREATE | SESSION_READ | SESSION_CANCEL | "session:*" => true,
        _ => {
            let Some((prefix, op)) = scope.split_once(':') else {
                return false;
            };
            OPEN_PREFIXES.contains(&prefix)
                && !op.is_empty()
                && (op == "*" || op.chars().all(|c| c.is_ascii_lowercase()))
        }
    }
}

/// Grant iff the exact scope is held or a matching `<prefix>:*` wildcard is.
pub fn permission_granted(granted: &[String], required: &str) -> bool {
    if granted.iter().any(|scope| scope == required) {
        return true;
    }
    match required.split_once(':') {
        Some((prefix, _)) => {
            let wildcard = format!("{prefix}:*");
            granted.iter().any(|scope| *scope == wildcard)
        }
        None => false,
    }
}

/// Outcome of a successful `verify`.
#[derive(Debug, Clone)]
pub enum Verified {
    /// The ambient `CODEX_AGENT_TOKEN`; holds every permission.
    Admin,
    Token(TokenRecord),
}

impl Verified {
    pub fn allows(&self, required: &str) -> bool {
        match self {
            Verified::Admin => true,
            Verified::Token(record) => permission_granted(&record.permissions, required),
        }
    }
}

/// A freshly issued credential. The `token` string is shown exactly once;
/// only its hash survives in the store.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub record: TokenRecord,
    pub token: String,
}

pub struct TokenAuthenticator {
    store: TokenStore,
    admin_token: Option<String>,
}

impl TokenAuthenticator {
    pub fn new(store: TokenStore, admin_token: Option<String>) -> Self {
        Self { store, admin_token }
    }

    pub async fn create(
        &self,
        name: String,
        permissions: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken> {
        if permissions.is_empty() {
            return Err(AgentError::Invalid(
                "a token needs at least one permission".to_string(),
            ));
        }
        if let Some(bad) = permissions.iter().find(|scope| !is_valid_scope(scope)) {
            return Err(AgentError::Invalid(format!("unknown permission {bad:?}")));
        }
        let id = Uuid::new_v4();
        let secret = generate_secret();
        let record = TokenRecord {
            id,
            name,
            permissions,
            created_at: Utc::now(),
            expires_at,
            revoked_at: None,
            token_hash: hash_secret(&secret),
        };
        let record = self.store.add(record).await?;
        Ok(IssuedToken {
            record,
            token: format!("{id}.{secret}"),
        })
    }

    pub async fn list(&self) -> Vec<TokenRecord> {
        self.store.list().await
    }

    /// Verify a presented bearer credential. Returns `Denied` for every
    /// failure mode so callers cannot distinguish unknown ids from bad
    /// secrets.
    pub async fn verify(&self, presented: &str) -> Result<Verified> {
        if let Some(admin) = &self.admin_token
            && admin.len() == presented.len()
            && constant_time_eq(admin.as_bytes(), presented.as_bytes())
        {
            return Ok(Verified::Admin);
        }
        let Some((id_str, secret)) = presented.split_once('.') else {
            return Err(AgentError::Denied("malformed token".to_string()));
        };
        let Ok(id) = Uuid::parse_str(id_str) else {
            return Err(AgentError::Denied("malformed token".to_string()));
        };
        let Some(record) = self.store.get(id).await else {
            return Err(AgentError::Denied("unknown token".to_string()));
        };
        if record.revoked_at.is_some() {
            return Err(AgentError::Denied("token revoked".to_string()));
        }
        if let Some(expires_at) = record.expires_at
            && expires_at <= Utc::now()
        {
            return Err(AgentError::Denied("token expired".to_string()));
        }
        let Some(stored) = decode_hash(&record.token_hash) else {
            return Err(AgentError::Denied("invalid token".to_string()));
        };
        let computed: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        // Both sides are fixed-size digests, so the compare is equal-length
        // and constant-time; length mismatch was rejected above.
        if !constant_time_eq(&computed, &stored) {
            return Err(AgentError::Denied("invalid token".to_string()));
        }
        Ok(Verified::Token(record))
    }

    pub async fn revoke(&self, id: Uuid) -> Result<TokenRecord> {
        self.store
            .mutate(id, |record| {
                if record.revoked_at.is_some() {
                    return Err(AgentError::Conflict(format!("token {id} already revoked")));
                }
                record.revoked_at = Some(Utc::now());
                Ok(())
            })
            .await
    }

    /// Replace the secret, invalidating the previous credential, and clear
    /// any revocation.
    pub async fn rotate(&self, id: Uuid) -> Result<IssuedToken> {
        let secret = generate_secret();
        let hash = hash_secret(&secret);
        let record = self
            .store
            .mutate(id, |record| {
                record.token_hash = hash.clone();
                record.revoked_at = None;
                Ok(())
            })
            .await?;
        Ok(IssuedToken {
            token: format!("{id}.{secret}"),
            record,
        })
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex of `sha256(secret)`; the secret itself never hits disk.
fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn decode_hash(encoded: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(encoded).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::AgentConfig;
    use pretty_assertions::assert_eq;

    fn authenticator(dir: &tempfile::TempDir, admin: Option<&str>) -> TokenAuthenticator {
        let config = AgentConfig::with_dirs(dir.path().join("codex"), dir.path().join("config"));
        TokenAuthenticator::new(TokenStore::new(&config), admin.map(str::to_string))
    }

    #[tokio::test]
    async fn verify_roundtrip_then_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&dir, None);
        let issued = auth
            .create("t".to_string(), vec!["queue:*".to_string()], None)
            .await
            .unwrap();

        let verified = auth.verify(&issued.token).await.unwrap();
        assert!(verified.allows("queue:run"));
        assert!(!verified.allows("group:run"));

        auth.revoke(issued.record.id).await.unwrap();
        assert!(matches!(
            auth.verify(&issued.token).await,
            Err(AgentError::Denied(_))
        ));
        assert!(matches!(
            auth.revoke(issued.record.id).await,
            Err(AgentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn token_hash_is_lowercase_hex_of_the_secret() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&dir, None);
        let issued = auth
            .create("t".to_string(), vec![SESSION_READ.to_string()], None)
            .await
            .unwrap();
        let (_, secret) = issued.token.split_once('.').unwrap();
        let expected = hex::encode(Sha256::digest(secret.as_bytes()));
        assert_eq!(issued.record.token_hash, expected);
        assert!(
            issued
                .record
                .token_hash
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[tokio::test]
    async fn rotation_invalidates_the_old_credential() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&dir, None);
        let issued = auth
            .create("t".to_string(), vec![SESSION_READ.to_string()], None)
            .await
            .unwrap();
        let rotated = auth.rotate(issued.record.id).await.unwrap();
        assert_ne!(issued.token, rotated.token);
        assert!(auth.verify(&rotated.token).await.is_ok());
        assert!(auth.verify(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn rotation_clears_revocation() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&dir, None);
        let issued = auth
            .create("t".to_string(), vec![SESSION_READ.to_string()], None)
            .await
            .unwrap();
        auth.revoke(issued.record.id).await.unwrap();
        let rotated = auth.rotate(issued.record.id).await.unwrap();
        assert!(auth.verify(&rotated.token).await.is_ok());
    }

    #[tokio::test]
    async fn expired_and_malformed_tokens_are_denied() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&dir, None);
        let issued = auth
            .create(
                "t".to_string(),
                vec![SESSION_READ.to_string()],
                Some(Utc::now() - chrono::Duration::seconds(5)),
            )
            .await
            .unwrap();
        assert!(auth.verify(&issued.token).await.is_err());
        assert!(auth.verify("no-dot-here").await.is_err());
        assert!(auth.verify("not-a-uuid.secret").await.is_err());
        let wrong_secret = format!("{}.{}", issued.record.id, "AAAA");
        assert!(auth.verify(&wrong_secret).await.is_err());
    }

    #[tokio::test]
    async fn admin_token_grants_everything() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(&dir, Some("super-secret"));
        let verified = auth.verify("super-secret").await.unwrap();
        assert!(verified.allows("group:delete"));
        assert!(auth.verify("super-secre").await.is_err());
    }

    #[test]
    fn permission_wildcards() {
        let granted = vec!["group:*".to_string(), SESSION_READ.to_string()];
        assert!(permission_granted(&granted, "group:run"));
        assert!(permission_granted(&granted, SESSION_READ));
        assert!(!permission_granted(&granted, SESSION_CREATE));
        assert!(!permission_granted(&granted, "bookmark:read"));
    }

    #[test]
    fn scope_validation() {
        for scope in ["session:read", "group:*", "queue:run", "bookmark:delete"] {
            assert!(is_valid_scope(scope), "{scope} should be valid");
        }
        for scope in ["root", "session:", "token:*", "group:RUN"] {
            assert!(!is_valid_scope(scope), "{scope} should be invalid");
        }
    }
}
