//! Upgrade-time token verification (HS256 JWT, shared secret).

use {
    jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode},
    serde::{Deserialize, Serialize},
};

use pigeon_config::JwtConfig;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("uid claim missing, zero, or unparsable")]
    InvalidUid,
}

/// Claim set minted by the auth service; `uid` is a decimal string.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: u64,
    exp: u64,
    sub: String,
    uid: String,
}

// ── Verifier ─────────────────────────────────────────────────────────────────

pub struct TokenVerifier {
    secret: String,
    issuer: String,
    expires_in: u64,
}

impl TokenVerifier {
    pub fn new(jwt: &JwtConfig) -> Self {
        Self {
            secret: jwt.secret.clone(),
            issuer: jwt.issuer.clone(),
            expires_in: jwt.expires_in,
        }
    }

    /// Verify signature, issuer and expiry, then extract the uid claim.
    pub fn verify(&self, token: &str) -> Result<u64, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.leeway = 0;
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        let uid: u64 = data.claims.uid.parse().map_err(|_| AuthError::InvalidUid)?;
        if uid == 0 {
            return Err(AuthError::InvalidUid);
        }
        Ok(uid)
    }

    /// Mint a token with the configured lifetime (dev tooling and tests;
    /// production tokens come from the auth service).
    pub fn mint(&self, uid: u64) -> Result<String, AuthError> {
        self.mint_expiring(uid, self.expires_in as i64)
    }

    /// Mint with an explicit lifetime; a negative value produces an
    /// already-expired token.
    pub fn mint_expiring(&self, uid: u64, expires_in_secs: i64) -> Result<String, AuthError> {
        let now = unix_now();
        let exp = (now as i64).saturating_add(expires_in_secs).max(0) as u64;
        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now,
            exp,
            sub: uid.to_string(),
            uid: uid.to_string(),
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
