//! Link passwords: Argon2id hashing and signed access proofs.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signing::Signer;

/// Hash on a blocking thread
pub async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!("Password hash error: {}", e))
    })
    .await?
}

pub async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed =
            PasswordHash::new(&hash).map_err(|e| anyhow!("Password verify error: {}", e))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}

#[derive(Debug, Serialize, Deserialize)]
struct ProofClaims {
    #[serde(rename = "c")]
    shortcode: String,
    #[serde(rename = "e")]
    expires_at: i64,
    /// Fingerprint of the password hash the proof was issued against
    #[serde(rename = "f")]
    fingerprint: String,
}

/// Issues and checks the tokens that let a visitor past a password challenge
#[derive(Clone)]
pub struct ProofIssuer {
    signer: Signer,
    ttl_secs: i64,
}

impl ProofIssuer {
    pub fn new(signer: Signer, ttl_secs: i64) -> Self {
        Self {
            signer,
            ttl_secs: ttl_secs.max(1),
        }
    }

    pub fn issue(
        &self,
        shortcode: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>)> {
        let expires_at = now + chrono::Duration::seconds(self.ttl_secs);
        let claims = ProofClaims {
            shortcode: shortcode.to_string(),
            expires_at: expires_at.timestamp(),
            fingerprint: self.signer.fingerprint(password_hash)?,
        };
        Ok((self.signer.encode(&claims)?, expires_at))
    }

    /// A proof is valid for one shortcode, until expiry, and while the password is unchanged
    pub fn verify(&self, token: &str, shortcode: &str, password_hash: &str, now: DateTime<Utc>) -> bool {
        let Ok(claims) = self.signer.decode::<ProofClaims>(token) else {
            return false;
        };
        if claims.shortcode != shortcode || claims.expires_at <= now.timestamp() {
            return false;
        }
        matches!(self.signer.fingerprint(password_hash), Ok(f) if f == claims.fingerprint)
    }
}
