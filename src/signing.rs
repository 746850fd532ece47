//! HMAC-SHA256 signed tokens used for list cursors and password proofs.
//!
//! A token is `base64url(json).base64url(hmac)`.

use anyhow::{anyhow, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use rand::RngExt;
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    /// Without a secret a random key is generated and tokens won't survive restarts
    pub fn new(secret: Option<&str>) -> Self {
        let key = match secret {
            Some(s) => s.as_bytes().to_vec(),
            None => {
                tracing::warn!("SIGNING_SECRET not set, using a random key; cursors and password proofs reset on restart");
                let mut rng = rand::rng();
                (0..32).map(|_| rng.random::<u8>()).collect()
            }
        };
        Self { key }
    }

    fn mac(&self, payload: &str) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Keyed digest of arbitrary bytes, hex encoded
    pub fn fingerprint(&self, data: &str) -> Result<String> {
        let digest = self.mac(data)?;
        Ok(digest.iter().take(8).map(|b| format!("{:02x}", b)).collect())
    }

    pub fn encode<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = serde_json::to_string(data)?;
        let payload = BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes());
        let signature = BASE64_URL_SAFE_NO_PAD.encode(self.mac(&payload)?);
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let (payload, signature_b64) = token
            .split_once('.')
            .filter(|(_, sig)| !sig.contains('.'))
            .ok_or_else(|| anyhow!("Invalid token format"))?;

        let provided = BASE64_URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| anyhow!("Invalid token signature encoding"))?;
        let expected = self.mac(payload)?;

        if !bool::from(expected.ct_eq(&provided)) {
            return Err(anyhow!("Token signature verification failed"));
        }

        let json_bytes = BASE64_URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| anyhow!("Invalid token payload encoding"))?;
        serde_json::from_slice(&json_bytes).map_err(|_| anyhow!("Invalid token data"))
    }
}
