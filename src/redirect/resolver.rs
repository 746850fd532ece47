//! Redirect resolution.
//!
//! States are checked in a fixed order and the first match wins:
//! not found (or archived), not yet active, expired, password required, redirect.
//! Only the final state counts a click.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::analytics::{ClickClassifier, ClickRecorder, RequestMeta};
use crate::error::AppResult;
use crate::links::{is_valid_shortcode, ProofIssuer};
use crate::models::{Link, RedirectType};
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Redirect { url: String, status: RedirectType },
    PasswordRequired,
    NotYetActive,
    Expired,
    NotFound,
}

/// Pure disposition of a lookup. `proof_ok` is asked only for protected links
/// and receives the stored password hash.
pub fn decide<F>(link: Option<&Link>, now: DateTime<Utc>, proof_ok: F) -> Resolution
where
    F: FnOnce(&str) -> bool,
{
    let Some(link) = link.filter(|l| !l.archived) else {
        return Resolution::NotFound;
    };
    if link.activates_at.is_some_and(|at| at > now) {
        return Resolution::NotYetActive;
    }
    if link.expires_at.is_some_and(|at| at <= now) {
        return Resolution::Expired;
    }
    if let Some(hash) = link.password_hash.as_deref() {
        if !proof_ok(hash) {
            return Resolution::PasswordRequired;
        }
    }
    Resolution::Redirect {
        url: link.url.clone(),
        status: link.redirect_type,
    }
}

pub struct RedirectResolver {
    storage: Arc<dyn Storage>,
    recorder: ClickRecorder,
    classifier: Arc<ClickClassifier>,
    proofs: ProofIssuer,
    max_code_len: usize,
}

impl RedirectResolver {
    pub fn new(
        storage: Arc<dyn Storage>,
        recorder: ClickRecorder,
        classifier: Arc<ClickClassifier>,
        proofs: ProofIssuer,
        max_code_len: usize,
    ) -> Self {
        Self {
            storage,
            recorder,
            classifier,
            proofs,
            max_code_len,
        }
    }

    /// Resolve one request. Store failures surface as errors, never as a miss.
    pub async fn resolve(
        &self,
        shortcode: &str,
        meta: &RequestMeta,
        proof: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Resolution> {
        if !is_valid_shortcode(shortcode, self.max_code_len) {
            return Ok(Resolution::NotFound);
        }

        let link = self.storage.get(shortcode).await?;
        let resolution = decide(link.as_ref(), now, |hash| {
            proof.is_some_and(|token| self.proofs.verify(token, shortcode, hash, now))
        });

        if matches!(resolution, Resolution::Redirect { .. }) {
            if let Err(err) = self.storage.increment_clicks(shortcode, 1).await {
                warn!(short_code = %shortcode, error = %err, "failed to buffer click increment");
            }
            self.recorder
                .record(self.classifier.classify(shortcode, now, meta));
        }

        Ok(resolution)
    }
}
