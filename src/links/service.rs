use chrono::{DateTime, Utc};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::ClickRecorder;
use crate::auth::Caller;
use crate::config::LinkConfig;
use crate::error::{AppError, AppResult};
use crate::links::password::{self, ProofIssuer};
use crate::links::reserved::ReservedPaths;
use crate::models::{
    BulkDeleteResponse, CreateLinkRequest, Link, LinkPage, LinkResponse, NewLink, RedirectType,
    UpdateLinkRequest,
};
use crate::signing::Signer;
use crate::storage::{ListPosition, ListQuery, Storage, StorageError};

const GENERATED_CODE_LEN: usize = 7;
const GENERATE_ATTEMPTS: usize = 10;
const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;
pub const MAX_BULK_DELETE: usize = 500;

/// Shortcode charset: ASCII letters, digits, `_` and `-`
pub fn is_valid_shortcode(code: &str, max_len: usize) -> bool {
    !code.is_empty()
        && code.len() <= max_len
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn generate_short_code() -> String {
    let mut rng = rand::rng();
    (0..GENERATED_CODE_LEN)
        .map(|_| BASE62[rng.random_range(0..BASE62.len())] as char)
        .collect()
}

/// Parse and normalize an absolute http(s) destination
fn normalize_url(raw: &str) -> AppResult<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| AppError::validation(format!("invalid url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed.to_string()),
        _ => Err(AppError::validation(
            "url must be an absolute http or https URL",
        )),
    }
}

fn validate_window(
    activates_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
) -> AppResult<()> {
    match (activates_at, expires_at) {
        (Some(a), Some(e)) if a >= e => Err(AppError::validation(
            "activatesAt must be earlier than expiresAt",
        )),
        _ => Ok(()),
    }
}

/// Trim, drop empties, de-duplicate and sort
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorData {
    created_at: i64,
    id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordProof {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Link CRUD with ownership, validation and cleanup of click history
pub struct LinkService {
    storage: Arc<dyn Storage>,
    recorder: ClickRecorder,
    reserved: Arc<ReservedPaths>,
    signer: Signer,
    proofs: ProofIssuer,
    max_code_len: usize,
    default_redirect_type: RedirectType,
}

impl LinkService {
    pub fn new(
        storage: Arc<dyn Storage>,
        recorder: ClickRecorder,
        reserved: Arc<ReservedPaths>,
        signer: Signer,
        proofs: ProofIssuer,
        config: &LinkConfig,
    ) -> Self {
        Self {
            storage,
            recorder,
            reserved,
            signer,
            proofs,
            max_code_len: config.short_code_max_length.max(1),
            default_redirect_type: config.default_redirect_type,
        }
    }

    pub fn reserved_paths(&self) -> Vec<String> {
        self.reserved.list()
    }

    fn validate_shortcode(&self, code: &str) -> AppResult<()> {
        if !is_valid_shortcode(code, self.max_code_len) {
            return Err(AppError::validation(format!(
                "shortcode must be 1-{} characters of A-Z, a-z, 0-9, '_' or '-'",
                self.max_code_len
            )));
        }
        if self.reserved.contains(code) {
            return Err(AppError::conflict(format!("shortcode '{code}' is reserved")));
        }
        Ok(())
    }

    /// Load a link the caller may see. Others' links look absent.
    async fn load_visible(&self, caller: &Caller, code: &str) -> AppResult<Link> {
        self.storage
            .get_authoritative(code)
            .await?
            .filter(|link| caller.can_access(link))
            .ok_or_else(|| AppError::not_found(format!("link '{code}' not found")))
    }

    pub async fn create(
        &self,
        caller: &Caller,
        req: CreateLinkRequest,
        now: DateTime<Utc>,
    ) -> AppResult<Link> {
        let url = normalize_url(&req.url)?;
        validate_window(req.activates_at, req.expires_at)?;

        let custom = req
            .shortcode
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(code) = &custom {
            self.validate_shortcode(code)?;
        }

        let password_hash = match req.password.filter(|p| !p.is_empty()) {
            Some(p) => Some(password::hash_password(p).await?),
            None => None,
        };

        let mut new_link = NewLink {
            shortcode: String::new(),
            url,
            title: clean_text(req.title),
            description: clean_text(req.description),
            tags: normalize_tags(req.tags),
            password_hash,
            activates_at: req.activates_at,
            expires_at: req.expires_at,
            redirect_type: req.redirect_type.unwrap_or(self.default_redirect_type),
            archived: req.archived,
            created_by: caller.id.clone(),
            created: now,
        };

        let link = match custom {
            Some(code) => {
                new_link.shortcode = code;
                self.storage.create(&new_link).await?
            }
            None => self.create_with_generated_code(&mut new_link).await?,
        };

        info!(short_code = %link.shortcode, created_by = ?link.created_by, "Created link");
        Ok(link)
    }

    async fn create_with_generated_code(&self, new_link: &mut NewLink) -> AppResult<Link> {
        for _ in 0..GENERATE_ATTEMPTS {
            let code = generate_short_code();
            if self.reserved.contains(&code) {
                continue;
            }
            new_link.shortcode = code;
            match self.storage.create(new_link).await {
                Ok(link) => return Ok(link),
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::Internal(anyhow::anyhow!(
            "failed to generate a unique shortcode after {GENERATE_ATTEMPTS} attempts"
        )))
    }

    pub async fn get(&self, caller: &Caller, code: &str) -> AppResult<Link> {
        self.load_visible(caller, code).await
    }

    /// Partial merge of `req` into the stored link
    pub async fn update(
        &self,
        caller: &Caller,
        code: &str,
        req: UpdateLinkRequest,
        now: DateTime<Utc>,
    ) -> AppResult<Link> {
        let mut link = self.load_visible(caller, code).await?;

        if let Some(url) = req.url {
            link.url = normalize_url(&url)?;
        }
        if let Some(title) = req.title {
            link.title = clean_text(title);
        }
        if let Some(description) = req.description {
            link.description = clean_text(description);
        }
        if let Some(tags) = req.tags {
            link.tags = normalize_tags(tags);
        }
        if let Some(activates_at) = req.activates_at {
            link.activates_at = activates_at;
        }
        if let Some(expires_at) = req.expires_at {
            link.expires_at = expires_at;
        }
        if let Some(redirect_type) = req.redirect_type {
            link.redirect_type = redirect_type;
        }
        if let Some(archived) = req.archived {
            link.archived = archived;
        }
        validate_window(link.activates_at, link.expires_at)?;

        match req.password {
            None => {}
            Some(None) => link.password_hash = None,
            Some(Some(p)) if p.is_empty() => link.password_hash = None,
            Some(Some(p)) => link.password_hash = Some(password::hash_password(p).await?),
        }

        link.updated = now;
        if !self.storage.update(&link).await? {
            return Err(AppError::not_found(format!("link '{code}' not found")));
        }

        self.load_visible(caller, code).await
    }

    pub async fn delete(&self, caller: &Caller, code: &str) -> AppResult<()> {
        self.load_visible(caller, code).await?;

        if !self.storage.delete(code).await? {
            return Err(AppError::not_found(format!("link '{code}' not found")));
        }
        // Clicks queued by redirects that read the link before the delete must not
        // survive it. Later stragglers are refused by the bucket upsert.
        self.recorder.purge(code).await;

        info!(short_code = %code, "Deleted link");
        Ok(())
    }

    pub async fn delete_many(
        &self,
        caller: &Caller,
        codes: Vec<String>,
    ) -> AppResult<BulkDeleteResponse> {
        if codes.is_empty() {
            return Err(AppError::validation("shortcodes must not be empty"));
        }
        if codes.len() > MAX_BULK_DELETE {
            return Err(AppError::validation(format!(
                "at most {MAX_BULK_DELETE} shortcodes can be deleted at once"
            )));
        }

        let mut response = BulkDeleteResponse::default();
        for code in codes {
            if response.deleted.contains(&code) || response.not_found.contains(&code) {
                continue;
            }
            match self.delete(caller, &code).await {
                Ok(()) => response.deleted.push(code),
                Err(AppError::NotFound(_)) => response.not_found.push(code),
                Err(e) => return Err(e),
            }
        }
        Ok(response)
    }

    pub async fn list(
        &self,
        caller: &Caller,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> AppResult<LinkPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let after = match cursor.filter(|c| !c.is_empty()) {
            Some(token) => {
                let data: CursorData = self.signer.decode(token).map_err(|e| {
                    warn!(error = %e, "Rejected list cursor");
                    AppError::validation("invalid cursor")
                })?;
                Some(ListPosition {
                    created_at: data.created_at,
                    id: data.id,
                })
            }
            None => None,
        };

        let owner = if caller.is_admin {
            None
        } else {
            Some(caller.id.clone().unwrap_or_default())
        };

        // One extra row tells whether another page exists
        let mut links = self
            .storage
            .list(&ListQuery {
                limit: limit + 1,
                after,
                owner,
            })
            .await?;

        let cursor = if links.len() as i64 > limit {
            links.truncate(limit as usize);
            match links.last() {
                Some(last) => Some(self.signer.encode(&CursorData {
                    created_at: last.created.timestamp_millis(),
                    id: last.id,
                })?),
                None => None,
            }
        } else {
            None
        };

        Ok(LinkPage {
            links: links.iter().map(LinkResponse::from).collect(),
            cursor,
        })
    }

    /// Check a visitor's password and hand out a proof for the redirect
    pub async fn verify_password(
        &self,
        code: &str,
        password: String,
        now: DateTime<Utc>,
    ) -> AppResult<PasswordProof> {
        let link = self
            .storage
            .get_authoritative(code)
            .await?
            .filter(|link| !link.archived)
            .ok_or_else(|| AppError::not_found(format!("link '{code}' not found")))?;

        let Some(hash) = link.password_hash else {
            return Err(AppError::validation("link is not password protected"));
        };

        if !password::verify_password(password, hash.clone()).await? {
            return Err(AppError::unauthorized("incorrect password"));
        }

        let (token, expires_at) = self.proofs.issue(&link.shortcode, &hash, now)?;
        Ok(PasswordProof { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcode_charset() {
        assert!(is_valid_shortcode("abc-DEF_123", 50));
        assert!(!is_valid_shortcode("", 50));
        assert!(!is_valid_shortcode("has space", 50));
        assert!(!is_valid_shortcode("ümlaut", 50));
        assert!(!is_valid_shortcode("a/b", 50));
        assert!(!is_valid_shortcode("toolong", 3));
    }

    #[test]
    fn generated_codes_are_base62() {
        for _ in 0..100 {
            let code = generate_short_code();
            assert_eq!(code.len(), GENERATED_CODE_LEN);
            assert!(code.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_url("https://Example.com").unwrap(), "https://example.com/");
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn window_ordering() {
        let now = Utc::now();
        assert!(validate_window(Some(now), Some(now)).is_err());
        assert!(validate_window(Some(now + chrono::Duration::hours(1)), Some(now)).is_err());
        assert!(validate_window(Some(now), Some(now + chrono::Duration::hours(1))).is_ok());
        assert!(validate_window(None, Some(now)).is_ok());
    }

    #[test]
    fn tags_are_deduplicated() {
        let tags = normalize_tags(vec![
            "b".to_string(),
            " a ".to_string(),
            "b".to_string(),
            "".to_string(),
        ]);
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }
}
