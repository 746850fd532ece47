use crate::analytics::BucketKey;
use crate::models::{Link, NewLink};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Keyset position for link listings (newest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListPosition {
    pub created_at: i64,
    pub id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: i64,
    pub after: Option<ListPosition>,
    /// Restrict to links created by this caller
    pub owner: Option<String>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Insert a new link, failing with `Conflict` if the shortcode is taken
    async fn create(&self, link: &NewLink) -> StorageResult<Link>;

    /// Get a link by shortcode (may be served from cache)
    async fn get(&self, shortcode: &str) -> Result<Option<Link>>;

    /// Get a link by shortcode bypassing caches, with pending clicks included
    async fn get_authoritative(&self, shortcode: &str) -> Result<Option<Link>>;

    /// Persist the mutable fields of an existing link. Clicks are never written here.
    async fn update(&self, link: &Link) -> Result<bool>;

    /// Hard-delete a link together with its click buckets
    async fn delete(&self, shortcode: &str) -> Result<bool>;

    /// Add `amount` to the link's click counter
    async fn increment_clicks(&self, shortcode: &str, amount: u64) -> Result<()>;

    /// List links newest first
    async fn list(&self, query: &ListQuery) -> Result<Vec<Link>>;

    /// Count links, optionally only those created by `owner`
    async fn count(&self, owner: Option<&str>) -> Result<u64>;

    /// All shortcodes created by `owner`
    async fn owned_shortcodes(&self, owner: &str) -> Result<Vec<String>>;

    /// Add the given counts to the persisted click buckets. Buckets of shortcodes
    /// without a link row are skipped; their shortcodes are returned.
    async fn upsert_click_buckets(&self, batch: &[(BucketKey, u64)]) -> Result<Vec<String>>;

    /// Load every persisted click bucket
    async fn load_click_buckets(&self) -> Result<Vec<(BucketKey, u64)>>;
}
