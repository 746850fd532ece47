use crate::analytics::{BucketKey, ClickDimensions};
use crate::models::{Link, NewLink, RedirectType};
use crate::storage::{ListQuery, Storage, StorageError, StorageResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

macro_rules! select_links {
    ($tail:literal) => {
        concat!(
            "SELECT id, shortcode, url, title, description, tags, password_hash, ",
            "activates_at, expires_at, redirect_type, archived, clicks, created_by, ",
            "created_at, updated_at FROM links",
            $tail
        )
    };
}

#[derive(Debug, FromRow)]
struct LinkRow {
    id: i64,
    shortcode: String,
    url: String,
    title: Option<String>,
    description: Option<String>,
    tags: String,
    password_hash: Option<String>,
    activates_at: Option<i64>,
    expires_at: Option<i64>,
    redirect_type: i64,
    archived: bool,
    clicks: i64,
    created_by: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct BucketRow {
    shortcode: String,
    hour: i64,
    referrer: String,
    country: String,
    device: String,
    browser: String,
    utm_source: String,
    utm_medium: String,
    utm_campaign: String,
    is_bot: bool,
    clicks: i64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {ms} is out of range"))
}

impl TryFrom<LinkRow> for Link {
    type Error = anyhow::Error;

    fn try_from(row: LinkRow) -> Result<Self> {
        let redirect_type = u16::try_from(row.redirect_type)
            .map_err(|_| anyhow!("invalid redirect type {}", row.redirect_type))
            .and_then(|code| RedirectType::try_from(code).map_err(anyhow::Error::msg))?;
        let tags: Vec<String> = serde_json::from_str(&row.tags)
            .with_context(|| format!("corrupt tags for link '{}'", row.shortcode))?;

        Ok(Link {
            id: row.id,
            shortcode: row.shortcode,
            url: row.url,
            title: row.title,
            description: row.description,
            tags,
            password_hash: row.password_hash,
            activates_at: row.activates_at.map(from_millis).transpose()?,
            expires_at: row.expires_at.map(from_millis).transpose()?,
            redirect_type,
            archived: row.archived,
            clicks: row.clicks.max(0) as u64,
            created_by: row.created_by,
            created: from_millis(row.created_at)?,
            updated: from_millis(row.updated_at)?,
        })
    }
}

fn empty_as_none(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl From<BucketRow> for (BucketKey, u64) {
    fn from(row: BucketRow) -> Self {
        let key = BucketKey {
            shortcode: row.shortcode,
            hour: row.hour,
            dims: ClickDimensions {
                referrer: empty_as_none(row.referrer),
                country: empty_as_none(row.country),
                device: empty_as_none(row.device),
                browser: empty_as_none(row.browser),
                utm_source: empty_as_none(row.utm_source),
                utm_medium: empty_as_none(row.utm_medium),
                utm_campaign: empty_as_none(row.utm_campaign),
                is_bot: row.is_bot,
            },
        };
        (key, row.clicks.max(0) as u64)
    }
}

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid SQLite URL '{database_url}'"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // In-memory databases vanish with their last connection
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn fetch_link(&self, shortcode: &str) -> Result<Option<Link>> {
        let row = sqlx::query_as::<_, LinkRow>(select_links!(" WHERE shortcode = ?"))
            .bind(shortcode)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(Link::try_from).transpose()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                shortcode TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                title TEXT,
                description TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                password_hash TEXT,
                activates_at INTEGER,
                expires_at INTEGER,
                redirect_type INTEGER NOT NULL DEFAULT 302,
                archived INTEGER NOT NULL DEFAULT 0,
                clicks INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_created ON links(created_at DESC, id DESC)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_created_by ON links(created_by)")
            .execute(self.pool.as_ref())
            .await?;

        // Absent dimensions are stored as '' so they take part in the primary key
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_buckets (
                shortcode TEXT NOT NULL,
                hour INTEGER NOT NULL,
                referrer TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                device TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                utm_source TEXT NOT NULL DEFAULT '',
                utm_medium TEXT NOT NULL DEFAULT '',
                utm_campaign TEXT NOT NULL DEFAULT '',
                is_bot INTEGER NOT NULL DEFAULT 0,
                clicks INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (
                    shortcode, hour, referrer, country, device, browser,
                    utm_source, utm_medium, utm_campaign, is_bot
                )
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create(&self, link: &NewLink) -> StorageResult<Link> {
        let tags = serde_json::to_string(&link.tags).map_err(|e| StorageError::Other(e.into()))?;
        let created_at = link.created.timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO links (
                shortcode, url, title, description, tags, password_hash,
                activates_at, expires_at, redirect_type, archived, created_by,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(shortcode) DO NOTHING
            "#,
        )
        .bind(&link.shortcode)
        .bind(&link.url)
        .bind(&link.title)
        .bind(&link.description)
        .bind(tags)
        .bind(&link.password_hash)
        .bind(link.activates_at.map(|t| t.timestamp_millis()))
        .bind(link.expires_at.map(|t| t.timestamp_millis()))
        .bind(i64::from(link.redirect_type.status_code()))
        .bind(link.archived)
        .bind(&link.created_by)
        .bind(created_at)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        self.fetch_link(&link.shortcode)
            .await?
            .ok_or_else(|| StorageError::Other(anyhow!("link vanished right after insert")))
    }

    async fn get(&self, shortcode: &str) -> Result<Option<Link>> {
        self.fetch_link(shortcode).await
    }

    async fn get_authoritative(&self, shortcode: &str) -> Result<Option<Link>> {
        self.fetch_link(shortcode).await
    }

    async fn update(&self, link: &Link) -> Result<bool> {
        let tags = serde_json::to_string(&link.tags)?;

        let result = sqlx::query(
            r#"
            UPDATE links
            SET url = ?, title = ?, description = ?, tags = ?, password_hash = ?,
                activates_at = ?, expires_at = ?, redirect_type = ?, archived = ?,
                updated_at = ?
            WHERE shortcode = ?
            "#,
        )
        .bind(&link.url)
        .bind(&link.title)
        .bind(&link.description)
        .bind(tags)
        .bind(&link.password_hash)
        .bind(link.activates_at.map(|t| t.timestamp_millis()))
        .bind(link.expires_at.map(|t| t.timestamp_millis()))
        .bind(i64::from(link.redirect_type.status_code()))
        .bind(link.archived)
        .bind(link.updated.timestamp_millis())
        .bind(&link.shortcode)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, shortcode: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM click_buckets WHERE shortcode = ?")
            .bind(shortcode)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM links WHERE shortcode = ?")
            .bind(shortcode)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_clicks(&self, shortcode: &str, amount: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE links
            SET clicks = clicks + ?
            WHERE shortcode = ?
            "#,
        )
        .bind(i64::try_from(amount).unwrap_or(i64::MAX))
        .bind(shortcode)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Link>> {
        let mut builder = QueryBuilder::<Sqlite>::new(select_links!(""));
        let mut has_filter = false;

        if let Some(owner) = &query.owner {
            builder.push(" WHERE created_by = ").push_bind(owner.clone());
            has_filter = true;
        }

        if let Some(after) = query.after {
            builder.push(if has_filter { " AND " } else { " WHERE " });
            builder
                .push("(created_at < ")
                .push_bind(after.created_at)
                .push(" OR (created_at = ")
                .push_bind(after.created_at)
                .push(" AND id < ")
                .push_bind(after.id)
                .push("))");
        }

        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(query.limit);

        let rows = builder
            .build_query_as::<LinkRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter().map(Link::try_from).collect()
    }

    async fn count(&self, owner: Option<&str>) -> Result<u64> {
        let count = match owner {
            Some(owner) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links WHERE created_by = ?")
                    .bind(owner)
                    .fetch_one(self.pool.as_ref())
                    .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links")
                    .fetch_one(self.pool.as_ref())
                    .await?
            }
        };

        Ok(count.max(0) as u64)
    }

    async fn owned_shortcodes(&self, owner: &str) -> Result<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT shortcode FROM links WHERE created_by = ? ORDER BY shortcode",
        )
        .bind(owner)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(codes)
    }

    async fn upsert_click_buckets(&self, batch: &[(BucketKey, u64)]) -> Result<Vec<String>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut skipped = Vec::new();

        for (key, clicks) in batch {
            let dims = &key.dims;
            let result = sqlx::query(
                r#"
                INSERT INTO click_buckets (
                    shortcode, hour, referrer, country, device, browser,
                    utm_source, utm_medium, utm_campaign, is_bot, clicks
                )
                SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
                WHERE EXISTS (SELECT 1 FROM links WHERE shortcode = ?)
                ON CONFLICT (
                    shortcode, hour, referrer, country, device, browser,
                    utm_source, utm_medium, utm_campaign, is_bot
                ) DO UPDATE SET clicks = clicks + excluded.clicks
                "#,
            )
            .bind(&key.shortcode)
            .bind(key.hour)
            .bind(dims.referrer.as_deref().unwrap_or(""))
            .bind(dims.country.as_deref().unwrap_or(""))
            .bind(dims.device.as_deref().unwrap_or(""))
            .bind(dims.browser.as_deref().unwrap_or(""))
            .bind(dims.utm_source.as_deref().unwrap_or(""))
            .bind(dims.utm_medium.as_deref().unwrap_or(""))
            .bind(dims.utm_campaign.as_deref().unwrap_or(""))
            .bind(dims.is_bot)
            .bind(i64::try_from(*clicks).unwrap_or(i64::MAX))
            .bind(&key.shortcode)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                skipped.push(key.shortcode.clone());
            }
        }

        tx.commit().await?;

        skipped.sort_unstable();
        skipped.dedup();
        Ok(skipped)
    }

    async fn load_click_buckets(&self) -> Result<Vec<(BucketKey, u64)>> {
        let rows = sqlx::query_as::<_, BucketRow>(
            r#"
            SELECT shortcode, hour, referrer, country, device, browser,
                   utm_source, utm_medium, utm_campaign, is_bot, clicks
            FROM click_buckets
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
