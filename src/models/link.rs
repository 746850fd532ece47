use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// HTTP status used when a link resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum RedirectType {
    MovedPermanently,
    Found,
    TemporaryRedirect,
    PermanentRedirect,
}

impl RedirectType {
    pub const fn status_code(self) -> u16 {
        match self {
            RedirectType::MovedPermanently => 301,
            RedirectType::Found => 302,
            RedirectType::TemporaryRedirect => 307,
            RedirectType::PermanentRedirect => 308,
        }
    }
}

impl TryFrom<u16> for RedirectType {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            301 => Ok(RedirectType::MovedPermanently),
            302 => Ok(RedirectType::Found),
            307 => Ok(RedirectType::TemporaryRedirect),
            308 => Ok(RedirectType::PermanentRedirect),
            other => Err(format!(
                "unsupported redirect type {other}, expected one of 301, 302, 307, 308"
            )),
        }
    }
}

impl From<RedirectType> for u16 {
    fn from(value: RedirectType) -> Self {
        value.status_code()
    }
}

/// A stored short link
#[derive(Debug, Clone)]
pub struct Link {
    pub id: i64,
    pub shortcode: String,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Argon2 PHC string, never exposed
    pub password_hash: Option<String>,
    pub activates_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub redirect_type: RedirectType,
    pub archived: bool,
    pub clicks: u64,
    pub created_by: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Link {
    pub fn password_enabled(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Fields of a link about to be inserted
#[derive(Debug, Clone)]
pub struct NewLink {
    pub shortcode: String,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub password_hash: Option<String>,
    pub activates_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub redirect_type: RedirectType,
    pub archived: bool,
    pub created_by: Option<String>,
    pub created: DateTime<Utc>,
}

/// External representation of a link
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub shortcode: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub password_enabled: bool,
    pub activates_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub redirect_type: RedirectType,
    pub archived: bool,
    pub clicks: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl From<&Link> for LinkResponse {
    fn from(link: &Link) -> Self {
        Self {
            shortcode: link.shortcode.clone(),
            url: link.url.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            tags: link.tags.clone(),
            password_enabled: link.password_enabled(),
            activates_at: link.activates_at,
            expires_at: link.expires_at,
            redirect_type: link.redirect_type,
            archived: link.archived,
            clicks: link.clicks,
            created: link.created,
            updated: link.updated,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub url: String,
    pub shortcode: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub password: Option<String>,
    pub activates_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub redirect_type: Option<RedirectType>,
    #[serde(default)]
    pub archived: bool,
}

/// Partial update. For clearable fields the outer `Option` tells whether the
/// field was sent at all and the inner one whether it was `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLinkRequest {
    pub url: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present")]
    pub password: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub activates_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub redirect_type: Option<RedirectType>,
    pub archived: Option<bool>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkDeleteRequest {
    pub shortcodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    pub deleted: Vec<String>,
    pub not_found: Vec<String>,
}

/// One page of links, keyed by shortcode in listing order
#[derive(Debug, Clone, Serialize)]
pub struct LinkPage {
    #[serde(serialize_with = "links_by_shortcode")]
    pub links: Vec<LinkResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

fn links_by_shortcode<S>(links: &[LinkResponse], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(links.iter().map(|link| (&link.shortcode, link)))
}
