//! Data models for click analytics

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Campaign attribution parsed from the request query string.
/// Only parameters present on the request are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Utm {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Utm {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Raw request metadata handed to the classifier
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Request target: path plus optional query string
    pub url: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// ISO country code from a geo hint header or a GeoIP lookup
    pub country: Option<String>,
}

/// A classified visit. Produced once by the classifier and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub shortcode: String,
    pub timestamp: DateTime<Utc>,
    pub is_bot: bool,
    pub utm: Utm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

/// The categorical values a click is counted under
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq)]
pub struct ClickDimensions {
    /// Referrer host, lower-case
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub is_bot: bool,
}

impl ClickDimensions {
    pub fn from_event(event: &ClickEvent) -> Self {
        Self {
            referrer: event.referrer.as_deref().and_then(referrer_host),
            country: event.country.clone(),
            device: event.device.clone(),
            browser: event.browser.clone(),
            utm_source: event.utm.source.clone(),
            utm_medium: event.utm.medium.clone(),
            utm_campaign: event.utm.campaign.clone(),
            is_bot: event.is_bot,
        }
    }
}

/// Aggregation key: one shortcode, one hour, one combination of dimensions
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct BucketKey {
    pub shortcode: String,
    /// Unix timestamp truncated to the hour
    pub hour: i64,
    pub dims: ClickDimensions,
}

impl BucketKey {
    pub fn from_event(event: &ClickEvent) -> Self {
        Self {
            shortcode: event.shortcode.clone(),
            hour: hour_bucket(event.timestamp),
            dims: ClickDimensions::from_event(event),
        }
    }
}

/// Truncate a timestamp to its hour boundary in unix seconds
pub fn hour_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(3600) * 3600
}

/// Host part of a referrer header value. Values that are not URLs are kept as-is.
pub fn referrer_host(referrer: &str) -> Option<String> {
    let trimmed = referrer.trim();
    if trimmed.is_empty() {
        return None;
    }
    match url::Url::parse(trimmed) {
        Ok(parsed) => parsed.host_str().map(|h| h.to_lowercase()),
        Err(_) => Some(trimmed.to_lowercase()),
    }
}
