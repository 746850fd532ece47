//! Request metadata to click event classification.
//!
//! Classification has no side effects: the same inputs always produce the same event.

use chrono::{DateTime, Utc};
use woothee::parser::Parser;

use crate::analytics::models::{ClickEvent, RequestMeta, Utm};

/// Crawler, unfurler and monitor signatures matched case-insensitively anywhere in the UA
pub const DEFAULT_BOT_SIGNATURES: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "googlebot",
    "bingbot",
    "yandex",
    "baiduspider",
    "duckduckbot",
    "applebot",
    "facebookexternalhit",
    "facebookcatalog",
    "twitterbot",
    "linkedinbot",
    "slackbot",
    "slack-imgproxy",
    "discordbot",
    "telegrambot",
    "whatsapp",
    "skypeuripreview",
    "pinterest",
    "redditbot",
    "embedly",
    "quora link preview",
    "vkshare",
    "outbrain",
    "bitlybot",
    "tumblr",
    "nuzzel",
    "pingdom",
    "uptimerobot",
    "statuscake",
    "site24x7",
    "newrelicpinger",
    "headlesschrome",
    "lighthouse",
    "python-requests",
    "curl/",
    "wget/",
];

pub struct ClickClassifier {
    /// Lower-cased signatures
    bot_signatures: Vec<String>,
    parser: Parser,
}

impl ClickClassifier {
    /// Build a classifier from the built-in signatures plus `extra`
    pub fn new(extra: &[String]) -> Self {
        let mut bot_signatures: Vec<String> = DEFAULT_BOT_SIGNATURES
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().map(|s| s.trim().to_lowercase()))
            .filter(|s| !s.is_empty())
            .collect();
        bot_signatures.sort();
        bot_signatures.dedup();

        Self {
            bot_signatures,
            parser: Parser::new(),
        }
    }

    pub fn is_bot(&self, user_agent: &str) -> bool {
        let ua = user_agent.to_lowercase();
        self.bot_signatures.iter().any(|sig| ua.contains(sig.as_str()))
    }

    pub fn classify(&self, shortcode: &str, timestamp: DateTime<Utc>, meta: &RequestMeta) -> ClickEvent {
        let user_agent = meta
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|ua| !ua.is_empty());

        let (device, browser) = match user_agent.and_then(|ua| self.parser.parse(ua)) {
            Some(result) => (known(result.category), known(result.name)),
            None => (None, None),
        };

        ClickEvent {
            shortcode: shortcode.to_string(),
            timestamp,
            is_bot: user_agent.map(|ua| self.is_bot(ua)).unwrap_or(false),
            utm: parse_utm(&meta.url),
            referrer: meta
                .referrer
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            country: meta
                .country
                .as_deref()
                .map(str::trim)
                .filter(|c| c.len() == 2)
                .map(str::to_uppercase),
            user_agent: user_agent.map(str::to_string),
            device,
            browser,
        }
    }
}

impl Default for ClickClassifier {
    fn default() -> Self {
        Self::new(&[])
    }
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Extract UTM parameters from a request target. The first occurrence of each wins.
pub fn parse_utm(target: &str) -> Utm {
    let mut utm = Utm::default();
    let query = match target.split_once('?') {
        Some((_, query)) => query.split('#').next().unwrap_or_default(),
        None => return utm,
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            "utm_term" => &mut utm.term,
            "utm_content" => &mut utm.content,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    utm
}
