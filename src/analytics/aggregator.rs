//! Read views over the click index: overview, time-series, breakdown and heatmap.
//!
//! Every view is a fold over the in-memory `ClickIndex`, limited to the hours of
//! the requested range and to the links the caller may see. Nothing here writes.

use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use crate::analytics::models::ClickDimensions;
use crate::analytics::view::{ClickIndex, ScopeFilter};
use crate::auth::Caller;
use crate::config::AnalyticsConfig;
use crate::error::{AppError, AppResult};
use crate::storage::Storage;

const DEFAULT_RANGE_DAYS: u32 = 30;
const DIRECT: &str = "Direct";
const UNKNOWN: &str = "Unknown";

/// Requested scope: everything the caller can see, or one shortcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsScope {
    All,
    Shortcode(String),
}

impl AnalyticsScope {
    pub fn parse(scope: Option<&str>, shortcode: Option<&str>) -> AppResult<Self> {
        let shortcode = shortcode.map(str::trim).filter(|s| !s.is_empty());
        match (scope.map(str::trim).filter(|s| !s.is_empty()), shortcode) {
            (None, None) | (Some("all"), None) => Ok(AnalyticsScope::All),
            (Some("all"), Some(_)) => Err(AppError::validation(
                "shortcode cannot be combined with scope=all",
            )),
            (None, Some(code)) | (Some("shortcode"), Some(code)) | (Some("link"), Some(code)) => {
                Ok(AnalyticsScope::Shortcode(code.to_string()))
            }
            (Some("shortcode"), None) | (Some("link"), None) => Err(AppError::validation(
                "scope=shortcode requires a shortcode parameter",
            )),
            (Some(other), _) => Err(AppError::validation(format!(
                "unknown scope '{other}', expected 'all' or 'shortcode'"
            ))),
        }
    }
}

/// Inclusive range of UTC calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Both bounds or neither. Without bounds the trailing 30 days ending today
    /// are used, shortened to `max_days` when that is smaller.
    pub fn parse(
        from: Option<&str>,
        to: Option<&str>,
        today: NaiveDate,
        max_days: u32,
    ) -> AppResult<Self> {
        let range = match (from, to) {
            (Some(f), Some(t)) => DateRange {
                from: parse_date("from", f)?,
                to: parse_date("to", t)?,
            },
            (Some(_), None) => {
                return Err(AppError::validation(
                    "from is provided but to is missing",
                ))
            }
            (None, Some(_)) => {
                return Err(AppError::validation(
                    "to is provided but from is missing",
                ))
            }
            (None, None) => DateRange {
                from: days_before(today, DEFAULT_RANGE_DAYS.min(max_days)),
                to: today,
            },
        };

        if range.from > range.to {
            return Err(AppError::validation("from must not be later than to"));
        }
        if range.days() > i64::from(max_days) {
            return Err(AppError::validation(format!(
                "date range spans {} days, maximum is {max_days}",
                range.days()
            )));
        }
        Ok(range)
    }

    /// Number of calendar dates covered, bounds included
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// Half-open hour window `[from 00:00, to+1 00:00)` in unix seconds
    fn hours(&self) -> (i64, i64) {
        (day_start(self.from), day_start(self.to) + 86_400)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        self.from.iter_days().take(self.days() as usize)
    }
}

fn parse_date(name: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::validation(format!("invalid {name} date '{raw}', expected YYYY-MM-DD"))
    })
}

/// First date of the `days`-long window ending on `last`, clamped to the
/// earliest representable date
fn days_before(last: NaiveDate, days: u32) -> NaiveDate {
    last.checked_sub_days(Days::new(u64::from(days.max(1) - 1)))
        .unwrap_or(NaiveDate::MIN)
}

fn day_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Breakdown axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Referrer,
    Device,
    Browser,
    Country,
    Shortcode,
    UtmSource,
    UtmMedium,
    UtmCampaign,
}

impl FromStr for Dimension {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "referrer" => Ok(Dimension::Referrer),
            "device" | "user_agent" | "useragent" | "user-agent" => Ok(Dimension::Device),
            "browser" => Ok(Dimension::Browser),
            "country" => Ok(Dimension::Country),
            "shortcode" => Ok(Dimension::Shortcode),
            "utm_source" => Ok(Dimension::UtmSource),
            "utm_medium" => Ok(Dimension::UtmMedium),
            "utm_campaign" => Ok(Dimension::UtmCampaign),
            other => Err(AppError::validation(format!(
                "unknown dimension '{other}', expected one of referrer, device, browser, country, shortcode, utm_source, utm_medium, utm_campaign"
            ))),
        }
    }
}

impl Dimension {
    fn label(self, shortcode: &str, dims: &ClickDimensions) -> String {
        let (value, missing) = match self {
            Dimension::Shortcode => return shortcode.to_string(),
            Dimension::Referrer => (&dims.referrer, DIRECT),
            Dimension::UtmSource => (&dims.utm_source, DIRECT),
            Dimension::UtmMedium => (&dims.utm_medium, DIRECT),
            Dimension::UtmCampaign => (&dims.utm_campaign, DIRECT),
            Dimension::Device => (&dims.device, UNKNOWN),
            Dimension::Browser => (&dims.browser, UNKNOWN),
            Dimension::Country => (&dims.country, UNKNOWN),
        };
        match value.as_deref() {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => missing.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_clicks: u64,
    pub total_links: u64,
    pub today_clicks: u64,
    pub recent_clicks: u64,
    pub recent_days: u32,
    pub bot_clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeseriesPoint {
    pub date: NaiveDate,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakdownEntry {
    pub key: String,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapCell {
    /// 0 = Monday
    pub weekday: u32,
    pub hour: u32,
    pub clicks: u64,
}

struct ResolvedScope {
    filter: ScopeFilter,
    link_count: u64,
}

pub struct AnalyticsAggregator {
    storage: Arc<dyn Storage>,
    index: Arc<ClickIndex>,
    recent_days: u32,
    max_range_days: u32,
    breakdown_cap: usize,
    breakdown_default_limit: usize,
}

impl AnalyticsAggregator {
    pub fn new(storage: Arc<dyn Storage>, index: Arc<ClickIndex>, config: &AnalyticsConfig) -> Self {
        Self {
            storage,
            index,
            recent_days: config.recent_days.max(1),
            max_range_days: config.max_range_days.max(1),
            breakdown_cap: config.breakdown_cap.max(1),
            breakdown_default_limit: config.breakdown_default_limit.max(1),
        }
    }

    pub fn max_range_days(&self) -> u32 {
        self.max_range_days
    }

    /// Turn the requested scope into the set of shortcodes the caller may read
    async fn resolve_scope(&self, caller: &Caller, scope: &AnalyticsScope) -> AppResult<ResolvedScope> {
        match scope {
            AnalyticsScope::Shortcode(code) => {
                let link = self
                    .storage
                    .get_authoritative(code)
                    .await?
                    .filter(|link| caller.can_access(link))
                    .ok_or_else(|| AppError::not_found(format!("link '{code}' not found")))?;
                Ok(ResolvedScope {
                    filter: ScopeFilter::One(link.shortcode),
                    link_count: 1,
                })
            }
            AnalyticsScope::All if caller.is_admin => Ok(ResolvedScope {
                filter: ScopeFilter::All,
                link_count: self.storage.count(None).await?,
            }),
            AnalyticsScope::All => {
                let owned = match caller.id.as_deref() {
                    Some(id) => self.storage.owned_shortcodes(id).await?,
                    None => Vec::new(),
                };
                Ok(ResolvedScope {
                    link_count: owned.len() as u64,
                    filter: ScopeFilter::Only(owned.into_iter().collect()),
                })
            }
        }
    }

    pub async fn overview(
        &self,
        caller: &Caller,
        scope: &AnalyticsScope,
        include_bots: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Overview> {
        let resolved = self.resolve_scope(caller, scope).await?;

        let today = now.date_naive();
        let today_start = day_start(today);
        let recent_start = day_start(days_before(today, self.recent_days));

        let mut overview = Overview {
            total_clicks: 0,
            total_links: resolved.link_count,
            today_clicks: 0,
            recent_clicks: 0,
            recent_days: self.recent_days,
            bot_clicks: 0,
        };

        self.index
            .fold(&resolved.filter, i64::MIN, i64::MAX, |_, hour, dims, count| {
                if dims.is_bot {
                    overview.bot_clicks += count;
                    if !include_bots {
                        return;
                    }
                }
                overview.total_clicks += count;
                if hour >= recent_start {
                    overview.recent_clicks += count;
                }
                if hour >= today_start {
                    overview.today_clicks += count;
                }
            });

        Ok(overview)
    }

    /// One point per calendar date in the range, zero-filled
    pub async fn timeseries(
        &self,
        caller: &Caller,
        scope: &AnalyticsScope,
        range: &DateRange,
        include_bots: bool,
    ) -> AppResult<Vec<TimeseriesPoint>> {
        let resolved = self.resolve_scope(caller, scope).await?;
        let (from_hour, to_hour) = range.hours();

        let mut per_day: BTreeMap<NaiveDate, u64> = range.dates().map(|d| (d, 0)).collect();
        self.index
            .fold(&resolved.filter, from_hour, to_hour, |_, hour, dims, count| {
                if dims.is_bot && !include_bots {
                    return;
                }
                if let Some(date) = DateTime::from_timestamp(hour, 0).map(|dt| dt.date_naive()) {
                    if let Some(clicks) = per_day.get_mut(&date) {
                        *clicks += count;
                    }
                }
            });

        Ok(per_day
            .into_iter()
            .map(|(date, clicks)| TimeseriesPoint { date, clicks })
            .collect())
    }

    /// Top values of `dimension`, by clicks descending then key ascending
    pub async fn breakdown(
        &self,
        caller: &Caller,
        scope: &AnalyticsScope,
        range: &DateRange,
        dimension: Dimension,
        limit: Option<usize>,
        include_bots: bool,
    ) -> AppResult<Vec<BreakdownEntry>> {
        let resolved = self.resolve_scope(caller, scope).await?;
        let (from_hour, to_hour) = range.hours();

        let mut grouped: HashMap<String, u64> = HashMap::new();
        self.index
            .fold(&resolved.filter, from_hour, to_hour, |code, _, dims, count| {
                if dims.is_bot && !include_bots {
                    return;
                }
                *grouped.entry(dimension.label(code, dims)).or_insert(0) += count;
            });

        let limit = limit
            .unwrap_or(self.breakdown_default_limit)
            .clamp(1, self.breakdown_cap);

        let mut entries: Vec<BreakdownEntry> = grouped
            .into_iter()
            .map(|(key, clicks)| BreakdownEntry { key, clicks })
            .collect();
        entries.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.key.cmp(&b.key)));
        entries.truncate(limit);

        Ok(entries)
    }

    /// 7x24 grid of clicks by weekday and hour of day, Monday first
    pub async fn heatmap(
        &self,
        caller: &Caller,
        scope: &AnalyticsScope,
        range: &DateRange,
        include_bots: bool,
    ) -> AppResult<Vec<HeatmapCell>> {
        let resolved = self.resolve_scope(caller, scope).await?;
        let (from_hour, to_hour) = range.hours();

        let mut grid = [[0u64; 24]; 7];
        self.index
            .fold(&resolved.filter, from_hour, to_hour, |_, hour, dims, count| {
                if dims.is_bot && !include_bots {
                    return;
                }
                if let Some(dt) = DateTime::from_timestamp(hour, 0) {
                    let weekday = dt.weekday().num_days_from_monday() as usize;
                    grid[weekday][dt.hour() as usize] += count;
                }
            });

        Ok(grid
            .iter()
            .enumerate()
            .flat_map(|(weekday, hours)| {
                hours.iter().enumerate().map(move |(hour, clicks)| HeatmapCell {
                    weekday: weekday as u32,
                    hour: hour as u32,
                    clicks: *clicks,
                })
            })
            .collect())
    }
}
