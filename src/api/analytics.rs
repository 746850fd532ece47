//! Analytics API handlers

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::handlers::ApiState;
use crate::analytics::{
    AnalyticsScope, BreakdownEntry, DateRange, Dimension, HeatmapCell, Overview, TimeseriesPoint,
};
use crate::auth::Caller;
use crate::error::{AppError, AppResult};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQueryParams {
    /// First date, `YYYY-MM-DD`
    pub from: Option<String>,
    /// Last date, inclusive
    pub to: Option<String>,
    /// `all` or `shortcode`
    pub scope: Option<String>,
    pub shortcode: Option<String>,
    pub dimension: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_bots: bool,
}

impl AnalyticsQueryParams {
    fn scope(&self) -> AppResult<AnalyticsScope> {
        AnalyticsScope::parse(self.scope.as_deref(), self.shortcode.as_deref())
    }

    fn range(&self, max_days: u32) -> AppResult<DateRange> {
        DateRange::parse(
            self.from.as_deref().filter(|s| !s.is_empty()),
            self.to.as_deref().filter(|s| !s.is_empty()),
            Utc::now().date_naive(),
            max_days,
        )
    }
}

pub async fn overview(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<AnalyticsQueryParams>,
) -> AppResult<Json<Overview>> {
    let scope = params.scope()?;
    let overview = state
        .analytics
        .overview(&caller, &scope, params.include_bots, Utc::now())
        .await?;
    Ok(Json(overview))
}

pub async fn timeseries(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<AnalyticsQueryParams>,
) -> AppResult<Json<Vec<TimeseriesPoint>>> {
    let scope = params.scope()?;
    let range = params.range(state.analytics.max_range_days())?;
    let series = state
        .analytics
        .timeseries(&caller, &scope, &range, params.include_bots)
        .await?;
    Ok(Json(series))
}

pub async fn breakdown(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<AnalyticsQueryParams>,
) -> AppResult<Json<Vec<BreakdownEntry>>> {
    let dimension: Dimension = params
        .dimension
        .as_deref()
        .ok_or_else(|| AppError::validation("dimension is required"))?
        .parse()?;
    let scope = params.scope()?;
    let range = params.range(state.analytics.max_range_days())?;
    let entries = state
        .analytics
        .breakdown(
            &caller,
            &scope,
            &range,
            dimension,
            params.limit,
            params.include_bots,
        )
        .await?;
    Ok(Json(entries))
}

pub async fn heatmap(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<AnalyticsQueryParams>,
) -> AppResult<Json<Vec<HeatmapCell>>> {
    let scope = params.scope()?;
    let range = params.range(state.analytics.max_range_days())?;
    let cells = state
        .analytics
        .heatmap(&caller, &scope, &range, params.include_bots)
        .await?;
    Ok(Json(cells))
}
