use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::AnalyticsAggregator;
use crate::auth::Caller;
use crate::error::AppResult;
use crate::links::{LinkService, PasswordProof};
use crate::models::{
    BulkDeleteRequest, BulkDeleteResponse, CreateLinkRequest, LinkPage, LinkResponse,
    UpdateLinkRequest,
};

pub struct ApiState {
    pub links: Arc<LinkService>,
    pub analytics: Arc<AnalyticsAggregator>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordVerifyRequest {
    pub shortcode: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedPathsResponse {
    pub reserved_paths: Vec<String>,
}

/// List links newest first
pub async fn list_links(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<LinkPage>> {
    let page = state
        .links
        .list(&caller, params.limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

pub async fn create_link(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<CreateLinkRequest>,
) -> AppResult<(StatusCode, Json<LinkResponse>)> {
    let link = state.links.create(&caller, payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(LinkResponse::from(&link))))
}

pub async fn get_link(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Path(shortcode): Path<String>,
) -> AppResult<Json<LinkResponse>> {
    let link = state.links.get(&caller, &shortcode).await?;
    Ok(Json(LinkResponse::from(&link)))
}

pub async fn update_link(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Path(shortcode): Path<String>,
    Json(payload): Json<UpdateLinkRequest>,
) -> AppResult<Json<LinkResponse>> {
    let link = state
        .links
        .update(&caller, &shortcode, payload, Utc::now())
        .await?;
    Ok(Json(LinkResponse::from(&link)))
}

pub async fn delete_link(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Path(shortcode): Path<String>,
) -> AppResult<StatusCode> {
    state.links.delete(&caller, &shortcode).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete_links(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<BulkDeleteRequest>,
) -> AppResult<Json<BulkDeleteResponse>> {
    let result = state.links.delete_many(&caller, payload.shortcodes).await?;
    Ok(Json(result))
}

/// Exchange a link password for a redirect proof
pub async fn verify_password(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<PasswordVerifyRequest>,
) -> AppResult<Json<PasswordProof>> {
    let proof = state
        .links
        .verify_password(&payload.shortcode, payload.password, Utc::now())
        .await?;
    Ok(Json(proof))
}

pub async fn reserved_paths(State(state): State<Arc<ApiState>>) -> Json<ReservedPathsResponse> {
    Json(ReservedPathsResponse {
        reserved_paths: state.links.reserved_paths(),
    })
}
