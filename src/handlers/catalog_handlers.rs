//! HTTP handlers for catalog lookups and view/group creation.

use crate::{
    errors::AppError,
    models::record::FileInfo,
    services::catalog_service::hash_password,
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

/// Lookup parameters, accepted both as query string (GET) and JSON (POST).
#[derive(Debug, Deserialize)]
pub struct LookupParams {
    /// A file id, a comma-separated id list, or a view/group id.
    pub id: String,

    /// Password hash for gated records.
    pub pwd: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub success: bool,
    pub files: Vec<FileInfo>,
}

/// `GET /files?id=...&pwd=...`
pub async fn lookup_files(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<LookupResponse>, AppError> {
    resolve(state, params).await
}

/// `POST /files` with the same parameters as JSON.
pub async fn lookup_files_post(
    State(state): State<AppState>,
    Json(params): Json<LookupParams>,
) -> Result<Json<LookupResponse>, AppError> {
    resolve(state, params).await
}

async fn resolve(state: AppState, params: LookupParams) -> Result<Json<LookupResponse>, AppError> {
    let files = state
        .catalog
        .resolve(&params.id, params.pwd.as_deref())
        .await?;
    Ok(Json(LookupResponse {
        success: true,
        files,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateViewRequest {
    pub file_ids: Vec<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateViewResponse {
    pub success: bool,
    pub view_id: String,
}

/// `POST /views` — mint a shareable view over a set of files.
pub async fn create_view(
    State(state): State<AppState>,
    Json(req): Json<CreateViewRequest>,
) -> Result<Json<CreateViewResponse>, AppError> {
    if req.file_ids.is_empty() {
        return Err(AppError::bad_request("fileIds must not be empty"));
    }
    let view_id = state
        .catalog
        .create_view(req.file_ids, req.password.map(|p| hash_password(&p)))
        .await?;
    Ok(Json(CreateViewResponse {
        success: true,
        view_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub group_id: String,
    pub file_ids: Vec<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupResponse {
    pub success: bool,
    pub group_id: String,
}

/// `POST /groups` — register a named, optionally password-gated bundle.
pub async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<CreateGroupResponse>, AppError> {
    if req.group_id.trim().is_empty() {
        return Err(AppError::bad_request("groupId must not be empty"));
    }
    if req.file_ids.is_empty() {
        return Err(AppError::bad_request("fileIds must not be empty"));
    }
    state
        .catalog
        .create_group(
            req.group_id.clone(),
            req.file_ids,
            req.password.map(|p| hash_password(&p)),
        )
        .await?;
    Ok(Json(CreateGroupResponse {
        success: true,
        group_id: req.group_id,
    }))
}
