use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use alder_db::Database;
use alder_db::models::GroupRow;
use alder_types::GroupId;
use alder_types::api::{CreateGroupRequest, GroupResponse};

use crate::auth::AppState;
use crate::middleware::CurrentUser;

fn response_with_members(db: &Database, row: GroupRow) -> anyhow::Result<GroupResponse> {
    let member_ids = db.group_member_ids(row.id)?;
    Ok(GroupResponse {
        id: row.id,
        name: row.name,
        description: row.description,
        owner_id: row.owner_id,
        member_ids,
        created_at: row.created_at,
    })
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.is_empty() || req.name.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let group = tokio::task::spawn_blocking(move || {
        let group_id = db.create_group(&req.name, req.description.as_deref(), current.id)?;
        let row = db
            .get_group(group_id)?
            .ok_or_else(|| anyhow::anyhow!("group {} vanished after create", group_id))?;
        response_with_members(&db, row)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("user {} created group {} ({})", current.id, group.name, group.id);
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn my_groups(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let groups = tokio::task::spawn_blocking(move || {
        db.groups_owned_by(current.id)?
            .into_iter()
            .map(|row| response_with_members(&db, row))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(groups))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let group = tokio::task::spawn_blocking(move || {
        db.get_group(id)?
            .map(|row| response_with_members(&db, row))
            .transpose()
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(group))
}

pub async fn join_group(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<GroupId>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let group = tokio::task::spawn_blocking(move || {
        let Some(row) = db.get_group(id)? else {
            return Ok(None);
        };
        db.join_group(id, current.id)?;
        db.get_group(row.id)?
            .map(|row| response_with_members(&db, row))
            .transpose()
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_: anyhow::Error| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!("user {} joined group {}", current.id, id);
    Ok(Json(group))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<GroupId>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let found = tokio::task::spawn_blocking(move || {
        let Some(_) = db.get_group(id)? else {
            return Ok(false);
        };
        db.leave_group(id, current.id)?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !found {
        return Err(StatusCode::NOT_FOUND);
    }

    info!("user {} left group {}", current.id, id);
    Ok(StatusCode::NO_CONTENT)
}
