use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use alder_db::models::{ProfileChanges, UserRow};
use alder_types::UserId;
use alder_types::api::{PublicKeys, UpdateProfileRequest, UserProfile};

use crate::auth::AppState;
use crate::middleware::CurrentUser;

fn profile_from_row(row: UserRow) -> UserProfile {
    UserProfile {
        id: row.id,
        username: row.username,
        avatar: row.avatar,
        bio: row.bio,
        status: row.status,
        created_at: row.created_at,
    }
}

fn keys_from_row(row: &UserRow) -> PublicKeys {
    PublicKeys {
        perm_pub_x25519: row.pub_x25519.clone().unwrap_or_default(),
        kyber_pub: row.kyber_pub.clone().unwrap_or_default(),
        dilithium_pub: row.dilithium_pub.clone().unwrap_or_default(),
    }
}

async fn load_user(state: &AppState, id: UserId) -> Result<UserRow, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || db.get_user_by_id(id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = load_user(&state, current.id).await?;
    Ok(Json(profile_from_row(row)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let changes = ProfileChanges {
        username: req.username,
        avatar: req.avatar,
        bio: req.bio,
        status: req.status,
    };
    tokio::task::spawn_blocking(move || db.update_profile(current.id, &changes))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let row = load_user(&state, current.id).await?;
    Ok(Json(profile_from_row(row)))
}

pub async fn update_keys(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(keys): Json<PublicKeys>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || db.update_keys(current.id, &keys))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = load_user(&state, id).await?;
    Ok(Json(profile_from_row(row)))
}

/// Public key material for handshake bootstrap. Absent keys come back as
/// empty strings, not errors: a user who never published keys is simply
/// unreachable for key exchange.
pub async fn get_user_keys(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = load_user(&state, id).await?;
    Ok(Json(keys_from_row(&row)))
}
