use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use alder_types::UserId;
use alder_types::api::ContactEntry;

use crate::auth::AppState;
use crate::middleware::CurrentUser;

/// Every other registered user, with status. Contact filtering is
/// deliberately loose for now: discovery matters more than privacy inside
/// one hub deployment.
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_users_except(current.id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let contacts: Vec<ContactEntry> = rows
        .into_iter()
        .map(|row| ContactEntry {
            id: row.id,
            username: row.username,
            status: row.status,
        })
        .collect();

    Ok(Json(contacts))
}

pub async fn add_contact(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    if user_id == current.id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    // Auto-accepted; there is no invite flow.
    tokio::task::spawn_blocking(move || db.add_contact(current.id, user_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::NOT_FOUND)?;

    info!("user {} added contact {}", current.id, user_id);
    Ok(StatusCode::CREATED)
}
