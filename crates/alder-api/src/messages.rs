use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use alder_db::models::MessageRow;
use alder_types::api::MessageRecord;
use alder_types::{GroupId, UserId};

use crate::auth::AppState;
use crate::middleware::CurrentUser;

fn record_from_row(row: MessageRow) -> MessageRecord {
    MessageRecord {
        id: row.id,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        group_id: row.group_id,
        ciphertext: row.ciphertext,
        iv: row.iv,
        metadata: row.metadata,
        timestamp: row.created_at,
    }
}

/// History read path: how an offline recipient catches up on messages the
/// relay could not deliver live. Oldest first.
pub async fn conversation(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.conversation(current.id, user_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let records: Vec<MessageRecord> = rows.into_iter().map(record_from_row).collect();
    Ok(Json(records))
}

pub async fn group_history(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.group_messages(group_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let records: Vec<MessageRecord> = rows.into_iter().map(record_from_row).collect();
    Ok(Json(records))
}
