//! Message Query Handlers
//!
//! Read-only history, sync and receipt endpoints. Sending happens over the
//! gateway.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use validator::Validate;

use crate::application::dto::{
    ChatMessageDto, ConversationSummaryDto, GroupMessageDto, GroupReceiptsDto, SyncQuery,
};
use crate::domain::GroupId;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Direct history with another user, oldest first
pub async fn get_direct_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(other): Path<String>,
) -> Result<Json<Vec<ChatMessageDto>>, AppError> {
    let messages = state
        .engine
        .queries()
        .direct_history(&auth.user_id, &other)
        .await?;
    Ok(Json(messages))
}

/// Direct messages sent or received after `since`
pub async fn sync_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<Vec<ChatMessageDto>>, AppError> {
    query.validate().map_err(validation_error)?;

    let messages = state
        .engine
        .queries()
        .sync(&auth.user_id, query.since)
        .await?;
    Ok(Json(messages))
}

/// Latest message per counterpart
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<ConversationSummaryDto>>, AppError> {
    let summaries = state.engine.queries().conversations(&auth.user_id).await?;
    Ok(Json(summaries))
}

/// Group history, members only
pub async fn get_group_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(group_id): Path<String>,
) -> Result<Json<Vec<GroupMessageDto>>, AppError> {
    let group = GroupId::parse(&group_id)?;
    let messages = state
        .engine
        .queries()
        .group_history(&auth.user_id, group)
        .await?;
    Ok(Json(messages))
}

/// Delivery and read receipts of one group message
pub async fn get_group_receipts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(message_id): Path<String>,
) -> Result<Json<GroupReceiptsDto>, AppError> {
    let receipts = state
        .engine
        .queries()
        .group_receipts(&auth.user_id, &message_id)
        .await?;
    Ok(Json(receipts))
}
