use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use parlor_types::api::{
    Ack, AddMembersRequest, ChatEnvelope, Claims, CreateChatRequest, RemoveMembersRequest,
    UpdateChatRequest, UserChatsResponse,
};
use parlor_types::models::Role;

use crate::auth::{AppState, db_call};
use crate::error::{ApiError, ApiJson, ApiPath};

/// GET /user/chats: every chat the caller belongs to.
pub async fn list_my_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let chats = db_call(&state, move |db| db.chats_for_user(user_id)).await?;
    Ok(Json(UserChatsResponse { user_id, chats }))
}

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let members: Vec<(i64, Role)> = req.members.iter().map(|m| (m.user_id(), m.role())).collect();

    let chat = db_call(&state, move |db| {
        db.create_chat(
            claims.sub,
            req.name.as_deref(),
            req.description.as_deref(),
            req.is_group,
            &members,
        )
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChatEnvelope {
            message: "Chat created successfully".into(),
            chat,
        }),
    ))
}

pub async fn get_chat(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = db_call(&state, move |db| db.get_chat(chat_id)).await?;
    Ok(Json(chat))
}

pub async fn update_chat(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = db_call(&state, move |db| {
        db.update_chat(chat_id, req.name.as_deref(), req.description.as_deref())
    })
    .await?;

    Ok(Json(ChatEnvelope {
        message: "Chat updated successfully".into(),
        chat,
    }))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    db_call(&state, move |db| db.delete_chat(chat_id)).await?;
    Ok(Json(Ack::new("Chat and related data deleted permanently")))
}

/// POST /chats/{id}/add-users: the caller is recorded as `added_by`.
pub async fn add_members(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<AddMembersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = req.role.unwrap_or_default();
    db_call(&state, move |db| {
        db.add_members(chat_id, &req.user_ids, role, claims.sub)
    })
    .await?;

    Ok(Json(Ack::new("Users added successfully")))
}

pub async fn remove_members(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    ApiJson(req): ApiJson<RemoveMembersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    db_call(&state, move |db| db.remove_members(chat_id, &req.user_ids)).await?;
    Ok(Json(Ack::new("Users removed from group chat")))
}
