use std::convert::Infallible;

use actix_web::http::header;
use actix_web::{get, post, web, HttpResponse};
use futures::StreamExt;
use tracing::info;

use crate::errors::AppError;
use crate::llm::ChatTurn;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::Role;
use crate::services::Scope;
use crate::streams::{FrameStream, SSE_CONTENT_TYPE};
use crate::types::{extract_text, ChatRequest};
use crate::AppState;

fn stream_response(frames: FrameStream) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(SSE_CONTENT_TYPE)
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("x-accel-buffering", "no"))
        .streaming(frames.map(Ok::<_, Infallible>))
}

/// A new chat turn. Runs the start protocol: guard, idempotent user-message
/// insert, supersede any prior stream, then hand the generation to the
/// stream manager and relay its durable channel back to the client.
#[post("/{id}/messages")]
pub async fn post_turn(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    id: web::Path<String>,
    body: web::Json<ChatRequest>,
) -> Result<HttpResponse, AppError> {
    let scope = Scope::new(&state.pool, &user);

    // Fresh guarded read every turn; the model may have changed since the
    // page loaded.
    let conversation = scope.conversation(&id).await?;

    let messages = &body.messages;
    let Some(last) = messages.last() else {
        return Err(AppError::validation("Messages are required"));
    };
    if last.role != "user" {
        return Err(AppError::validation("Last message must be from user"));
    }
    let user_content = extract_text(&last.parts);
    let user_content = user_content.trim();
    if user_content.is_empty() {
        return Err(AppError::validation("Message content is required"));
    }

    scope
        .record_user_turn(&conversation.id, &last.id, user_content)
        .await?;

    // Last-start-wins: any previous stream loses its discoverability now.
    scope.supersede_stream(&conversation.id).await?;

    let turns: Vec<ChatTurn> = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => return None,
            };
            Some(ChatTurn {
                role,
                content: extract_text(&m.parts),
            })
        })
        .collect();

    let tokens = state
        .model
        .stream_chat(&conversation.model, &conversation.system_prompt, turns)
        .await?;

    let frames = state.streams.begin(&conversation.id, tokens).await?;
    info!(
        "streaming turn on conversation {} for {}",
        conversation.id, user.user_id
    );
    Ok(stream_response(frames))
}

/// Resume probe: "is something still running on this conversation?" The
/// common answer is no, and that path is a single narrow pointer read.
#[get("/{id}/stream")]
pub async fn resume_stream(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let scope = Scope::new(&state.pool, &user);

    let Some(stream_id) = scope.active_stream_pointer(&id).await? else {
        return Ok(HttpResponse::NoContent().finish());
    };

    match state.streams.resume(&id, &stream_id).await? {
        Some(frames) => Ok(stream_response(frames)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}
