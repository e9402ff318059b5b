use actix_web::{delete, get, patch, post, web, HttpResponse};
use serde_json::json;
use tracing::info;

use crate::errors::AppError;
use crate::llm::is_valid_model;
use crate::middleware::auth::AuthenticatedUser;
use crate::services::Scope;
use crate::types::{
    ConversationData, ConversationWithMessages, CreateConversationRequest, CreatedConversation,
    MessageData, UpdateModelRequest,
};
use crate::AppState;

#[get("")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<web::Json<Vec<ConversationData>>, AppError> {
    let scope = Scope::new(&state.pool, &user);
    let conversations = scope
        .conversations()
        .await?
        .into_iter()
        .map(|(row, preview)| ConversationData::with_preview(row, preview))
        .collect();
    Ok(web::Json(conversations))
}

#[post("")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: Option<web::Json<CreateConversationRequest>>,
) -> Result<web::Json<CreatedConversation>, AppError> {
    let model = body.as_ref().and_then(|b| b.model.as_deref());
    let scope = Scope::new(&state.pool, &user);
    let conversation = scope.create_conversation(model).await?;

    info!("conversation {} created for {}", conversation.id, user.user_id);
    Ok(web::Json(CreatedConversation {
        id: conversation.id,
    }))
}

#[get("/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    id: web::Path<String>,
) -> Result<web::Json<ConversationWithMessages>, AppError> {
    let scope = Scope::new(&state.pool, &user);
    let (conversation, messages) = scope.conversation_with_messages(&id).await?;

    Ok(web::Json(ConversationWithMessages {
        conversation: ConversationData::from_row(conversation),
        messages: messages.into_iter().map(MessageData::from).collect(),
    }))
}

#[delete("/{id}")]
pub async fn delete_conversation(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let scope = Scope::new(&state.pool, &user);
    scope.delete_conversation(&id).await?;
    Ok(HttpResponse::Ok().finish())
}

#[patch("/{id}/model")]
pub async fn update_model(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    id: web::Path<String>,
    body: web::Json<UpdateModelRequest>,
) -> Result<web::Json<serde_json::Value>, AppError> {
    let model = body.model.trim();
    if model.is_empty() {
        return Err(AppError::validation_field("Model is required", "model"));
    }
    if !is_valid_model(model) {
        return Err(AppError::validation_field("Invalid model", "model"));
    }

    let scope = Scope::new(&state.pool, &user);
    scope.update_model(&id, model).await?;
    Ok(web::Json(json!({ "success": true })))
}
