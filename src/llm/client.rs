use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::Role;

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// One prior turn handed to the model. Only user and assistant turns are
/// relayed; the system prompt travels separately.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

pub type TokenStream = BoxStream<'static, Result<String, AppError>>;

/// The inference call, reduced to the one shape the stream manager needs:
/// system prompt plus ordered turns in, a token stream out. The production
/// implementation talks to OpenRouter; tests script their own.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_chat(
        &self,
        model: &str,
        system_prompt: &str,
        turns: Vec<ChatTurn>,
    ) -> AppResult<TokenStream>;
}

pub struct OpenRouterClient {
    client: Client<OpenAIConfig>,
}

impl OpenRouterClient {
    pub fn new(api_key: &str) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(OPENROUTER_API_BASE),
        );
        Self { client }
    }
}

#[async_trait]
impl ModelClient for OpenRouterClient {
    async fn stream_chat(
        &self,
        model: &str,
        system_prompt: &str,
        turns: Vec<ChatTurn>,
    ) -> AppResult<TokenStream> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into()];

        for turn in turns {
            let message = match turn.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content)
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content)
                    .build()?
                    .into(),
            };
            messages.push(message);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build()?;

        debug!("starting completion against {model}");
        let response = self.client.chat().create_stream(request).await?;

        let tokens = response
            .filter_map(|item| async move {
                match item {
                    Ok(chunk) => chunk
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .filter(|text| !text.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(AppError::from(e))),
                }
            })
            .boxed();

        Ok(tokens)
    }
}
