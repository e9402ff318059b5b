pub mod catalog;
pub mod client;

pub use catalog::{
    is_valid_model, model_by_id, models_by_provider, Model, DEFAULT_MODEL, MODELS, SYSTEM_PROMPT,
};
pub use client::{ChatTurn, ModelClient, OpenRouterClient, TokenStream};
