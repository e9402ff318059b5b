use serde::Serialize;

/// Static lookup table of selectable models. Ids are OpenRouter slugs.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
}

pub const MODELS: &[Model] = &[
    Model {
        id: "google/gemini-3-flash-preview",
        name: "Gemini 3 Flash",
        provider: "Google",
    },
    Model {
        id: "google/gemini-3-pro-preview",
        name: "Gemini 3 Pro",
        provider: "Google",
    },
    Model {
        id: "anthropic/claude-opus-4.5",
        name: "Claude Opus 4.5",
        provider: "Anthropic",
    },
    Model {
        id: "anthropic/claude-haiku-4.5",
        name: "Claude Haiku 4.5",
        provider: "Anthropic",
    },
    Model {
        id: "anthropic/claude-sonnet-4.5",
        name: "Claude Sonnet 4.5",
        provider: "Anthropic",
    },
    Model {
        id: "moonshotai/kimi-k2-0905",
        name: "Kimi K2",
        provider: "Moonshot",
    },
];

/// Default model for new conversations.
pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Be concise and accurate. \
Format your answers in markdown where it improves readability.";

pub fn model_by_id(id: &str) -> Option<&'static Model> {
    MODELS.iter().find(|m| m.id == id)
}

/// Catalog grouped for the model picker, providers in first-appearance
/// order.
pub fn models_by_provider() -> Vec<(&'static str, Vec<&'static Model>)> {
    let mut groups: Vec<(&'static str, Vec<&'static Model>)> = Vec::new();
    for model in MODELS {
        match groups.iter_mut().find(|(p, _)| *p == model.provider) {
            Some((_, models)) => models.push(model),
            None => groups.push((model.provider, vec![model])),
        }
    }
    groups
}

pub fn is_valid_model(id: &str) -> bool {
    model_by_id(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_in_the_catalog() {
        assert!(is_valid_model(DEFAULT_MODEL));
        assert_eq!(MODELS[0].id, DEFAULT_MODEL);
    }

    #[test]
    fn grouping_preserves_catalog_order_and_loses_nothing() {
        let groups = models_by_provider();
        assert_eq!(groups[0].0, "Google");
        let total: usize = groups.iter().map(|(_, models)| models.len()).sum();
        assert_eq!(total, MODELS.len());
        let anthropic = groups.iter().find(|(p, _)| *p == "Anthropic").unwrap();
        assert_eq!(anthropic.1.len(), 3);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert!(!is_valid_model("not-a-real-model"));
        assert!(model_by_id("").is_none());
    }
}
