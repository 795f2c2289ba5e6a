//! Model catalog for locally loadable models.
//!
//! The catalog is static: these are the models the simulated engine knows
//! how to impersonate. A real backend would discover models on disk.

/// Metadata for a loadable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    /// Short catalog id (e.g. "meta-llama3-8b").
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Parameter count label (e.g. "8B").
    pub parameters: &'static str,
    /// Model vendor.
    pub provider: &'static str,
    /// Upstream model identifier.
    pub model_id: &'static str,
}

/// All models available for loading.
pub const AVAILABLE_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "meta-llama3-8b",
        name: "Llama 3 8B",
        description: "Meta's Llama 3 8B model - fast and efficient",
        parameters: "8B",
        provider: "Meta",
        model_id: "meta-llama/Llama-3-8B-hf",
    },
    ModelInfo {
        id: "mistral-7b",
        name: "Mistral 7B",
        description: "Mistral 7B Instruct - good quality text generation",
        parameters: "7B",
        provider: "Mistral AI",
        model_id: "mistralai/Mistral-7B-Instruct-v0.2",
    },
    ModelInfo {
        id: "gemma-2b",
        name: "Gemma 2B",
        description: "Google's Gemma 2B - lightweight model",
        parameters: "2B",
        provider: "Google",
        model_id: "google/gemma-2b",
    },
];

impl ModelInfo {
    /// Looks up a catalog entry by its short id.
    pub fn find_by_id(id: &str) -> Option<&'static ModelInfo> {
        AVAILABLE_MODELS.iter().find(|m| m.id == id)
    }
}

/// Default model id used when the config does not name one.
pub const DEFAULT_MODEL_ID: &str = "meta-llama3-8b";
