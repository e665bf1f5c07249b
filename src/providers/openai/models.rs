use lazy_static::lazy_static;

use crate::providers::{Model, ProviderIdentifier};

lazy_static! {
    // Models served without asking the listing endpoint. Resolving one of these
    // never costs a network round trip, so the commonly requested models belong
    // here. The ceilings are the documented output-token limits.
    pub(super) static ref OPENAI_MODELS: Vec<Model> = vec![
        Model::new(ProviderIdentifier::OpenAI, "gpt-4o-mini", "GPT-4o Mini", Some(16384)),
        Model::new(ProviderIdentifier::OpenAI, "gpt-4o", "GPT-4o", Some(16384)),
        Model::new(ProviderIdentifier::OpenAI, "gpt-4-turbo", "GPT-4 Turbo", Some(4096)),
        Model::new(ProviderIdentifier::OpenAI, "gpt-4", "GPT-4", Some(8192)),
        Model::new(ProviderIdentifier::OpenAI, "gpt-3.5-turbo", "GPT-3.5 Turbo", Some(4096)),
    ];
}

const CHAT_PREFIXES: [&str; 5] = ["gpt-", "o1", "o3", "o4", "chatgpt-"];

const NON_CHAT_MARKERS: [&str; 7] = [
    "instruct",
    "audio",
    "realtime",
    "transcribe",
    "tts",
    "search",
    "image",
];

/// Whether a model id from the listing endpoint names a chat model that is not
/// already declared statically.
pub(super) fn is_listable(id: &str) -> bool {
    CHAT_PREFIXES.iter().any(|p| id.starts_with(p))
        && !NON_CHAT_MARKERS.iter().any(|m| id.contains(m))
        && !OPENAI_MODELS.iter().any(|m| m.name == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listable_models() {
        assert!(is_listable("gpt-4.1"));
        assert!(is_listable("o3-mini"));
        assert!(!is_listable("gpt-4o"));
        assert!(!is_listable("gpt-4o-realtime-preview"));
        assert!(!is_listable("text-embedding-3-small"));
        assert!(!is_listable("dall-e-3"));
    }
}
