//! Concrete types for providers, along with their descriptors

use serde::{Deserialize, Serialize};
use strum_macros;

use super::Model;

/// The `ProviderIdentifier` is a unique per-provider identifier. It is used to
/// differentiate providers at runtime in code which is generic over different
/// providers.
///
/// The `to_string` and `FromStr` are part of the CLI and of the request
/// format and should remain stable.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ProviderIdentifier {
    Ollama,
    OpenAI,
}

/// Static information about a provider. Created once when the provider is
/// constructed and never modified afterwards.
#[derive(Debug, Clone)]
pub(crate) struct ProviderDescriptor {
    /// The display name, e.g. "OpenAI".
    pub name: &'static str,
    /// Environment variable holding the API key. Providers which do not
    /// authenticate leave this unset.
    pub api_key_env_var: Option<&'static str>,
    /// Environment variable overriding the API base.
    pub base_url_env_var: Option<&'static str>,
    /// The API base used when nothing overrides it.
    pub default_api_base: &'static str,
    /// Models known without asking the backend.
    pub static_models: Vec<Model>,
    /// Whether the backend has a model listing endpoint.
    pub dynamic_models: bool,
    /// Reference to an icon asset for front ends.
    pub icon: Option<&'static str>,
}

impl ProviderDescriptor {
    pub(crate) fn requires_api_key(&self) -> bool {
        self.api_key_env_var.is_some()
    }

    pub(crate) fn static_model(&self, name: &str) -> Option<&Model> {
        self.static_models.iter().find(|m| m.name == name)
    }
}
