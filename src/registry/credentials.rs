//! Per-request credentials and the order in which they override each other.

use std::collections::HashMap;

use serde::Deserialize;

use super::resolver::Error;
use crate::config::ProviderConfig;
use crate::providers::{ChatProvider, ProviderAccess};

/// Reads an environment variable. Swapped out in tests.
pub(crate) type EnvLookup = fn(&str) -> Option<String>;

pub(crate) fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Overrides for one provider supplied with the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProviderSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Secrets supplied by the caller. Both maps are keyed by provider name,
/// matched case-insensitively against the identifier or display name.
#[derive(Debug, Clone, Default)]
pub(crate) struct CredentialSet {
    pub api_keys: HashMap<String, String>,
    pub settings: HashMap<String, ProviderSettings>,
}

fn lookup<'m, V>(map: &'m HashMap<String, V>, provider: &dyn ChatProvider) -> Option<&'m V> {
    let id = provider.id().to_string();
    let name = provider.descriptor().name;

    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(&id) || key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).map(str::to_string)
}

impl CredentialSet {
    fn api_key(&self, provider: &dyn ChatProvider) -> Option<String> {
        non_empty(lookup(&self.api_keys, provider).map(String::as_str))
    }

    fn settings(&self, provider: &dyn ChatProvider) -> Option<&ProviderSettings> {
        lookup(&self.settings, provider)
    }
}

/// Work out the key and base URL `provider` is called with.
///
/// Keys are taken from the caller's key map, the caller's settings, the
/// configuration file and the environment, in that order. Base URLs skip the
/// key map but otherwise follow the same order; when nothing is found the
/// provider uses its built-in default.
pub(crate) fn resolve_access(
    provider: &dyn ChatProvider,
    credentials: &CredentialSet,
    config: &ProviderConfig,
    env: EnvLookup,
) -> Result<ProviderAccess, Error> {
    let descriptor = provider.descriptor();
    let settings = credentials.settings(provider);

    let api_key = credentials
        .api_key(provider)
        .or_else(|| non_empty(settings.and_then(|s| s.api_key.as_deref())))
        .or_else(|| non_empty(config.api_key.as_deref()))
        .or_else(|| non_empty(descriptor.api_key_env_var.and_then(env).as_deref()));

    let api_base = non_empty(settings.and_then(|s| s.base_url.as_deref()))
        .or_else(|| non_empty(config.api_base.as_deref()))
        .or_else(|| non_empty(descriptor.base_url_env_var.and_then(env).as_deref()));

    if descriptor.requires_api_key() && api_key.is_none() {
        return Err(Error::MissingCredentials {
            provider: provider.id(),
            env_var: descriptor.api_key_env_var.unwrap_or_default(),
        });
    }

    Ok(ProviderAccess { api_key, api_base })
}
