use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml;

use crate::providers::ProviderIdentifier;
use crate::registry::resolver::UnknownModelPolicy;

/// The output-token ceiling used when the selected model does not declare one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 8000;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("failed to read config \"{0}\": {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct ProviderConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            enabled: true,
            api_key: None,
            api_base: None,
        }
    }
}

#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub(crate) struct Providers {
    #[serde(default)]
    pub ollama: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct Config {
    pub default_provider: ProviderIdentifier,
    pub default_model: String,
    pub max_tokens: u32,
    pub unknown_model: UnknownModelPolicy,
    pub prompt_id: Option<String>,
    pub cwd: Option<String>,
    pub providers: Providers,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_provider: ProviderIdentifier::OpenAI,
            default_model: "gpt-4o-mini".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            unknown_model: UnknownModelPolicy::default(),
            prompt_id: None,
            cwd: None,
            providers: Providers::default(),
        }
    }
}

impl Config {
    pub(crate) fn provider(&self, id: ProviderIdentifier) -> &ProviderConfig {
        match id {
            ProviderIdentifier::Ollama => &self.providers.ollama,
            ProviderIdentifier::OpenAI => &self.providers.openai,
        }
    }
}

fn get_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME");

    if let Some(home) = home {
        let home = PathBuf::from(home);

        const USER_PATHS: [&str; 2] = [".config/relay/config.toml", ".relay.toml"];

        for &path in USER_PATHS.iter() {
            let fullpath = home.join(path);

            if fullpath.exists() {
                return Some(fullpath);
            }
        }
    }

    let system_config = PathBuf::from("/etc/relay.toml");

    if system_config.exists() {
        Some(system_config)
    } else {
        None
    }
}

fn extra_fields_helper<'a>(
    path: &mut Vec<&'a str>,
    user_config: &'a toml::Table,
    config: &'a toml::Table,
    extra: &mut Vec<String>,
) {
    for (user_key, user_value) in user_config {
        path.push(user_key);

        match (user_value, config.get(user_key)) {
            (toml::Value::Table(user_value), Some(toml::Value::Table(config_value))) => {
                extra_fields_helper(path, user_value, config_value, extra)
            }
            (_, Some(_)) => {}
            (_, None) => extra.push(path.join(".")),
        }

        path.pop();
    }
}

/// Keys present in the user's file which the configuration does not know.
fn extra_fields(config: &Config, raw_config: &str) -> Result<Vec<String>, Error> {
    let user_config: toml::Table = toml::from_str(raw_config)?;

    // Optional fields are skipped by the serializer, so compare against a
    // config with every option populated.
    let mut full = config.clone();
    for provider in [&mut full.providers.ollama, &mut full.providers.openai] {
        provider.api_key.get_or_insert_with(String::new);
        provider.api_base.get_or_insert_with(String::new);
    }
    full.prompt_id.get_or_insert_with(String::new);
    full.cwd.get_or_insert_with(String::new);

    let known = match toml::Value::try_from(&full) {
        Ok(toml::Value::Table(table)) => table,
        _ => return Ok(Vec::new()),
    };

    let mut extra = Vec::new();

    extra_fields_helper(&mut Vec::new(), &user_config, &known, &mut extra);

    Ok(extra)
}

pub(crate) fn parse_config(raw_config: &str) -> Result<Config, Error> {
    let config: Config = toml::from_str(raw_config)?;

    for key in extra_fields(&config, raw_config)? {
        tracing::warn!(key = %key, "config contains extraneous key, ignoring");
    }

    Ok(config)
}

pub(crate) fn read_config(config: Option<&Path>) -> Result<Config, Error> {
    let config_path = config.map(Path::to_path_buf).or_else(get_config_path);

    match config_path {
        Some(path) => {
            let raw_config =
                std::fs::read_to_string(&path).map_err(|e| Error::Read(path.clone(), e))?;

            tracing::debug!(path = %path.display(), "loaded config");

            parse_config(&raw_config)
        }
        None => Ok(Config::default()),
    }
}
