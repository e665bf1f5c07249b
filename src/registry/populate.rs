use super::registry::{Error, Registry};
use crate::config::Config;
use crate::providers::{self, ChatProvider};

fn populate(
    config: &Config,
    candidates: Vec<Box<dyn ChatProvider>>,
) -> Result<Registry, Error> {
    let mut builder = Registry::builder(config.default_provider);

    for provider in candidates {
        if !config.provider(provider.id()).enabled {
            tracing::debug!(provider = %provider.id(), "provider disabled by configuration");
            continue;
        }

        builder = builder.register(provider)?;
    }

    builder.build()
}

/// Build the registry of every provider the configuration leaves enabled.
pub(crate) fn load_registry(config: &Config) -> Result<Registry, Error> {
    populate(config, providers::all_providers())
}
