use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::credentials::{self, CredentialSet, EnvLookup};
use super::Registry;
use crate::chat::Message;
use crate::config::{Config, DEFAULT_MAX_TOKENS};
use crate::providers::{
    self, AsyncMessageIterator, ChatProvider, CompletionOptions, CompletionRequest, Model,
    ProviderAccess, ProviderIdentifier, UsageReporting,
};

/// What happens to a request for a model the provider does not serve.
#[derive(Deserialize, Serialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UnknownModelPolicy {
    /// Substitute the first available model.
    #[default]
    Fallback,
    /// Fail the request.
    Reject,
}

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("no API key for \"{provider}\", pass one with the request or define {env_var}")]
    MissingCredentials {
        provider: ProviderIdentifier,
        env_var: &'static str,
    },

    #[error("no models are available from \"{provider}\"")]
    NoModelsAvailable { provider: ProviderIdentifier },

    #[error("\"{provider}\" does not serve the model \"{model}\"")]
    ModelNotFound {
        provider: ProviderIdentifier,
        model: String,
    },

    #[error("failed to list the models of \"{provider}\": {source}")]
    ModelListing {
        provider: ProviderIdentifier,
        #[source]
        source: providers::Error,
    },
}

/// A model bound to the provider and access it is called with.
#[derive(Clone)]
pub(crate) struct ModelHandle {
    provider: Arc<dyn ChatProvider>,
    access: ProviderAccess,
    model: Model,
}

impl ModelHandle {
    pub(crate) fn new(provider: Arc<dyn ChatProvider>, access: ProviderAccess, model: Model) -> Self {
        ModelHandle {
            provider,
            access,
            model,
        }
    }

    pub(crate) fn model(&self) -> &Model {
        &self.model
    }

    pub(crate) fn provider_id(&self) -> ProviderIdentifier {
        self.provider.id()
    }

    pub(crate) fn usage_reporting(&self) -> UsageReporting {
        self.provider.usage_reporting()
    }

    pub(crate) async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        max_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<Box<dyn AsyncMessageIterator>, providers::Error> {
        let request = CompletionRequest {
            model: &self.model.name,
            system,
            messages,
            max_tokens,
            options,
        };

        self.provider.stream_completion(&self.access, request).await
    }
}

/// The outcome of a resolution.
pub(crate) struct Resolved {
    pub handle: ModelHandle,
    /// Output-token ceiling for the request.
    pub max_tokens: u32,
}

pub(crate) struct ModelResolver<'r> {
    registry: &'r Registry,
    config: &'r Config,
    env: EnvLookup,
}

impl<'r> ModelResolver<'r> {
    pub(crate) fn new(registry: &'r Registry, config: &'r Config) -> ModelResolver<'r> {
        ModelResolver {
            registry,
            config,
            env: credentials::process_env,
        }
    }

    pub(crate) fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    fn ceiling(&self, model: &Model) -> u32 {
        match model.max_token_allowed {
            Some(max) => max,
            None if self.config.max_tokens > 0 => self.config.max_tokens,
            None => DEFAULT_MAX_TOKENS,
        }
    }

    fn resolved(&self, provider: &Arc<dyn ChatProvider>, access: ProviderAccess, model: Model) -> Resolved {
        let max_tokens = self.ceiling(&model);

        Resolved {
            handle: ModelHandle::new(provider.clone(), access, model),
            max_tokens,
        }
    }

    /// Select the model `requested` on `provider`.
    ///
    /// Static models are matched without touching the network. Anything else
    /// goes through the provider's model listing, cached by the registry.
    pub(crate) async fn resolve(
        &self,
        provider: &Arc<dyn ChatProvider>,
        requested: &str,
        credentials: &CredentialSet,
    ) -> Result<Resolved, Error> {
        let id = provider.id();

        let access = credentials::resolve_access(
            provider.as_ref(),
            credentials,
            self.config.provider(id),
            self.env,
        )?;

        let descriptor = provider.descriptor();

        if let Some(model) = descriptor.static_model(requested) {
            tracing::debug!(provider = %id, model = requested, "matched static model");

            return Ok(self.resolved(provider, access, model.clone()));
        }

        let dynamic = self
            .registry
            .dynamic_models(provider.as_ref(), &access)
            .await
            .map_err(|source| Error::ModelListing {
                provider: id,
                source,
            })?;

        let mut candidates = descriptor.static_models.iter().chain(dynamic.iter());

        if let Some(model) = candidates.clone().find(|m| m.name == requested) {
            tracing::debug!(provider = %id, model = requested, "matched listed model");

            return Ok(self.resolved(provider, access, model.clone()));
        }

        let first = match candidates.next() {
            Some(first) => first.clone(),
            None => return Err(Error::NoModelsAvailable { provider: id }),
        };

        match self.config.unknown_model {
            UnknownModelPolicy::Fallback => {
                tracing::warn!(
                    provider = %id,
                    requested,
                    model = %first.name,
                    "requested model is not served, falling back"
                );

                Ok(self.resolved(provider, access, first))
            }
            UnknownModelPolicy::Reject => Err(Error::ModelNotFound {
                provider: id,
                model: requested.to_string(),
            }),
        }
    }
}
