use table::Table;
mod table;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::prompts::{PromptLibrary, DEFAULT_PROMPT_ID};
use crate::providers::{ChatProvider, Model, ProviderIdentifier};
use crate::registry::credentials::{self, CredentialSet};
use crate::registry::resolver;
use crate::registry::Registry;
use crate::utils::errors::error_chain;
use crate::{die, warn, ListArgs, ListObject, ListingFormat};

use strum::IntoEnumIterator;

#[derive(serde::Serialize)]
struct Provider {
    provider: ProviderIdentifier,
    name: &'static str,
    enabled: bool,
    default: bool,
    api_key_env_var: Option<&'static str>,
    icon: Option<&'static str>,
}

impl From<Vec<Provider>> for Table {
    fn from(value: Vec<Provider>) -> Self {
        let mut tab = Table::new(vec!["PROVIDER", "STATUS", "API_KEY"]);

        for provider in value {
            let status = match (provider.enabled, provider.default) {
                (true, true) => "default",
                (true, false) => "enabled",
                (false, _) => "disabled",
            };

            tab.add_row(vec![
                provider.provider.to_string(),
                status.to_string(),
                provider.api_key_env_var.unwrap_or("-").to_string(),
            ]);
        }

        tab
    }
}

#[derive(serde::Serialize)]
struct ListedModel {
    #[serde(flatten)]
    model: Model,
    dynamic: bool,
}

impl From<Vec<ListedModel>> for Table {
    fn from(value: Vec<ListedModel>) -> Self {
        let mut tab = Table::new(vec!["MODEL", "PROVIDER", "MAX_TOKENS", "SOURCE"]);

        for listed in value {
            tab.add_row(vec![
                listed.model.name,
                listed.model.provider.to_string(),
                match listed.model.max_token_allowed {
                    Some(max) => max.to_string(),
                    None => "default".to_string(),
                },
                (if listed.dynamic { "listed" } else { "static" }).to_string(),
            ]);
        }

        tab
    }
}

#[derive(serde::Serialize)]
struct Prompt {
    id: &'static str,
    label: &'static str,
    description: &'static str,
    default: bool,
}

impl From<Vec<Prompt>> for Table {
    fn from(value: Vec<Prompt>) -> Self {
        let mut tab = Table::new(vec!["PROMPT", "DESCRIPTION"]);

        for prompt in value {
            tab.add_row(vec![prompt.id, prompt.description]);
        }

        tab
    }
}

fn get_providers(registry: &Registry) -> Vec<Provider> {
    let default = registry.default_provider().id();

    ProviderIdentifier::iter()
        .map(|id| {
            let provider = registry.provider(id);

            Provider {
                provider: id,
                name: provider.map(|p| p.descriptor().name).unwrap_or("-"),
                enabled: provider.is_some(),
                default: id == default,
                api_key_env_var: provider.and_then(|p| p.descriptor().api_key_env_var),
                icon: provider.and_then(|p| p.descriptor().icon),
            }
        })
        .collect()
}

/// Static models, then whatever the provider lists. A provider that cannot
/// be reached still shows its static models.
async fn provider_models(
    registry: &Registry,
    config: &Config,
    provider: &dyn ChatProvider,
) -> Result<Vec<ListedModel>, resolver::Error> {
    let mut models: Vec<ListedModel> = provider
        .descriptor()
        .static_models
        .iter()
        .map(|model| ListedModel {
            model: model.clone(),
            dynamic: false,
        })
        .collect();

    let access = credentials::resolve_access(
        provider,
        &CredentialSet::default(),
        config.provider(provider.id()),
        credentials::process_env,
    )?;

    let listed = registry
        .dynamic_models(provider, &access)
        .await
        .map_err(|source| resolver::Error::ModelListing {
            provider: provider.id(),
            source,
        })?;

    for model in listed.iter() {
        if models.iter().any(|m| m.model.name == model.name) {
            continue;
        }

        models.push(ListedModel {
            model: model.clone(),
            dynamic: true,
        });
    }

    Ok(models)
}

async fn get_models(registry: &Registry, config: &Config, only: Option<ProviderIdentifier>) -> Vec<ListedModel> {
    let mut models = Vec::new();

    if let Some(id) = only {
        let provider = match registry.provider(id) {
            Some(provider) => provider,
            None => die!("failed to list models: provider \"{}\" is not enabled", id),
        };

        return match provider_models(registry, config, provider.as_ref()).await {
            Ok(models) => models,
            Err(err) => die!("failed to list models: {}", error_chain(&err)),
        };
    }

    for provider in registry.list() {
        match provider_models(registry, config, provider.as_ref()).await {
            Ok(listed) => models.extend(listed),
            Err(err) => {
                warn!("skipping \"{}\": {}", provider.id(), error_chain(&err));

                models.extend(provider.descriptor().static_models.iter().map(|model| {
                    ListedModel {
                        model: model.clone(),
                        dynamic: false,
                    }
                }));
            }
        }
    }

    models
}

fn get_prompts() -> Vec<Prompt> {
    PromptLibrary::templates()
        .iter()
        .map(|t| Prompt {
            id: t.id,
            label: t.label,
            description: t.description,
            default: t.id == DEFAULT_PROMPT_ID,
        })
        .collect()
}

fn format_output<O: Into<Table> + serde::Serialize>(object: O, format: ListingFormat) {
    match format {
        ListingFormat::Json => match serde_json::to_string_pretty(&object) {
            Ok(output) => println!("{}", output),
            Err(err) => die!("failed to serialize the listing: {}", err),
        },
        ListingFormat::Table => {
            let tab: Table = object.into();

            print!("{}", tab);
        }
        ListingFormat::HeaderlessTable => {
            let mut tab: Table = object.into();

            tab.print_header(false);

            print!("{}", tab);
        }
    }
}

pub(crate) async fn list_cmd(orchestrator: &Orchestrator, config: &Config, args: &ListArgs) {
    let format = args.format;
    let registry = orchestrator.registry();

    match &args.object {
        ListObject::Models(args) => {
            let models = get_models(registry, config, args.provider).await;
            format_output(models, format);
        }
        ListObject::Providers => format_output(get_providers(registry), format),
        ListObject::Prompts => format_output(get_prompts(), format),
    }
}
