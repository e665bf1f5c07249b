//! The request pipeline: normalize the conversation, resolve the model,
//! assemble the system prompt and start the completion.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::chat::Message;
use crate::config::Config;
use crate::dispatch::{self, StreamResult};
use crate::preprocess::{self, Defaults};
use crate::prompts::{self, FileContext, PromptLibrary, PromptOptions};
use crate::providers::{self, CompletionOptions, ProviderIdentifier};
use crate::registry::credentials::{self, CredentialSet, EnvLookup, ProviderSettings};
use crate::registry::resolver::{self, ModelResolver};
use crate::registry::Registry;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("no models are available from \"{provider}\"")]
    NoModelsAvailable { provider: ProviderIdentifier },

    #[error("no API key for \"{provider}\", pass one with the request or define {env_var}")]
    MissingCredentials {
        provider: ProviderIdentifier,
        env_var: &'static str,
    },

    #[error("\"{provider}\" does not serve the model \"{model}\"")]
    ModelNotFound {
        provider: ProviderIdentifier,
        model: String,
    },

    #[error("no provider is named \"{0}\"")]
    ProviderNotFound(String),

    #[error("the provider failed: {0}")]
    ProviderTransport(#[source] providers::Error),
}

impl From<resolver::Error> for Error {
    fn from(value: resolver::Error) -> Self {
        match value {
            resolver::Error::NoModelsAvailable { provider } => Error::NoModelsAvailable { provider },
            resolver::Error::MissingCredentials { provider, env_var } => {
                Error::MissingCredentials { provider, env_var }
            }
            resolver::Error::ModelNotFound { provider, model } => {
                Error::ModelNotFound { provider, model }
            }
            resolver::Error::ModelListing { source, .. } => Error::ProviderTransport(source),
        }
    }
}

/// One chat request, as sent by a front end.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatRequest {
    pub messages: Vec<Message>,
    /// The model used unless the conversation names one.
    #[serde(default)]
    pub model: Option<String>,
    /// The provider used unless the conversation names one.
    #[serde(default)]
    pub provider: Option<String>,
    /// API keys by provider name.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub provider_settings: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub context_optimization: bool,
    /// Every file of the project.
    #[serde(default)]
    pub files: FileContext,
    /// The files selected as context for this request.
    #[serde(default)]
    pub context_files: FileContext,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub message_slice_id: Option<usize>,
    #[serde(default)]
    pub streaming_options: CompletionOptions,
}

pub(crate) struct Orchestrator {
    registry: Arc<Registry>,
    config: Arc<Config>,
    env: EnvLookup,
}

impl Orchestrator {
    pub(crate) fn new(registry: Arc<Registry>, config: Arc<Config>) -> Orchestrator {
        Orchestrator {
            registry,
            config,
            env: credentials::process_env,
        }
    }

    #[cfg(test)]
    fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn system_prompt(&self, request: &ChatRequest) -> String {
        let mut options = PromptOptions::default();
        if let Some(cwd) = &self.config.cwd {
            options = options.with_cwd(cwd.as_str());
        }

        let prompt_id = request
            .prompt_id
            .as_deref()
            .or(self.config.prompt_id.as_deref());

        let prompt = PromptLibrary::build(prompt_id, &options);

        if !request.context_optimization || request.context_files.is_empty() {
            return prompt;
        }

        let manifest = if request.files.is_empty() {
            &request.context_files
        } else {
            &request.files
        };
        let paths: Vec<String> = manifest.keys().cloned().collect();

        tracing::debug!(
            files = paths.len(),
            context_files = request.context_files.len(),
            "adding project context"
        );

        prompts::with_context(&prompt, &paths, &request.context_files)
    }

    /// Run `request` up to the start of the completion.
    ///
    /// Every failure to pick a model is reported before the provider is
    /// asked for a completion.
    pub(crate) async fn stream_text(&self, request: ChatRequest) -> Result<StreamResult, Error> {
        let default_provider = self.registry.default_provider();

        let mut system = self.system_prompt(&request);

        let ChatRequest {
            messages,
            model,
            provider,
            credentials,
            provider_settings,
            summary,
            message_slice_id,
            streaming_options,
            ..
        } = request;

        let defaults = Defaults {
            model: model.as_deref().unwrap_or(&self.config.default_model),
            provider: provider
                .as_deref()
                .unwrap_or(default_provider.descriptor().name),
        };

        let normalized = preprocess::normalize(messages, defaults);

        let provider = self
            .registry
            .get(&normalized.provider)
            .ok_or_else(|| Error::ProviderNotFound(normalized.provider.clone()))?
            .clone();

        let credentials = CredentialSet {
            api_keys: credentials,
            settings: provider_settings,
        };

        let resolved = ModelResolver::new(&self.registry, &self.config)
            .with_env(self.env)
            .resolve(&provider, &normalized.model, &credentials)
            .await?;

        let mut messages = normalized.messages;

        if let Some(summary) = summary.as_deref().filter(|s| !s.trim().is_empty()) {
            system = prompts::with_summary(&system, summary);
            messages = preprocess::truncate_for_summary(messages, message_slice_id);
        }

        dispatch::dispatch(
            &resolved.handle,
            &system,
            &messages,
            resolved.max_tokens,
            &streaming_options,
        )
        .await
        .map_err(Error::ProviderTransport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;
    use crate::dispatch::{UsageSource, RATE_LIMIT_NOTICE};
    use crate::providers::testing::{RecordedRequest, ScriptedProvider};
    use crate::providers::ErrorKind;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    fn env(name: &str) -> Option<String> {
        match name {
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            _ => None,
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    struct Fixture {
        orchestrator: Orchestrator,
        openai: Arc<Mutex<Vec<RecordedRequest>>>,
        ollama: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    fn fixture_with(openai: ScriptedProvider, ollama: ScriptedProvider, config: Config) -> Fixture {
        let openai_requests = openai.requests();
        let ollama_requests = ollama.requests();

        let registry = Registry::builder(config.default_provider)
            .register(Box::new(openai))
            .and_then(|b| b.register(Box::new(ollama)))
            .and_then(|b| b.build())
            .unwrap();

        Fixture {
            orchestrator: Orchestrator::new(Arc::new(registry), Arc::new(config)).with_env(env),
            openai: openai_requests,
            ollama: ollama_requests,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            ScriptedProvider::openai().with_stream(&["Hi", "!"]).with_usage(20, 2),
            ScriptedProvider::ollama()
                .with_dynamic(&["llama3", "qwen2"])
                .with_stream(&["local"]),
            Config::default(),
        )
    }

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                Message::new(role, format!("message {}", i))
            })
            .collect()
    }

    async fn text(tokens: dispatch::TokenStream) -> String {
        tokens
            .map(|c| c.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn test_request_from_json() {
        let fixture = fixture();

        let request: ChatRequest = serde_json::from_str(
            r#"{
                "messages": [{"role": "user", "content": "Hello"}],
                "credentials": {"OpenAI": "sk-request"},
                "promptId": "concise",
                "streamingOptions": {"temperature": 0.2}
            }"#,
        )
        .unwrap();

        let result = fixture.orchestrator.stream_text(request).await.unwrap();

        assert_eq!(result.model.name, "gpt-4o-mini");
        assert_eq!(text(result.tokens).await, "Hi!");

        let recorded = fixture.openai.lock().unwrap();
        assert_eq!(recorded[0].model, "gpt-4o-mini");
        assert_eq!(recorded[0].max_tokens, 16384);
        assert_eq!(recorded[0].access.api_key.as_deref(), Some("sk-request"));
        assert_eq!(
            recorded[0].system,
            PromptLibrary::build(Some("concise"), &PromptOptions::default())
        );
    }

    #[tokio::test]
    async fn test_usage_resolves_after_stream() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await.unwrap();
        let usage = result.usage;
        let _ = result.tokens.collect::<Vec<_>>().await;

        let usage = usage.resolve().await;
        assert_eq!(usage.total_tokens, 22);
        assert_eq!(usage.source, UsageSource::Reported);
    }

    #[tokio::test]
    async fn test_directives_switch_provider() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: vec![Message::user("[Model: qwen2]\n\n[Provider: Ollama]\n\nHello")],
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await.unwrap();

        assert_eq!(text(result.tokens).await, "local");
        assert!(fixture.openai.lock().unwrap().is_empty());

        let recorded = fixture.ollama.lock().unwrap();
        assert_eq!(recorded[0].model, "qwen2");
        assert_eq!(recorded[0].messages[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: vec![Message::user("[Provider: Anthropic]\nHello")],
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await;

        assert!(matches!(result, Err(Error::ProviderNotFound(name)) if name == "Anthropic"));
    }

    #[tokio::test]
    async fn test_no_models_means_no_completion() {
        let fixture = fixture_with(
            ScriptedProvider::openai(),
            ScriptedProvider::ollama().with_stream(&["never"]),
            Config::default(),
        );

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            provider: Some("ollama".to_string()),
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await;

        assert!(matches!(
            result,
            Err(Error::NoModelsAvailable {
                provider: ProviderIdentifier::Ollama
            })
        ));
        assert!(fixture.ollama.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let fixture = fixture();
        let orchestrator = fixture.orchestrator.with_env(no_env);

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            ..Default::default()
        };

        let result = orchestrator.stream_text(request).await;

        assert!(matches!(result, Err(Error::MissingCredentials { .. })));
        assert!(fixture.openai.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_falls_back() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            model: Some("gpt-2".to_string()),
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await.unwrap();

        assert_eq!(result.model.name, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_summary_with_slice() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: conversation(5),
            summary: Some("We discussed the parser.".to_string()),
            message_slice_id: Some(3),
            ..Default::default()
        };

        fixture.orchestrator.stream_text(request).await.unwrap();

        let recorded = fixture.openai.lock().unwrap();
        let contents: Vec<_> = recorded[0].messages.iter().map(|m| m.content.as_str()).collect();

        assert_eq!(contents, vec!["message 3", "message 4"]);
        assert!(recorded[0].system.contains("We discussed the parser."));
    }

    #[tokio::test]
    async fn test_summary_without_slice() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: conversation(5),
            summary: Some("We discussed the parser.".to_string()),
            ..Default::default()
        };

        fixture.orchestrator.stream_text(request).await.unwrap();

        let recorded = fixture.openai.lock().unwrap();

        assert_eq!(recorded[0].messages.len(), 1);
        assert_eq!(recorded[0].messages[0].content, "message 4");
    }

    #[tokio::test]
    async fn test_history_kept_without_summary() {
        let fixture = fixture();

        let request = ChatRequest {
            messages: conversation(5),
            message_slice_id: Some(3),
            ..Default::default()
        };

        fixture.orchestrator.stream_text(request).await.unwrap();

        assert_eq!(fixture.openai.lock().unwrap()[0].messages.len(), 5);
    }

    #[tokio::test]
    async fn test_context_only_when_optimizing() {
        let mut context_files = FileContext::new();
        context_files.insert("src/lib.rs".to_string(), "pub fn f() {}".to_string());

        let mut files = context_files.clone();
        files.insert("Cargo.toml".to_string(), "[package]".to_string());

        let base = PromptLibrary::build(None, &PromptOptions::default());

        let fixture = fixture();

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            files: files.clone(),
            context_files: context_files.clone(),
            ..Default::default()
        };
        fixture.orchestrator.stream_text(request).await.unwrap();

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            files,
            context_files,
            context_optimization: true,
            ..Default::default()
        };
        fixture.orchestrator.stream_text(request).await.unwrap();

        let recorded = fixture.openai.lock().unwrap();

        assert_eq!(recorded[0].system, base);
        assert!(recorded[1].system.starts_with(&base));
        assert!(recorded[1].system.contains("- Cargo.toml"));
        assert!(recorded[1].system.contains("File: src/lib.rs"));
        assert!(!recorded[1].system.contains("File: Cargo.toml"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_an_error() {
        let fixture = fixture_with(
            ScriptedProvider::openai().failing_stream(ErrorKind::ExcessUsage, "429"),
            ScriptedProvider::ollama(),
            Config::default(),
        );

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await.unwrap();
        let usage = result.usage;

        assert_eq!(text(result.tokens).await, RATE_LIMIT_NOTICE);
        assert_eq!(usage.resolve().await.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let fixture = fixture_with(
            ScriptedProvider::openai().failing_stream(ErrorKind::Authentication, "bad key"),
            ScriptedProvider::ollama(),
            Config::default(),
        );

        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            ..Default::default()
        };

        let result = fixture.orchestrator.stream_text(request).await;

        assert!(matches!(
            result,
            Err(Error::ProviderTransport(err)) if err.kind() == ErrorKind::Authentication
        ));
    }
}
