//! A provider which replays a scripted response, for exercising the layers
//! above the backends without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    AsyncMessageIterator, ChatProvider, CompletionRequest, Error, ErrorKind, FinishReason,
    MessageDelta, Model, ProviderAccess, ProviderDescriptor, ProviderIdentifier, Usage,
    UsageReporting,
};
use crate::chat::Message;

#[derive(Debug, Clone)]
enum Step {
    Delta(String),
    Fail(ErrorKind, String),
}

/// What a provider was asked to complete.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub access: ProviderAccess,
}

pub(crate) struct ScriptedProvider {
    id: ProviderIdentifier,
    descriptor: ProviderDescriptor,
    reporting: UsageReporting,
    dynamic: Vec<Model>,
    fail_fetch: bool,
    start_error: Option<(ErrorKind, String)>,
    steps: Vec<Step>,
    usage: Option<Usage>,
    fetches: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedProvider {
    fn new(id: ProviderIdentifier, descriptor: ProviderDescriptor) -> ScriptedProvider {
        ScriptedProvider {
            id,
            descriptor,
            reporting: UsageReporting::Reliable,
            dynamic: Vec::new(),
            fail_fetch: false,
            start_error: None,
            steps: Vec::new(),
            usage: None,
            fetches: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Keyed provider with two static models.
    pub(crate) fn openai() -> ScriptedProvider {
        let id = ProviderIdentifier::OpenAI;

        Self::new(
            id,
            ProviderDescriptor {
                name: "OpenAI",
                api_key_env_var: Some("OPENAI_API_KEY"),
                base_url_env_var: Some("OPENAI_API_BASE_URL"),
                default_api_base: "https://api.openai.com",
                static_models: vec![
                    Model::new(id, "gpt-4o-mini", "GPT-4o Mini", Some(16384)),
                    Model::new(id, "gpt-4o", "GPT-4o", None),
                ],
                dynamic_models: true,
                icon: None,
            },
        )
    }

    /// Keyless provider with only dynamic models and unreliable usage.
    pub(crate) fn ollama() -> ScriptedProvider {
        let mut provider = Self::new(
            ProviderIdentifier::Ollama,
            ProviderDescriptor {
                name: "Ollama",
                api_key_env_var: None,
                base_url_env_var: Some("OLLAMA_API_BASE_URL"),
                default_api_base: "http://localhost:11434",
                static_models: Vec::new(),
                dynamic_models: true,
                icon: None,
            },
        );

        provider.reporting = UsageReporting::Unreliable;
        provider
    }

    pub(crate) fn without_static_models(mut self) -> Self {
        self.descriptor.static_models.clear();
        self
    }

    pub(crate) fn with_dynamic(mut self, names: &[&str]) -> Self {
        self.dynamic = names
            .iter()
            .map(|name| Model::new(self.id, name, name, None))
            .collect();
        self
    }

    pub(crate) fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub(crate) fn with_stream(mut self, chunks: &[&str]) -> Self {
        self.steps
            .extend(chunks.iter().map(|c| Step::Delta(c.to_string())));
        self
    }

    pub(crate) fn with_usage(mut self, prompt: usize, completion: usize) -> Self {
        self.usage = Some(Usage {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
        });
        self
    }

    /// The completion call itself fails.
    pub(crate) fn failing_stream(mut self, kind: ErrorKind, message: &str) -> Self {
        self.start_error = Some((kind, message.to_string()));
        self
    }

    /// The stream fails after the chunks scripted so far.
    pub(crate) fn failing_midway(mut self, kind: ErrorKind, message: &str) -> Self {
        self.steps.push(Step::Fail(kind, message.to_string()));
        self
    }

    pub(crate) fn fetch_counter(&self) -> Arc<AtomicUsize> {
        self.fetches.clone()
    }

    pub(crate) fn requests(&self) -> Arc<Mutex<Vec<RecordedRequest>>> {
        self.requests.clone()
    }
}

struct ScriptedResponse {
    steps: VecDeque<Step>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
}

#[async_trait]
impl AsyncMessageIterator for ScriptedResponse {
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>> {
        match self.steps.pop_front() {
            Some(Step::Delta(content)) => Some(Ok(MessageDelta { content })),
            Some(Step::Fail(kind, message)) => {
                self.steps.clear();
                self.usage = None;
                Some(Err(Error::with_message(kind, message)))
            }
            None => {
                self.finish_reason.get_or_insert(FinishReason::Stop);
                None
            }
        }
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn usage(&self) -> Option<&Usage> {
        match self.finish_reason {
            Some(_) => self.usage.as_ref(),
            None => None,
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> ProviderIdentifier {
        self.id
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn usage_reporting(&self) -> UsageReporting {
        self.reporting
    }

    async fn fetch_models(&self, _access: &ProviderAccess) -> Result<Vec<Model>, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.fail_fetch {
            return Err(Error::with_message(
                ErrorKind::Connection,
                "connection refused",
            ));
        }

        Ok(self.dynamic.clone())
    }

    async fn stream_completion(
        &self,
        access: &ProviderAccess,
        request: CompletionRequest<'_>,
    ) -> Result<Box<dyn AsyncMessageIterator>, Error> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: request.model.to_string(),
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            max_tokens: request.max_tokens,
            access: access.clone(),
        });

        if let Some((kind, message)) = &self.start_error {
            return Err(Error::with_message(*kind, message.clone()));
        }

        Ok(Box::new(ScriptedResponse {
            steps: self.steps.iter().cloned().collect(),
            usage: self.usage.clone(),
            finish_reason: None,
        }))
    }
}
