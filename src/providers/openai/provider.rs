use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::api;
use super::models::{is_listable, OPENAI_MODELS};
use crate::chat::Message;
use crate::providers::{
    AsyncMessageIterator, ChatProvider, CompletionRequest, Error, ErrorKind, FinishReason,
    MessageDelta, Model, ProviderAccess, ProviderDescriptor, ProviderIdentifier, Usage,
};

fn status_kind(status: StatusCode, payload: &api::ApiErrorPayload) -> ErrorKind {
    match status.as_u16() {
        400 if payload.code.as_deref() == Some("context_length_exceeded") => {
            ErrorKind::ContextExceeded
        }
        401 | 403 => ErrorKind::Authentication,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::ExcessUsage,
        500 => ErrorKind::InternalError,
        503 => ErrorKind::ApiOverloaded,
        400..=499 => ErrorKind::BadRequest,
        500..=599 => ErrorKind::InternalError,
        _ => ErrorKind::UnspecifiedError,
    }
}

impl From<api::Error> for Error {
    fn from(value: api::Error) -> Self {
        let kind = match &value {
            api::Error::InvalidApiBase(_) | api::Error::InvalidEndpoint(_) => ErrorKind::BadRequest,
            api::Error::Status { status, payload } => status_kind(*status, payload),
            api::Error::Streamed(payload) => match payload.code.as_deref() {
                Some("rate_limit_exceeded") => ErrorKind::ExcessUsage,
                _ => ErrorKind::UnspecifiedError,
            },
            api::Error::RequestFailed(_) | api::Error::StreamParser(_) => {
                ErrorKind::UnspecifiedError
            }
        };

        match value {
            api::Error::RequestFailed(err) => err.into(),
            api::Error::StreamParser(err) => err.into(),
            value => Error::from_source(kind, Box::new(value)),
        }
    }
}

impl From<api::FinishReason> for FinishReason {
    fn from(value: api::FinishReason) -> Self {
        match value {
            api::FinishReason::Stop | api::FinishReason::ToolCalls => FinishReason::Stop,
            api::FinishReason::ContentFilter => FinishReason::ContentFilter,
            api::FinishReason::Length => FinishReason::Length,
        }
    }
}

pub(crate) struct OpenAIProvider {
    descriptor: ProviderDescriptor,
    client: Client,
}

impl OpenAIProvider {
    pub(crate) fn new() -> OpenAIProvider {
        OpenAIProvider {
            descriptor: ProviderDescriptor {
                name: "OpenAI",
                api_key_env_var: Some("OPENAI_API_KEY"),
                base_url_env_var: Some("OPENAI_API_BASE_URL"),
                default_api_base: api::DEFAULT_API_BASE,
                static_models: OPENAI_MODELS.clone(),
                dynamic_models: true,
                icon: Some("i-ph:open-ai-logo"),
            },
            client: Client::new(),
        }
    }

    fn api(&self, access: &ProviderAccess) -> Result<api::OpenAIApi, Error> {
        let api_key = access.api_key.as_deref().ok_or_else(|| {
            Error::with_message(ErrorKind::Authentication, "no OpenAI API key was resolved")
        })?;

        let api_base = access
            .api_base
            .as_deref()
            .unwrap_or(self.descriptor.default_api_base);

        Ok(api::OpenAIApi::new(self.client.clone(), api_key, api_base)?)
    }
}

pub(crate) struct OpenAICompletionResponse {
    inner: api::StreamingChatResponse,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

#[async_trait]
impl AsyncMessageIterator for OpenAICompletionResponse {
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>> {
        loop {
            let chunk = match self.inner.next().await? {
                Ok(chunk) => chunk,
                Err(err) => return Some(Err(err.into())),
            };

            // The final chunk carries usage and no choices
            if let Some(usage) = chunk.usage {
                self.usage = Some(Usage {
                    prompt_tokens: Some(usage.prompt_tokens),
                    completion_tokens: Some(usage.completion_tokens),
                });
            }

            let mut content = String::new();

            for choice in chunk.choices {
                if let Some(reason) = choice.finish_reason {
                    self.finish_reason = Some(reason.into());
                }

                if let Some(text) = choice.delta.content {
                    content.push_str(&text);
                }
            }

            if !content.is_empty() {
                return Some(Ok(MessageDelta { content }));
            }
        }
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }
}

fn wire_messages<'m>(system: &'m str, messages: &'m [Message]) -> Vec<api::ChatMessage<'m>> {
    let system = api::ChatMessage {
        role: "system",
        content: system,
    };

    std::iter::once(system)
        .chain(messages.iter().map(|m| api::ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }))
        .collect()
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn id(&self) -> ProviderIdentifier {
        ProviderIdentifier::OpenAI
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn fetch_models(&self, access: &ProviderAccess) -> Result<Vec<Model>, Error> {
        let entries = self.api(access)?.models().await?;

        let models = entries
            .into_iter()
            .filter(|entry| is_listable(&entry.id))
            .map(|entry| Model::new(ProviderIdentifier::OpenAI, &entry.id, &entry.id, None))
            .collect();

        Ok(models)
    }

    async fn stream_completion(
        &self,
        access: &ProviderAccess,
        request: CompletionRequest<'_>,
    ) -> Result<Box<dyn AsyncMessageIterator>, Error> {
        let messages = wire_messages(request.system, request.messages);

        let options = api::ChatCompletionOptions {
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            stop: request.options.stop.as_deref(),
            max_tokens: Some(request.max_tokens),
        };

        let inner = self
            .api(access)?
            .streaming_chat_completion(request.model, &messages, &options)
            .await?;

        Ok(Box::new(OpenAICompletionResponse {
            inner,
            finish_reason: None,
            usage: None,
        }))
    }
}
