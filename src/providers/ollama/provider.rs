use async_trait::async_trait;
use reqwest::Client;

use super::api;
use crate::providers::{
    AsyncMessageIterator, ChatProvider, CompletionRequest, Error, ErrorKind, FinishReason,
    MessageDelta, Model, ProviderAccess, ProviderDescriptor, ProviderIdentifier, Usage,
    UsageReporting,
};

// Ollama does not publish per-model output limits
const OLLAMA_MAX_TOKENS: u32 = 8000;

impl From<api::Error> for Error {
    fn from(value: api::Error) -> Self {
        let kind = match &value {
            api::Error::InternalError(_) => ErrorKind::InternalError,
            api::Error::InvalidApiBase(_) | api::Error::InvalidEndpoint(_) => {
                ErrorKind::Connection
            }
            api::Error::NotFound(_) => ErrorKind::NotFound,
            api::Error::BadRequest(_) => ErrorKind::BadRequest,
            api::Error::RateLimited(_) => ErrorKind::ExcessUsage,
            api::Error::UnspecifiedError(_)
            | api::Error::RequestFailed(_)
            | api::Error::StreamParser(_) => ErrorKind::UnspecifiedError,
        };

        match value {
            api::Error::RequestFailed(err) => err.into(),
            api::Error::StreamParser(err) => err.into(),
            value => Error::from_source(kind, Box::new(value)),
        }
    }
}

impl From<api::Tag> for Model {
    fn from(value: api::Tag) -> Self {
        let label = match value.details.and_then(|d| d.parameter_size) {
            Some(size) => format!("{} ({})", value.name, size),
            None => value.name.clone(),
        };

        Model {
            name: value.name,
            label,
            provider: ProviderIdentifier::Ollama,
            max_token_allowed: Some(OLLAMA_MAX_TOKENS),
        }
    }
}

pub(crate) struct OllamaProvider {
    descriptor: ProviderDescriptor,
    client: Client,
}

impl OllamaProvider {
    pub(crate) fn new() -> OllamaProvider {
        OllamaProvider {
            descriptor: ProviderDescriptor {
                name: "Ollama",
                api_key_env_var: None,
                base_url_env_var: Some("OLLAMA_API_BASE_URL"),
                default_api_base: api::OLLAMA_DEFAULT_ENDPOINT,
                static_models: Vec::new(),
                dynamic_models: true,
                icon: Some("i-ph:cpu"),
            },
            client: Client::new(),
        }
    }

    fn api(&self, access: &ProviderAccess) -> Result<api::OllamaApi, Error> {
        let api_base = access
            .api_base
            .as_deref()
            .unwrap_or(self.descriptor.default_api_base);

        Ok(api::OllamaApi::new(self.client.clone(), api_base)?)
    }
}

pub(crate) struct OllamaCompletionResponse {
    inner: api::StreamingChatResponse,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
}

#[async_trait]
impl AsyncMessageIterator for OllamaCompletionResponse {
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>> {
        loop {
            let delta = match self.inner.next().await? {
                Ok(delta) => delta,
                Err(err) => return Some(Err(err.into())),
            };

            if delta.done {
                self.finish_reason = Some(match delta.done_reason {
                    Some(api::DoneReason::Length) => FinishReason::Length,
                    _ => FinishReason::Stop,
                });

                // The "prompt eval count" disappears when the prompt is cached
                self.usage = Some(Usage {
                    prompt_tokens: delta.prompt_eval_count,
                    completion_tokens: delta.eval_count,
                });
            }

            if !delta.message.content.is_empty() {
                return Some(Ok(MessageDelta {
                    content: delta.message.content,
                }));
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

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn id(&self) -> ProviderIdentifier {
        ProviderIdentifier::Ollama
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn usage_reporting(&self) -> UsageReporting {
        UsageReporting::Unreliable
    }

    async fn fetch_models(&self, access: &ProviderAccess) -> Result<Vec<Model>, Error> {
        let tags = self.api(access)?.tags().await?;

        Ok(tags.into_iter().map(Model::from).collect())
    }

    async fn stream_completion(
        &self,
        access: &ProviderAccess,
        request: CompletionRequest<'_>,
    ) -> Result<Box<dyn AsyncMessageIterator>, Error> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        messages.push(api::ChatMessage {
            role: "system",
            content: request.system,
        });

        messages.extend(request.messages.iter().map(|m| api::ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let options = api::ModelOptions {
            num_predict: Some(request.max_tokens),
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            stop: request.options.stop.as_deref(),
        };

        let inner = self
            .api(access)?
            .chat(request.model, &messages, &options)
            .await?;

        Ok(Box::new(OllamaCompletionResponse {
            inner,
            usage: None,
            finish_reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Message;
    use crate::providers::CompletionOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response on a local port.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_status_mapping() {
        let err: Error = api::Error::RateLimited("slow down".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::ExcessUsage);
        assert!(err.is_rate_limited());

        let err: Error = api::Error::BadRequest("invalid options".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_too_many_requests_is_rate_limited() {
        let api_base = serve_once(concat!(
            "HTTP/1.1 429 Too Many Requests\r\n",
            "content-type: application/json\r\n",
            "content-length: 39\r\n",
            "connection: close\r\n",
            "\r\n",
            "{\"error\":\"quota exceeded, retry later\"}",
        ))
        .await;

        let access = ProviderAccess {
            api_key: None,
            api_base: Some(api_base),
        };
        let messages = vec![Message::user("hi")];
        let options = CompletionOptions::default();

        let result = OllamaProvider::new()
            .stream_completion(
                &access,
                CompletionRequest {
                    model: "llama3",
                    system: "",
                    messages: &messages,
                    max_tokens: 16,
                    options: &options,
                },
            )
            .await;

        let err = match result {
            Err(err) => err,
            Ok(_) => panic!("a 429 should not start a completion"),
        };

        assert_eq!(err.kind(), ErrorKind::ExcessUsage);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_tag_conversion() {
        let tag: api::Tag = serde_json::from_str(
            r#"{"name":"llama3:8b","model":"llama3:8b","details":{"parameter_size":"8.0B"}}"#,
        )
        .unwrap();

        let model = Model::from(tag);

        assert_eq!(model.name, "llama3:8b");
        assert_eq!(model.label, "llama3:8b (8.0B)");
        assert_eq!(model.provider, ProviderIdentifier::Ollama);
        assert_eq!(model.max_token_allowed, Some(OLLAMA_MAX_TOKENS));
    }

    #[test]
    fn test_descriptor_needs_no_key() {
        let provider = OllamaProvider::new();

        assert!(!provider.descriptor().requires_api_key());
        assert!(provider.descriptor().static_models.is_empty());
        assert_eq!(provider.usage_reporting(), UsageReporting::Unreliable);
    }
}
