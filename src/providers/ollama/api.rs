use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::apireq::{
    self, endpoint, JsonStreamError, JsonStreamParser, ReqwestResponseStreamExt, Url,
};

pub(super) const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434";

#[derive(Debug, Error)]
pub(super) enum Error {
    #[error("invalid ollama api base: {0}")]
    InvalidApiBase(url::ParseError),

    #[error("invalid ollama endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("a request to ollama failed: {0}")]
    RequestFailed(#[from] apireq::ReqwestError),

    #[error("failed to query ollama resource: {0}")]
    NotFound(String),

    #[error("request to the ollama api failed: {0}")]
    BadRequest(String),

    #[error("ollama is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("ollama encountered an internal error: {0}")]
    InternalError(String),

    #[error("the ollama API returned an unspecified error: {0}")]
    UnspecifiedError(String),

    #[error("could not parse streamed response: {0}")]
    StreamParser(#[from] JsonStreamError),
}

/* Structures to serialize /api/chat */

#[derive(Serialize, Debug)]
pub(super) struct ChatMessage<'m> {
    pub role: &'m str,
    pub content: &'m str,
}

#[derive(Serialize, Debug, Default)]
pub(super) struct ModelOptions<'o> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<&'o [String]>,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'m> {
    model: &'m str,
    messages: &'m [ChatMessage<'m>],
    options: &'m ModelOptions<'m>,
    stream: bool,
}

/* Structures to deserialize /api/chat */

#[derive(Deserialize, Debug, Default)]
pub(super) struct MessageDelta {
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub(super) enum DoneReason {
    Stop,
    Length,
    Load,
    // Reasons added by newer servers, e.g. "unload"
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
pub(super) struct StreamingChatDelta {
    #[serde(default)]
    pub message: MessageDelta,
    // Absent when the prompt was served from the cache
    #[serde(default)]
    pub prompt_eval_count: Option<usize>,
    #[serde(default)]
    pub eval_count: Option<usize>,
    #[serde(default)]
    pub done_reason: Option<DoneReason>,
    pub done: bool,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum StreamChatChunk {
    Error(ApiError),
    Delta(StreamingChatDelta),
}

/* Structures to deserialize /api/tags */

#[derive(Debug, Deserialize)]
pub(super) struct Tag {
    pub name: String,
    #[serde(default)]
    pub details: Option<Details>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Details {
    #[serde(default)]
    pub parameter_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsList {
    models: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

pub(super) struct StreamingChatResponse {
    stream: JsonStreamParser,
}

impl StreamingChatResponse {
    pub(super) async fn next(&mut self) -> Option<Result<StreamingChatDelta, Error>> {
        let chunk = self.stream.parse::<StreamChatChunk>().await?;

        Some(match chunk {
            Ok(StreamChatChunk::Delta(delta)) => Ok(delta),
            Ok(StreamChatChunk::Error(err)) => Err(Error::UnspecifiedError(err.error)),
            Err(err) => Err(Error::StreamParser(err)),
        })
    }
}

pub(super) struct OllamaApi {
    client: Client,
    api_base: Url,
}

impl OllamaApi {
    pub(super) fn new(client: Client, api_base: &str) -> Result<OllamaApi, Error> {
        Ok(OllamaApi {
            client,
            api_base: Url::parse(api_base).map_err(Error::InvalidApiBase)?,
        })
    }

    async fn check_status(res: Response) -> Result<Response, Error> {
        let status = res.status();

        if status.is_success() {
            return Ok(res);
        }

        let body = res
            .text()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error)
            .unwrap_or(body);

        match status {
            StatusCode::NOT_FOUND => Err(Error::NotFound(message)),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited(message)),
            code => match code.as_u16() {
                400..=499 => Err(Error::BadRequest(message)),
                500..=599 => Err(Error::InternalError(message)),
                _ => Err(Error::UnspecifiedError(message)),
            },
        }
    }

    pub(super) async fn tags(&self) -> Result<Vec<Tag>, Error> {
        let url = endpoint(&self.api_base, "/api/tags")?;

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::check_status(res).await?;

        let tags: TagsList = res
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        Ok(tags.models)
    }

    pub(super) async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage<'_>],
        options: &ModelOptions<'_>,
    ) -> Result<StreamingChatResponse, Error> {
        let url = endpoint(&self.api_base, "/api/chat")?;

        let res = self
            .client
            .post(url)
            .json(&ChatRequest {
                model,
                messages,
                options,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::check_status(res).await?;

        Ok(StreamingChatResponse {
            stream: res.stream_ndjson(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::apireq::{chunked_body, StreamFormat};

    const CHAT: &str = concat!(
        "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
        "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\" there\"},\"done\":false}\n",
        "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"eval_count\":2}\n",
    );

    #[tokio::test]
    async fn test_chat_stream() {
        let mut response = StreamingChatResponse {
            stream: JsonStreamParser::new(chunked_body(CHAT, 5), StreamFormat::Ndjson),
        };

        let mut text = String::new();
        let mut last = None;

        while let Some(delta) = response.next().await {
            let delta = delta.expect("delta should parse");
            text.push_str(&delta.message.content);
            last = Some(delta);
        }

        let last = last.expect("at least one delta");

        assert_eq!(text, "Hi there");
        assert!(last.done);
        assert!(matches!(last.done_reason, Some(DoneReason::Stop)));
        // Cached prompt: no prompt_eval_count
        assert_eq!(last.prompt_eval_count, None);
        assert_eq!(last.eval_count, Some(2));
    }

    #[tokio::test]
    async fn test_unknown_done_reason() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},",
            "\"done\":true,\"done_reason\":\"unload\",\"eval_count\":4}\n",
        );

        let mut response = StreamingChatResponse {
            stream: JsonStreamParser::new(chunked_body(body, 7), StreamFormat::Ndjson),
        };

        let last = response
            .next()
            .await
            .expect("an item")
            .expect("delta should parse");

        assert!(matches!(last.done_reason, Some(DoneReason::Other)));
        assert_eq!(last.eval_count, Some(4));
    }

    #[tokio::test]
    async fn test_streamed_error() {
        let mut response = StreamingChatResponse {
            stream: JsonStreamParser::new(
                chunked_body("{\"error\":\"model 'nope' not found\"}\n", 8),
                StreamFormat::Ndjson,
            ),
        };

        let result = response.next().await.expect("an item");

        assert!(matches!(result, Err(Error::UnspecifiedError(msg)) if msg.contains("nope")));
    }
}
