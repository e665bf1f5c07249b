use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::providers::apireq::{
    self, endpoint, JsonStreamError, JsonStreamParser, ReqwestResponseStreamExt, Url,
};

#[derive(thiserror::Error, Debug)]
pub(super) enum Error {
    /// The API base is not a URL that can be used in a network request
    #[error("invalid api base: {0}")]
    InvalidApiBase(#[source] url::ParseError),

    /// Endpoint URL is invalid
    #[error("invalid endpoint")]
    InvalidEndpoint(
        #[from]
        #[source]
        url::ParseError,
    ),

    /// The parser failed to frame or decode the response stream
    #[error("failed to parse streamed response")]
    StreamParser(
        #[from]
        #[source]
        JsonStreamError,
    ),

    /// Some issue with the request
    #[error("{}", .0)]
    RequestFailed(
        #[from]
        #[source]
        apireq::ReqwestError,
    ),

    /// The API answered with a non-success status
    #[error("{} ({})", .payload.message, .status)]
    Status {
        status: StatusCode,
        payload: ApiErrorPayload,
    },

    /// An error object was sent in place of a chunk
    #[error("{}", .0.message)]
    Streamed(ApiErrorPayload),
}

/* Structures to serialize /v1/chat/completions */

#[derive(Serialize, Debug)]
pub(super) struct ChatMessage<'m> {
    pub role: &'m str,
    pub content: &'m str,
}

#[derive(Serialize, Debug, Default)]
pub(super) struct ChatCompletionOptions<'o> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<&'o [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Serialize, Debug)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'o> {
    model: &'o str,
    messages: &'o [ChatMessage<'o>],
    #[serde(flatten)]
    options: &'o ChatCompletionOptions<'o>,
    stream: bool,
    stream_options: StreamOptions,
}

/* Structures to deserialize /v1/chat/completions */

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub(super) enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
}

#[derive(Deserialize, Debug, Default)]
pub(super) struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub(super) struct Choice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Deserialize, Debug)]
pub(super) struct Usage {
    pub completion_tokens: usize,
    pub prompt_tokens: usize,
}

#[derive(Deserialize, Debug)]
pub(super) struct ChatCompletionChunk {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum StreamedChunk {
    Error(ApiErrorResponse),
    Chunk(ChatCompletionChunk),
}

/* Structures to deserialize /v1/models */

#[derive(Deserialize, Debug)]
pub(super) struct ModelEntry {
    pub id: String,
}

#[derive(Deserialize, Debug)]
struct ModelList {
    data: Vec<ModelEntry>,
}

/* API Errors */

#[derive(Deserialize, Debug)]
pub(super) struct ApiErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    error: ApiErrorPayload,
}

pub(super) struct StreamingChatResponse {
    stream: JsonStreamParser,
}

impl StreamingChatResponse {
    pub(super) async fn next(&mut self) -> Option<Result<ChatCompletionChunk, Error>> {
        let chunk = self.stream.parse::<StreamedChunk>().await?;

        Some(match chunk {
            Ok(StreamedChunk::Chunk(chunk)) => Ok(chunk),
            Ok(StreamedChunk::Error(err)) => Err(Error::Streamed(err.error)),
            Err(err) => Err(err.into()),
        })
    }
}

pub(super) const DEFAULT_API_BASE: &str = "https://api.openai.com";

pub(super) struct OpenAIApi {
    client: Client,
    api_base: Url,
    api_key: String,
}

impl OpenAIApi {
    pub(super) fn new(client: Client, api_key: &str, api_base: &str) -> Result<OpenAIApi, Error> {
        let api_base = Url::parse(api_base).map_err(Error::InvalidApiBase)?;

        Ok(OpenAIApi {
            client,
            api_base,
            api_key: api_key.to_string(),
        })
    }

    /// Turn a non-success response into an error. The body is expected to hold
    /// an OpenAI error object but proxies often answer with plain text.
    async fn check_status(res: Response) -> Result<Response, Error> {
        let status = res.status();

        if status.is_success() {
            return Ok(res);
        }

        let body = res.text().await?;

        let payload = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(err) => err.error,
            Err(_) => ApiErrorPayload {
                message: body,
                code: None,
            },
        };

        Err(Error::Status { status, payload })
    }

    pub(super) async fn models(&self) -> Result<Vec<ModelEntry>, Error> {
        let url = endpoint(&self.api_base, "/v1/models")?;

        let res = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::check_status(res).await?;

        let list: ModelList = res
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        Ok(list.data)
    }

    pub(super) async fn streaming_chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage<'_>],
        options: &ChatCompletionOptions<'_>,
    ) -> Result<StreamingChatResponse, Error> {
        let url = endpoint(&self.api_base, "/v1/chat/completions")?;

        let res = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&ChatCompletionRequest {
                model,
                messages,
                options,
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
            })
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::check_status(res).await?;

        Ok(StreamingChatResponse {
            stream: res.stream_sse(),
        })
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::RequestFailed(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::apireq::{chunked_body, StreamFormat};

    const COMPLETION: &str = concat!(
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":2,\"total_tokens\":11}}\n\n",
        "data: [DONE]\n\n",
    );

    #[tokio::test]
    async fn test_streamed_chunks() {
        let mut response = StreamingChatResponse {
            stream: JsonStreamParser::new(chunked_body(COMPLETION, 7), StreamFormat::Sse),
        };

        let mut text = String::new();
        let mut usage = None;
        let mut finished = false;

        while let Some(chunk) = response.next().await {
            let chunk = chunk.expect("chunk should parse");

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }

                finished |= matches!(choice.finish_reason, Some(FinishReason::Stop));
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        assert_eq!(text, "Hello");
        assert!(finished);

        let usage = usage.expect("usage should be reported");
        assert_eq!(usage.prompt_tokens, 9);
        assert_eq!(usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn test_streamed_error_object() {
        let body = "data: {\"error\":{\"message\":\"Rate limit reached\",\"code\":\"rate_limit_exceeded\"}}\n\n";

        let mut response = StreamingChatResponse {
            stream: JsonStreamParser::new(chunked_body(body, 16), StreamFormat::Sse),
        };

        let result = response.next().await.expect("an item");

        assert!(matches!(result, Err(Error::Streamed(payload)) if payload.message == "Rate limit reached"));
    }

    #[test]
    fn test_request_serialization() {
        let stop = vec!["END".to_string()];

        let options = ChatCompletionOptions {
            temperature: Some(0.2),
            stop: Some(&stop),
            max_tokens: Some(8000),
            ..Default::default()
        };

        let messages = [ChatMessage {
            role: "system",
            content: "Be brief",
        }];

        let body = serde_json::to_value(ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
            options: &options,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        })
        .unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 8000);
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("top_p").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
    }
}
