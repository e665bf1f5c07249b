//! Traits and type definitions for chat model completions and provider interactions.
//!
//! The interface for all backends is the [`ChatProvider`] trait. A provider is
//! one member of the closed set named by [`ProviderIdentifier`]; it describes
//! itself through a [`ProviderDescriptor`] (static models, credential variables)
//! and supports two network operations:
//! - Model listing: fetch the models the backend currently serves, in addition
//!   to the statically declared ones.
//! - Completion: take a system prompt and a list of messages and stream back a
//!   model-generated message.
//!
//! Both operations receive a [`ProviderAccess`], the credentials and base URL
//! resolved for the request. Providers never read the environment themselves.
//!
//! ## Error Handling
//!
//! Each API has its own bespoke error system. Providers keep their own error
//! types and convert them into [`Error`], whose [`ErrorKind`] gives the
//! category of the failure. The orchestration layer only ever looks at the
//! kind (and, for rate limiting, the message).

mod apireq;
mod ollama;
mod openai;

pub(crate) mod providers;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::Deserialize;
use std::error::Error as StdError;
use std::fmt;

pub(crate) use self::providers::{ProviderDescriptor, ProviderIdentifier};
use crate::chat::Message;

/// This is a list specifying general categories of errors that
/// can be returned by a [`ChatProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// Failed to connect to the underlying API service.
    Connection,
    /// A request timed out.
    TimedOut,
    /// An API key was not accepted or service-specific
    /// permissions are needed.
    Authentication,
    /// A rate limit was reached or a quota was exceeded.
    ExcessUsage,
    /// The servers are overloaded.
    ApiOverloaded,
    /// The requested resource was not found. This likely means that
    /// the model requested by the user was not found.
    NotFound,
    /// The request was malformed or is otherwise improper.
    BadRequest,
    /// The server encountered an error.
    InternalError,
    /// An API response was unable to be deserialized, malformed,
    /// or otherwise violated the assumptions of the client.
    UnexpectedResponse,
    /// The number of tokens in the request exceeds the maximum limit
    /// imposed on the model.
    ContextExceeded,
    /// An error that does not fit into any of the other categories.
    UnspecifiedError,
}

#[derive(Debug)]
pub(crate) struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    #[cfg(test)]
    pub(crate) fn from_kind(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub(crate) fn from_source(kind: ErrorKind, source: Box<dyn StdError + Send + Sync>) -> Error {
        Error {
            kind,
            source: Some(source),
        }
    }

    pub(crate) fn with_message<S: Into<String>>(kind: ErrorKind, message: S) -> Error {
        let message: String = message.into();

        Error::from_source(kind, message.into())
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether the backend refused the request because of rate limiting,
    /// either through the error category or through the wording of the
    /// message some gateways use with a generic status.
    pub(crate) fn is_rate_limited(&self) -> bool {
        if matches!(self.kind, ErrorKind::ExcessUsage) {
            return true;
        }

        let mut cause: Option<&(dyn StdError + 'static)> = self.source();

        while let Some(err) = cause {
            let text = err.to_string().to_lowercase();

            if text.contains("rate limit") || text.contains("too many requests") {
                return true;
            }

            cause = err.source();
        }

        false
    }

    fn message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Connection => "failed to connect to the API service",
            ErrorKind::TimedOut => "request timed out",
            ErrorKind::Authentication => "authentication failed or not provided",
            ErrorKind::ExcessUsage => "rate limit exceeded or quota crossed",
            ErrorKind::ApiOverloaded => "API server(s) are currently overloaded",
            ErrorKind::NotFound => "the requested resource was not found",
            ErrorKind::BadRequest => "the request was bad or malformed",
            ErrorKind::InternalError => "the server encountered an internal error",
            ErrorKind::UnexpectedResponse => "API response was unexpected or malformed",
            ErrorKind::UnspecifiedError => "an unspecified error occurred",
            ErrorKind::ContextExceeded => "the model context was exceeded",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| &**e as _)
    }
}

/// The reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishReason {
    /// The model generated a stop token.
    Stop,
    /// An API content filter was triggered.
    ContentFilter,
    /// The requested message length was reached.
    Length,
}

/// A "chunk" of a streamed message. Usually a single token.
#[derive(Debug, Clone)]
pub(crate) struct MessageDelta {
    pub content: String,
}

/// Token counts as reported by the backend. Either count may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Usage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
}

impl Usage {
    /// True when the backend sent nothing useful: both counts are missing or zero.
    pub(crate) fn is_empty(&self) -> bool {
        self.prompt_tokens.unwrap_or(0) == 0 && self.completion_tokens.unwrap_or(0) == 0
    }
}

/// How far the usage figures a provider reports can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UsageReporting {
    Reliable,
    /// The backend is known to send zero counts in some situations, in which
    /// case the usage has to be estimated.
    Unreliable,
}

/// A streamed response from a completion.
#[async_trait]
pub(crate) trait AsyncMessageIterator: Send {
    /// The next chunk of the message.
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>>;

    /// The reason the model stopped generating, once the iterator is exhausted.
    fn finish_reason(&self) -> Option<FinishReason>;

    /// The usage for this request, once the iterator is exhausted.
    fn usage(&self) -> Option<&Usage>;
}

/// Metadata for a model served by a provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub(crate) struct Model {
    /// The name of the model. This is what is sent to the backend.
    pub name: String,
    /// A human readable label.
    pub label: String,
    /// The provider serving this model.
    pub provider: ProviderIdentifier,
    /// The maximum number of output tokens, if known.
    pub max_token_allowed: Option<u32>,
}

impl Model {
    pub(crate) fn new(provider: ProviderIdentifier, name: &str, label: &str, max: Option<u32>) -> Model {
        Model {
            name: name.to_string(),
            label: label.to_string(),
            provider,
            max_token_allowed: max,
        }
    }
}

/// The credentials and endpoint a provider should use for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProviderAccess {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

/// Tunables forwarded to the backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompletionOptions {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, alias = "top_p")]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

/// Everything a provider needs to start a completion.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompletionRequest<'r> {
    pub model: &'r str,
    pub system: &'r str,
    pub messages: &'r [Message],
    pub max_tokens: u32,
    pub options: &'r CompletionOptions,
}

/// A trait implemented by all chat providers.
#[async_trait]
pub(crate) trait ChatProvider: Send + Sync {
    /// Returns the provider identifier.
    fn id(&self) -> ProviderIdentifier;

    /// Returns the static description of the provider.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Whether the usage reported by this provider can be trusted.
    fn usage_reporting(&self) -> UsageReporting {
        UsageReporting::Reliable
    }

    /// Fetches the models the backend currently serves. Providers without a
    /// listing endpoint return an empty list.
    async fn fetch_models(&self, access: &ProviderAccess) -> Result<Vec<Model>, Error>;

    /// Takes a system prompt and a series of messages that are part of a chat
    /// conversation and streams a new message generated by the model in response.
    async fn stream_completion(
        &self,
        access: &ProviderAccess,
        request: CompletionRequest<'_>,
    ) -> Result<Box<dyn AsyncMessageIterator>, Error>;
}

/// Construct every provider of the closed set.
pub(crate) fn all_providers() -> Vec<Box<dyn ChatProvider>> {
    vec![
        Box::new(openai::OpenAIProvider::new()),
        Box::new(ollama::OllamaProvider::new()),
    ]
}
