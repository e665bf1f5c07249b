//! Streaming completions.
//!
//! [`dispatch`] starts a completion on a resolved model and hands back a
//! [`StreamResult`]: the text as a [`TokenStream`] and the usage as a
//! [`UsageReport`] which resolves once the completion is over. A background
//! task drives the provider's response into a bounded channel, so a slow
//! consumer slows down the reads from the backend.
//!
//! Rate limiting is not an error here. A rate limited completion, whether it
//! is refused outright or cut off half way, yields one notice chunk and
//! reports zero usage. Every other failure to start is returned to the caller;
//! failures mid-stream arrive as an `Err` item and end the stream.

mod stream;
mod usage;

pub(crate) use stream::{TokenItem, TokenStream};
pub(crate) use usage::{TokenUsage, UsageReport, UsageSource};

use tokio::sync::{mpsc, oneshot};

use crate::chat::Message;
use crate::providers::{
    AsyncMessageIterator, CompletionOptions, Error, Model, Usage, UsageReporting,
};
use crate::registry::resolver::ModelHandle;

/// Shown in place of the completion when the backend is rate limiting.
pub(crate) const RATE_LIMIT_NOTICE: &str =
    "The provider is rate limiting requests at the moment. Please wait a little and try again.";

const CHANNEL_CAPACITY: usize = 32;

pub(crate) struct StreamResult {
    pub tokens: TokenStream,
    pub usage: UsageReport,
    /// The model the completion ran against.
    pub model: Model,
}

impl StreamResult {
    fn rate_limited(model: Model) -> StreamResult {
        StreamResult {
            tokens: TokenStream::once(RATE_LIMIT_NOTICE.to_string()),
            usage: UsageReport::ready(TokenUsage::unavailable()),
            model,
        }
    }
}

async fn drive(
    mut response: Box<dyn AsyncMessageIterator>,
    tokens: mpsc::Sender<TokenItem>,
    usage: oneshot::Sender<TokenUsage>,
    reporting: UsageReporting,
    prompt_estimate: usize,
) {
    loop {
        match response.next().await {
            Some(Ok(delta)) => {
                if tokens.send(Ok(delta.content)).await.is_err() {
                    tracing::debug!("token stream dropped, abandoning the completion");
                    return;
                }
            }
            Some(Err(err)) if err.is_rate_limited() => {
                tracing::warn!(error = %err, "rate limited during the completion");

                let _ = tokens.send(Ok(RATE_LIMIT_NOTICE.to_string())).await;
                let _ = usage.send(TokenUsage::unavailable());
                return;
            }
            Some(Err(err)) => {
                tracing::debug!(kind = ?err.kind(), error = %err, "completion failed mid-stream");

                let _ = tokens.send(Err(err)).await;
                let _ = usage.send(TokenUsage::unavailable());
                return;
            }
            None => break,
        }
    }

    tracing::debug!(finish_reason = ?response.finish_reason(), "completion finished");

    let reported = response.usage();

    if reported.map_or(true, Usage::is_empty) {
        tracing::debug!(?reporting, "backend sent no token counts");
    }

    let _ = usage.send(usage::account(reported, reporting, prompt_estimate));
}

/// Start a completion of `messages` on `handle`.
pub(crate) async fn dispatch(
    handle: &ModelHandle,
    system: &str,
    messages: &[Message],
    max_tokens: u32,
    options: &CompletionOptions,
) -> Result<StreamResult, Error> {
    let model = handle.model().clone();

    tracing::debug!(
        provider = %handle.provider_id(),
        model = %model.name,
        max_tokens,
        messages = messages.len(),
        "dispatching completion"
    );

    let response = match handle.stream(system, messages, max_tokens, options).await {
        Ok(response) => response,
        Err(err) if err.is_rate_limited() => {
            tracing::warn!(provider = %handle.provider_id(), error = %err, "rate limited");

            return Ok(StreamResult::rate_limited(model));
        }
        Err(err) => {
            tracing::debug!(provider = %handle.provider_id(), kind = ?err.kind(), "completion failed to start");

            return Err(err);
        }
    };

    let reporting = handle.usage_reporting();
    let prompt_estimate = match reporting {
        UsageReporting::Reliable => 0,
        UsageReporting::Unreliable => usage::estimate_prompt_tokens(system, messages),
    };

    let (token_tx, tokens) = TokenStream::channel(CHANNEL_CAPACITY);
    let (usage_tx, usage) = UsageReport::channel();

    tokio::spawn(drive(response, token_tx, usage_tx, reporting, prompt_estimate));

    Ok(StreamResult {
        tokens,
        usage,
        model,
    })
}
