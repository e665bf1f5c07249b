use serde::Serialize;
use tokio::sync::oneshot;

use crate::chat::Message;
use crate::providers::{Usage, UsageReporting};

/// Completion tokens assumed when a backend does not count them.
pub(crate) const PLACEHOLDER_COMPLETION_TOKENS: usize = 100;

const CHARS_PER_TOKEN: usize = 4;

/// Where the figures of a [`TokenUsage`] come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UsageSource {
    /// Counted by the backend.
    Reported,
    /// Approximated from the request; not billed fact.
    Estimated,
    /// Nothing is known.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub source: UsageSource,
}

impl TokenUsage {
    pub(crate) fn new(prompt_tokens: usize, completion_tokens: usize, source: UsageSource) -> Self {
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            source,
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self::new(0, 0, UsageSource::Unavailable)
    }
}

/// Rough prompt size: a token per four characters of the system prompt and
/// the messages, rounded up.
pub(crate) fn estimate_prompt_tokens(system: &str, messages: &[Message]) -> usize {
    let chars = system.chars().count()
        + messages
            .iter()
            .map(|m| m.content.chars().count())
            .sum::<usize>();

    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Turn what the backend reported into the usage handed to the caller.
///
/// Backends with unreliable reporting have missing or zero counts replaced
/// by estimates: `prompt_estimate` for the prompt and a fixed placeholder for
/// the completion.
pub(crate) fn account(
    reported: Option<&Usage>,
    reporting: UsageReporting,
    prompt_estimate: usize,
) -> TokenUsage {
    let counted = |n: Option<usize>| n.filter(|&n| n > 0);

    match (reporting, reported) {
        (UsageReporting::Reliable, Some(usage)) => TokenUsage::new(
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            UsageSource::Reported,
        ),
        (UsageReporting::Reliable, None) => TokenUsage::unavailable(),
        (UsageReporting::Unreliable, usage) => {
            let prompt = usage.and_then(|u| counted(u.prompt_tokens));
            let completion = usage.and_then(|u| counted(u.completion_tokens));

            match (prompt, completion) {
                (Some(prompt), Some(completion)) => {
                    TokenUsage::new(prompt, completion, UsageSource::Reported)
                }
                (prompt, completion) => TokenUsage::new(
                    prompt.unwrap_or(prompt_estimate),
                    completion.unwrap_or(PLACEHOLDER_COMPLETION_TOKENS),
                    UsageSource::Estimated,
                ),
            }
        }
    }
}

/// The usage of a completion, available once the completion has finished.
pub(crate) struct UsageReport {
    rx: oneshot::Receiver<TokenUsage>,
}

impl UsageReport {
    pub(crate) fn channel() -> (oneshot::Sender<TokenUsage>, UsageReport) {
        let (tx, rx) = oneshot::channel();

        (tx, UsageReport { rx })
    }

    pub(crate) fn ready(usage: TokenUsage) -> UsageReport {
        let (tx, report) = Self::channel();

        // The receiver is alive, the send cannot fail
        let _ = tx.send(usage);

        report
    }

    /// Wait for the completion to finish. Never fails: a lost report resolves
    /// to zero counts marked unavailable.
    pub(crate) async fn resolve(self) -> TokenUsage {
        match self.rx.await {
            Ok(usage) => usage,
            Err(_) => {
                tracing::warn!("the usage report was lost before the completion finished");

                TokenUsage::unavailable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: Option<usize>, completion: Option<usize>) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn test_estimate_rounds_up() {
        let messages = vec![Message::user("abcde")];

        // 4 + 5 characters
        assert_eq!(estimate_prompt_tokens("abcd", &messages), 3);
        assert_eq!(estimate_prompt_tokens("", &[]), 0);
        // Characters, not bytes
        assert_eq!(estimate_prompt_tokens("ééééé", &[]), 2);
    }

    #[test]
    fn test_reliable_usage_is_taken_as_is() {
        let reported = usage(Some(0), Some(0));

        let result = account(Some(&reported), UsageReporting::Reliable, 50);

        assert_eq!(result, TokenUsage::new(0, 0, UsageSource::Reported));
        assert_eq!(
            account(None, UsageReporting::Reliable, 50),
            TokenUsage::unavailable()
        );
    }

    #[test]
    fn test_unreliable_zero_usage_is_estimated() {
        let reported = usage(Some(0), None);

        let result = account(Some(&reported), UsageReporting::Unreliable, 50);

        assert_eq!(result.prompt_tokens, 50);
        assert_eq!(result.completion_tokens, PLACEHOLDER_COMPLETION_TOKENS);
        assert_eq!(result.total_tokens, 150);
        assert_eq!(result.source, UsageSource::Estimated);
    }

    #[test]
    fn test_cached_prompt_keeps_completion_count() {
        let reported = usage(None, Some(12));

        let result = account(Some(&reported), UsageReporting::Unreliable, 50);

        assert_eq!(result, TokenUsage::new(50, 12, UsageSource::Estimated));
    }

    #[test]
    fn test_unreliable_full_usage_is_reported() {
        let reported = usage(Some(30), Some(12));

        let result = account(Some(&reported), UsageReporting::Unreliable, 50);

        assert_eq!(result, TokenUsage::new(30, 12, UsageSource::Reported));
    }

    #[tokio::test]
    async fn test_lost_report_is_unavailable() {
        let (tx, report) = UsageReport::channel();
        drop(tx);

        assert_eq!(report.resolve().await, TokenUsage::unavailable());
    }
}
