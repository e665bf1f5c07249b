//! Normalization of the conversation before it is sent to a model.
//!
//! Assistant turns lose the reasoning traces a front end rendered for them,
//! and the latest user turn gives up any `[Model: ...]` or `[Provider: ...]`
//! directives it starts with. Those directives select the model for the
//! request.

use lazy_static::lazy_static;
use regex::Regex;

use crate::chat::{Message, Role};

lazy_static! {
    static ref THOUGHT_MARKUP: Regex =
        Regex::new(r#"(?s)<think>.*?</think>|<div class="__thought__">.*?</div>"#).unwrap();
    static ref DIRECTIVE: Regex =
        Regex::new(r"^[ \t]*\[(?i:(model|provider)):[ \t]*([^\]\r\n]+?)[ \t]*\][ \t]*(?:\r?\n)*")
            .unwrap();
}

/// The model and provider used when the conversation does not name any.
#[derive(Debug, Clone)]
pub(crate) struct Defaults<'d> {
    pub model: &'d str,
    pub provider: &'d str,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Normalized {
    pub messages: Vec<Message>,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Default, PartialEq)]
struct Directives {
    model: Option<String>,
    provider: Option<String>,
}

/// Remove the directives at the start of `content`.
fn take_directives(content: &str) -> (Directives, String) {
    let mut directives = Directives::default();
    let mut rest = content;

    while let Some(captures) = DIRECTIVE.captures(rest) {
        let value = captures[2].to_string();

        if captures[1].eq_ignore_ascii_case("model") {
            directives.model = Some(value);
        } else {
            directives.provider = Some(value);
        }

        rest = &rest[captures[0].len()..];
    }

    (directives, rest.to_string())
}

fn strip_thoughts(content: &str) -> String {
    THOUGHT_MARKUP.replace_all(content, "").into_owned()
}

pub(crate) fn normalize(mut messages: Vec<Message>, defaults: Defaults<'_>) -> Normalized {
    let latest_user = messages.iter().rposition(|m| m.role == Role::User);

    let mut overrides = Directives::default();

    for (i, message) in messages.iter_mut().enumerate() {
        match message.role {
            Role::User => {
                let (directives, content) = take_directives(&message.content);

                if Some(i) == latest_user {
                    overrides = directives;
                }

                message.content = content;
            }
            Role::Assistant => message.content = strip_thoughts(&message.content),
            Role::System | Role::Other(_) => {}
        }
    }

    if overrides.model.is_some() || overrides.provider.is_some() {
        tracing::debug!(
            model = overrides.model.as_deref(),
            provider = overrides.provider.as_deref(),
            "conversation overrides the model"
        );
    }

    Normalized {
        messages,
        model: overrides.model.unwrap_or_else(|| defaults.model.to_string()),
        provider: overrides
            .provider
            .unwrap_or_else(|| defaults.provider.to_string()),
    }
}

/// The part of the history that is still sent once a summary replaces the
/// earlier turns: everything from `slice_id` on, or only the final message.
/// A slice past the end keeps the final message.
pub(crate) fn truncate_for_summary(mut messages: Vec<Message>, slice_id: Option<usize>) -> Vec<Message> {
    let keep_from = match slice_id {
        Some(index) if index < messages.len() => index,
        _ => messages.len().saturating_sub(1),
    };

    messages.split_off(keep_from)
}
