use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;

use futures_util::StreamExt;
use tokio::{select, signal};

use crate::chat::Message;
use crate::color::{MaybePaint, ESTIMATE_TAG, MODEL_LABEL, USAGE_TEXT};
use crate::dispatch::{TokenUsage, UsageSource};
use crate::orchestrator::{ChatRequest, Orchestrator};
use crate::utils::errors::error_chain;
use crate::{die, warn, ChatArgs};

fn read_request(path: &Path) -> ChatRequest {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => die!("failed to read \"{}\": {}", path.display(), err),
    };

    match serde_json::from_str(&raw) {
        Ok(request) => request,
        Err(err) => die!("\"{}\" is not a valid request: {}", path.display(), err),
    }
}

/// The message given on the command line, or piped through standard input.
fn read_prompt(args: &ChatArgs) -> Option<String> {
    if let Some(prompt) = &args.prompt {
        return Some(prompt.clone());
    }

    if args.request.is_some() || io::stdin().is_terminal() {
        return None;
    }

    let mut buf = String::new();

    if let Err(err) = io::stdin().read_to_string(&mut buf) {
        die!("failed to read the prompt from standard input: {}", err);
    }

    Some(buf)
}

/// Command line flags take precedence over the request file.
fn apply_args(mut request: ChatRequest, args: &ChatArgs, prompt: Option<String>) -> ChatRequest {
    if let Some(prompt) = prompt {
        request.messages.push(Message::user(prompt));
    }

    if args.model.is_some() {
        request.model = args.model.clone();
    }

    if args.provider.is_some() {
        request.provider = args.provider.clone();
    }

    if args.prompt_id.is_some() {
        request.prompt_id = args.prompt_id.clone();
    }

    if args.summary.is_some() {
        request.summary = args.summary.clone();
    }

    request
}

fn format_usage(usage: &TokenUsage) -> String {
    let counts = format!(
        "{} prompt + {} completion = {} tokens",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );

    let tag = match usage.source {
        UsageSource::Reported => None,
        UsageSource::Estimated => Some("(estimated)"),
        UsageSource::Unavailable => Some("(unavailable)"),
    };

    match tag {
        Some(tag) => format!(
            "{} {}",
            USAGE_TEXT.maybe_paint(counts),
            ESTIMATE_TAG.maybe_paint(tag)
        ),
        None => USAGE_TEXT.maybe_paint(counts).to_string(),
    }
}

pub(crate) async fn chat_cmd(orchestrator: &Orchestrator, args: &ChatArgs) {
    let request = match &args.request {
        Some(path) => read_request(path),
        None => ChatRequest::default(),
    };

    let request = apply_args(request, args, read_prompt(args));

    if request.messages.is_empty() {
        die!("nothing to send, give a prompt or a request file");
    }

    let result = match orchestrator.stream_text(request).await {
        Ok(result) => result,
        Err(err) => die!("{}", error_chain(&err)),
    };

    if io::stderr().is_terminal() {
        eprintln!(
            "{} {}",
            MODEL_LABEL.maybe_paint(format!("{}:", result.model.provider)),
            result.model.label
        );
    }

    let mut tokens = result.tokens;
    let mut stdout = io::stdout();
    let mut at_line_start = true;
    let mut interrupted = false;

    loop {
        select! {
            chunk = tokens.next() => {
                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        if !at_line_start {
                            println!();
                        }

                        die!("the completion failed: {}", error_chain(&err));
                    }
                    None => break,
                };

                if chunk.is_empty() {
                    continue;
                }

                at_line_start = chunk.ends_with('\n');

                print!("{}", chunk);

                if let Err(err) = stdout.flush() {
                    die!("failed to write the reply: {}", err);
                }
            }
            _ = signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        }
    }

    if !at_line_start {
        println!();
    }

    if interrupted {
        warn!("interrupted, the reply is incomplete");
        return;
    }

    let usage = result.usage.resolve().await;

    eprintln!("{}", format_usage(&usage));
}
