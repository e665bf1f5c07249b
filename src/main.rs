mod chat;
mod cli;
mod color;
mod config;
mod dispatch;
mod orchestrator;
mod preprocess;
mod prompts;
mod providers;
mod registry;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use cli::{chat::chat_cmd, list::list_cmd, ColorMode};
use providers::ProviderIdentifier;
use tracing_subscriber::EnvFilter;

use crate::orchestrator::Orchestrator;

#[derive(
    Parser, Default, Clone, Copy, ValueEnum, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum RequestedColorMode {
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "relay")]
#[command(
    about = "Route chat requests to language model providers and stream the replies",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Read the configuration from this file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debugging information to standard error
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(long, global = true, default_value_t = RequestedColorMode::default())]
    color: RequestedColorMode,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat request and stream the reply
    Chat(ChatArgs),
    /// List providers, models or prompts
    List(ListArgs),
}

#[derive(Parser, Default)]
pub(crate) struct ChatArgs {
    /// The model to use unless the message names one
    #[arg(short, long)]
    model: Option<String>,
    /// The provider to use unless the message names one
    #[arg(short, long)]
    provider: Option<String>,
    /// The system prompt template
    #[arg(long)]
    prompt_id: Option<String>,
    /// A summary of the earlier conversation
    #[arg(long)]
    summary: Option<String>,
    /// Read the request from a JSON file
    #[arg(short, long)]
    request: Option<PathBuf>,
    /// The message to send, read from standard input when absent
    prompt: Option<String>,
}

/// Possible listings
#[derive(Subcommand)]
pub(crate) enum ListObject {
    /// Models served by the providers
    Models(ListModelArgs),
    /// Providers
    Providers,
    /// System prompt templates
    Prompts,
}

/// Output formats
#[derive(
    Parser, ValueEnum, Default, Clone, Copy, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ListingFormat {
    /// Format the output as a table
    #[default]
    Table,
    /// Format the output as JSON
    Json,
    /// Format the output as a table without a header
    HeaderlessTable,
}

#[derive(Parser)]
pub(crate) struct ListArgs {
    /// Output the listing with the specified format
    #[arg(short, long, default_value_t = ListingFormat::default())]
    format: ListingFormat,
    /// List the specified object
    #[command(subcommand)]
    object: ListObject,
}

#[derive(Parser, Default)]
pub(crate) struct ListModelArgs {
    /// Limit listing to the specified provider
    #[arg(short, long)]
    provider: Option<ProviderIdentifier>,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("relay=debug")
    } else {
        EnvFilter::try_from_env("RELAY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let color = ColorMode::resolve_auto(cli.color);
    color::configure_color(color);

    let config = match config::read_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => die!("{}", err),
    };

    let registry = match registry::populate::load_registry(&config) {
        Ok(registry) => registry,
        Err(err) => die!("{}", err),
    };

    let config = Arc::new(config);
    let orchestrator = Orchestrator::new(Arc::new(registry), config.clone());

    match &cli.command {
        Commands::Chat(args) => chat_cmd(&orchestrator, args).await,
        Commands::List(args) => list_cmd(&orchestrator, &config, args).await,
    }
}
