//! Memoir CLI
//!
//! Curates rolling memory for a chat stored as a JSON file: summarizes
//! messages, allocates summaries into short and long-term windows and prints
//! the injections a downstream prompt would receive.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use memoir::chat::{InMemoryChat, StoredMessage};
use memoir::services::{ApproxTokenCounter, HttpGenerator, RecordingSurface};
use memoir::{parse_command, ChatEvent, HostState, MemoryEngine, MemorySettings, SenderKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Memoir - rolling, budget-constrained conversation memory
#[derive(Parser, Debug)]
#[command(name = "memoir")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Chat file (JSON); created on first write if missing
    #[arg(short, long, default_value = "chat.json")]
    chat: PathBuf,

    /// Settings file (defaults to ~/.memoir/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output: show allocation details
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every message with its memory status, then the injections
    Show,
    /// Summarize the chat and refresh memory
    Summarize {
        /// Regenerate summaries that are already cached
        #[arg(long)]
        replace: bool,
    },
    /// Recompute inclusion and print the injections
    Refresh,
    /// Mark a message (default: the last one) for long-term memory
    Remember { index: Option<usize> },
    /// Append a message, as if the host had received it
    Append {
        #[arg(long, default_value = "Character")]
        name: String,
        #[arg(long, value_enum, default_value_t = SenderArg::Character)]
        sender: SenderArg,
        text: String,
    },
    /// Replace the text of a message
    Edit { index: usize, text: String },
    /// Delete a message
    Delete { index: usize },
    /// Run a slash command such as "/remember 3"
    Command { input: String },
    /// Dump the chat with its memory state
    Log,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SenderArg {
    User,
    Character,
    System,
}

impl From<SenderArg> for SenderKind {
    fn from(arg: SenderArg) -> Self {
        match arg {
            SenderArg::User => SenderKind::User,
            SenderArg::Character => SenderKind::Character,
            SenderArg::System => SenderKind::System,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(cli.config.as_deref()).await?;
    let store = Arc::new(
        InMemoryChat::open(&cli.chat)
            .await
            .with_context(|| format!("failed to open chat {:?}", cli.chat))?,
    );
    let counter = Arc::new(ApproxTokenCounter::new(settings.backend.context_size));
    let generator = Arc::new(HttpGenerator::new(&settings.backend)?);
    let surface = Arc::new(RecordingSurface::new());
    let engine = MemoryEngine::new(store.clone(), counter, generator, surface, settings);
    let host = HostState::default();

    info!("Chat: {:?}", cli.chat);

    match cli.command {
        Command::Show => {
            engine.refresh().await;
            print_messages(&engine, &store).await?;
        }
        Command::Summarize { replace } => {
            let report = engine.summarize_chat(replace).await?;
            if report.failed > 0 {
                warn!("{} messages failed to summarize", report.failed);
            }
            println!("{}", engine.window().await.display());
        }
        Command::Refresh => {
            println!("{}", engine.refresh().await.display());
        }
        Command::Remember { index } => {
            let index = engine.remember_message(index).await?;
            println!("Message {} will be remembered in long-term memory", index);
        }
        Command::Append { name, sender, text } => {
            let index = store
                .append(StoredMessage::new(name, sender.into(), text))
                .await?;
            info!("Appended message {}", index);
            engine.handle_event(ChatEvent::NewMessage, host).await?;
        }
        Command::Edit { index, text } => {
            store.edit(index, text).await?;
            engine.handle_event(ChatEvent::MessageEdited, host).await?;
        }
        Command::Delete { index } => {
            store.delete(index).await?;
            engine.handle_event(ChatEvent::MessageDeleted, host).await?;
        }
        Command::Command { input } => match parse_command(&input)? {
            Some(command) => println!("{}", engine.execute(command).await?),
            None => anyhow::bail!("not a slash command: {}\n{}", input, memoir::commands::help()),
        },
        Command::Log => {
            println!("{}", engine.log_chat().await?);
        }
    }

    // Settle any debounced refresh before persisting
    engine.flush().await;
    store
        .save(&cli.chat)
        .await
        .with_context(|| format!("failed to save chat {:?}", cli.chat))?;

    Ok(())
}

async fn load_settings(path: Option<&Path>) -> anyhow::Result<MemorySettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match MemorySettings::default_path() {
            Some(path) => path,
            None => return Ok(MemorySettings::default()),
        },
    };
    MemorySettings::load(&path)
        .await
        .with_context(|| format!("failed to load settings from {:?}", path))
}

async fn print_messages(engine: &MemoryEngine, store: &InMemoryChat) -> anyhow::Result<()> {
    use memoir::ConversationStore;

    let Some(snapshot) = store.snapshot().await else {
        println!("No active chat");
        return Ok(());
    };

    for message in &snapshot.messages {
        let labels = message.memory.status_labels();
        let status = if labels.is_empty() {
            String::new()
        } else {
            format!(" [{}]", labels.join(", "))
        };
        println!("#{} {}{}: {}", message.index, message.name, status, message.text);
        if let Some(summary) = &message.memory.summary {
            println!("    -> {}", summary);
        }
    }

    let budget = engine.budget().await;
    println!(
        "\nBudget: short {} tokens, long {} tokens\n",
        budget.short_limit, budget.long_limit
    );
    println!("{}", engine.window().await.display());
    Ok(())
}
