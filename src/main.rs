use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod app;
mod client;
mod config;
mod conversation;
mod handler;
mod input;
mod logging;
mod tui;
mod ui;

use app::App;
use client::{ChatClient, ChatTransport};
use config::Config;
use conversation::{Conversation, Role};
use logging::LogTarget;

#[derive(Parser)]
#[command(name = "chatbot")]
#[command(about = "Terminal chat client for a remote chatbot service")]
struct Cli {
    /// Chat service URL (defaults to the config file, then http://localhost:5000)
    #[arg(long, global = true, env = "CHATBOT_BASE_URL")]
    base_url: Option<String>,

    /// Fail requests that take longer than this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat window (default)
    Chat,
    /// Print the stored conversation and exit
    History {
        /// Print messages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a single message, print the reply and exit
    Send {
        /// Message text
        message: String,
    },
    /// Save connection settings to the config file
    Config {
        /// Service URL to store
        #[arg(long = "set-base-url")]
        set_base_url: Option<String>,
        /// Request timeout to store (0 disables)
        #[arg(long = "set-timeout-secs")]
        set_timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    let target = match command {
        Commands::Chat => LogTarget::File(logging::log_file_path()?),
        _ => LogTarget::Stderr,
    };
    logging::init(target)?;

    let mut config = Config::load()?;
    let base_url = config.resolve_base_url(cli.base_url.as_deref());
    let client = ChatClient::new(&base_url).with_timeout(config.resolve_timeout(cli.timeout_secs));
    let base_url = client.base_url().to_string();
    let transport: Arc<dyn ChatTransport> = Arc::new(client);

    match command {
        Commands::Chat => run_chat(transport, base_url).await?,
        Commands::History { json } => print_history(transport, json).await?,
        Commands::Send { message } => send_once(transport, &message).await?,
        Commands::Config { set_base_url, set_timeout_secs } => {
            if set_base_url.is_some() {
                config.base_url = set_base_url;
            }
            if set_timeout_secs.is_some() {
                config.timeout_secs = set_timeout_secs;
            }
            let path = config.save()?;
            println!("Saved {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_chat(transport: Arc<dyn ChatTransport>, base_url: String) -> Result<()> {
    info!(%base_url, "starting chat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(transport, base_url);

    let result = async {
        while !app.should_quit {
            app.poll_tasks().await;
            app.drain_updates();
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event),
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    app.shutdown();
    tui::restore()?;
    info!("chat closed");
    result
}

async fn print_history(transport: Arc<dyn ChatTransport>, json: bool) -> Result<()> {
    let mut conversation = Conversation::new(transport);
    let messages = conversation.load_history().await;

    if json {
        println!("{}", serde_json::to_string_pretty(messages)?);
        return Ok(());
    }

    for msg in messages {
        let speaker = match msg.role() {
            Role::User => "You",
            Role::Bot => "Bot",
        };
        println!("{}: {}", speaker, msg.text());
    }
    Ok(())
}

async fn send_once(transport: Arc<dyn ChatTransport>, message: &str) -> Result<()> {
    let mut conversation = Conversation::new(transport);
    conversation.submit(message).await?;

    match conversation.messages().last() {
        Some(reply) if reply.role() == Role::Bot => println!("{}", reply.text()),
        _ => println!("Nothing to send."),
    }
    Ok(())
}
