//! teams-agent - Microsoft Teams access for automated agents
//!
//! Signs in through the Teams web client once, then reuses the captured
//! session tokens for search, chat, favourites and presence.

mod api;
mod auth;
mod browser;
mod config;
mod models;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::TeamsClient;
use crate::auth::Authenticator;
use crate::config::{Paths, Settings};

#[derive(Parser)]
#[command(name = "teams-agent")]
#[command(about = "Microsoft Teams access through a captured web session", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the Teams web client
    Login {
        /// Discard the saved session and sign in again
        #[arg(short, long)]
        force: bool,
    },
    /// Remove the saved session and cached tokens
    Logout,
    /// Show saved session and credential status
    Status,
    /// Show the signed-in user and tenant region
    Whoami,
    /// Search messages
    Search {
        /// Search query
        query: String,
        /// Offset of the first result
        #[arg(long, default_value = "0")]
        from: usize,
        /// Number of results
        #[arg(short, long, default_value = "25")]
        size: usize,
    },
    /// Send a message
    Send {
        /// Conversation ID (e.g. 19:...@thread.v2)
        #[arg(short, long)]
        to: String,
        /// Message content
        message: String,
    },
    /// Read messages from a conversation
    Messages {
        /// Conversation ID
        conversation: String,
        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List, add or remove favourite conversations
    Favourites {
        /// Conversation ID to add
        #[arg(long, conflicts_with = "remove")]
        add: Option<String>,
        /// Conversation ID to remove
        #[arg(long)]
        remove: Option<String>,
    },
    /// Get/set presence status
    Presence {
        /// New status: available, busy, dnd, brb, away, offline
        #[arg(short, long, conflicts_with = "user")]
        set: Option<String>,
        /// Show another user's presence (MRI or object id)
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let paths = Paths::resolve()?;
    let settings = Settings::load(&paths)?;
    tracing::debug!("Data directory: {}", paths.root().display());
    let client = TeamsClient::new(Authenticator::open(&paths, settings)?)?;

    match cli.command {
        Commands::Login { force } => {
            tracing::info!("Starting authentication flow...");
            auth::login(client.auth(), force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout(client.auth())?;
        }
        Commands::Status => {
            auth::status(client.auth())?;
        }
        Commands::Whoami => {
            api::whoami(&client)?;
        }
        Commands::Search { query, from, size } => {
            tracing::info!("Searching for \"{}\"...", query);
            api::search(&client, &query, from, size).await?;
        }
        Commands::Send { to, message } => {
            tracing::info!("Sending message...");
            api::send_message(&client, &to, &message).await?;
        }
        Commands::Messages {
            conversation,
            limit,
        } => {
            api::get_messages(&client, &conversation, limit).await?;
        }
        Commands::Favourites { add, remove } => match (add, remove) {
            (Some(conversation), _) => api::add_favourite(&client, &conversation).await?,
            (None, Some(conversation)) => api::remove_favourite(&client, &conversation).await?,
            (None, None) => api::get_favourites(&client).await?,
        },
        Commands::Presence { set, user } => match set {
            Some(status) => {
                tracing::info!("Setting presence to {}...", status);
                api::set_presence(&client, &status).await?;
            }
            None => {
                api::get_presence(&client, user.as_deref()).await?;
            }
        },
    }

    Ok(())
}
