use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

pub mod chat;
pub mod models;
pub mod serve;

use crate::core::AppConfig;

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session in the terminal
    Chat {
        /// Path to the persona file
        #[arg(long)]
        prompt: Option<String>,

        /// Ask the model for an opening message before the first prompt
        #[arg(long, action, default_value = "false")]
        greet: bool,
    },
    /// Run the web chat UI
    Serve {
        /// Set the server host address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Set the server port
        #[arg(long, default_value = "2222")]
        port: String,

        /// Path to the persona file
        #[arg(long)]
        prompt: Option<String>,
    },
    /// List the models available at the configured endpoint
    Models {
        /// Path to the persona file
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

/// Console logging goes to stderr and defaults to warnings only so it
/// never interleaves with streamed replies.
fn init_console_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn config_with_prompt(prompt: Option<String>) -> AppConfig {
    let mut config = AppConfig::default();
    if let Some(path) = prompt {
        config.prompt_path = path;
    }
    config
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    // Handle each sub command
    match args.command {
        Some(Command::Chat { prompt, greet }) => {
            init_console_tracing();
            chat::run(config_with_prompt(prompt), greet).await?;
        }
        Some(Command::Serve { host, port, prompt }) => {
            serve::run(host, port, config_with_prompt(prompt)).await?;
        }
        Some(Command::Models { prompt }) => {
            init_console_tracing();
            models::run(config_with_prompt(prompt)).await?;
        }
        // Without a sub command start a console chat with the defaults
        None => {
            init_console_tracing();
            chat::run(AppConfig::default(), false).await?;
        }
    }

    Ok(())
}
