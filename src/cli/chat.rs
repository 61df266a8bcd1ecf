use std::io::{self, Write};

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::models::format_model_table;
use crate::ai::chat::{ChatClient, FnSink};
use crate::ai::directory::{ModelDirectory, ModelDirectoryEntry};
use crate::ai::prompt::Variables;
use crate::core::AppConfig;

/// Prints each chunk as soon as it arrives.
fn stdout_sink() -> FnSink<impl FnMut(&str) + Send> {
    FnSink(|chunk: &str| {
        print!("{}", chunk);
        let _ = io::stdout().flush();
    })
}

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Exit,
    Empty,
    ListModels,
    SetModel(String),
    SetApiKey(String),
    Multiline,
    Usage(&'static str),
    Say(String),
}

pub fn parse_command(line: &str) -> ConsoleCommand {
    let trimmed = line.trim();
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };

    match head {
        "" => ConsoleCommand::Empty,
        "exit" | "quit" | "q" if rest.is_empty() => ConsoleCommand::Exit,
        "/model" | "/models" => ConsoleCommand::ListModels,
        "/setmodel" if rest.is_empty() => ConsoleCommand::Usage("/setmodel <model_name|index>"),
        "/setmodel" => ConsoleCommand::SetModel(rest.to_string()),
        "/apikey" if rest.is_empty() => ConsoleCommand::Usage("/apikey <key>"),
        "/apikey" => ConsoleCommand::SetApiKey(rest.to_string()),
        "/multiline" | "/ml" => ConsoleCommand::Multiline,
        _ => ConsoleCommand::Say(line.to_string()),
    }
}

/// An index from the last `/model` listing selects that model,
/// anything else is taken as a model id.
fn resolve_model(directory: &ModelDirectory, name: &str) -> String {
    name.parse::<usize>()
        .ok()
        .and_then(|i| directory.get(i))
        .unwrap_or_else(|| name.to_string())
}

/// Lists models with whatever key the chat is using now, so a key set
/// with `/apikey` also applies here.
async fn available_models(
    chat: &ChatClient,
    directory: &ModelDirectory,
) -> Vec<ModelDirectoryEntry> {
    let api_key = chat.connection().await.api_key;
    directory.list_models(api_key.as_deref()).await
}

/// Collect lines until an empty one.
fn read_multiline(rl: &mut DefaultEditor) -> rustyline::Result<String> {
    let mut lines = Vec::new();
    loop {
        let line = rl.readline("> ")?;
        if line.trim().is_empty() {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

pub async fn run(config: AppConfig, greet: bool) -> Result<()> {
    let persona = config.load_persona()?;
    let directory = ModelDirectory::for_connection(&persona.connection);
    let chat = ChatClient::new(persona);
    let mut rl = DefaultEditor::new()?;
    let variables = Variables::new();

    println!(
        "Run /model for more models, /setmodel <model_name> to set model, /ml to input multi-line."
    );
    println!();

    if let Some(prologue) = chat.prologue() {
        println!("🤖: {}", prologue);
    }

    if greet {
        print!("🤖: ");
        io::stdout().flush()?;
        if let Err(err) = chat.greet(&mut stdout_sink(), &variables).await {
            eprintln!("Error: {}", err);
        }
        println!();
    }

    loop {
        println!();
        let readline = rl.readline("😀: ");
        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = match parse_command(&line) {
            ConsoleCommand::Exit => {
                println!("Goodbye!");
                break;
            }
            ConsoleCommand::Empty => continue,
            ConsoleCommand::ListModels => {
                for row in format_model_table(&available_models(&chat, &directory).await) {
                    println!("{}", row);
                }
                continue;
            }
            ConsoleCommand::SetModel(name) => {
                let model_id = resolve_model(&directory, &name);
                chat.set_model(&model_id).await;
                println!("Using model {}", model_id);
                continue;
            }
            ConsoleCommand::SetApiKey(key) => {
                chat.set_api_key(&key).await;
                println!("API key updated");
                continue;
            }
            ConsoleCommand::Usage(usage) => {
                println!("Usage: {}", usage);
                continue;
            }
            ConsoleCommand::Multiline => match read_multiline(&mut rl) {
                Ok(text) => text,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => continue,
                Err(err) => {
                    println!("Error: {:?}", err);
                    break;
                }
            },
            ConsoleCommand::Say(text) => text,
        };

        if input.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input.as_str());

        print!("🤖: ");
        io::stdout().flush()?;
        let result = chat
            .invoke_stream(&input, &mut stdout_sink(), &variables)
            .await;
        println!();
        if let Err(err) = result {
            eprintln!("Error: {}", err);
        }
    }

    Ok(())
}
