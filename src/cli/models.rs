use anyhow::Result;

use crate::ai::directory::{ModelDirectory, ModelDirectoryEntry};
use crate::core::AppConfig;

const COLUMNS: usize = 3;

/// Lays models out in a grid of `COLUMNS` left-aligned columns, each
/// as wide as its longest `"{index}. {id}"` cell.
pub fn format_model_table(entries: &[ModelDirectoryEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["No models available.".to_string()];
    }

    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.index);
    let cells: Vec<String> = sorted
        .iter()
        .map(|e| format!("{}. {}", e.index, e.id))
        .collect();

    let mut widths = [0usize; COLUMNS];
    for (i, cell) in cells.iter().enumerate() {
        let col = i % COLUMNS;
        widths[col] = widths[col].max(cell.chars().count());
    }

    cells
        .chunks(COLUMNS)
        .map(|row| {
            (0..COLUMNS)
                .map(|col| {
                    let cell = row.get(col).map(String::as_str).unwrap_or("");
                    format!("{:<width$}", cell, width = widths[col])
                })
                .collect::<Vec<_>>()
                .join("    ")
        })
        .collect()
}

pub async fn run(config: AppConfig) -> Result<()> {
    let persona = config.load_persona()?;
    let directory = ModelDirectory::for_connection(&persona.connection);
    let models = directory
        .list_models(persona.connection.api_key.as_deref())
        .await;
    for line in format_model_table(&models) {
        println!("{}", line);
    }
    Ok(())
}
