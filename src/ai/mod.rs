pub mod chat;
pub mod directory;
pub mod prompt;
