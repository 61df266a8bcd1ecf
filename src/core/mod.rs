mod config;
pub mod error;
pub mod persona;

pub use config::AppConfig;
pub use error::{ChatError, ChatResult};
pub use persona::Persona;
