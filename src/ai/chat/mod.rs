mod core;
mod models;
mod sink;

pub use self::core::{ChatClient, ModelHandle};
pub use models::{
    ConnectionConfig, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_PROVIDER, DEFAULT_SYSTEM_MESSAGE,
    Message, Role, Transcript,
};
pub use sink::{FnSink, Sink};
