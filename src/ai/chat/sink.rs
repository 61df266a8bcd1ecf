//! Incremental output for streamed replies.
//!
//! A `Sink` receives every chunk exactly once, in the order the model
//! endpoint produced it. Front-ends only ever append what they are
//! given.

use tokio::sync::mpsc;

pub trait Sink: Send {
    fn write(&mut self, chunk: &str);
}

// The result is ignored here because the turn should complete even
// if the receiver went away
impl Sink for mpsc::UnboundedSender<String> {
    fn write(&mut self, chunk: &str) {
        let _ = self.send(chunk.to_string());
    }
}

impl Sink for Vec<String> {
    fn write(&mut self, chunk: &str) {
        self.push(chunk.to_string());
    }
}

impl Sink for String {
    fn write(&mut self, chunk: &str) {
        self.push_str(chunk);
    }
}

/// Adapts a closure into a `Sink`.
pub struct FnSink<F>(pub F);

impl<F> Sink for FnSink<F>
where
    F: FnMut(&str) + Send,
{
    fn write(&mut self, chunk: &str) {
        (self.0)(chunk)
    }
}
