pub mod dispatch;
pub mod pipeline;

pub use dispatch::SpawnSink;
pub use pipeline::{Outcome, Pipeline, Stage};
