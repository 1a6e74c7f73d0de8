//! The membership/interaction consistency layer: per-target serialized
//! toggle operations, the event-sink seam toward the gateway, and the
//! conversation read-side projection.

pub mod conversations;
pub mod engine;
pub mod error;
pub mod locks;
pub mod sink;

pub use conversations::ConversationAggregator;
pub use engine::{ToggleEngine, ToggleKind, ToggleOutcome};
pub use error::CoreError;
pub use sink::EventSink;
