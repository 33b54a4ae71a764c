//! The streaming turn pipeline.
//!
//! [`mapper`] translates orchestrator events into client-facing SSE
//! messages; [`handler`] runs a whole turn and enforces the stream
//! guarantees (at most one `error`, exactly one `done`, exactly one
//! consolidated write). The orchestrator port lives here.

use std::pin::Pin;

use futures_util::Stream;

use stratagem_types::error::OrchestratorError;
use stratagem_types::stream::{StreamEvent, TurnPrompt};

pub mod handler;
pub mod mapper;

/// Events from one orchestrator turn.
///
/// Boxed rather than RPITIT so implementations can be built with
/// `async_stream` and held behind trait objects.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, OrchestratorError>> + Send + 'static>>;

/// The upstream agent runtime that actually runs the turn.
///
/// Implementations live in stratagem-infra (e.g., `HttpOrchestrator`).
/// The stream may fail at any point, including as its very first item;
/// connection failures surface that way rather than through a separate
/// connect step.
pub trait AgentOrchestrator: Send + Sync {
    fn stream_conversation(&self, prompt: TurnPrompt) -> EventStream;
}
