//! HttpOrchestrator -- concrete [`AgentOrchestrator`] implementation.
//!
//! Opens an SSE connection to the agent orchestrator's turn endpoint
//! and maps each frame to a [`StreamEvent`]. Connection failures and
//! bad statuses surface as the first `Err` item on the returned stream;
//! there is no separate connect step.
//!
//! Frames are parsed strictly: a payload whose `type` tag is not in the
//! registered event set fails the stream rather than being skipped, so
//! a protocol drift between the services is loud instead of silent.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use stratagem_core::stream::mapper::{is_known_event_type, registered_event_types};
use stratagem_core::stream::{AgentOrchestrator, EventStream};
use stratagem_types::error::OrchestratorError;
use stratagem_types::stream::{StreamEvent, TurnPrompt};

use std::time::Duration;

/// HTTP client for the orchestrator's streaming turn endpoint.
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl HttpOrchestrator {
    /// Create a new client against `base_url`.
    ///
    /// Only the connection phase is bounded; an open turn stream runs
    /// for as long as the orchestrator keeps producing events.
    pub fn new(
        base_url: impl Into<String>,
        token: SecretString,
        connect_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }
}

impl AgentOrchestrator for HttpOrchestrator {
    fn stream_conversation(&self, prompt: TurnPrompt) -> EventStream {
        let client = self.client.clone();
        let url = format!("{}/v1/turns/stream", self.base_url);
        let token = self.token.expose_secret().to_string();

        Box::pin(async_stream::try_stream! {
            let response = client
                .post(&url)
                .bearer_auth(&token)
                .header("Accept", "text/event-stream")
                .json(&prompt)
                .send()
                .await
                .map_err(|e| OrchestratorError::Connect(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                Err(OrchestratorError::Status(status.as_u16()))?;
            }

            let mut frames = response.bytes_stream().eventsource();
            while let Some(frame) = frames.next().await {
                let frame = frame.map_err(|e| OrchestratorError::Stream(e.to_string()))?;
                // Keepalive comments arrive as empty data frames
                if frame.data.trim().is_empty() {
                    continue;
                }
                yield parse_event_payload(&frame.data)?;
            }
        })
    }
}

/// Parse one SSE data payload into a [`StreamEvent`].
///
/// The `type` tag is checked against the registered event set before
/// deserialization so the error for an unknown tag names the expected
/// vocabulary instead of a serde internals message.
pub(crate) fn parse_event_payload(data: &str) -> Result<StreamEvent, OrchestratorError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| OrchestratorError::Decode(format!("event payload: {e}")))?;

    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| OrchestratorError::Decode("event missing 'type' tag".to_string()))?;

    if !is_known_event_type(tag) {
        return Err(OrchestratorError::Decode(format!(
            "unknown event type '{tag}', expected one of: {}",
            registered_event_types().join(", ")
        )));
    }

    serde_json::from_value(value)
        .map_err(|e| OrchestratorError::Decode(format!("event payload: {e}")))
}
