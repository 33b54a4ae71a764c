//! Span attribute constants for streaming turn instrumentation.
//!
//! One vocabulary for every span that describes a turn, so dashboards
//! can aggregate without per-module attribute drift. All constants are
//! string slices usable as `tracing` field names via the `{ CONST }`
//! brace syntax, and as keys for `Span::record`.
//!
//! The stream endpoint opens one `agent_stream` span per turn. Scope
//! attributes are known at request time; outcome attributes are
//! recorded as the terminal messages pass through.

// --- Session attributes ---

/// The session the turn ran in.
pub const SESSION_ID: &str = "session.id";

/// The session's context type (e.g., "project", "task").
pub const SESSION_CONTEXT_TYPE: &str = "session.context_type";

/// The session's target entity id, when the scope has one.
pub const SESSION_ENTITY_ID: &str = "session.entity_id";

/// The authenticated user who owns the session.
pub const USER_ID: &str = "user.id";

// --- Turn attributes ---

/// Terminal outcome of the turn ("completed" or "failed").
pub const TURN_OUTCOME: &str = "turn.outcome";

/// Machine-readable failure category, present on failed turns.
pub const TURN_ERROR_CODE: &str = "turn.error_code";

/// Display messages forwarded to the client during the turn.
pub const TURN_MESSAGES_EMITTED: &str = "turn.messages_emitted";

/// Tool invocations the agent made during the turn.
pub const TURN_TOOL_CALLS: &str = "turn.tool_calls";

/// Wall-clock duration of the turn in milliseconds.
pub const TURN_ELAPSED_MS: &str = "turn.elapsed_ms";

// --- Usage attributes ---

/// The number of input tokens consumed.
pub const USAGE_INPUT_TOKENS: &str = "usage.input_tokens";

/// The number of output tokens generated.
pub const USAGE_OUTPUT_TOKENS: &str = "usage.output_tokens";
