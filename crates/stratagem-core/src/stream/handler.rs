//! The turn state machine.
//!
//! One turn runs: resolve session, apply focus, gate access, warm the
//! ontology cache, drive the orchestrator, finalize. The stream
//! guarantees are enforced here and only here:
//!
//! - at most one `error` message, and always before `done`;
//! - exactly one `done`, whatever happened;
//! - exactly one consolidated session write per turn, skipped only
//!   when access was denied or no session could be resolved;
//! - a client disconnect never cancels the bookkeeping.
//!
//! The handler never writes mid-turn (the eager focus write inside
//! [`SessionManager::resolve_project_focus`] is the single exception,
//! by contract).

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use stratagem_types::context::ContextScope;
use stratagem_types::session::TurnOutcome;
use stratagem_types::stream::{
    AgentSseMessage, StreamErrorCode, StreamRequest, TurnPrompt, TurnUsage,
};

use crate::access::{AccessCheckService, AuthorizationRpc, EntityProbe};
use crate::context::{now_ms, summarize_turn};
use crate::ontology::{
    ContextLoader, OntologyCacheService, SnapshotScheduler, prune_stale_snapshots,
};
use crate::session::manager::SessionManager;
use crate::session::repository::SessionRepository;
use crate::stream::AgentOrchestrator;
use crate::stream::mapper::{MapOutcome, TurnCompletion, map_event};

/// Backpressure bound between the turn task and the SSE writer.
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// How one turn went, for the task log line and for tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// Absent only when no session could be resolved.
    pub session_id: Option<Uuid>,
    pub outcome: TurnOutcome,
    pub error_code: Option<StreamErrorCode>,
    pub messages_emitted: u32,
    pub tool_calls: u32,
    pub usage: TurnUsage,
    pub elapsed_ms: u64,
    /// Absent when the turn never reached the ontology cache.
    pub cache_hit: Option<bool>,
    /// Whether the consolidated write landed.
    pub persisted: bool,
    pub client_disconnected: bool,
}

/// Channel writer that treats a gone receiver as a fact, not an error.
///
/// After the first failed send every further emission is dropped
/// silently; the turn keeps running for its bookkeeping.
struct Emitter {
    tx: mpsc::Sender<AgentSseMessage>,
    sent: u32,
    client_gone: bool,
}

impl Emitter {
    fn new(tx: mpsc::Sender<AgentSseMessage>) -> Self {
        Self {
            tx,
            sent: 0,
            client_gone: false,
        }
    }

    /// Returns false once the receiving side is gone.
    async fn send(&mut self, message: AgentSseMessage) -> bool {
        if self.client_gone {
            return false;
        }
        match self.tx.send(message).await {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(_) => {
                self.client_gone = true;
                false
            }
        }
    }
}

/// Runs streaming turns over the injected ports.
pub struct StreamHandler<R, A, P, L, O, S> {
    sessions: SessionManager<R>,
    access: AccessCheckService<A, P>,
    ontology: OntologyCacheService<L>,
    orchestrator: O,
    snapshots: S,
}

impl<R, A, P, L, O, S> StreamHandler<R, A, P, L, O, S>
where
    R: SessionRepository,
    A: AuthorizationRpc,
    P: EntityProbe,
    L: ContextLoader,
    O: AgentOrchestrator,
    S: SnapshotScheduler,
{
    pub fn new(
        sessions: SessionManager<R>,
        access: AccessCheckService<A, P>,
        ontology: OntologyCacheService<L>,
        orchestrator: O,
        snapshots: S,
    ) -> Self {
        Self {
            sessions,
            access,
            ontology,
            orchestrator,
            snapshots,
        }
    }

    /// Run one turn to completion, emitting messages into `tx`.
    ///
    /// Always returns; failures become in-band `error` messages. The
    /// transport layer wants [`Self::stream_turn`]; this method exists
    /// so every guarantee can be exercised without a socket.
    pub async fn run_turn(
        &self,
        user_id: Uuid,
        request: StreamRequest,
        tx: mpsc::Sender<AgentSseMessage>,
    ) -> TurnReport {
        let started = Instant::now();
        let mut emitter = Emitter::new(tx);

        // Without a session row there is nothing to converse in and
        // nothing to write to.
        let session = match self.sessions.resolve_session(user_id, &request).await {
            Ok(session) => session,
            Err(err) => {
                warn!(%user_id, error = %err, "session resolution failed");
                emitter
                    .send(AgentSseMessage::Error {
                        code: StreamErrorCode::SessionUnavailable,
                        message: "the conversation could not be opened".to_string(),
                    })
                    .await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                emitter
                    .send(AgentSseMessage::Done {
                        session_id: None,
                        usage: TurnUsage::default(),
                        elapsed_ms,
                    })
                    .await;
                return TurnReport {
                    session_id: None,
                    outcome: TurnOutcome::Failed,
                    error_code: Some(StreamErrorCode::SessionUnavailable),
                    messages_emitted: emitter.sent,
                    tool_calls: 0,
                    usage: TurnUsage::default(),
                    elapsed_ms,
                    cache_hit: None,
                    persisted: false,
                    client_disconnected: emitter.client_gone,
                };
            }
        };
        let session_id = session.id;
        let mut metadata = session.agent_metadata.clone();

        let focus = match self
            .sessions
            .resolve_project_focus(&request, session_id, &mut metadata)
            .await
        {
            Ok(resolution) => resolution.resolved,
            Err(err) => {
                // The in-memory metadata was updated before the failing
                // write; the consolidated write below still carries it.
                warn!(%session_id, error = %err, "eager focus write failed");
                metadata.focus.clone()
            }
        };

        // On resume the stored scope is authoritative, not the request.
        let scope = ContextScope {
            context_type: session.context_type,
            entity_id: session.entity_id.clone(),
            focus,
        };

        let mut fault: Option<(StreamErrorCode, String)> = None;
        let mut usage = TurnUsage::default();
        let mut summary: Option<String> = None;
        let mut tool_calls = 0u32;
        let mut cache_hit: Option<bool> = None;
        let mut cache_patch = None;
        let mut completed = false;

        'gate: {
            if !self.access.check_scope(user_id, &scope).await.is_allowed() {
                fault = Some((
                    StreamErrorCode::AccessDenied,
                    "you do not have access to this conversation target".to_string(),
                ));
                break 'gate;
            }

            let loaded = match self.ontology.load_or_get(&scope, &metadata, now_ms()).await {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(%session_id, error = %err, "context assembly failed");
                    fault = Some((StreamErrorCode::ContextLoadFailed, err.to_string()));
                    break 'gate;
                }
            };
            cache_hit = Some(loaded.cache_hit);
            cache_patch = loaded.patch;

            if !loaded.cache_hit {
                if let Some(project_id) = scope.resolved_project_id() {
                    // Fire and forget; the snapshot job runs out of band.
                    self.snapshots.schedule_project_snapshot(project_id);
                }
            }

            let prompt = TurnPrompt {
                session_id,
                message: request.message.clone(),
                context: loaded.context,
                focus: scope.focus.clone(),
                last_turn: metadata.last_turn_context.clone(),
            };
            let mut events = self.orchestrator.stream_conversation(prompt);

            while fault.is_none() && !completed {
                match events.next().await {
                    None => {
                        // EOF without `complete`: the orchestrator died
                        // without saying so.
                        fault = Some((
                            StreamErrorCode::OrchestratorFailed,
                            "turn stream ended without a complete event".to_string(),
                        ));
                    }
                    Some(Err(err)) => {
                        warn!(%session_id, error = %err, "orchestrator stream failed");
                        fault = Some((StreamErrorCode::OrchestratorFailed, err.to_string()));
                    }
                    Some(Ok(event)) => match map_event(event) {
                        MapOutcome::Forward(message) => {
                            if matches!(message, AgentSseMessage::ToolCall { .. }) {
                                tool_calls += 1;
                            }
                            if !emitter.send(message).await {
                                fault = Some((
                                    StreamErrorCode::TransportClosed,
                                    "client disconnected mid-turn".to_string(),
                                ));
                            }
                        }
                        MapOutcome::Complete(TurnCompletion {
                            usage: turn_usage,
                            summary: turn_summary,
                        }) => {
                            usage = turn_usage;
                            summary = turn_summary;
                            completed = true;
                        }
                        MapOutcome::Fault { code, message } => {
                            fault = Some((code, message));
                        }
                    },
                }
            }
        }

        // Finalize: at most one error, then the one done.
        if let Some((code, message)) = &fault {
            emitter
                .send(AgentSseMessage::Error {
                    code: *code,
                    message: message.clone(),
                })
                .await;
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        emitter
            .send(AgentSseMessage::Done {
                session_id: Some(session_id),
                usage,
                elapsed_ms,
            })
            .await;

        let error_code = fault.as_ref().map(|(code, _)| *code);
        let outcome = if fault.is_some() {
            TurnOutcome::Failed
        } else {
            TurnOutcome::Completed
        };

        // The consolidated write. A denied turn leaves no trace.
        let mut persisted = false;
        if error_code != Some(StreamErrorCode::AccessDenied) {
            if let Some(entry) = cache_patch {
                metadata.ontology_cache = Some(entry);
            }
            let ended_at = now_ms();
            let cleared = prune_stale_snapshots(&mut metadata, ended_at);
            if !cleared.is_empty() {
                debug!(%session_id, ?cleared, "dropped stale snapshot slots");
            }
            metadata.last_turn_context = Some(summarize_turn(
                &request.message,
                outcome,
                error_code,
                tool_calls,
                usage,
                elapsed_ms,
                ended_at,
                scope.focus.as_ref(),
                summary,
            ));
            match self.sessions.record_turn(&session_id, &metadata).await {
                Ok(()) => persisted = true,
                Err(err) => {
                    // The client already has its answer; a failed write
                    // must not disturb the stream.
                    warn!(%session_id, error = %err, "consolidated turn write failed");
                }
            }
        }

        TurnReport {
            session_id: Some(session_id),
            outcome,
            error_code,
            messages_emitted: emitter.sent,
            tool_calls,
            usage,
            elapsed_ms,
            cache_hit,
            persisted,
            client_disconnected: emitter.client_gone,
        }
    }
}

impl<R, A, P, L, O, S> StreamHandler<R, A, P, L, O, S>
where
    R: SessionRepository + 'static,
    A: AuthorizationRpc + 'static,
    P: EntityProbe + 'static,
    L: ContextLoader + 'static,
    O: AgentOrchestrator + 'static,
    S: SnapshotScheduler + 'static,
{
    /// Start a turn on its own task and hand back the message stream.
    ///
    /// The task owns the turn: dropping the returned stream (a client
    /// disconnect) does not cancel it, so the consolidated write and
    /// the terminal bookkeeping still run.
    pub fn stream_turn(
        self: &Arc<Self>,
        user_id: Uuid,
        request: StreamRequest,
    ) -> ReceiverStream<AgentSseMessage> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let handler = Arc::clone(self);
        let span = tracing::Span::current();
        tokio::spawn(
            async move {
                let report = handler.run_turn(user_id, request, tx).await;
                info!(
                    session_id = ?report.session_id,
                    outcome = ?report.outcome,
                    error_code = ?report.error_code,
                    messages = report.messages_emitted,
                    tool_calls = report.tool_calls,
                    tokens = report.usage.total_tokens(),
                    elapsed_ms = report.elapsed_ms,
                    cache_hit = ?report.cache_hit,
                    persisted = report.persisted,
                    "turn finished"
                );
            }
            .instrument(span),
        );
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventStream;
    use chrono::Utc;
    use stratagem_types::context::{ContextType, FocusPayload};
    use stratagem_types::error::{AuthzError, ContextLoadError, OrchestratorError, RepositoryError};
    use stratagem_types::ontology::OntologyContext;
    use stratagem_types::session::{AgentSession, AgentSessionMetadata, SessionStatus};
    use stratagem_types::stream::StreamEvent;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestRepo {
        sessions: Mutex<Vec<AgentSession>>,
        fail_reads: bool,
        fail_record_turn: bool,
        update_metadata_calls: AtomicUsize,
        record_turn_calls: AtomicUsize,
    }

    impl SessionRepository for &TestRepo {
        async fn create_session(
            &self,
            session: &AgentSession,
        ) -> Result<AgentSession, RepositoryError> {
            if self.fail_reads {
                return Err(RepositoryError::Connection("database is down".to_string()));
            }
            self.sessions.lock().unwrap().push(session.clone());
            Ok(session.clone())
        }

        async fn get_session(
            &self,
            session_id: &Uuid,
        ) -> Result<Option<AgentSession>, RepositoryError> {
            if self.fail_reads {
                return Err(RepositoryError::Connection("database is down".to_string()));
            }
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.id == *session_id)
                .cloned())
        }

        async fn find_for_scope(
            &self,
            user_id: &Uuid,
            context_type: ContextType,
            entity_id: Option<&str>,
        ) -> Result<Option<AgentSession>, RepositoryError> {
            if self.fail_reads {
                return Err(RepositoryError::Connection("database is down".to_string()));
            }
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| {
                    s.user_id == *user_id
                        && s.context_type == context_type
                        && s.entity_id.as_deref() == entity_id
                })
                .cloned())
        }

        async fn update_metadata(
            &self,
            session_id: &Uuid,
            metadata: &AgentSessionMetadata,
        ) -> Result<(), RepositoryError> {
            self.update_metadata_calls.fetch_add(1, Ordering::SeqCst);
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .iter_mut()
                .find(|s| s.id == *session_id)
                .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
            session.agent_metadata = metadata.clone();
            Ok(())
        }

        async fn record_turn(
            &self,
            session_id: &Uuid,
            metadata: &AgentSessionMetadata,
            last_active_at: chrono::DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            self.record_turn_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_record_turn {
                return Err(RepositoryError::Query("write hit a locked page".to_string()));
            }
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .iter_mut()
                .find(|s| s.id == *session_id)
                .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
            session.agent_metadata = metadata.clone();
            session.message_count += 1;
            session.last_active_at = last_active_at;
            Ok(())
        }

        async fn list_sessions(
            &self,
            _user_id: &Uuid,
            _include_archived: bool,
        ) -> Result<Vec<AgentSession>, RepositoryError> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn list_recent(&self, _limit: u32) -> Result<Vec<AgentSession>, RepositoryError> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn count_sessions(&self) -> Result<u64, RepositoryError> {
            Ok(self.sessions.lock().unwrap().len() as u64)
        }
    }

    #[derive(Default)]
    struct TestAuthz {
        deny: bool,
    }

    impl AuthorizationRpc for &TestAuthz {
        async fn check_project_access(
            &self,
            _project_id: &str,
            _level: crate::access::AccessLevel,
            _user_id: Uuid,
        ) -> Result<bool, AuthzError> {
            Ok(!self.deny)
        }
    }

    #[derive(Default)]
    struct TestProbe;

    impl EntityProbe for &TestProbe {
        async fn project_exists(&self, _project_id: &str) -> Result<bool, RepositoryError> {
            Ok(true)
        }

        async fn entity_exists(
            &self,
            _kind: stratagem_types::context::OntologyEntityKind,
            _entity_id: &str,
        ) -> Result<bool, RepositoryError> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct TestLoader {
        fail: bool,
        calls: AtomicUsize,
    }

    impl ContextLoader for &TestLoader {
        async fn load(
            &self,
            _scope: &stratagem_types::context::ContextScope,
        ) -> Result<OntologyContext, ContextLoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ContextLoadError::Query("ontology store offline".to_string()));
            }
            Ok(OntologyContext {
                summary: "fresh briefing".to_string(),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct TestScheduler {
        scheduled: Mutex<Vec<String>>,
    }

    impl SnapshotScheduler for &TestScheduler {
        fn schedule_project_snapshot(&self, project_id: &str) {
            self.scheduled.lock().unwrap().push(project_id.to_string());
        }
    }

    #[derive(Default)]
    struct TestOrchestrator {
        script: Mutex<Vec<Result<StreamEvent, OrchestratorError>>>,
        prompts: Mutex<Vec<TurnPrompt>>,
        calls: AtomicUsize,
    }

    impl TestOrchestrator {
        fn scripted(script: Vec<Result<StreamEvent, OrchestratorError>>) -> Self {
            Self {
                script: Mutex::new(script),
                ..Default::default()
            }
        }

        fn prime(&self, script: Vec<Result<StreamEvent, OrchestratorError>>) {
            *self.script.lock().unwrap() = script;
        }
    }

    impl AgentOrchestrator for &TestOrchestrator {
        fn stream_conversation(&self, prompt: TurnPrompt) -> EventStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt);
            let items = std::mem::take(&mut *self.script.lock().unwrap());
            Box::pin(futures_util::stream::iter(items))
        }
    }

    #[derive(Default)]
    struct Harness {
        repo: TestRepo,
        authz: TestAuthz,
        probe: TestProbe,
        loader: TestLoader,
        scheduler: TestScheduler,
    }

    type TestHandler<'a> = StreamHandler<
        &'a TestRepo,
        &'a TestAuthz,
        &'a TestProbe,
        &'a TestLoader,
        &'a TestOrchestrator,
        &'a TestScheduler,
    >;

    impl Harness {
        fn handler<'a>(&'a self, orchestrator: &'a TestOrchestrator) -> TestHandler<'a> {
            StreamHandler::new(
                SessionManager::new(&self.repo),
                AccessCheckService::new(&self.authz, &self.probe),
                OntologyCacheService::new(&self.loader),
                orchestrator,
                &self.scheduler,
            )
        }

        async fn run(
            &self,
            orchestrator: &TestOrchestrator,
            user_id: Uuid,
            request: StreamRequest,
        ) -> (TurnReport, Vec<AgentSseMessage>) {
            let (tx, mut rx) = mpsc::channel(64);
            let report = self.handler(orchestrator).run_turn(user_id, request, tx).await;
            let mut messages = Vec::new();
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
            (report, messages)
        }
    }

    fn progress(stage: &str) -> Result<StreamEvent, OrchestratorError> {
        Ok(StreamEvent::Progress {
            stage: stage.to_string(),
            detail: None,
        })
    }

    fn complete(input: u32, output: u32) -> Result<StreamEvent, OrchestratorError> {
        Ok(StreamEvent::Complete {
            usage: TurnUsage {
                input_tokens: input,
                output_tokens: output,
            },
            summary: Some("handled it".to_string()),
        })
    }

    fn global_request(message: &str) -> StreamRequest {
        StreamRequest {
            message: message.to_string(),
            ..StreamRequest::default()
        }
    }

    fn project_request(message: &str, project_id: &str) -> StreamRequest {
        StreamRequest {
            message: message.to_string(),
            context_type: Some("project".to_string()),
            entity_id: Some(project_id.to_string()),
            ..StreamRequest::default()
        }
    }

    fn kinds(messages: &[AgentSseMessage]) -> Vec<&'static str> {
        messages.iter().map(AgentSseMessage::kind).collect()
    }

    #[tokio::test]
    async fn test_successful_turn_forwards_then_done() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![
            progress("planning"),
            progress("answering"),
            complete(120, 48),
        ]);
        let user_id = Uuid::now_v7();

        let (report, messages) = harness.run(&orch, user_id, global_request("hello")).await;

        assert_eq!(kinds(&messages), vec!["progress", "progress", "done"]);
        match messages.last().unwrap() {
            AgentSseMessage::Done {
                session_id, usage, ..
            } => {
                assert_eq!(*session_id, report.session_id);
                assert_eq!(usage.total_tokens(), 168);
            }
            other => panic!("not done: {other:?}"),
        }
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert!(report.error_code.is_none());
        assert!(report.persisted);
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 1);

        let stored = harness.repo.sessions.lock().unwrap()[0].clone();
        assert_eq!(stored.message_count, 1);
        let digest = stored.agent_metadata.last_turn_context.unwrap();
        assert_eq!(digest.outcome, TurnOutcome::Completed);
        assert_eq!(digest.message_head, "hello");
        assert_eq!(digest.agent_summary.as_deref(), Some("handled it"));
        // The cold-load patch rides along on the same write.
        assert!(stored.agent_metadata.ontology_cache.is_some());
    }

    #[tokio::test]
    async fn test_immediate_failure_emits_error_then_done() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![Err(OrchestratorError::Connect(
            "connection refused".to_string(),
        ))]);

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["error", "done"]);
        match &messages[0] {
            AgentSseMessage::Error { code, .. } => {
                assert_eq!(*code, StreamErrorCode::OrchestratorFailed);
            }
            other => panic!("not error: {other:?}"),
        }
        match &messages[1] {
            AgentSseMessage::Done { session_id, .. } => {
                assert_eq!(*session_id, report.session_id);
            }
            other => panic!("not done: {other:?}"),
        }
        assert_eq!(report.outcome, TurnOutcome::Failed);
        // Failed turns are still recorded.
        assert!(report.persisted);
    }

    #[tokio::test]
    async fn test_eof_without_complete_is_a_failure() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![progress("thinking")]);

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["progress", "error", "done"]);
        assert_eq!(report.error_code, Some(StreamErrorCode::OrchestratorFailed));
        match &messages[1] {
            AgentSseMessage::Error { message, .. } => {
                assert!(message.contains("complete"), "got: {message}");
            }
            other => panic!("not error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inband_error_event_is_terminal() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![
            progress("thinking"),
            Ok(StreamEvent::Error {
                message: "model overloaded".to_string(),
                code: Some("overloaded".to_string()),
            }),
            // Must never be consumed.
            progress("zombie"),
        ]);

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["progress", "error", "done"]);
        assert_eq!(report.outcome, TurnOutcome::Failed);
        let errors = messages
            .iter()
            .filter(|m| m.kind() == "error")
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_access_denied_leaves_no_trace() {
        let harness = Harness {
            authz: TestAuthz { deny: true },
            ..Harness::default()
        };
        let orch = TestOrchestrator::default();

        let (report, messages) = harness
            .run(&orch, Uuid::now_v7(), project_request("hi", "P1"))
            .await;

        assert_eq!(kinds(&messages), vec!["error", "done"]);
        assert_eq!(report.error_code, Some(StreamErrorCode::AccessDenied));
        assert!(!report.persisted);
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.repo.update_metadata_calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_load_failure_still_records_the_turn() {
        let harness = Harness {
            loader: TestLoader {
                fail: true,
                ..Default::default()
            },
            ..Harness::default()
        };
        let orch = TestOrchestrator::default();

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["error", "done"]);
        assert_eq!(report.error_code, Some(StreamErrorCode::ContextLoadFailed));
        assert!(report.persisted);
        assert_eq!(orch.calls.load(Ordering::SeqCst), 0);

        let stored = harness.repo.sessions.lock().unwrap()[0].clone();
        let digest = stored.agent_metadata.last_turn_context.unwrap();
        assert_eq!(digest.outcome, TurnOutcome::Failed);
        assert_eq!(digest.error_code.as_deref(), Some("context_load_failed"));
    }

    #[tokio::test]
    async fn test_session_failure_emits_done_without_id() {
        let harness = Harness {
            repo: TestRepo {
                fail_reads: true,
                ..Default::default()
            },
            ..Harness::default()
        };
        let orch = TestOrchestrator::default();

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["error", "done"]);
        assert_eq!(report.error_code, Some(StreamErrorCode::SessionUnavailable));
        assert!(report.session_id.is_none());
        assert!(!report.persisted);
        match &messages[1] {
            AgentSseMessage::Done { session_id, .. } => assert!(session_id.is_none()),
            other => panic!("not done: {other:?}"),
        }
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnected_client_still_gets_the_write() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![progress("thinking"), complete(10, 10)]);
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let report = harness
            .handler(&orch)
            .run_turn(Uuid::now_v7(), global_request("hi"), tx)
            .await;

        assert!(report.client_disconnected);
        assert_eq!(report.error_code, Some(StreamErrorCode::TransportClosed));
        assert_eq!(report.messages_emitted, 0);
        assert!(report.persisted);
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 1);

        let stored = harness.repo.sessions.lock().unwrap()[0].clone();
        let digest = stored.agent_metadata.last_turn_context.unwrap();
        assert_eq!(digest.error_code.as_deref(), Some("transport_closed"));
    }

    #[tokio::test]
    async fn test_write_failure_never_disturbs_the_stream() {
        let harness = Harness {
            repo: TestRepo {
                fail_record_turn: true,
                ..Default::default()
            },
            ..Harness::default()
        };
        let orch = TestOrchestrator::scripted(vec![complete(5, 5)]);

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["done"]);
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert!(!report.persisted);
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cold_project_load_schedules_snapshot_once() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![complete(1, 1)]);
        let user_id = Uuid::now_v7();

        let (first, _) = harness
            .run(&orch, user_id, project_request("hi", "P1"))
            .await;
        assert_eq!(first.cache_hit, Some(false));
        assert_eq!(
            *harness.scheduler.scheduled.lock().unwrap(),
            vec!["P1".to_string()]
        );

        // Same scope again: the patch persisted by the first turn makes
        // this a warm load, so no second snapshot is queued.
        orch.prime(vec![complete(1, 1)]);
        let (second, _) = harness
            .run(&orch, user_id, project_request("again", "P1"))
            .await;
        assert_eq!(second.cache_hit, Some(true));
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(harness.scheduler.scheduled.lock().unwrap().len(), 1);
        assert_eq!(harness.loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_focus_change_writes_eagerly_and_once_more_at_end() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![complete(1, 1)]);
        let request = StreamRequest {
            message: "focus please".to_string(),
            context_type: Some("project".to_string()),
            entity_id: Some("P1".to_string()),
            project_focus: Some(Some(FocusPayload {
                project_id: Some("P1".to_string()),
                ..FocusPayload::default()
            })),
            ..StreamRequest::default()
        };

        let (report, _) = harness.run(&orch, Uuid::now_v7(), request).await;

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(harness.repo.update_metadata_calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 1);
        let prompt = orch.prompts.lock().unwrap()[0].clone();
        assert_eq!(
            prompt.focus.as_ref().map(|f| f.project_id.as_str()),
            Some("P1")
        );
    }

    #[tokio::test]
    async fn test_prompt_carries_context_and_history() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![complete(1, 1)]);
        let user_id = Uuid::now_v7();

        // First turn leaves a digest behind.
        harness.run(&orch, user_id, global_request("first")).await;
        orch.prime(vec![complete(2, 2)]);
        harness.run(&orch, user_id, global_request("second")).await;

        let prompts = orch.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].last_turn.is_none());
        assert_eq!(prompts[0].context.summary, "fresh briefing");
        let history = prompts[1].last_turn.as_ref().unwrap();
        assert_eq!(history.message_head, "first");
    }

    #[tokio::test]
    async fn test_tool_calls_are_counted() {
        let harness = Harness::default();
        let orch = TestOrchestrator::scripted(vec![
            Ok(StreamEvent::ToolCall {
                id: "t1".to_string(),
                name: "search".to_string(),
                arguments: serde_json::json!({}),
            }),
            Ok(StreamEvent::ToolResult {
                id: "t1".to_string(),
                name: "search".to_string(),
                output: serde_json::json!([]),
                is_error: false,
            }),
            complete(9, 3),
        ]);

        let (report, messages) = harness.run(&orch, Uuid::now_v7(), global_request("hi")).await;

        assert_eq!(kinds(&messages), vec!["tool_call", "tool_result", "done"]);
        assert_eq!(report.tool_calls, 1);
        let stored = harness.repo.sessions.lock().unwrap()[0].clone();
        assert_eq!(
            stored.agent_metadata.last_turn_context.unwrap().tool_calls,
            1
        );
    }

    #[tokio::test]
    async fn test_stream_turn_runs_detached() {
        let harness: &'static Harness = Box::leak(Box::new(Harness::default()));
        let orch: &'static TestOrchestrator = Box::leak(Box::new(TestOrchestrator::scripted(
            vec![progress("thinking"), complete(4, 4)],
        )));
        let handler = Arc::new(harness.handler(orch));

        let mut stream = handler.stream_turn(Uuid::now_v7(), global_request("hi"));
        let mut seen = Vec::new();
        while let Some(message) = stream.next().await {
            seen.push(message.kind());
        }
        assert_eq!(seen, vec!["progress", "done"]);
        assert_eq!(harness.repo.record_turn_calls.load(Ordering::SeqCst), 1);
    }
}
