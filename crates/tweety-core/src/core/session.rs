//! Chat session state machine.
//!
//! [`SessionController`] owns the message transcript, drives streamed
//! completions to a terminal outcome, and keeps the backing store in sync.
//! At most one generation runs at a time; a cloneable [`StopHandle`] lets
//! another task cancel the in-flight one.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::message::{Message, Role};
use crate::engine::{ChatMessage, EngineError, InferenceEngine, StreamEvent};
use crate::store::{MESSAGES_KEY, SESSION_ID_KEY, SessionStore};

/// Upper bound (exclusive) for generated session ids.
const SESSION_ID_RANGE: u32 = 1_000_000;

fn new_session_id() -> u32 {
    rand::thread_rng().gen_range(0..SESSION_ID_RANGE)
}

/// Cancels the generation currently in flight, if any.
///
/// Handles are cheap to clone and safe to trigger from any task. Stopping
/// when nothing is generating is a no-op, and stopping twice is harmless.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the active generation. Returns whether one
    /// was live; tokens are taken out of the slot and never reused.
    pub fn stop(&self) -> bool {
        let mut guard = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn arm(&self, token: CancellationToken) {
        let mut guard = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(token);
    }

    fn disarm(&self) {
        let mut guard = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }
}

/// Terminal state of a submit or reload call.
///
/// Engine failures surface here rather than as `Err`: an `Err` from the
/// controller means the session itself broke (storage, serialization), not
/// that one generation went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The completion ran to its natural end.
    Completed,
    /// The user stopped generation; any partial text was kept.
    Stopped,
    /// The engine failed; the transcript was rolled back to the last
    /// user message.
    Failed(EngineError),
    /// Nothing to do (blank input, or reload with no user message).
    Ignored,
    /// A generation is already in flight.
    Busy,
}

/// Owns a chat transcript and drives generations against an engine.
pub struct SessionController<E, S> {
    engine: E,
    store: S,
    system_prompt: String,
    messages: Vec<Message>,
    session_id: u32,
    generating: bool,
    stop: StopHandle,
}

impl<E: InferenceEngine, S: SessionStore> SessionController<E, S> {
    /// Opens a session, restoring any transcript the store holds.
    ///
    /// A persisted loading placeholder (from an interrupted process) is
    /// dropped on restore since its generation cannot resume.
    pub fn open(engine: E, store: S, system_prompt: impl Into<String>) -> Result<Self> {
        let messages = match store.get(MESSAGES_KEY)? {
            Some(raw) => {
                let mut messages: Vec<Message> =
                    serde_json::from_str(&raw).context("failed to parse stored messages")?;
                messages.retain(|m| !m.is_loading);
                messages
            }
            None => Vec::new(),
        };
        let session_id = match store.get(SESSION_ID_KEY)? {
            Some(raw) => raw
                .trim()
                .parse()
                .context("failed to parse stored session id")?,
            None => new_session_id(),
        };

        debug!(session_id, messages = messages.len(), "session opened");
        Ok(Self {
            engine,
            store,
            system_prompt: system_prompt.into(),
            messages,
            session_id,
            generating: false,
            stop: StopHandle::new(),
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Handle for cancelling the in-flight generation from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Appends a user message and generates the assistant reply.
    ///
    /// `on_delta` is invoked with each text fragment as it arrives, for
    /// incremental display; the transcript is the source of truth.
    pub async fn submit(
        &mut self,
        input: &str,
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<SubmitOutcome> {
        let input = input.trim();
        if input.is_empty() || !self.engine.is_ready() {
            return Ok(SubmitOutcome::Ignored);
        }
        if self.generating {
            return Ok(SubmitOutcome::Busy);
        }

        self.messages.push(Message::user(input, self.session_id));
        self.persist()?;
        self.generate(on_delta).await
    }

    /// Regenerates a reply to the most recent user message.
    ///
    /// The original user message is not re-appended; the new reply is added
    /// after the existing transcript.
    pub async fn reload(&mut self, on_delta: &mut dyn FnMut(&str)) -> Result<SubmitOutcome> {
        if self.generating {
            return Ok(SubmitOutcome::Busy);
        }
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return Ok(SubmitOutcome::Ignored);
        }
        self.generate(on_delta).await
    }

    /// Discards the transcript and starts a fresh session id.
    ///
    /// Returns `false` without touching anything while a generation is in
    /// flight.
    pub fn clear(&mut self) -> Result<bool> {
        if self.generating {
            return Ok(false);
        }
        self.messages.clear();
        self.session_id = new_session_id();
        self.store.remove(MESSAGES_KEY)?;
        self.store.remove(SESSION_ID_KEY)?;
        debug!(session_id = self.session_id, "session cleared");
        Ok(true)
    }

    async fn generate(&mut self, on_delta: &mut dyn FnMut(&str)) -> Result<SubmitOutcome> {
        self.generating = true;
        let result = self.run_generation(on_delta).await;
        self.generating = false;
        self.stop.disarm();
        result
    }

    async fn run_generation(&mut self, on_delta: &mut dyn FnMut(&str)) -> Result<SubmitOutcome> {
        let history = self.history();
        self.messages.push(Message::loading(self.session_id));

        let token = CancellationToken::new();
        self.stop.arm(token.clone());

        let mut stream = match self.engine.complete(&history, token.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                self.rollback_reply();
                warn!(kind = %err.kind, "completion request failed: {err}");
                return Ok(SubmitOutcome::Failed(err));
            }
        };

        let mut stopped = false;
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    stopped = true;
                    break;
                }
                event = stream.next() => match event {
                    None => break,
                    Some(Ok(StreamEvent::Delta { text })) => {
                        // A delta may already be buffered when stop lands;
                        // drop it rather than display post-stop text.
                        if token.is_cancelled() {
                            stopped = true;
                            break;
                        }
                        self.apply_delta(&text);
                        on_delta(&text);
                        self.persist_best_effort();
                    }
                    Some(Ok(StreamEvent::Done)) => break,
                    Some(Err(err)) => {
                        self.rollback_reply();
                        warn!(kind = %err.kind, "completion failed mid-stream: {err}");
                        return Ok(SubmitOutcome::Failed(err));
                    }
                },
            }
        }

        self.finalize_reply();
        self.persist()?;
        Ok(if stopped {
            SubmitOutcome::Stopped
        } else {
            SubmitOutcome::Completed
        })
    }

    /// Full conversation context for the engine: system prompt first, then
    /// every transcript message.
    fn history(&self) -> Vec<ChatMessage> {
        let mut history = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_prompt.is_empty() {
            history.push(ChatMessage::system(self.system_prompt.clone()));
        }
        history.extend(
            self.messages
                .iter()
                .map(|m| ChatMessage::new(m.role, m.content.clone())),
        );
        history
    }

    fn apply_delta(&mut self, text: &str) {
        if let Some(last) = self.messages.last_mut() {
            last.is_loading = false;
            last.content.push_str(text);
        }
    }

    /// Settles the trailing reply after the stream ends.
    ///
    /// The reply is kept even when empty (stop before the first delta, or a
    /// stream that produced no text) so every user message keeps exactly one
    /// assistant message after it.
    fn finalize_reply(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            last.is_loading = false;
        }
    }

    fn persist_best_effort(&mut self) {
        if let Err(err) = self.persist() {
            warn!("failed to persist transcript: {err:#}");
        }
    }

    /// Removes the in-progress reply after an engine failure, leaving the
    /// transcript at the last user message.
    fn rollback_reply(&mut self) {
        self.messages.pop();
        self.persist_best_effort();
    }

    fn persist(&mut self) -> Result<()> {
        let serialized =
            serde_json::to_string(&self.messages).context("failed to serialize messages")?;
        self.store.set(MESSAGES_KEY, &serialized)?;
        self.store.set(SESSION_ID_KEY, &self.session_id.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::engine::{
        CompletionStream, EngineErrorKind, EngineResult, SimulatedEngine,
    };
    use crate::models::ModelInfo;
    use crate::store::MemoryStore;

    /// Engine that replays a fixed event script, ignoring history.
    #[derive(Clone)]
    struct ScriptedEngine {
        events: Vec<EngineResult<StreamEvent>>,
        fail_request: Option<EngineError>,
        ready: bool,
    }

    impl ScriptedEngine {
        fn replying(text: &str) -> Self {
            let mut events: Vec<EngineResult<StreamEvent>> = text
                .split_inclusive(' ')
                .map(|chunk| Ok(StreamEvent::Delta { text: chunk.to_string() }))
                .collect();
            events.push(Ok(StreamEvent::Done));
            Self { events, fail_request: None, ready: true }
        }

        fn not_ready() -> Self {
            let mut engine = Self::replying("unused");
            engine.ready = false;
            engine
        }

        fn failing_upfront(err: EngineError) -> Self {
            Self { events: Vec::new(), fail_request: Some(err), ready: true }
        }

        fn failing_after(text: &str, err: EngineError) -> Self {
            let mut engine = Self::replying(text);
            engine.events.pop();
            engine.events.push(Err(err));
            engine
        }
    }

    impl InferenceEngine for ScriptedEngine {
        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn load(
            &mut self,
            _model: &ModelInfo,
            _on_progress: &mut (dyn FnMut(f64) + Send),
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn complete(
            &self,
            _history: &[ChatMessage],
            _cancel: CancellationToken,
        ) -> EngineResult<CompletionStream> {
            if let Some(err) = &self.fail_request {
                return Err(err.clone());
            }
            Ok(stream::iter(self.events.clone()).boxed())
        }
    }

    fn session(engine: ScriptedEngine) -> SessionController<ScriptedEngine, MemoryStore> {
        SessionController::open(engine, MemoryStore::new(), "You are a helpful AI assistant.")
            .unwrap()
    }

    fn sink() -> impl FnMut(&str) {
        |_: &str| {}
    }

    #[tokio::test]
    async fn test_submit_appends_user_and_assistant() {
        let mut session = session(ScriptedEngine::replying("Hello there friend"));

        let outcome = session.submit("hi", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Completed);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello there friend");
        assert!(!messages[1].is_loading);
        assert_eq!(messages[0].session_id, session.session_id());
    }

    #[tokio::test]
    async fn test_submit_streams_deltas_in_order() {
        let mut session = session(ScriptedEngine::replying("a b c"));

        let mut seen = Vec::new();
        session
            .submit("go", &mut |delta: &str| seen.push(delta.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["a ", "b ", "c"]);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let mut session = session(ScriptedEngine::replying("unused"));

        let outcome = session.submit("   \n", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Ignored);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_ready_engine_is_ignored() {
        let mut session = session(ScriptedEngine::not_ready());

        let outcome = session.submit("hi", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Ignored);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_submit_while_generating_is_busy() {
        let mut session = session(ScriptedEngine::replying("unused"));
        session.generating = true;

        let outcome = session.submit("hi", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Busy);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_reload_while_generating_is_busy() {
        let mut session = session(ScriptedEngine::replying("first"));
        session.submit("hi", &mut sink()).await.unwrap();
        session.generating = true;

        let outcome = session.reload(&mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Busy);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "first");
    }

    #[tokio::test]
    async fn test_stop_mid_stream_keeps_partial_text() {
        let mut session = session(ScriptedEngine::replying("one two three four"));
        let stop = session.stop_handle();

        let mut deltas = 0;
        let outcome = session
            .submit("hi", &mut |_: &str| {
                deltas += 1;
                if deltas == 2 {
                    assert!(stop.stop());
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::Stopped);
        let reply = session.messages().last().unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "one two ");
        assert!(!reply.is_loading);
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_inert() {
        let mut session = session(ScriptedEngine::replying("fine"));
        assert!(!session.stop_handle().stop());
        assert!(!session.stop_handle().stop());

        let outcome = session.submit("hi", &mut sink()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Completed);
    }

    #[tokio::test]
    async fn test_request_failure_rolls_back_to_user_message() {
        let err = EngineError::new(EngineErrorKind::Completion, "backend exploded");
        let mut session = session(ScriptedEngine::failing_upfront(err.clone()));

        let outcome = session.submit("hi", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Failed(err));
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_drops_partial_reply() {
        let err = EngineError::new(EngineErrorKind::Completion, "stream died");
        let mut session = session(ScriptedEngine::failing_after("partial text", err.clone()));

        let outcome = session.submit("hi", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Failed(err));
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_empty_completion_keeps_settled_reply() {
        let mut session = session(ScriptedEngine::replying(""));

        let outcome = session.submit("hi", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Completed);
        let reply = session.messages().last().unwrap();
        assert_eq!(reply.content, "");
        assert!(!reply.is_loading);
    }

    #[tokio::test]
    async fn test_reload_appends_new_reply() {
        let mut session = session(ScriptedEngine::replying("take two"));
        session.submit("hi", &mut sink()).await.unwrap();

        let outcome = session.reload(&mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Completed);
        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "take two");
    }

    #[tokio::test]
    async fn test_reload_without_user_message_is_ignored() {
        let mut session = session(ScriptedEngine::replying("unused"));

        let outcome = session.reload(&mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Ignored);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_transcript_and_session_id() {
        let mut session = session(ScriptedEngine::replying("bye"));
        session.submit("hi", &mut sink()).await.unwrap();
        let old_id = session.session_id();

        assert!(session.clear().unwrap());

        assert!(session.messages().is_empty());
        // A fresh id is drawn; collisions are possible but the transcript
        // is gone either way.
        let _ = old_id;
        assert!(session.session_id() < 1_000_000);
        assert!(session.store.get(MESSAGES_KEY).unwrap().is_none());
        assert!(session.store.get(SESSION_ID_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_refused_while_generating() {
        let mut session = session(ScriptedEngine::replying("unused"));
        session.submit("hi", &mut sink()).await.unwrap();
        session.generating = true;

        assert!(!session.clear().unwrap());
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_transcript_is_persisted() {
        let mut session = session(ScriptedEngine::replying("saved reply"));
        session.submit("remember this", &mut sink()).await.unwrap();

        let raw = session.store.get(MESSAGES_KEY).unwrap().unwrap();
        let stored: Vec<Message> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "saved reply");
        assert_eq!(
            session.store.get(SESSION_ID_KEY).unwrap().unwrap(),
            session.session_id().to_string()
        );
    }

    #[tokio::test]
    async fn test_open_restores_persisted_transcript() {
        let store = {
            let mut session = session(ScriptedEngine::replying("welcome back"));
            session.submit("hi", &mut sink()).await.unwrap();
            session.store
        };
        let expected_id = store.get(SESSION_ID_KEY).unwrap().unwrap();

        let restored =
            SessionController::open(ScriptedEngine::replying("unused"), store, "prompt").unwrap();

        assert_eq!(restored.messages().len(), 2);
        assert_eq!(restored.messages()[1].content, "welcome back");
        assert_eq!(restored.session_id().to_string(), expected_id);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = crate::store::FileStore::new(dir.path());

        let (expected, store) = {
            let mut session =
                SessionController::open(ScriptedEngine::replying("on disk"), store, "prompt")
                    .unwrap();
            session.submit("hi", &mut sink()).await.unwrap();
            (
                (session.session_id(), session.messages().to_vec()),
                session.store,
            )
        };

        let restored =
            SessionController::open(ScriptedEngine::replying("unused"), store, "prompt").unwrap();
        assert_eq!(restored.session_id(), expected.0);
        assert_eq!(restored.messages(), expected.1.as_slice());
    }

    #[tokio::test]
    async fn test_open_drops_stale_loading_placeholder() {
        let mut store = MemoryStore::new();
        let stale = vec![
            Message::user("hi", 42),
            Message::loading(42),
        ];
        store
            .set(MESSAGES_KEY, &serde_json::to_string(&stale).unwrap())
            .unwrap();
        store.set(SESSION_ID_KEY, "42").unwrap();

        let restored =
            SessionController::open(ScriptedEngine::replying("unused"), store, "prompt").unwrap();

        assert_eq!(restored.messages().len(), 1);
        assert_eq!(restored.messages()[0].content, "hi");
        assert_eq!(restored.session_id(), 42);
    }

    #[tokio::test]
    async fn test_history_includes_system_prompt_and_transcript() {
        let mut session = session(ScriptedEngine::replying("first"));
        session.submit("question", &mut sink()).await.unwrap();

        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1], ChatMessage::user("question"));
        assert_eq!(history[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_works_with_the_simulated_engine() {
        let mut engine = SimulatedEngine::new(std::time::Duration::from_millis(1), std::time::Duration::ZERO);
        let model = ModelInfo::find_by_id("mistral-7b").unwrap();
        engine.load(model, &mut |_| {}).await.unwrap();

        let mut session =
            SessionController::open(engine, MemoryStore::new(), "prompt").unwrap();
        let outcome = session.submit("hello", &mut sink()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Completed);
        assert!(session.messages()[1].content.contains("Mistral 7B"));
    }
}
