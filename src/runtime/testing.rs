//! Mock implementations for testing
//!
//! These mocks drive the dispatcher and pipeline without sockets or SQLite.

use super::traits::*;
use super::{Dispatcher, FrameSender, InterruptCoordinator, RelayServices};
use crate::db::{DbError, Sender};
use crate::upstream::{UpstreamError, UpstreamErrorKind, UpstreamRequest, UpstreamStream};
use crate::wire::FinalResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// ============================================================================
// Scripted Upstream
// ============================================================================

/// Upstream that replays a fixed list of payloads
pub struct ScriptedUpstream {
    payloads: Vec<String>,
    delay: Duration,
    hold_open: bool,
    failure: Option<(UpstreamErrorKind, String)>,
    requests: Mutex<Vec<UpstreamRequest>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedUpstream {
    pub fn new<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payloads: payloads.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            hold_open: false,
            failure: None,
            requests: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Upstream that refuses every connection
    pub fn failing(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some((kind, message.into())),
            ..Self::new(Vec::<String>::new())
        }
    }

    /// Wait this long before each payload
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keep the connection open after the last payload until it is abandoned
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn recorded_requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Connections whose reader task has exited
    pub fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn forward(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some((kind, message)) = &self.failure {
            return Err(UpstreamError::new(*kind, message.clone()));
        }

        let (tx, rx) = mpsc::channel(16);
        let payloads = self.payloads.clone();
        let delay = self.delay;
        let hold_open = self.hold_open;
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            for payload in payloads {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            if hold_open {
                tx.closed().await;
            }
            closed.fetch_add(1, Ordering::SeqCst);
        });

        Ok(ReceiverStream::new(rx))
    }
}

// ============================================================================
// In-memory Store
// ============================================================================

/// Message store backed by a map
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<HashMap<String, Vec<(Sender, String)>>>,
    activity: Mutex<HashMap<String, usize>>,
    write_delay: Duration,
    fail: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes always fail
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every insert takes this long
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn messages(&self, chat_id: &str) -> Vec<(Sender, String)> {
        self.messages
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn activity_updates(&self, chat_id: &str) -> usize {
        self.activity
            .lock()
            .unwrap()
            .get(chat_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert_message(
        &self,
        chat_id: &str,
        sender: Sender,
        content: &str,
    ) -> Result<(), DbError> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        if self.fail {
            return Err(DbError::ChatNotFound(chat_id.to_string()));
        }
        self.messages
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_default()
            .push((sender, content.to_string()));
        Ok(())
    }

    async fn update_last_activity(&self, chat_id: &str) -> Result<(), DbError> {
        if self.fail {
            return Err(DbError::ChatNotFound(chat_id.to_string()));
        }
        *self
            .activity
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_default() += 1;
        Ok(())
    }
}

// ============================================================================
// Static Directory
// ============================================================================

/// Project → database mapping held in a map
#[derive(Default)]
pub struct StaticDirectory {
    links: Mutex<HashMap<String, String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(self, project_id: &str, database_id: &str) -> Self {
        self.links
            .lock()
            .unwrap()
            .insert(project_id.to_string(), database_id.to_string());
        self
    }

    pub fn link(&self, project_id: &str) -> Option<String> {
        self.links.lock().unwrap().get(project_id).cloned()
    }
}

#[async_trait]
impl ProjectDirectory for StaticDirectory {
    async fn database_id_for_project(&self, project_id: &str) -> Result<Option<String>, DbError> {
        Ok(self.link(project_id))
    }

    async fn link_project_database(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> Result<(), DbError> {
        self.links
            .lock()
            .unwrap()
            .insert(project_id.to_string(), database_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Dispatcher scenarios
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::state_machine::GenerationState;
    use crate::wire::INTERRUPTED_STATUS;
    use futures::stream;
    use serde_json::Value;
    use tokio::time::timeout;

    const CHAT_ID: &str = "6f1c2c8e-58a4-4b8e-9a52-2f1f3f0c1d11";
    const PROJECT_ID: &str = "0b7d3a52-1d8e-4c4f-8d2e-3b1f4e5a6c7d";
    const QUESTION: &str = r#"{"question":"Where are the parks?","dbUsed":true,"database_id":"db-1","user_id":"user-1"}"#;
    const POINTS_PAYLOAD: &str = r#"{"response":"The answer is 42","geo_objects":{"points":{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[1,2]},"properties":{}}]}}}"#;

    struct Harness {
        upstream: Arc<ScriptedUpstream>,
        store: Arc<InMemoryStore>,
        coordinator: InterruptCoordinator,
        dispatcher: Dispatcher,
        rx: mpsc::Receiver<FinalResponse>,
    }

    fn harness(upstream: ScriptedUpstream, identity: Option<&str>) -> Harness {
        harness_with(
            upstream,
            identity,
            Arc::new(StaticDirectory::new()),
            InMemoryStore::new(),
        )
    }

    fn harness_with(
        upstream: ScriptedUpstream,
        identity: Option<&str>,
        directory: Arc<StaticDirectory>,
        store: InMemoryStore,
    ) -> Harness {
        let upstream = Arc::new(upstream);
        let store = Arc::new(store);
        let services = RelayServices::new(upstream.clone(), directory, store.clone());
        let coordinator = InterruptCoordinator::new();
        let (frames, rx) = FrameSender::channel(8);
        let dispatcher = Dispatcher::new(
            CHAT_ID,
            identity.map(str::to_string),
            coordinator.clone(),
            services,
            frames,
        );
        Harness {
            upstream,
            store,
            coordinator,
            dispatcher,
            rx,
        }
    }

    fn frames_of(raw: &[&str]) -> stream::Iter<std::vec::IntoIter<String>> {
        stream::iter(raw.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
    }

    /// Collect frames until every sender is gone
    async fn drain(rx: &mut mpsc::Receiver<FinalResponse>) -> Vec<FinalResponse> {
        let mut out = Vec::new();
        while let Some(frame) = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("pipeline did not finish")
        {
            out.push(frame);
        }
        out
    }

    async fn next_frame(rx: &mut mpsc::Receiver<FinalResponse>) -> FinalResponse {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no frame arrived")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_natural_completion_persists_full_answer() {
        let Harness {
            upstream,
            store,
            coordinator,
            dispatcher,
            mut rx,
        } = harness(
            ScriptedUpstream::new([r#"{"status":"thinking"}"#, POINTS_PAYLOAD]),
            None,
        );

        dispatcher.run(frames_of(&[QUESTION])).await;
        let frames = drain(&mut rx).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].to_json().unwrap(), r#"{"status":"thinking"}"#);
        assert_eq!(frames[1].answer_text(), Some("The answer is 42"));
        assert_eq!(
            frames[1].geo_json.as_ref().unwrap()["features"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
        assert!(frames.iter().all(|f| !f.interrupted));

        assert_eq!(
            store.messages(CHAT_ID),
            vec![
                (Sender::You, "Where are the parks?".to_string()),
                (Sender::Ai, "The answer is 42".to_string())
            ]
        );
        assert_eq!(store.activity_updates(CHAT_ID), 1);
        assert!(coordinator.state().is_idle());

        let requests = upstream.recorded_requests();
        assert_eq!(requests.len(), 1);
        let sent: Value = serde_json::to_value(&requests[0]).unwrap();
        assert_eq!(sent["question"], "Where are the parks?");
        assert_eq!(sent["message"], "Where are the parks?");
        assert_eq!(sent["dbUsed"], true);
        assert_eq!(sent["docsUsed"], false);
        assert_eq!(sent["database_id"], "db-1");
        assert_eq!(sent["user_id"], "user-1");
        assert_eq!(sent["chat_id"], CHAT_ID);
    }

    #[tokio::test]
    async fn test_status_only_is_relayed_but_not_persisted() {
        let Harness {
            store,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new([r#"{"status":"thinking"}"#]), None);

        dispatcher.run(frames_of(&[QUESTION])).await;
        let frames = drain(&mut rx).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].to_json().unwrap(), r#"{"status":"thinking"}"#);
        assert!(store.messages(CHAT_ID).is_empty());
        assert_eq!(store.activity_updates(CHAT_ID), 0);
    }

    #[tokio::test]
    async fn test_interrupt_while_idle_sends_nothing() {
        let Harness {
            upstream,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new(Vec::<String>::new()), None);

        dispatcher
            .run(frames_of(&[r#"{"interrupt":true}"#, "{}"]))
            .await;

        assert!(drain(&mut rx).await.is_empty());
        assert!(upstream.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_before_first_payload() {
        let Harness {
            upstream,
            store,
            coordinator,
            dispatcher,
            mut rx,
        } = harness(
            ScriptedUpstream::new([r#"{"response":"too late"}"#])
                .with_delay(Duration::from_secs(30))
                .held_open(),
            None,
        );

        dispatcher
            .run(frames_of(&[QUESTION, r#"{"interrupt":true}"#]))
            .await;
        let frames = drain(&mut rx).await;

        assert_eq!(frames.len(), 1);
        let value: Value = serde_json::from_str(&frames[0].to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": INTERRUPTED_STATUS, "interrupted": true})
        );
        assert!(store.messages(CHAT_ID).is_empty());
        assert!(coordinator.state().is_idle());
        assert!(upstream.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_mid_generation_keeps_partial_answer() {
        let Harness {
            upstream,
            store,
            coordinator,
            dispatcher,
            mut rx,
        } = harness(
            ScriptedUpstream::new([r#"{"status":"searching"}"#, r#"{"response":"Partial"}"#])
                .held_open(),
            None,
        );

        let (input_tx, input_rx) = mpsc::channel::<String>(4);
        let dispatch = tokio::spawn(dispatcher.run(ReceiverStream::new(input_rx)));

        input_tx.send(QUESTION.to_string()).await.unwrap();
        assert_eq!(next_frame(&mut rx).await.status.as_deref(), Some("searching"));
        assert_eq!(next_frame(&mut rx).await.answer_text(), Some("Partial"));

        input_tx
            .send(r#"{"interrupt":true}"#.to_string())
            .await
            .unwrap();
        let last = next_frame(&mut rx).await;
        assert!(last.interrupted);
        assert_eq!(last.status.as_deref(), Some(INTERRUPTED_STATUS));
        assert_eq!(last.answer_text(), Some("Partial"));

        drop(input_tx);
        dispatch.await.unwrap();
        assert!(drain(&mut rx).await.is_empty());

        assert_eq!(
            store.messages(CHAT_ID),
            vec![
                (Sender::You, "Where are the parks?".to_string()),
                (Sender::Ai, "Partial".to_string())
            ]
        );
        assert!(coordinator.state().is_idle());

        // Abandoned upstream connection is closed
        for _ in 0..50 {
            if upstream.closed_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(upstream.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_second_question_while_active_is_rejected() {
        let Harness {
            upstream,
            coordinator,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new(Vec::<String>::new()).held_open(), None);

        let (input_tx, input_rx) = mpsc::channel::<String>(4);
        let dispatch = tokio::spawn(dispatcher.run(ReceiverStream::new(input_rx)));

        input_tx.send(QUESTION.to_string()).await.unwrap();
        input_tx.send(QUESTION.to_string()).await.unwrap();

        let rejection = next_frame(&mut rx).await;
        assert!(rejection
            .status
            .as_deref()
            .unwrap()
            .starts_with("Error: A generation is already in progress"));
        assert!(!rejection.interrupted);

        assert_eq!(coordinator.request_interrupt(), Some(1));
        assert!(next_frame(&mut rx).await.interrupted);

        drop(input_tx);
        dispatch.await.unwrap();
        assert!(drain(&mut rx).await.is_empty());
        assert_eq!(upstream.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_becomes_error_frame() {
        let Harness {
            store,
            coordinator,
            dispatcher,
            mut rx,
            ..
        } = harness(
            ScriptedUpstream::failing(UpstreamErrorKind::Dial, "connection refused"),
            None,
        );

        dispatcher.run(frames_of(&[QUESTION])).await;
        let frames = drain(&mut rx).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].status.as_deref(), Some("Error: connection refused"));
        assert!(store.messages(CHAT_ID).is_empty());
        assert!(coordinator.state().is_idle());
    }

    #[tokio::test]
    async fn test_database_resolved_from_project() {
        let Harness {
            upstream,
            dispatcher,
            mut rx,
            ..
        } = harness_with(
            ScriptedUpstream::new([r#"{"response":"ok"}"#]),
            Some("session-user"),
            Arc::new(StaticDirectory::new().with_link(PROJECT_ID, "db-from-project")),
            InMemoryStore::new(),
        );

        let question = format!(
            r#"{{"message":"legacy text","project_id":"{PROJECT_ID}","user_id":"frame-user"}}"#
        );
        dispatcher.run(frames_of(&[question.as_str()])).await;
        assert_eq!(drain(&mut rx).await.len(), 1);

        let request = &upstream.recorded_requests()[0];
        assert_eq!(request.question(), "legacy text");
        assert_eq!(request.database_id(), "db-from-project");
        assert_eq!(request.user_id(), "session-user");
    }

    #[tokio::test]
    async fn test_project_database_is_learned_from_full_frames() {
        let directory = Arc::new(StaticDirectory::new());
        let Harness {
            dispatcher, mut rx, ..
        } = harness_with(
            ScriptedUpstream::new([r#"{"response":"ok"}"#]),
            Some("u"),
            directory.clone(),
            InMemoryStore::new(),
        );

        let question = format!(
            r#"{{"question":"q","database_id":"db-7","project_id":"{}"}}"#,
            PROJECT_ID.to_uppercase()
        );
        dispatcher.run(frames_of(&[question.as_str()])).await;
        assert_eq!(drain(&mut rx).await.len(), 1);
        assert_eq!(directory.link(PROJECT_ID).as_deref(), Some("db-7"));
    }

    #[tokio::test]
    async fn test_fresh_database_persists_turn() {
        let db = Database::open_in_memory().unwrap();
        let storage = Arc::new(DatabaseStorage::new(db.clone()));
        let services = RelayServices::new(
            Arc::new(ScriptedUpstream::new([r#"{"response":"The answer is 42"}"#])),
            storage.clone(),
            storage,
        );
        let (frames, mut rx) = FrameSender::channel(8);
        let dispatcher = Dispatcher::new(
            CHAT_ID,
            None,
            InterruptCoordinator::new(),
            services,
            frames,
        );

        dispatcher.run(frames_of(&[QUESTION])).await;
        let frames = drain(&mut rx).await;
        assert_eq!(frames[0].answer_text(), Some("The answer is 42"));

        let messages = db.get_messages(CHAT_ID).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Where are the parks?");
        assert_eq!(messages[1].content, "The answer is 42");
        assert_eq!(db.get_chat(CHAT_ID).unwrap().user_id, "user-1");
    }

    #[tokio::test]
    async fn test_follow_up_accepted_while_previous_turn_is_stored() {
        let Harness {
            store,
            dispatcher,
            mut rx,
            ..
        } = harness_with(
            ScriptedUpstream::new([r#"{"response":"first"}"#]),
            None,
            Arc::new(StaticDirectory::new()),
            InMemoryStore::new().with_write_delay(Duration::from_millis(100)),
        );

        let (input_tx, input_rx) = mpsc::channel::<String>(4);
        let dispatch = tokio::spawn(dispatcher.run(ReceiverStream::new(input_rx)));

        input_tx.send(QUESTION.to_string()).await.unwrap();
        assert_eq!(next_frame(&mut rx).await.answer_text(), Some("first"));

        input_tx.send(QUESTION.to_string()).await.unwrap();
        let second = next_frame(&mut rx).await;
        assert_eq!(second.answer_text(), Some("first"));
        assert!(second.status.is_none());

        drop(input_tx);
        dispatch.await.unwrap();
        assert!(drain(&mut rx).await.is_empty());
        assert_eq!(store.messages(CHAT_ID).len(), 4);
    }

    #[tokio::test]
    async fn test_unresolvable_identifiers_become_error_frames() {
        let Harness {
            upstream,
            store,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new([r#"{"response":"never"}"#]), Some("u"));

        let (input_tx, input_rx) = mpsc::channel::<String>(4);
        let dispatch = tokio::spawn(dispatcher.run(ReceiverStream::new(input_rx)));

        input_tx
            .send(r#"{"question":"q","project_id":"not-a-uuid"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut rx).await.status.as_deref(),
            Some("Error: invalid project id: not-a-uuid")
        );

        input_tx
            .send(format!(r#"{{"question":"q","project_id":"{PROJECT_ID}"}}"#))
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut rx).await.status.as_deref(),
            Some(format!("Error: no database linked to project {PROJECT_ID}").as_str())
        );

        drop(input_tx);
        dispatch.await.unwrap();
        assert!(drain(&mut rx).await.is_empty());
        assert!(upstream.recorded_requests().is_empty());
        assert!(store.messages(CHAT_ID).is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_is_reported() {
        let Harness {
            dispatcher, mut rx, ..
        } = harness(ScriptedUpstream::new([r#"{"response":"x"}"#]), None);

        dispatcher
            .run(frames_of(&[r#"{"question":"q","database_id":"db"}"#]))
            .await;
        let frames = drain(&mut rx).await;
        assert_eq!(
            frames[0].status.as_deref(),
            Some("Error: no user id for this connection")
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_dispatch() {
        let Harness {
            store,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new([r#"{"response":"fine"}"#]), None);

        dispatcher
            .run(frames_of(&["{not json", r#"{"interrupt":"yes"}"#, QUESTION]))
            .await;
        let frames = drain(&mut rx).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].answer_text(), Some("fine"));
        assert_eq!(store.messages(CHAT_ID).len(), 2);
    }

    #[tokio::test]
    async fn test_silent_upstream_still_answers_client() {
        let Harness {
            store,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new(Vec::<String>::new()), None);

        dispatcher.run(frames_of(&[QUESTION])).await;
        let frames = drain(&mut rx).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].status.as_deref(),
            Some("Error: upstream closed without a response")
        );
        assert!(store.messages(CHAT_ID).is_empty());
    }

    #[tokio::test]
    async fn test_latest_answer_wins() {
        let Harness {
            store,
            dispatcher,
            mut rx,
            ..
        } = harness(
            ScriptedUpstream::new([
                r#"{"response":"draft"}"#,
                r#"{"status":"refining"}"#,
                r#"{"response":"final"}"#,
            ]),
            None,
        );

        dispatcher.run(frames_of(&[QUESTION])).await;
        assert_eq!(drain(&mut rx).await.len(), 3);
        assert_eq!(store.messages(CHAT_ID)[1], (Sender::Ai, "final".to_string()));
    }

    #[tokio::test]
    async fn test_coordinator_state_tracks_generation() {
        let Harness {
            coordinator,
            dispatcher,
            mut rx,
            ..
        } = harness(ScriptedUpstream::new(Vec::<String>::new()).held_open(), None);

        let (input_tx, input_rx) = mpsc::channel::<String>(4);
        let dispatch = tokio::spawn(dispatcher.run(ReceiverStream::new(input_rx)));
        input_tx.send(QUESTION.to_string()).await.unwrap();

        for _ in 0..50 {
            if coordinator.state() != GenerationState::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(coordinator.state(), GenerationState::Active { epoch: 1 });

        coordinator.request_interrupt();
        assert!(next_frame(&mut rx).await.interrupted);
        drop(input_tx);
        dispatch.await.unwrap();
        assert!(drain(&mut rx).await.is_empty());
        assert!(coordinator.state().is_idle());
    }
}
