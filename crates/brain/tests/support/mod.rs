//! Shared fixtures: a scripted chat port and in-process fake workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use brain_agent_protocol::AgentMessage;
pub use brain_blackboard::Blackboard;
use brain_chatport::{BoxStream, ChatParams, ChatPort, Chunk};
use brain_core::agents::registry::ConnectedAgent;
use brain_core::bootstrap::{build_state, Collaborators};
use brain_core::state::BrainState;
use brain_domain::config::BrainConfig;
use brain_domain::event::{Actor, AgentRole, Event, EventInput, EventSource, Severity, Turn};
use brain_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted chat port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chat port that replays pre-scripted chunk sequences. Every `chat_send`
/// and `report_tool_result` pops the next script in order; an exhausted
/// queue yields an empty stream.
#[derive(Default)]
pub struct ScriptedChat {
    scripts: Mutex<VecDeque<Vec<Chunk>>>,
    sends: AtomicUsize,
    reports: AtomicUsize,
    generates: AtomicUsize,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, chunks: Vec<Chunk>) {
        self.scripts.lock().push_back(chunks);
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn report_count(&self) -> usize {
        self.reports.load(Ordering::SeqCst)
    }

    pub fn generate_count(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    fn next_stream(&self) -> BoxStream<'static, Result<Chunk>> {
        let chunks = self.scripts.lock().pop_front().unwrap_or_default();
        Box::pin(futures_util::stream::iter(chunks.into_iter().map(Ok)))
    }
}

#[async_trait::async_trait]
impl ChatPort for ScriptedChat {
    async fn create_chat(&self, _system_prompt: &str, _params: &ChatParams) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn chat_send(
        &self,
        _session_id: &str,
        _user_message: &str,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_stream())
    }

    async fn report_tool_result(
        &self,
        _session_id: &str,
        _tool_use_id: &str,
        _result: &str,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        self.reports.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_stream())
    }

    async fn close_chat(&self, _session_id: &str) {}

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _params: &ChatParams,
    ) -> Result<String> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        Err(Error::LlmStream("no generate script".into()))
    }
}

/// Shorthand chunk constructors.
pub fn text(t: &str) -> Chunk {
    Chunk::Text { text: t.into() }
}

pub fn call(name: &str, args: serde_json::Value) -> Chunk {
    Chunk::FunctionCall {
        name: name.into(),
        args,
        tool_use_id: uuid::Uuid::new_v4().to_string(),
    }
}

pub fn done() -> Chunk {
    Chunk::Done
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State & event fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn test_state(chat: Arc<ScriptedChat>) -> BrainState {
    let mut config = BrainConfig::default();
    // Keep unavailability failures fast in tests.
    config.dispatch.availability_wait_secs = 1;
    build_state(
        Arc::new(config),
        Collaborators {
            chat,
            ..Default::default()
        },
    )
    .expect("test state")
}

/// Create an anomaly event with one `aligner/observation` turn (status
/// sent), the way the ingestion layer would.
pub async fn seed_event(state: &BrainState) -> String {
    let ev = Event::new(
        EventSource::AutonomousDetector,
        Some("ingest".into()),
        EventInput {
            reason: "cpu spike on ingest".into(),
            severity: Severity::High,
            domain_hint: None,
            evidence: Some("cpu 97% for 10m".into()),
            created_at: Utc::now(),
        },
    );
    let id = ev.id.clone();
    state.blackboard.create_event(ev).await.unwrap();

    let mut turn = Turn::new(Actor::Aligner, "observation");
    turn.thoughts = Some("cpu spike on ingest".into());
    turn.evidence = Some("cpu 97% for 10m".into());
    state.blackboard.append_turn(&id, turn).await.unwrap();
    id
}

/// Register a fake worker; returns the receiver of its outbound messages.
pub fn connect_worker(
    state: &BrainState,
    agent_id: &str,
    role: AgentRole,
) -> mpsc::Receiver<AgentMessage> {
    let (tx, rx) = mpsc::channel(16);
    state.agents.register(ConnectedAgent {
        agent_id: agent_id.into(),
        role,
        busy: false,
        current_event_id: None,
        current_task_id: None,
        connected_at: Utc::now(),
        last_seen: Utc::now(),
        caps: vec![],
        sink: tx,
    });
    rx
}

/// Await the next `task` message sent to a worker.
pub async fn expect_task(rx: &mut mpsc::Receiver<AgentMessage>) -> (String, String) {
    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("worker received no message in time")
        .expect("worker channel closed");
    match msg {
        AgentMessage::Task {
            task_id, event_id, ..
        } => (task_id, event_id),
        other => panic!("expected task, got {other:?}"),
    }
}

/// Poll until `f` returns true or a 5 s budget runs out.
pub async fn wait_until<F, Fut>(mut f: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if f().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within 5s");
}
