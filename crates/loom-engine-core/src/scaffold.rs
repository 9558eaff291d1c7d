//! # Scaffold
//!
//! The session-lifecycle owner. One scaffold holds the stores, the bus,
//! the provider registry, the workflow registry, and the process
//! execution mode (`live` or `playback`), which is fixed at
//! construction. All
//! session operations (create, pause, resume, abort, fork, delete, reply)
//! go through here; the scaffold spawns one runtime task per running
//! session and talks to it over its command channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::event::bus::{EventBus, EventSubscription};
use crate::event::snapshot::StateSnapshotStore;
use crate::event::store::{EventStore, InMemoryEventStore};
use crate::event::{Event, EventName, EventRecord, NarrativeImportance};
use crate::hub::SessionHub;
use crate::provider::recorder::{InMemoryRecorder, ProviderRecorder, RecordingEntry};
use crate::provider::registry::ProviderRegistry;
use crate::provider::{AgentProvider, ExecutionMode};
use crate::runtime::{
    RunOutcome, RuntimeCommand, RuntimeContext, RuntimeOptions, WorkflowRuntime,
};
use crate::state::{compute_state_at, SessionStatus};
use crate::workflow::{PromptReply, WorkflowDefinition};

/// Result of forking a session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ForkOutcome {
    pub session_id: Uuid,
    pub events_copied: usize,
}

struct SessionHandle {
    workflow: String,
    commands: mpsc::Sender<RuntimeCommand>,
    join: JoinHandle<Result<RunOutcome>>,
}

pub struct ScaffoldBuilder {
    mode: ExecutionMode,
    store: Option<Arc<dyn EventStore>>,
    snapshots: Option<Arc<dyn StateSnapshotStore>>,
    recorder: Option<Arc<dyn ProviderRecorder>>,
    options: RuntimeOptions,
    bus: Option<EventBus>,
    workflows: Vec<Arc<WorkflowDefinition>>,
    providers: Vec<Arc<dyn AgentProvider>>,
}

impl ScaffoldBuilder {
    pub fn new() -> Self {
        Self {
            mode: ExecutionMode::Live,
            store: None,
            snapshots: None,
            recorder: None,
            options: RuntimeOptions::default(),
            bus: None,
            workflows: Vec::new(),
            providers: Vec::new(),
        }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn snapshots(mut self, snapshots: Arc<dyn StateSnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn ProviderRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn runtime_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn register_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.push(Arc::new(workflow));
        self
    }

    pub fn register_provider(mut self, provider: Arc<dyn AgentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Scaffold {
        let registry = ProviderRegistry::new();
        for provider in self.providers {
            registry.register(provider);
        }
        let workflows: HashMap<String, Arc<WorkflowDefinition>> = self
            .workflows
            .into_iter()
            .map(|wf| (wf.name.clone(), wf))
            .collect();
        Scaffold {
            inner: Arc::new(ScaffoldInner {
                mode: self.mode,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryEventStore::new())),
                snapshots: self.snapshots,
                recorder: self
                    .recorder
                    .unwrap_or_else(|| Arc::new(InMemoryRecorder::new())),
                options: self.options,
                bus: self.bus.unwrap_or_default(),
                registry,
                workflows: RwLock::new(workflows),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for ScaffoldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ScaffoldInner {
    mode: ExecutionMode,
    store: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn StateSnapshotStore>>,
    recorder: Arc<dyn ProviderRecorder>,
    options: RuntimeOptions,
    bus: EventBus,
    registry: ProviderRegistry,
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

/// Cloneable handle to the session manager.
#[derive(Clone)]
pub struct Scaffold {
    inner: Arc<ScaffoldInner>,
}

impl Scaffold {
    pub fn builder() -> ScaffoldBuilder {
        ScaffoldBuilder::new()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.mode
    }

    pub fn register_workflow(&self, workflow: WorkflowDefinition) {
        let mut workflows = self.inner.workflows.write().expect("workflow registry poisoned");
        workflows.insert(workflow.name.clone(), Arc::new(workflow));
    }

    pub fn workflow(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        let workflows = self.inner.workflows.read().expect("workflow registry poisoned");
        workflows.get(name).cloned()
    }

    pub fn workflow_names(&self) -> Vec<String> {
        let workflows = self.inner.workflows.read().expect("workflow registry poisoned");
        let mut names: Vec<String> = workflows.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    fn runtime_context(&self) -> RuntimeContext {
        RuntimeContext {
            store: self.inner.store.clone(),
            snapshots: self.inner.snapshots.clone(),
            recorder: self.inner.recorder.clone(),
            mode: self.inner.mode,
            bus: self.inner.bus.clone(),
            options: self.inner.options.clone(),
        }
    }

    fn spawn_runtime(
        &self,
        session_id: Uuid,
        workflow: Arc<WorkflowDefinition>,
        input: Option<Value>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel(64);
        let runtime = WorkflowRuntime::new(session_id, self.runtime_context(), rx);
        let workflow_name = workflow.name.clone();
        let join = tokio::spawn(async move {
            let result = match input {
                Some(input) => runtime.execute(workflow, input).await,
                None => runtime.resume(workflow).await,
            };
            if let Err(err) = &result {
                error!(%session_id, %err, "runtime task failed");
            }
            result
        });
        SessionHandle {
            workflow: workflow_name,
            commands: tx,
            join,
        }
    }

    /// Allocate a session and start its runtime in the background.
    pub async fn create_session(&self, workflow_name: &str, input: Value) -> Result<Uuid> {
        let workflow = self
            .workflow(workflow_name)
            .ok_or_else(|| CoreError::WorkflowNotFound {
                name: workflow_name.to_string(),
            })?;
        let session_id = Uuid::new_v4();
        let handle = self.spawn_runtime(session_id, workflow, Some(input));
        self.inner.sessions.lock().await.insert(session_id, handle);
        info!(%session_id, workflow = workflow_name, "session created");
        Ok(session_id)
    }

    async fn has_handle(&self, session_id: Uuid) -> bool {
        self.inner.sessions.lock().await.contains_key(&session_id)
    }

    /// Whether a runtime task is currently live for the session.
    pub async fn is_running(&self, session_id: Uuid) -> bool {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(&session_id)
            .map(|h| !h.join.is_finished())
            .unwrap_or(false)
    }

    pub async fn status(&self, session_id: Uuid) -> Result<SessionStatus> {
        let events = self.inner.store.events(session_id).await?;
        if events.is_empty() {
            if self.has_handle(session_id).await {
                // Spawned but nothing appended yet.
                return Ok(SessionStatus::Pending);
            }
            return Err(CoreError::SessionNotFound { session_id });
        }
        Ok(SessionStatus::from_events(&events))
    }

    /// State at `position` (event count), or current state when `None`.
    /// The snapshot store is consulted as a fast path for current state;
    /// replay of the log settles any disagreement.
    pub async fn state(&self, session_id: Uuid, position: Option<u64>) -> Result<Option<Value>> {
        let events = self.inner.store.events(session_id).await?;
        if events.is_empty() && !self.has_handle(session_id).await {
            return Err(CoreError::SessionNotFound { session_id });
        }

        if position.is_none() {
            if let Some(snapshots) = &self.inner.snapshots {
                if let Ok(Some(snapshot)) = snapshots.latest(session_id).await {
                    let upto = snapshot.position.min(events.len() as u64) as usize;
                    let newer_intent = events[upto..]
                        .iter()
                        .any(|e| e.name == EventName::StateUpdated);
                    if !newer_intent && upto == snapshot.position as usize {
                        return Ok(Some(snapshot.state));
                    }
                }
            }
        }

        let n = position.unwrap_or(events.len() as u64) as usize;
        Ok(compute_state_at(&events, n))
    }

    pub async fn events(&self, session_id: Uuid) -> Result<Vec<Event>> {
        self.inner.store.events(session_id).await
    }

    pub async fn events_from(&self, session_id: Uuid, position: u64) -> Result<Vec<Event>> {
        self.inner.store.events_from(session_id, position).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Uuid>> {
        self.inner.store.list_sessions().await
    }

    /// Live event feed for one session.
    pub fn subscribe(&self, session_id: Uuid) -> EventSubscription {
        self.inner.bus.subscribe(session_id)
    }

    pub fn subscribe_all(&self) -> EventSubscription {
        self.inner.bus.subscribe_all()
    }

    pub fn hub(&self, session_id: Uuid) -> SessionHub {
        SessionHub::new(self.clone(), session_id)
    }

    /// Cooperatively pause a running session. Returns whether the session
    /// ended up paused (a session that completed first reports `false`).
    pub async fn pause(&self, session_id: Uuid) -> Result<bool> {
        let handle = self.inner.sessions.lock().await.remove(&session_id);
        let Some(handle) = handle else {
            // No live runtime; the session must at least exist.
            if self.inner.store.events(session_id).await?.is_empty() {
                return Err(CoreError::SessionNotFound { session_id });
            }
            return Ok(false);
        };

        let _ = handle.commands.send(RuntimeCommand::Pause).await;
        match handle.join.await {
            Ok(Ok(outcome)) => {
                info!(%session_id, completed = outcome.completed, "pause settled");
            }
            Ok(Err(err)) => warn!(%session_id, %err, "runtime ended with error during pause"),
            Err(err) => warn!(%session_id, %err, "runtime task panicked during pause"),
        }

        let events = self.inner.store.events(session_id).await?;
        Ok(SessionStatus::from_events(&events) == SessionStatus::Paused)
    }

    /// Resume a paused (or interrupted) session from its event log.
    pub async fn resume(&self, session_id: Uuid) -> Result<bool> {
        {
            let sessions = self.inner.sessions.lock().await;
            if let Some(handle) = sessions.get(&session_id) {
                if !handle.join.is_finished() {
                    return Ok(false);
                }
            }
        }

        let events = self.inner.store.events(session_id).await?;
        if events.is_empty() {
            return Err(CoreError::SessionNotFound { session_id });
        }
        let status = SessionStatus::from_events(&events);
        if status.is_terminal() {
            return Ok(false);
        }

        let workflow_name = events
            .iter()
            .find(|e| e.name == EventName::WorkflowStarted)
            .and_then(|e| e.payload.get("workflow_name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidSessionState {
                session_id,
                message: "no workflow:started event to resume from".to_string(),
            })?
            .to_string();
        let workflow = self
            .workflow(&workflow_name)
            .ok_or(CoreError::WorkflowNotFound {
                name: workflow_name,
            })?;

        let handle = self.spawn_runtime(session_id, workflow, None);
        self.inner.sessions.lock().await.insert(session_id, handle);
        info!(%session_id, "session resumed");
        Ok(true)
    }

    /// Cooperatively abort a session.
    pub async fn abort(&self, session_id: Uuid, reason: Option<String>) -> Result<bool> {
        let handle = self.inner.sessions.lock().await.remove(&session_id);
        let Some(handle) = handle else {
            if self.inner.store.events(session_id).await?.is_empty() {
                return Err(CoreError::SessionNotFound { session_id });
            }
            return Ok(false);
        };

        let _ = handle.commands.send(RuntimeCommand::Abort { reason }).await;
        match handle.join.await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(%session_id, %err, "runtime ended with error during abort"),
            Err(err) => warn!(%session_id, %err, "runtime task panicked during abort"),
        }
        Ok(true)
    }

    /// Resolve an outstanding prompt by id.
    pub async fn reply(
        &self,
        session_id: Uuid,
        prompt_id: Uuid,
        content: String,
        choice: Option<String>,
    ) -> Result<()> {
        let sessions = self.inner.sessions.lock().await;
        let handle = sessions
            .get(&session_id)
            .ok_or(CoreError::SessionNotFound { session_id })?;
        handle
            .commands
            .send(RuntimeCommand::Reply(PromptReply {
                prompt_id,
                content,
                choice,
            }))
            .await
            .map_err(|_| CoreError::InvalidSessionState {
                session_id,
                message: "session is not accepting input".to_string(),
            })
    }

    /// Resolve the most recent unanswered prompt. Returns its id.
    pub async fn reply_latest(
        &self,
        session_id: Uuid,
        content: String,
        choice: Option<String>,
    ) -> Result<Uuid> {
        let events = self.inner.store.events(session_id).await?;
        if events.is_empty() {
            return Err(CoreError::SessionNotFound { session_id });
        }
        let answered: Vec<&str> = events
            .iter()
            .filter(|e| e.name == EventName::SessionReply)
            .filter_map(|e| e.payload.get("prompt_id").and_then(|v| v.as_str()))
            .collect();
        let prompt_id = events
            .iter()
            .rev()
            .filter(|e| e.name == EventName::SessionPrompt)
            .filter_map(|e| e.payload.get("prompt_id").and_then(|v| v.as_str()))
            .find(|id| !answered.contains(id))
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| CoreError::InvalidSessionState {
                session_id,
                message: "no unanswered prompt".to_string(),
            })?;
        self.reply(session_id, prompt_id, content, choice).await?;
        Ok(prompt_id)
    }

    /// Route a coarse message to the running workflow's handler.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        target: Option<String>,
        body: Value,
    ) -> Result<()> {
        let sessions = self.inner.sessions.lock().await;
        let handle = sessions
            .get(&session_id)
            .ok_or(CoreError::SessionNotFound { session_id })?;
        handle
            .commands
            .send(RuntimeCommand::Message { target, body })
            .await
            .map_err(|_| CoreError::InvalidSessionState {
                session_id,
                message: "session is not accepting messages".to_string(),
            })
    }

    /// Copy a session's full log into a fresh session. Event ids are
    /// regenerated, payloads and timestamps are preserved, and the fork
    /// does not start executing.
    pub async fn fork(&self, session_id: Uuid) -> Result<ForkOutcome> {
        let events = self.inner.store.events(session_id).await?;
        if events.is_empty() {
            return Err(CoreError::SessionNotFound { session_id });
        }
        let new_session = Uuid::new_v4();
        for event in &events {
            self.inner
                .store
                .append(new_session, EventRecord::copy_of(event))
                .await?;
        }
        info!(source = %session_id, fork = %new_session, events = events.len(), "session forked");
        Ok(ForkOutcome {
            session_id: new_session,
            events_copied: events.len(),
        })
    }

    /// Append an informational narrative event to a session log.
    pub async fn narrate(
        &self,
        session_id: Uuid,
        importance: NarrativeImportance,
        text: impl Into<String>,
    ) -> Result<Event> {
        if self.inner.store.events(session_id).await?.is_empty()
            && !self.has_handle(session_id).await
        {
            return Err(CoreError::SessionNotFound { session_id });
        }
        let record = EventRecord::new(
            EventName::Narrative,
            json!({"importance": importance, "text": text.into()}),
        );
        let event = self.inner.store.append(session_id, record).await?;
        self.inner.bus.publish(&event);
        Ok(event)
    }

    /// Drop a session and everything stored for it. Unknown sessions are
    /// a successful no-op.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        let handle = self.inner.sessions.lock().await.remove(&session_id);
        if let Some(handle) = handle {
            let _ = handle
                .commands
                .send(RuntimeCommand::Abort {
                    reason: Some("session deleted".to_string()),
                })
                .await;
            let _ = handle.join.await;
        }
        self.inner.store.delete_session(session_id).await?;
        if let Some(snapshots) = &self.inner.snapshots {
            snapshots.delete(session_id).await?;
        }
        Ok(())
    }

    pub async fn recordings(&self) -> Result<Vec<RecordingEntry>> {
        self.inner.recorder.list().await
    }

    /// Block until the session's runtime task settles, if one is live.
    /// Mostly useful to tests and to transports that want a final state.
    pub async fn wait(&self, session_id: Uuid) -> Result<Option<RunOutcome>> {
        let handle = self.inner.sessions.lock().await.remove(&session_id);
        let Some(handle) = handle else {
            return Ok(None);
        };
        let workflow = handle.workflow;
        match handle.join.await {
            Ok(result) => result.map(Some),
            Err(err) => Err(CoreError::InvalidSessionState {
                session_id,
                message: format!("runtime task for {workflow:?} panicked: {err}"),
            }),
        }
    }

    /// Abort every live runtime and wait them out. The scaffold remains
    /// usable for reads afterwards.
    pub async fn dispose(&self) {
        let handles: Vec<(Uuid, SessionHandle)> = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.drain().collect()
        };
        for (session_id, handle) in handles {
            let _ = handle
                .commands
                .send(RuntimeCommand::Abort {
                    reason: Some("scaffold disposed".to_string()),
                })
                .await;
            if let Err(err) = handle.join.await {
                warn!(%session_id, %err, "runtime task panicked during dispose");
            }
        }
        info!("scaffold disposed");
    }
}
