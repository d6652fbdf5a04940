//! Agent daemon.
//!
//! One [`AgentDaemon`] runs per agent identity. While running it owns a
//! [`MessageCache`] and two background loops:
//!
//! - a poll loop that drains pending messages addressed to the agent, kind
//!   by kind in [`MessageKind::POLL_ORDER`], and hands each to a callback
//! - a heartbeat loop that reports liveness to the monitor
//!
//! Both loops follow the same shape: a [`tokio::time::interval`] ticking with
//! [`MissedTickBehavior::Skip`] raced against a `watch` shutdown channel.
//! Errors never end a loop; they are logged, counted and forwarded to the
//! `on_error` sink.
//!
//! Pending messages are delivered on every tick until their status moves
//! away from the initial one, so callbacks are expected to update the status
//! of what they handle.

use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::constants::CURRENT_TASK_KEY;
use tandem_core::{
    AgentRole, CodePayload, DaemonConfig, DaemonError, FeedbackPayload, FeedbackType, HeartbeatPayload,
    Message, MessageId, MessageKind, MessagePayload, MessagePriority, ReviewPayload,
    ScorePayload, TandemError, TandemResult, TaskPayload, ValidationError,
};
use tandem_storage::{BrainStateStore, MessageRepository};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::MessageCache;
use crate::dispatch::{message_priority, payload_from_value, DispatchDefaults};

// ============================================================================
// CALLBACKS
// ============================================================================

/// Future returned by a message callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = TandemResult<()>> + Send + 'static>>;

/// Handler invoked once per delivered message of kind `P`.
pub type MessageCallback<P> = Arc<dyn Fn(Message<P>) -> CallbackFuture + Send + Sync>;

/// Sink for errors raised inside the daemon loops.
pub type ErrorCallback = Arc<dyn Fn(&TandemError) + Send + Sync>;

fn boxed<P, F, Fut>(f: F) -> MessageCallback<P>
where
    P: MessagePayload,
    F: Fn(Message<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TandemResult<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)) as CallbackFuture)
}

/// Handlers the poll loop dispatches to. Messages of a kind with no handler
/// are left pending.
#[derive(Clone, Default)]
pub struct DaemonCallbacks {
    on_task: Option<MessageCallback<TaskPayload>>,
    on_code: Option<MessageCallback<CodePayload>>,
    on_review: Option<MessageCallback<ReviewPayload>>,
    on_score: Option<MessageCallback<ScorePayload>>,
    on_feedback: Option<MessageCallback<FeedbackPayload>>,
    on_heartbeat: Option<MessageCallback<HeartbeatPayload>>,
    on_error: Option<ErrorCallback>,
}

impl DaemonCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_task<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message<TaskPayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TandemResult<()>> + Send + 'static,
    {
        self.on_task = Some(boxed(f));
        self
    }

    pub fn on_code<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message<CodePayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TandemResult<()>> + Send + 'static,
    {
        self.on_code = Some(boxed(f));
        self
    }

    pub fn on_review<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message<ReviewPayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TandemResult<()>> + Send + 'static,
    {
        self.on_review = Some(boxed(f));
        self
    }

    pub fn on_score<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message<ScorePayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TandemResult<()>> + Send + 'static,
    {
        self.on_score = Some(boxed(f));
        self
    }

    pub fn on_feedback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message<FeedbackPayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TandemResult<()>> + Send + 'static,
    {
        self.on_feedback = Some(boxed(f));
        self
    }

    pub fn on_heartbeat<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message<HeartbeatPayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TandemResult<()>> + Send + 'static,
    {
        self.on_heartbeat = Some(boxed(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TandemError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for DaemonCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonCallbacks")
            .field("on_task", &self.on_task.is_some())
            .field("on_code", &self.on_code.is_some())
            .field("on_review", &self.on_review.is_some())
            .field("on_score", &self.on_score.is_some())
            .field("on_feedback", &self.on_feedback.is_some())
            .field("on_heartbeat", &self.on_heartbeat.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ============================================================================
// STATE AND METRICS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaemonState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub ai_name: String,
    pub role: AgentRole,
    pub state: DaemonState,
    pub is_running: bool,
    pub has_cache: bool,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

/// Counters for daemon loop activity.
#[derive(Debug, Default)]
pub struct DaemonMetrics {
    /// Poll ticks run
    pub poll_cycles: AtomicU64,

    /// Messages handed to a callback
    pub messages_dispatched: AtomicU64,

    /// Heartbeats stored for the monitor
    pub heartbeats_sent: AtomicU64,

    /// Callbacks that returned an error or panicked
    pub callback_errors: AtomicU64,

    /// Repository failures inside the loops
    pub loop_errors: AtomicU64,
}

impl DaemonMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DaemonMetricsSnapshot {
        DaemonMetricsSnapshot {
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonMetricsSnapshot {
    pub poll_cycles: u64,
    pub messages_dispatched: u64,
    pub heartbeats_sent: u64,
    pub callback_errors: u64,
    pub loop_errors: u64,
}

// ============================================================================
// LOOPS
// ============================================================================

/// Everything a background loop needs, cloned out of the daemon at start.
struct LoopContext {
    config: DaemonConfig,
    cache: MessageCache,
    brain: Arc<dyn BrainStateStore>,
    callbacks: DaemonCallbacks,
    metrics: Arc<DaemonMetrics>,
}

impl LoopContext {
    fn report(&self, error: &TandemError) {
        if let Some(sink) = &self.callbacks.on_error {
            sink(error);
        }
    }

    fn loop_error(&self, error: TandemError, what: &'static str) {
        tracing::error!(ai_name = %self.config.ai_name, error = %error, "{}", what);
        self.metrics.loop_errors.fetch_add(1, Ordering::Relaxed);
        self.report(&error);
    }

    async fn poll_once(&self, shutdown: &watch::Receiver<bool>) {
        self.metrics.poll_cycles.fetch_add(1, Ordering::Relaxed);

        let mut dispatched = 0u64;
        for kind in MessageKind::POLL_ORDER {
            if *shutdown.borrow() {
                break;
            }
            let callbacks = &self.callbacks;
            dispatched += match kind {
                MessageKind::Task => self.drain(callbacks.on_task.as_ref(), shutdown).await,
                MessageKind::Review => self.drain(callbacks.on_review.as_ref(), shutdown).await,
                MessageKind::Code => self.drain(callbacks.on_code.as_ref(), shutdown).await,
                MessageKind::Score => self.drain(callbacks.on_score.as_ref(), shutdown).await,
                MessageKind::Feedback => {
                    self.drain(callbacks.on_feedback.as_ref(), shutdown).await
                }
                MessageKind::Heartbeat => {
                    self.drain(callbacks.on_heartbeat.as_ref(), shutdown).await
                }
            };
        }

        if dispatched > 0 {
            tracing::debug!(ai_name = %self.config.ai_name, dispatched, "Poll cycle completed");
        } else {
            tracing::trace!(ai_name = %self.config.ai_name, "Poll cycle completed with no messages");
        }
    }

    /// Deliver pending messages of one kind, checking for shutdown before
    /// each callback. Returns how many were handed over.
    ///
    /// Every kind is fetched even without a handler so repository failures
    /// still reach `on_error`.
    async fn drain<P: MessagePayload>(
        &self,
        handler: Option<&MessageCallback<P>>,
        shutdown: &watch::Receiver<bool>,
    ) -> u64 {
        let messages = match self.cache.receive::<P>(&self.config.ai_name, None).await {
            Ok(messages) => messages,
            Err(e) => {
                self.loop_error(e, "Failed to poll messages");
                return 0;
            }
        };
        let Some(handler) = handler else {
            return 0;
        };

        let mut dispatched = 0;
        for message in messages {
            if *shutdown.borrow() {
                break;
            }
            let message_id = message.id;

            // Spawned so a panicking handler is contained to its own task.
            let result = match tokio::spawn(handler(message)).await {
                Ok(result) => result,
                Err(join) => Err(DaemonError::Callback {
                    kind: P::KIND,
                    reason: if join.is_panic() {
                        "callback panicked".to_string()
                    } else {
                        "callback cancelled".to_string()
                    },
                }
                .into()),
            };
            dispatched += 1;
            self.metrics
                .messages_dispatched
                .fetch_add(1, Ordering::Relaxed);

            if let Err(e) = result {
                tracing::warn!(
                    ai_name = %self.config.ai_name,
                    kind = %P::KIND,
                    message_id = %message_id,
                    error = %e,
                    "Message callback failed"
                );
                self.metrics.callback_errors.fetch_add(1, Ordering::Relaxed);
                self.report(&e);
            }
        }
        dispatched
    }

    async fn heartbeat_once(&self) {
        let current_task = match self.brain.load_brain_state(&self.config.ai_name).await {
            Ok(state) => state.and_then(|s| s.string(CURRENT_TASK_KEY)),
            Err(e) => {
                self.loop_error(e, "Failed to read brain state for heartbeat");
                None
            }
        };

        let sent = self
            .cache
            .send_heartbeat(
                &self.config.monitor_name,
                self.config.role.as_str(),
                &self.config.heartbeat_status,
                current_task,
                None,
            )
            .await;
        match sent {
            Ok(id) => {
                self.metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    ai_name = %self.config.ai_name,
                    message_id = %id,
                    monitor = %self.config.monitor_name,
                    "Heartbeat sent"
                );
            }
            Err(e) => self.loop_error(e, "Failed to send heartbeat"),
        }
    }
}

async fn poll_loop(ctx: Arc<LoopContext>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(ctx.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let flag = shutdown_rx.clone();

    tracing::debug!(
        ai_name = %ctx.config.ai_name,
        poll_interval_ms = ctx.config.poll_interval.as_millis() as u64,
        "Poll loop started"
    );

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                ctx.poll_once(&flag).await;
            }
        }
    }

    tracing::debug!(ai_name = %ctx.config.ai_name, "Poll loop stopped");
}

async fn heartbeat_loop(ctx: Arc<LoopContext>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(ctx.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(
        ai_name = %ctx.config.ai_name,
        heartbeat_interval_ms = ctx.config.heartbeat_interval.as_millis() as u64,
        monitor = %ctx.config.monitor_name,
        "Heartbeat loop started"
    );

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                ctx.heartbeat_once().await;
            }
        }
    }

    tracing::debug!(ai_name = %ctx.config.ai_name, "Heartbeat loop stopped");
}

// ============================================================================
// DAEMON
// ============================================================================

#[derive(Default)]
struct DaemonInner {
    state: DaemonState,
    cache: Option<MessageCache>,
    callbacks: DaemonCallbacks,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Long-running worker for one agent identity.
///
/// Dropping a running daemon closes its shutdown channel, which ends both
/// loops at their next wake-up.
pub struct AgentDaemon {
    config: DaemonConfig,
    repository: Arc<dyn MessageRepository>,
    brain: Arc<dyn BrainStateStore>,
    metrics: Arc<DaemonMetrics>,
    inner: Mutex<DaemonInner>,
}

impl fmt::Debug for AgentDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDaemon")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentDaemon {
    /// Create a stopped daemon. Fails if the configuration is invalid.
    pub fn new(
        config: DaemonConfig,
        repository: Arc<dyn MessageRepository>,
        brain: Arc<dyn BrainStateStore>,
    ) -> TandemResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            repository,
            brain,
            metrics: Arc::new(DaemonMetrics::new()),
            inner: Mutex::new(DaemonInner::default()),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn ai_name(&self) -> &str {
        &self.config.ai_name
    }

    pub fn metrics(&self) -> DaemonMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Replace the callbacks. Takes effect on the next `start`.
    pub async fn set_callbacks(&self, callbacks: DaemonCallbacks) {
        self.inner.lock().await.callbacks = callbacks;
    }

    pub async fn status(&self) -> DaemonStatus {
        let inner = self.inner.lock().await;
        DaemonStatus {
            ai_name: self.config.ai_name.clone(),
            role: self.config.role,
            state: inner.state,
            is_running: inner.state == DaemonState::Running,
            has_cache: inner.cache.is_some(),
            poll_interval: self.config.poll_interval,
            heartbeat_interval: self.config.heartbeat_interval,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.state == DaemonState::Running
    }

    /// The live cache, if running.
    pub async fn cache(&self) -> Option<MessageCache> {
        self.inner.lock().await.cache.clone()
    }

    /// Open the cache and launch the enabled loops.
    pub async fn start(&self) -> TandemResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != DaemonState::Stopped {
            return Err(DaemonError::AlreadyRunning {
                ai_name: self.config.ai_name.clone(),
            }
            .into());
        }
        inner.state = DaemonState::Starting;

        let cache = MessageCache::new(self.config.ai_name.clone(), self.repository.clone());
        if self.config.send_keep_alive_tips {
            self.send_keep_alive_tips(&cache).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(LoopContext {
            config: self.config.clone(),
            cache: cache.clone(),
            brain: self.brain.clone(),
            callbacks: inner.callbacks.clone(),
            metrics: self.metrics.clone(),
        });

        let mut tasks = Vec::new();
        if self.config.process_messages {
            tasks.push(tokio::spawn(poll_loop(ctx.clone(), shutdown_rx.clone())));
        }
        if self.config.auto_heartbeat {
            tasks.push(tokio::spawn(heartbeat_loop(ctx, shutdown_rx)));
        }

        inner.cache = Some(cache);
        inner.shutdown_tx = Some(shutdown_tx);
        inner.tasks = tasks;
        inner.state = DaemonState::Running;

        tracing::info!(
            ai_name = %self.config.ai_name,
            role = %self.config.role,
            process_messages = self.config.process_messages,
            auto_heartbeat = self.config.auto_heartbeat,
            "Agent daemon started"
        );
        Ok(())
    }

    /// Signal both loops, wait for the current tick to finish and release
    /// the cache.
    pub async fn stop(&self) -> TandemResult<()> {
        let (shutdown_tx, tasks) = {
            let mut inner = self.inner.lock().await;
            if inner.state != DaemonState::Running {
                return Err(DaemonError::NotRunning {
                    ai_name: self.config.ai_name.clone(),
                }
                .into());
            }
            inner.state = DaemonState::Stopping;
            (inner.shutdown_tx.take(), std::mem::take(&mut inner.tasks))
        };

        if let Some(tx) = &shutdown_tx {
            let _ = tx.send(true);
        }
        // The lock is released here so callbacks in flight can still use the
        // daemon while the loops wind down.
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(ai_name = %self.config.ai_name, error = %e, "Daemon loop aborted");
            }
        }

        let mut inner = self.inner.lock().await;
        inner.cache = None;
        inner.state = DaemonState::Stopped;

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            ai_name = %self.config.ai_name,
            poll_cycles = snapshot.poll_cycles,
            messages_dispatched = snapshot.messages_dispatched,
            heartbeats_sent = snapshot.heartbeats_sent,
            callback_errors = snapshot.callback_errors,
            "Agent daemon stopped"
        );
        Ok(())
    }

    async fn running_cache(&self) -> TandemResult<MessageCache> {
        self.inner
            .lock()
            .await
            .cache
            .clone()
            .ok_or_else(|| self.not_running())
    }

    fn not_running(&self) -> TandemError {
        DaemonError::NotRunning {
            ai_name: self.config.ai_name.clone(),
        }
        .into()
    }

    /// Send a message of `kind` built from loosely-typed `content`.
    ///
    /// Missing fields are defaulted; the message priority is read from
    /// `content.message_priority`.
    pub async fn send_message(
        &self,
        to: &str,
        kind: MessageKind,
        content: Value,
    ) -> TandemResult<MessageId> {
        if to.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "to".to_string(),
            }
            .into());
        }
        let cache = self.running_cache().await?;

        let defaults = DispatchDefaults {
            reviewer: self.config.ai_name.clone(),
            ai_role: self.config.role.as_str().to_string(),
            heartbeat_status: self.config.heartbeat_status.clone(),
        };
        let payload = payload_from_value(kind, &content, &defaults);
        cache
            .send_any(to, message_priority(&content), payload)
            .await
    }

    pub async fn update_brain_state(&self, key: &str, value: Value) -> TandemResult<bool> {
        if !self.is_running().await {
            return Err(self.not_running());
        }
        self.brain
            .set_brain_state_value(&self.config.ai_name, key, value)
            .await
    }

    pub async fn brain_state_value(&self, key: &str) -> TandemResult<Option<Value>> {
        if !self.is_running().await {
            return Err(self.not_running());
        }
        Ok(self
            .brain
            .load_brain_state(&self.config.ai_name)
            .await?
            .and_then(|state| state.value(key).cloned()))
    }

    /// Leave the agent a low-priority reminder of how liveness is reported.
    async fn send_keep_alive_tips(&self, cache: &MessageCache) {
        let content = format!(
            "Heartbeats go to {} every {}s. Keep '{}' in your brain state current so progress is visible.",
            self.config.monitor_name,
            self.config.heartbeat_interval.as_secs(),
            CURRENT_TASK_KEY,
        );
        let payload = FeedbackPayload::new(FeedbackType::General, "Keep-alive tips", content);
        if let Err(e) = cache
            .send_feedback(&self.config.ai_name, payload, MessagePriority::Low)
            .await
        {
            tracing::warn!(ai_name = %self.config.ai_name, error = %e, "Failed to send keep-alive tips");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
