//! The task state machine.
//!
//! [`Orchestrator::submit_generate`] and [`Orchestrator::submit_upscale`]
//! persist a pending task and return at once; everything after that happens
//! in the background:
//!
//! ```text
//! pending --engine accepts--> running --history completed--> completed
//!    |                           |
//!    +--resolve/submit error--> failed <--engine error / deadline / missing output
//!    |                           ^
//!    +--store unreachable past the deadline
//! ```
//!
//! A scheduler loop lists non-terminal tasks every poll interval and hands
//! them to a pool of worker loops. Each iteration runs in its own Tokio task
//! so a panic is logged and the worker carries on. All lifecycle writes to a
//! task happen under its [`TaskLocks`] entry. On startup the first scheduler
//! tick re-enqueues whatever was left in flight, which is how a restart
//! resumes without resubmitting prompts that already have a `prompt_id`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use validator::Validate;
use yeepay_comfyui::{Engine, HistoryStatus, QueueSnapshot};
use yeepay_core::model::ModelType;
use yeepay_core::request::{
    DeadlineClass, FusionRequest, GenerateParameters, GenerateRequest, TaskParameters,
    UpscaleParameters, UpscaleRequest, VideoRequest,
};
use yeepay_core::resolution::{ResolutionError, ResolutionReason};
use yeepay_core::task::{QueuePosition, TaskStatus, TaskType, PROGRESS_EXECUTING};
use yeepay_core::types::{TaskId, Timestamp};
use yeepay_db::catalog::Catalog;
use yeepay_db::models::task::{CreateTask, StatusChange, Task, TaskUpdate};
use yeepay_db::store::{StoreError, TaskStore};

use crate::config::PipelineConfig;
use crate::locks::TaskLocks;
use crate::relocator::Relocator;
use crate::resolver::{ResolveError, Resolver};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The request cannot be resolved; nothing was persisted.
    #[error(transparent)]
    Rejected(ResolutionError),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ResolveError> for OrchestratorError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Resolution(e) => OrchestratorError::Rejected(e),
            ResolveError::Catalog(e) => OrchestratorError::Store(e),
            ResolveError::Io(e) => OrchestratorError::Io(e),
        }
    }
}

impl From<ResolutionError> for OrchestratorError {
    fn from(err: ResolutionError) -> Self {
        OrchestratorError::Rejected(err)
    }
}

impl From<validator::ValidationErrors> for OrchestratorError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

/// Handle to the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    engine: Arc<dyn Engine>,
    resolver: Resolver,
    relocator: Relocator,
    config: Arc<PipelineConfig>,
    locks: TaskLocks,
    /// Tasks currently queued for or inside an iteration.
    in_flight: Mutex<HashSet<TaskId>>,
    /// Prompt ids the engine accepted but the store has not recorded yet.
    accepted: Mutex<HashMap<TaskId, String>>,
    /// Last engine queue snapshot, refreshed by the scheduler.
    queue: RwLock<QueueSnapshot>,
    jobs: mpsc::UnboundedSender<TaskId>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TaskId>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn Engine>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                resolver: Resolver::new(catalog, Arc::clone(&config)),
                relocator: Relocator::new(Arc::clone(&config)),
                config,
                locks: TaskLocks::new(),
                in_flight: Mutex::new(HashSet::new()),
                accepted: Mutex::new(HashMap::new()),
                queue: RwLock::new(QueueSnapshot::default()),
                jobs,
                receiver: Mutex::new(Some(receiver)),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Start the scheduler and the reconciliation workers.
    ///
    /// Calling this more than once has no effect.
    pub fn start(&self) {
        let receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            tracing::warn!("Orchestrator already started");
            return;
        };
        let receiver = Arc::new(AsyncMutex::new(receiver));

        for worker in 0..self.inner.config.reconcile_workers {
            let inner = Arc::clone(&self.inner);
            let receiver = Arc::clone(&receiver);
            self.inner
                .tracker
                .spawn(async move { inner.run_worker(worker, receiver).await });
        }
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { inner.run_scheduler().await });

        tracing::info!(
            workers = self.inner.config.reconcile_workers,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "Task orchestrator started",
        );
    }

    /// Stop the loops and wait for in-flight iterations to finish.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        let drained = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if drained {
            tracing::info!("Task orchestrator drained");
        } else {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Task orchestrator did not drain before the shutdown timeout",
            );
        }
        drained
    }

    // ── Submission ──

    /// Validate and persist a generation; resolution and engine submission
    /// continue in the background.
    pub async fn submit_generate(&self, req: GenerateRequest) -> Result<Task, OrchestratorError> {
        self.submit_generation(req, |_| true, "Generation").await
    }

    /// Queue an image-to-video generation on a video-capable base model.
    pub async fn submit_video(&self, req: VideoRequest) -> Result<Task, OrchestratorError> {
        req.validate()?;
        self.submit_generation(req.into_generate(), ModelType::makes_video, "Video")
            .await
    }

    /// Queue a multi-image fusion on a base model whose templates blend
    /// several reference images.
    pub async fn submit_fusion(&self, req: FusionRequest) -> Result<Task, OrchestratorError> {
        req.validate()?;
        self.submit_generation(req.into_generate(), ModelType::supports_fusion, "Fusion")
            .await
    }

    async fn submit_generation(
        &self,
        req: GenerateRequest,
        accepts: fn(ModelType) -> bool,
        kind: &str,
    ) -> Result<Task, OrchestratorError> {
        req.validate()?;
        let model = self.inner.resolver.precheck_generate(&req).await?;
        if !accepts(model.model_type) {
            return Err(ResolutionError::new(
                ResolutionReason::ModelTypeUnsupported,
                format!(
                    "{kind} requests cannot run on base model '{}' ({})",
                    model.code, model.model_type
                ),
            )
            .into());
        }

        let description = req.description.clone();
        let reference_image_path = req.reference_image_path.clone();
        let params = TaskParameters::Generate(GenerateParameters {
            model_type: model.model_type,
            request: req,
        });
        let mut input = CreateTask::new(TaskType::Generate, description, to_json(&params)?);
        input.reference_image_path = reference_image_path;

        let task = self.inner.store.create(&input).await?;
        tracing::info!(
            task_id = %task.id,
            base_model = %model.code,
            kind,
            "Generation task accepted",
        );
        self.inner.spawn_iteration(task.id);
        Ok(task)
    }

    /// Validate and persist an upscale.
    pub async fn submit_upscale(&self, req: UpscaleRequest) -> Result<Task, OrchestratorError> {
        req.validate()?;
        let scale_factor = self.inner.resolver.precheck_upscale(&req)?;

        let description = req
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Upscale {} x{scale_factor}", req.image_path));
        let params = TaskParameters::Upscale(UpscaleParameters {
            image_path: req.image_path.clone(),
            scale_factor,
            algorithm: req.algorithm,
            seed: None,
        });
        let mut input = CreateTask::new(TaskType::Upscale, description, to_json(&params)?);
        input.reference_image_path = Some(req.image_path);

        let task = self.inner.store.create(&input).await?;
        tracing::info!(
            task_id = %task.id,
            scale_factor,
            algorithm = %req.algorithm,
            "Upscale task accepted",
        );
        self.inner.spawn_iteration(task.id);
        Ok(task)
    }

    // ── Reads and user actions ──

    pub async fn get(&self, id: TaskId) -> Result<Task, OrchestratorError> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Advisory engine queue position of a running task.
    pub fn queue_position(&self, task: &Task) -> Option<QueuePosition> {
        self.inner.queue_position(task)
    }

    /// Mark a non-terminal task cancelled. Reconciliation ignores it from
    /// then on; the engine prompt, if any, is left to finish.
    pub async fn cancel(&self, id: TaskId) -> Result<Task, OrchestratorError> {
        let _guard = self.inner.locks.lock(id).await;
        self.get(id).await?;
        let task = self
            .inner
            .store
            .set_status(id, &StatusChange::cancelled())
            .await?;
        tracing::info!(task_id = %id, "Task cancelled");
        Ok(task)
    }

    pub async fn toggle_favorite(&self, id: TaskId) -> Result<Task, OrchestratorError> {
        let _guard = self.inner.locks.lock(id).await;
        let task = self.get(id).await?;
        let update = TaskUpdate {
            is_favorited: Some(!task.is_favorited),
            ..Default::default()
        };
        Ok(self.inner.store.update(id, &update).await?)
    }

    /// Remove a terminal task and its output directory.
    pub async fn delete(&self, id: TaskId) -> Result<(), OrchestratorError> {
        let _guard = self.inner.locks.lock(id).await;
        self.get(id).await?;
        self.inner.store.delete(id).await?;

        let dir = self.inner.relocator.task_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(task_id = %id, "Task deleted");
        Ok(())
    }
}

fn timeout_message(deadline: Duration) -> String {
    format!("Timeout: task exceeded {}s deadline", deadline.as_secs())
}

fn to_json(params: &TaskParameters) -> Result<serde_json::Value, OrchestratorError> {
    serde_json::to_value(params).map_err(|e| OrchestratorError::Validation(e.to_string()))
}

impl Inner {
    // ── Loops ──

    async fn run_scheduler(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Task scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.schedule_once().await;
                }
            }
        }
    }

    async fn schedule_once(&self) {
        let active = match self.store.list_active().await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list active tasks");
                return;
            }
        };
        self.refresh_queue(&active).await;

        for task in active {
            if !self.claim(task.id) {
                continue;
            }
            if self.jobs.send(task.id).is_err() {
                self.release(task.id);
                break;
            }
        }
    }

    async fn refresh_queue(&self, active: &[Task]) {
        let any_running = active.iter().any(|t| t.status == TaskStatus::Running);
        let snapshot = if any_running {
            self.engine.queue().await
        } else {
            QueueSnapshot::default()
        };
        *self.queue.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    async fn run_worker(
        self: Arc<Self>,
        worker: usize,
        receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<TaskId>>>,
    ) {
        tracing::debug!(worker, "Reconciliation worker started");
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                id = async { receiver.lock().await.recv().await } => id,
            };
            let Some(id) = next else {
                break;
            };
            Arc::clone(&self).run_supervised(id).await;
        }
        tracing::debug!(worker, "Reconciliation worker stopped");
    }

    /// Hand a freshly created task to an iteration right away.
    fn spawn_iteration(self: &Arc<Self>, id: TaskId) {
        if self.cancel.is_cancelled() || !self.claim(id) {
            return;
        }
        let inner = Arc::clone(self);
        self.tracker.spawn(async move { inner.run_supervised(id).await });
    }

    /// Run one iteration in its own task so a panic cannot take the caller down.
    async fn run_supervised(self: Arc<Self>, id: TaskId) {
        let inner = Arc::clone(&self);
        if let Err(e) = tokio::spawn(async move { inner.advance(id).await }).await {
            tracing::error!(task_id = %id, error = %e, "Task iteration panicked");
        }
        self.release(id);
    }

    fn claim(&self, id: TaskId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    fn release(&self, id: TaskId) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    // ── One iteration ──

    async fn advance(&self, id: TaskId) {
        let _guard = self.locks.lock(id).await;
        if let Err(e) = self.step(id).await {
            tracing::error!(task_id = %id, error = %e, "Task iteration failed");
        }
    }

    async fn step(&self, id: TaskId) -> Result<(), StoreError> {
        let Some(task) = self.store.get(id).await? else {
            self.forget_submission(id);
            return Ok(());
        };
        match (task.status, task.prompt_id.clone()) {
            (TaskStatus::Pending, None) => {
                let outcome = match self.accepted_prompt(id) {
                    Some(prompt_id) => self.record_submission(&task, prompt_id).await,
                    None => self.submit_to_engine(&task).await,
                };
                match outcome {
                    Err(e) if self.deadline_exceeded(&task, task.created_at) => {
                        tracing::warn!(task_id = %id, error = %e, "Task never reached running");
                        self.forget_submission(id);
                        self.fail(id, timeout_message(self.deadline_for(&task))).await
                    }
                    other => other,
                }
            }
            (TaskStatus::Pending | TaskStatus::Running, Some(prompt_id)) => {
                self.forget_submission(id);
                self.reconcile(&task, &prompt_id).await
            }
            _ => {
                self.forget_submission(id);
                Ok(())
            }
        }
    }

    /// Resolve the workflow and queue it on the engine.
    async fn submit_to_engine(&self, task: &Task) -> Result<(), StoreError> {
        let mut params: TaskParameters = match serde_json::from_value(task.parameters.clone()) {
            Ok(params) => params,
            Err(e) => return self.fail(task.id, format!("InvalidParameters: {e}")).await,
        };

        let resolved = match self.resolver.resolve(task.id, &params).await {
            Ok(resolved) => resolved,
            // Registry unreachable: leave the task pending for the next tick.
            Err(ResolveError::Catalog(e)) => return Err(e),
            Err(e) => return self.fail(task.id, e.to_string()).await,
        };

        params.set_seed(resolved.seed);
        if let Ok(parameters) = serde_json::to_value(&params) {
            let update = TaskUpdate {
                parameters: Some(parameters),
                ..Default::default()
            };
            self.store.update(task.id, &update).await?;
        }

        match self.engine.submit(&resolved.prompt).await {
            Ok(prompt_id) => {
                tracing::debug!(
                    task_id = %task.id,
                    prompt_id = %prompt_id,
                    seed = resolved.seed,
                    "Engine accepted prompt",
                );
                self.remember_submission(task.id, prompt_id.clone());
                self.record_submission(task, prompt_id).await
            }
            Err(e) => self.fail(task.id, e.to_string()).await,
        }
    }

    /// Persist an accepted prompt id. Until this succeeds the id stays in
    /// memory so the next iteration retries the write instead of queueing
    /// the prompt a second time.
    async fn record_submission(&self, task: &Task, prompt_id: String) -> Result<(), StoreError> {
        match self
            .store
            .set_status(task.id, &StatusChange::running(prompt_id.clone()))
            .await
        {
            Ok(_) => {
                self.forget_submission(task.id);
                tracing::info!(task_id = %task.id, prompt_id = %prompt_id, "Task submitted to engine");
                Ok(())
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                self.forget_submission(task.id);
                tracing::warn!(task_id = %task.id, status = %from, "Task left pending before the engine accepted it");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %task.id,
                    prompt_id = %prompt_id,
                    error = %e,
                    "Engine accepted prompt but recording it failed, will retry",
                );
                Err(e)
            }
        }
    }

    fn remember_submission(&self, id: TaskId, prompt_id: String) {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, prompt_id);
    }

    fn accepted_prompt(&self, id: TaskId) -> Option<String> {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn forget_submission(&self, id: TaskId) {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Consult the engine about a submitted task.
    async fn reconcile(&self, task: &Task, prompt_id: &str) -> Result<(), StoreError> {
        match self.engine.history(prompt_id).await {
            Ok(HistoryStatus::Completed(entry)) => {
                let files = entry.output_files();
                match self.relocator.relocate(task.id, task.task_type, &files).await {
                    Ok(relocated) => {
                        let change =
                            StatusChange::completed(relocated.result_path, relocated.image_urls);
                        self.store.set_status(task.id, &change).await?;
                        tracing::info!(task_id = %task.id, prompt_id, "Task completed");
                        Ok(())
                    }
                    Err(e) => self.fail(task.id, e.to_string()).await,
                }
            }
            Ok(HistoryStatus::Failed(message)) => {
                self.fail(task.id, format!("ExecutionFailed: {message}")).await
            }
            Ok(HistoryStatus::Pending | HistoryStatus::Unknown) => self.check_running(task).await,
            Err(e) => {
                tracing::warn!(
                    task_id = %task.id,
                    prompt_id,
                    error = %e,
                    "Engine history lookup failed, will retry",
                );
                self.check_running(task).await
            }
        }
    }

    /// Enforce the deadline and surface engine-side progress.
    async fn check_running(&self, task: &Task) -> Result<(), StoreError> {
        if self.deadline_exceeded(task, task.started_at.unwrap_or(task.created_at)) {
            return self.fail(task.id, timeout_message(self.deadline_for(task))).await;
        }

        if self.queue_position(task) == Some(QueuePosition::Running)
            && task.progress < PROGRESS_EXECUTING
        {
            let update = TaskUpdate {
                progress: Some(PROGRESS_EXECUTING),
                ..Default::default()
            };
            self.store.update(task.id, &update).await?;
            tracing::debug!(task_id = %task.id, "Task executing on engine");
        }
        Ok(())
    }

    fn deadline_exceeded(&self, task: &Task, since: Timestamp) -> bool {
        let elapsed = (Utc::now() - since).to_std().unwrap_or_default();
        elapsed > self.deadline_for(task)
    }

    fn deadline_for(&self, task: &Task) -> Duration {
        let class = serde_json::from_value::<TaskParameters>(task.parameters.clone())
            .map(|p| p.deadline_class())
            .unwrap_or(match task.task_type {
                TaskType::Generate => DeadlineClass::Model(ModelType::Flux),
                TaskType::Upscale => DeadlineClass::Upscale,
            });
        self.config.deadlines.for_class(class)
    }

    fn queue_position(&self, task: &Task) -> Option<QueuePosition> {
        if task.status != TaskStatus::Running {
            return None;
        }
        let prompt_id = task.prompt_id.as_deref()?;
        self.queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .position(prompt_id)
    }

    async fn fail(&self, id: TaskId, message: String) -> Result<(), StoreError> {
        match self.store.set_status(id, &StatusChange::failed(message.clone())).await {
            Ok(_) => {
                tracing::error!(task_id = %id, error = %message, "Task failed");
                Ok(())
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::warn!(task_id = %id, status = %from, "Task already terminal, not failing it");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
