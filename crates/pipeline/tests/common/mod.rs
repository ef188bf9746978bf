#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use yeepay_comfyui::{ComfyUIApiError, Engine, HistoryStatus, QueueSnapshot};
use yeepay_core::model::ModelType;
use yeepay_core::task::TaskStatus;
use yeepay_core::types::TaskId;
use yeepay_db::catalog::{Catalog, MemoryCatalog};
use yeepay_db::models::task::{
    CreateTask, StatusChange, Task, TaskEvent, TaskListQuery, TaskUpdate,
};
use yeepay_db::store::{MemoryTaskStore, StoreError, TaskStore};
use yeepay_pipeline::{Orchestrator, PipelineConfig};

/// What the fake engine does with a submitted prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Finish at once and write the output file.
    Complete,
    /// Finish at once but never write the output file.
    CompleteWithoutFile,
    /// Accept the prompt and keep it running.
    Hold,
    /// Answer 500.
    Reject,
}

#[derive(Default)]
struct EngineState {
    submitted: Vec<Value>,
    history: HashMap<String, Value>,
    running: Vec<String>,
}

/// Scripted stand-in for the ComfyUI engine.
pub struct FakeEngine {
    behavior: Mutex<Behavior>,
    state: Mutex<EngineState>,
    output_root: PathBuf,
}

impl FakeEngine {
    pub fn new(config: &PipelineConfig, behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            state: Mutex::new(EngineState::default()),
            output_root: config.comfyui_main_output_dir.clone(),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Record a finished prompt, optionally writing its files to disk.
    pub fn complete(&self, prompt_id: &str, filenames: &[&str], write_files: bool) {
        let dir = self.output_root.join("yeepay");
        if write_files {
            std::fs::create_dir_all(&dir).unwrap();
        }
        let images: Vec<Value> = filenames
            .iter()
            .map(|name| {
                if write_files {
                    std::fs::write(dir.join(name), format!("image {name}")).unwrap();
                }
                json!({ "filename": name, "subfolder": "yeepay", "type": "output" })
            })
            .collect();
        let entry = json!({
            "outputs": { "9": { "images": images } },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        });
        let mut state = self.state.lock().unwrap();
        state.running.retain(|id| id != prompt_id);
        state.history.insert(prompt_id.to_string(), entry);
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn submit(&self, prompt: &Value) -> Result<String, ComfyUIApiError> {
        let behavior = *self.behavior.lock().unwrap();
        if behavior == Behavior::Reject {
            return Err(ComfyUIApiError::EngineRejected {
                status: 500,
                body: "CUDA error: out of memory".into(),
            });
        }

        let (prompt_id, n) = {
            let mut state = self.state.lock().unwrap();
            state.submitted.push(prompt.clone());
            let n = state.submitted.len();
            (format!("prompt-{n}"), n)
        };
        let filename = format!("ComfyUI_{n:05}_.png");
        match behavior {
            Behavior::Complete => self.complete(&prompt_id, &[&filename], true),
            Behavior::CompleteWithoutFile => self.complete(&prompt_id, &[&filename], false),
            Behavior::Hold => self.state.lock().unwrap().running.push(prompt_id.clone()),
            Behavior::Reject => {}
        }
        Ok(prompt_id)
    }

    async fn history(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError> {
        let entry = self.state.lock().unwrap().history.get(prompt_id).cloned();
        match entry {
            Some(entry) => Ok(HistoryStatus::from_body(prompt_id, &json!({ prompt_id: entry }))?),
            None => Ok(HistoryStatus::Pending),
        }
    }

    async fn queue(&self) -> QueueSnapshot {
        QueueSnapshot {
            running: self.state.lock().unwrap().running.clone(),
            pending: Vec::new(),
        }
    }

    async fn healthy(&self) -> bool {
        true
    }
}

/// In-memory store whose first `n` writes to `running` fail as if the
/// database dropped the connection.
pub struct FlakyStore {
    inner: Arc<MemoryTaskStore>,
    running_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryTaskStore>, running_failures: usize) -> Self {
        Self {
            inner,
            running_failures: AtomicUsize::new(running_failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.running_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, input: &CreateTask) -> Result<Task, StoreError> {
        self.inner.create(input).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: TaskId, delta: &TaskUpdate) -> Result<Task, StoreError> {
        self.inner.update(id, delta).await
    }

    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        self.inner.list(query).await
    }

    async fn count(&self, query: &TaskListQuery) -> Result<i64, StoreError> {
        self.inner.count(query).await
    }

    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, StoreError> {
        if change.to == TaskStatus::Running && self.take_failure() {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.set_status(id, change).await
    }

    async fn list_active(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.list_active().await
    }

    async fn events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        self.inner.events(id).await
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn flux_template() -> Value {
    json!({
        "nodes": {
            "3": { "class_type": "KSampler", "inputs": {
                "seed": 0, "steps": 20, "cfg": 1.0, "sampler_name": "euler",
                "scheduler": "simple", "denoise": 1.0,
                "model": ["10", 0], "positive": ["6", 0], "negative": ["7", 0],
                "latent_image": ["5", 0]
            } },
            "5": { "class_type": "EmptyLatentImage", "inputs": { "width": 512, "height": 512, "batch_size": 1 } },
            "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["11", 0] } },
            "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["11", 0] } },
            "8": { "class_type": "VAEDecode", "inputs": { "samples": ["3", 0], "vae": ["12", 0] } },
            "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0], "filename_prefix": "yeepay/ComfyUI" } },
            "10": { "class_type": "UNETLoader", "inputs": { "unet_name": "", "weight_dtype": "default" } },
            "11": { "class_type": "DualCLIPLoader", "inputs": { "clip_name1": "", "clip_name2": "", "type": "flux" } },
            "12": { "class_type": "VAELoader", "inputs": { "vae_name": "" } }
        },
        "connections": []
    })
}

pub fn upscale_template() -> Value {
    json!({
        "nodes": {
            "1": { "class_type": "LoadImage", "inputs": { "image": "" } },
            "2": { "class_type": "UpscaleModelLoader", "inputs": { "model_name": "4x-UltraSharp.pth" } },
            "3": { "class_type": "UltimateSDUpscale", "inputs": {
                "image": ["1", 0], "upscale_model": ["2", 0],
                "upscale_by": 2.0, "seed": 0, "steps": 20, "denoise": 0.2
            } },
            "4": { "class_type": "SaveImage", "inputs": { "images": ["3", 0] } }
        },
        "connections": []
    })
}

/// Registry with `flux_dev`, the ultimate upscale workflow, and the files
/// they need on disk.
pub fn catalog(config: &PipelineConfig) -> MemoryCatalog {
    let unet_dir = config.comfyui_models_dir.join("unet");
    std::fs::create_dir_all(&unet_dir).unwrap();
    std::fs::write(unet_dir.join("flux1-dev.safetensors"), b"weights").unwrap();
    std::fs::create_dir_all(&config.upload_dir).unwrap();
    std::fs::write(config.upload_dir.join("foo.png"), b"source image").unwrap();

    let mut flux = MemoryCatalog::base_model_row(1, "flux_dev", ModelType::Flux, Some(1));
    flux.unet_file = Some("flux1-dev.safetensors".into());

    MemoryCatalog::new()
        .with_workflow(MemoryCatalog::workflow_row(1, "flux_t2i", flux_template()))
        .with_workflow(MemoryCatalog::workflow_row(2, "upscale_ultimate", upscale_template()))
        .with_base_model(flux)
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: Arc<PipelineConfig>,
    pub store: Arc<MemoryTaskStore>,
    pub engine: Arc<FakeEngine>,
    pub orchestrator: Orchestrator,
}

pub fn harness(behavior: Behavior) -> Harness {
    harness_with(behavior, |_| {})
}

pub fn harness_with(behavior: Behavior, tweak: impl FnOnce(&mut PipelineConfig)) -> Harness {
    harness_with_store(behavior, tweak, |store| store as Arc<dyn TaskStore>)
}

/// Like [`harness_with`], but the orchestrator writes through `wrap(store)`
/// while `Harness::store` still reads the underlying memory store.
pub fn harness_with_store(
    behavior: Behavior,
    tweak: impl FnOnce(&mut PipelineConfig),
    wrap: impl FnOnce(Arc<MemoryTaskStore>) -> Arc<dyn TaskStore>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::rooted_at(dir.path());
    tweak(&mut config);
    let config = Arc::new(config);

    let catalog: Arc<dyn Catalog> = Arc::new(catalog(&config));
    let store = Arc::new(MemoryTaskStore::new());
    let engine = Arc::new(FakeEngine::new(&config, behavior));
    let orchestrator = Orchestrator::new(
        wrap(Arc::clone(&store)),
        catalog,
        Arc::clone(&engine) as Arc<dyn Engine>,
        Arc::clone(&config),
    );

    Harness {
        dir,
        config,
        store,
        engine,
        orchestrator,
    }
}

/// Poll the store until `done` holds for the task, or panic after 5s.
pub async fn wait_until(store: &MemoryTaskStore, id: TaskId, done: impl Fn(&Task) -> bool) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = store.get(id).await.unwrap().expect("task exists");
        if done(&task) {
            return task;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("task {id} stuck in {:?}: {task:?}", task.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_terminal(store: &MemoryTaskStore, id: TaskId) -> Task {
    wait_until(store, id, |t| t.status.is_terminal()).await
}
