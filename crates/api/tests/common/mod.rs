#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use yeepay_api::config::ServerConfig;
use yeepay_api::router::build_app_router;
use yeepay_api::state::AppState;
use yeepay_comfyui::{ComfyUIApiError, Engine, HistoryStatus, QueueSnapshot};
use yeepay_core::model::ModelType;
use yeepay_db::catalog::{Catalog, MemoryCatalog};
use yeepay_db::store::{MemoryTaskStore, TaskStore};
use yeepay_pipeline::{Orchestrator, PipelineConfig};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

// ---------------------------------------------------------------------------
// Fake engine
// ---------------------------------------------------------------------------

/// Engine that finishes every prompt at once and writes one output file.
pub struct InstantEngine {
    output_root: PathBuf,
    history: Mutex<HashMap<String, Value>>,
    submitted: Mutex<usize>,
    reachable: bool,
}

impl InstantEngine {
    fn new(config: &PipelineConfig, reachable: bool) -> Self {
        Self {
            output_root: config.comfyui_main_output_dir.clone(),
            history: Mutex::new(HashMap::new()),
            submitted: Mutex::new(0),
            reachable,
        }
    }

    pub fn submissions(&self) -> usize {
        *self.submitted.lock().unwrap()
    }
}

#[async_trait]
impl Engine for InstantEngine {
    async fn submit(&self, prompt: &Value) -> Result<String, ComfyUIApiError> {
        let n = {
            let mut submitted = self.submitted.lock().unwrap();
            *submitted += 1;
            *submitted
        };
        let prompt_id = format!("prompt-{n}");
        let is_video = prompt
            .as_object()
            .is_some_and(|nodes| nodes.values().any(|node| node["class_type"] == "SaveVideo"));
        let (filename, kind) = if is_video {
            (format!("yeepay_video_{n:05}_.mp4"), "videos")
        } else {
            (format!("ComfyUI_{n:05}_.png"), "images")
        };

        let dir = self.output_root.join("yeepay");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(&filename), b"\x89PNG fake").unwrap();

        let entry = json!({
            "outputs": { "9": { kind: [
                { "filename": filename, "subfolder": "yeepay", "type": "output" }
            ] } },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        });
        self.history.lock().unwrap().insert(prompt_id.clone(), entry);
        Ok(prompt_id)
    }

    async fn history(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError> {
        let entry = self.history.lock().unwrap().get(prompt_id).cloned();
        match entry {
            Some(entry) => Ok(HistoryStatus::from_body(prompt_id, &json!({ prompt_id: entry }))?),
            None => Ok(HistoryStatus::Unknown),
        }
    }

    async fn queue(&self) -> QueueSnapshot {
        QueueSnapshot::default()
    }

    async fn healthy(&self) -> bool {
        self.reachable
    }
}

// ---------------------------------------------------------------------------
// Registry fixtures
// ---------------------------------------------------------------------------

fn flux_template() -> Value {
    json!({
        "nodes": {
            "3": { "class_type": "KSampler", "inputs": {
                "seed": 0, "steps": 20, "cfg": 1.0, "sampler_name": "euler",
                "scheduler": "simple", "denoise": 1.0,
                "model": ["10", 0], "positive": ["6", 0], "negative": ["7", 0],
                "latent_image": ["5", 0]
            } },
            "5": { "class_type": "EmptyLatentImage", "inputs": { "width": 512, "height": 512, "batch_size": 1 } },
            "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["10", 1] } },
            "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["10", 1] } },
            "8": { "class_type": "VAEDecode", "inputs": { "samples": ["3", 0], "vae": ["10", 2] } },
            "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } },
            "10": { "class_type": "UNETLoader", "inputs": { "unet_name": "", "weight_dtype": "default" } }
        },
        "connections": []
    })
}

fn upscale_template() -> Value {
    json!({
        "nodes": {
            "1": { "class_type": "LoadImage", "inputs": { "image": "" } },
            "2": { "class_type": "UltimateSDUpscale", "inputs": {
                "image": ["1", 0], "upscale_by": 2.0, "seed": 0
            } },
            "3": { "class_type": "SaveImage", "inputs": { "images": ["2", 0] } }
        },
        "connections": []
    })
}

/// Image-to-video graph: two prompt encoders feed `WanImageToVideo`, whose
/// conditioning outputs drive the sampler; the speed-up LoRA is built in.
fn wan_template() -> Value {
    json!({
        "nodes": {
            "84": { "class_type": "CLIPLoader", "inputs": { "clip_name": "umt5.safetensors", "type": "wan" } },
            "85": { "class_type": "KSamplerAdvanced", "inputs": {
                "noise_seed": 0, "steps": 4, "cfg": 1.0,
                "model": ["101", 0], "positive": ["98", 0], "negative": ["98", 1],
                "latent_image": ["98", 2]
            } },
            "87": { "class_type": "VAEDecode", "inputs": { "samples": ["85", 0], "vae": ["90", 0] } },
            "89": { "class_type": "CLIPTextEncode", "inputs": { "text": "static, blurry", "clip": ["84", 0] } },
            "90": { "class_type": "VAELoader", "inputs": { "vae_name": "wan_vae.safetensors" } },
            "93": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["84", 0] } },
            "94": { "class_type": "CreateVideo", "inputs": { "fps": 16, "images": ["87", 0] } },
            "95": { "class_type": "UNETLoader", "inputs": { "unet_name": "wan_high.safetensors" } },
            "97": { "class_type": "LoadImage", "inputs": { "image": "" } },
            "98": { "class_type": "WanImageToVideo", "inputs": {
                "width": 640, "height": 640, "length": 81, "batch_size": 1,
                "positive": ["93", 0], "negative": ["89", 0], "vae": ["90", 0], "start_image": ["97", 0]
            } },
            "101": { "class_type": "LoraLoaderModelOnly", "inputs": {
                "lora_name": "lightx2v_high_noise.safetensors", "strength_model": 1.0, "model": ["95", 0]
            } },
            "108": { "class_type": "SaveVideo", "inputs": {
                "filename_prefix": "video/yeepay_video", "format": "auto", "codec": "auto", "video": ["94", 0]
            } }
        },
        "connections": []
    })
}

fn catalog(config: &PipelineConfig) -> MemoryCatalog {
    let unet_dir = config.comfyui_models_dir.join("unet");
    std::fs::create_dir_all(&unet_dir).unwrap();
    std::fs::write(unet_dir.join("flux1-dev.safetensors"), b"weights").unwrap();
    std::fs::create_dir_all(&config.upload_dir).unwrap();
    std::fs::write(config.upload_dir.join("foo.png"), b"source image").unwrap();

    let mut flux = MemoryCatalog::base_model_row(1, "flux_dev", ModelType::Flux, Some(1));
    flux.unet_file = Some("flux1-dev.safetensors".into());
    let mut hidden = MemoryCatalog::base_model_row(2, "flux_old", ModelType::Flux, Some(1));
    hidden.is_available = false;

    MemoryCatalog::new()
        .with_workflow(MemoryCatalog::workflow_row(1, "flux_t2i", flux_template()))
        .with_workflow(MemoryCatalog::workflow_row(2, "upscale_ultimate", upscale_template()))
        .with_workflow(MemoryCatalog::workflow_row(3, "wan_i2v", wan_template()))
        .with_base_model(flux)
        .with_base_model(hidden)
        .with_base_model(MemoryCatalog::base_model_row(3, "wan_i2v", ModelType::Wan, Some(3)))
        .with_lora(MemoryCatalog::lora_row(1, "anime", "flux_dev", "anime.safetensors"))
        .with_lora(MemoryCatalog::lora_row(2, "qwen_style", "qwen_image", "qs.safetensors"))
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub router: Router,
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryTaskStore>,
    pub engine: Arc<InstantEngine>,
    pub pipeline: Arc<PipelineConfig>,
}

impl TestApp {
    /// A fresh router; each request consumes one.
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full application router over in-memory stores and a started
/// orchestrator.
pub fn build_test_app() -> TestApp {
    build_test_app_with(true)
}

pub fn build_test_app_with(engine_reachable: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(PipelineConfig::rooted_at(dir.path()));
    let catalog: Arc<dyn Catalog> = Arc::new(catalog(&pipeline));
    let store = Arc::new(MemoryTaskStore::new());
    let engine = Arc::new(InstantEngine::new(&pipeline, engine_reachable));

    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        Arc::clone(&catalog),
        Arc::clone(&engine) as Arc<dyn Engine>,
        Arc::clone(&pipeline),
    );
    orchestrator.start();

    let config = test_config();
    let state = AppState {
        orchestrator: orchestrator.clone(),
        catalog,
        config: Arc::new(config.clone()),
    };
    let router = build_app_router(state, &config);

    TestApp {
        dir,
        router,
        orchestrator,
        store,
        engine,
        pipeline,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, Body::empty(), false).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, Body::empty(), false).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::POST, uri, Body::from(body.to_string()), true).await
}

pub async fn post_empty(app: Router, uri: &str) -> Response {
    send(app, Method::POST, uri, Body::empty(), false).await
}

async fn send(app: Router, method: Method, uri: &str, body: Body, json: bool) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if json {
        builder = builder.header("content-type", "application/json");
    }
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll `GET /api/task/{id}` until the task leaves pending/running.
pub async fn poll_until_terminal(t: &TestApp, task_id: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = get(t.app(), &format!("/api/task/{task_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let task = body_json(response).await;
        let status = task["status"].as_str().unwrap_or_default().to_string();
        if status != "pending" && status != "running" {
            return task;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("task {task_id} stuck in {status}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
