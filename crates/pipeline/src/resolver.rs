//! Turns task parameters into a concrete engine prompt.
//!
//! The registry side (base model, LoRAs, template) comes from a [`Catalog`];
//! weight files and reference images are checked on disk. The pure
//! substitution step lives in [`yeepay_core::workflow`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use yeepay_core::model::UpscaleAlgorithm;
use yeepay_core::request::{
    GenerateParameters, GenerateRequest, TaskParameters, UpscaleParameters, UpscaleRequest,
};
use yeepay_core::resolution::{ResolutionError, ResolutionReason};
use yeepay_core::seed::resolve_seed;
use yeepay_core::types::TaskId;
use yeepay_core::workflow::{
    apply_trigger_words, substitute, LoraBinding, Substitution, Target, WeightFiles, WorkflowGraph,
};
use yeepay_db::catalog::Catalog;
use yeepay_db::models::registry::{BaseModel, Lora, WorkflowTemplate};
use yeepay_db::store::StoreError;

use crate::config::PipelineConfig;

/// Sub-directories searched for each kind of weight file.
const UNET_DIRS: &[&str] = &["unet", "diffusion_models", "checkpoints"];
const CLIP_DIRS: &[&str] = &["clip", "text_encoders"];
const VAE_DIRS: &[&str] = &["vae"];

/// Prefix clients commonly send in front of upload-relative paths.
const UPLOADS_PREFIX: &str = "uploads/";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Registry lookup failed: {0}")]
    Catalog(#[from] StoreError),

    #[error("Failed to stage input image: {0}")]
    Io(#[from] std::io::Error),
}

/// A materialized workflow ready for submission.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    /// The engine prompt (bare node map).
    pub prompt: Value,
    /// The seed written into the graph.
    pub seed: u64,
}

pub struct Resolver {
    catalog: Arc<dyn Catalog>,
    config: Arc<PipelineConfig>,
}

impl Resolver {
    pub fn new(catalog: Arc<dyn Catalog>, config: Arc<PipelineConfig>) -> Self {
        Self { catalog, config }
    }

    // ── Submission-time checks ──

    /// Registry checks that reject a generation before any task exists.
    pub async fn precheck_generate(&self, req: &GenerateRequest) -> Result<BaseModel, ResolveError> {
        let model = self.available_base_model(&req.base_model_code).await?;

        if !req.loras.is_empty() && !model.model_type.supports_loras() {
            return Err(ResolutionError::new(
                ResolutionReason::LoRAIncompatible,
                format!("base model '{}' does not accept LoRAs", model.code),
            )
            .into());
        }
        for selection in &req.loras {
            self.compatible_lora(&selection.code, &model.code).await?;
        }

        for path in req.reference_images() {
            self.upload_path(path)?;
        }
        Ok(model)
    }

    /// Parameter checks that reject an upscale before any task exists.
    pub fn precheck_upscale(&self, req: &UpscaleRequest) -> Result<u8, ResolveError> {
        let factor = req.check_scale()?;
        check_algorithm(req.algorithm)?;
        self.upload_path(&req.image_path)?;
        Ok(factor)
    }

    // ── Resolution ──

    /// Materialize the workflow for a persisted task.
    pub async fn resolve(
        &self,
        task_id: TaskId,
        params: &TaskParameters,
    ) -> Result<ResolvedWorkflow, ResolveError> {
        match params {
            TaskParameters::Generate(p) => self.resolve_generate(task_id, p).await,
            TaskParameters::Upscale(p) => self.resolve_upscale(task_id, p).await,
        }
    }

    async fn resolve_generate(
        &self,
        task_id: TaskId,
        params: &GenerateParameters,
    ) -> Result<ResolvedWorkflow, ResolveError> {
        let req = &params.request;
        let model = self.available_base_model(&req.base_model_code).await?;
        let weights = self.check_weight_files(&model).await?;

        let workflow_id = model.workflow_id.ok_or_else(|| {
            ResolutionError::new(
                ResolutionReason::TemplateNotFound,
                format!("base model '{}' has no workflow", model.code),
            )
        })?;
        let template = self.catalog.workflow(workflow_id).await?;
        let graph = parse_template(template, &format!("workflow {workflow_id}"))?;

        let mut loras = Vec::with_capacity(req.loras.len());
        let mut triggers = Vec::new();
        for selection in &req.loras {
            let lora = self.compatible_lora(&selection.code, &model.code).await?;
            if let Some(trigger) = lora.trigger_word.clone() {
                triggers.push(trigger);
            }
            loras.push(LoraBinding {
                file: lora.file_path,
                strength_model: selection.strength_model,
                strength_clip: selection.clip_strength(),
            });
        }

        let mut images = Vec::new();
        for path in req.reference_images() {
            images.push(self.stage_input(task_id, path).await?);
        }
        let mut images = images.into_iter();
        let image = images.next();

        let seed = resolve_seed(req.seed);
        let sub = Substitution {
            prompt: apply_trigger_words(&req.description, triggers.iter().map(String::as_str)),
            negative_prompt: req.negative_prompt.clone(),
            seed,
            steps: req.steps,
            cfg: req.cfg,
            sampler_name: req.sampler_name.clone(),
            scheduler: req.scheduler.clone(),
            guidance: req.guidance,
            denoise: req.denoise,
            width: req.width,
            height: req.height,
            batch_size: req.count,
            image,
            extra_images: images.collect(),
            frames: req.frames(),
            fps: req.fps,
            weights,
            loras,
            upscale_by: None,
        };
        let resolved = substitute(&graph, Target::Generation(model.model_type), &sub)?;

        Ok(ResolvedWorkflow {
            prompt: resolved.to_prompt(),
            seed,
        })
    }

    async fn resolve_upscale(
        &self,
        task_id: TaskId,
        params: &UpscaleParameters,
    ) -> Result<ResolvedWorkflow, ResolveError> {
        check_algorithm(params.algorithm)?;
        let name = params.algorithm.workflow_name();
        let template = self.catalog.workflow_by_name(&name).await?;
        let graph = parse_template(template, &name)?;

        let image = self.stage_input(task_id, &params.image_path).await?;
        let seed = resolve_seed(params.seed);
        let sub = Substitution {
            seed,
            image: Some(image),
            upscale_by: Some(f64::from(params.scale_factor)),
            ..Default::default()
        };
        let resolved = substitute(&graph, Target::Upscale, &sub)?;

        Ok(ResolvedWorkflow {
            prompt: resolved.to_prompt(),
            seed,
        })
    }

    // ── Registry helpers ──

    async fn available_base_model(&self, code: &str) -> Result<BaseModel, ResolveError> {
        let model = self
            .catalog
            .base_model(code)
            .await?
            .ok_or_else(|| ResolutionError::base_model_not_found(code))?;
        if !model.is_available {
            return Err(ResolutionError::new(
                ResolutionReason::BaseModelUnavailable,
                format!("base model '{code}' is disabled"),
            )
            .into());
        }
        Ok(model)
    }

    async fn compatible_lora(&self, code: &str, base_model: &str) -> Result<Lora, ResolveError> {
        let lora = self
            .catalog
            .lora(code)
            .await?
            .filter(|l| l.is_available)
            .ok_or_else(|| {
                ResolutionError::new(
                    ResolutionReason::LoRANotFound,
                    format!("LoRA '{code}' is not registered or disabled"),
                )
            })?;
        if lora.base_model != base_model {
            return Err(ResolutionError::new(
                ResolutionReason::LoRAIncompatible,
                format!(
                    "LoRA '{code}' targets '{}', not '{base_model}'",
                    lora.base_model
                ),
            )
            .into());
        }
        Ok(lora)
    }

    /// Every weight file referenced by the model must exist on disk.
    async fn check_weight_files(&self, model: &BaseModel) -> Result<WeightFiles, ResolveError> {
        if model.model_type.is_hosted() {
            return Ok(WeightFiles::default());
        }
        let wanted = [
            (&model.unet_file, UNET_DIRS),
            (&model.clip_file, CLIP_DIRS),
            (&model.vae_file, VAE_DIRS),
        ];
        for (file, dirs) in wanted {
            let Some(file) = file else { continue };
            if !self.weight_exists(file, dirs).await {
                return Err(ResolutionError::new(
                    ResolutionReason::BaseModelUnavailable,
                    format!("weight file '{file}' of base model '{}' is missing", model.code),
                )
                .into());
            }
        }
        Ok(WeightFiles {
            unet: model.unet_file.clone(),
            clip: model.clip_file.clone(),
            vae: model.vae_file.clone(),
        })
    }

    async fn weight_exists(&self, file: &str, dirs: &[&str]) -> bool {
        let roots = [&self.config.comfyui_models_dir, &self.config.yeepay_models_dir];
        for root in roots {
            for dir in dirs {
                let candidate = root.join(dir).join(file);
                if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                    return true;
                }
            }
        }
        false
    }

    // ── Input images ──

    /// Map a client path onto the upload area, rejecting escapes.
    pub fn upload_path(&self, path: &str) -> Result<PathBuf, ResolutionError> {
        let normalized = yeepay_core::urls::normalize_separators(path);
        let relative = normalized.strip_prefix(UPLOADS_PREFIX).unwrap_or(&normalized);
        let relative = Path::new(relative);

        let safe = !relative.as_os_str().is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ResolutionError::new(
                ResolutionReason::ReferenceImageMissing,
                format!("image path '{path}' must be relative to the upload area"),
            ));
        }
        Ok(self.config.upload_dir.join(relative))
    }

    /// Copy an uploaded image into the engine's input directory and return
    /// the file name the image-load node should read. Staged names carry the
    /// task id so uploads sharing a file name never overwrite each other.
    async fn stage_input(&self, task_id: TaskId, path: &str) -> Result<String, ResolveError> {
        let source = self.upload_path(path)?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(ResolutionError::new(
                ResolutionReason::ReferenceImageMissing,
                format!("image '{path}' does not exist"),
            )
            .into());
        }
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| format!("{task_id}_{name}"))
            .ok_or_else(|| {
                ResolutionError::new(
                    ResolutionReason::ReferenceImageMissing,
                    format!("image path '{path}' has no file name"),
                )
            })?;

        tokio::fs::create_dir_all(&self.config.comfyui_input_dir).await?;
        tokio::fs::copy(&source, self.config.comfyui_input_dir.join(&filename)).await?;
        tracing::debug!(source = %source.display(), %filename, "Staged input image");
        Ok(filename)
    }
}

fn check_algorithm(algorithm: UpscaleAlgorithm) -> Result<(), ResolutionError> {
    if algorithm.is_supported() {
        Ok(())
    } else {
        Err(ResolutionError::new(
            ResolutionReason::AlgorithmUnsupported,
            format!("upscale algorithm '{algorithm}' has no workflow yet"),
        ))
    }
}

fn parse_template(
    template: Option<WorkflowTemplate>,
    label: &str,
) -> Result<WorkflowGraph, ResolutionError> {
    let template = template.filter(|t| t.is_available).ok_or_else(|| {
        ResolutionError::new(
            ResolutionReason::TemplateNotFound,
            format!("{label} is not registered or disabled"),
        )
    })?;
    WorkflowGraph::parse(&template.workflow_json)
}
