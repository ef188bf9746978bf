//! Request DTOs accepted by the HTTP surface and the parameters persisted
//! with each task.
//!
//! Field-level checks use `validator`; cross-entity checks (registry
//! lookups, LoRA compatibility) belong to the orchestrator.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::model::{ModelType, UpscaleAlgorithm, MAX_SCALE_FACTOR, MIN_SCALE_FACTOR};
use crate::resolution::ResolutionError;
use crate::task::TaskType;

/// Maximum number of LoRAs attached to one generation.
pub const MAX_LORAS: usize = 4;

/// Maximum number of images produced by one generation.
pub const MAX_COUNT: u8 = 4;

fn default_strength() -> f64 {
    1.0
}

fn default_scale_factor() -> i32 {
    2
}

fn default_fps() -> u32 {
    16
}

fn default_duration() -> u32 {
    5
}

/// A LoRA attached to a generation, with its strengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LoraSelection {
    #[serde(alias = "name")]
    #[validate(length(min = 1, max = 255))]
    pub code: String,
    /// Strength applied to the model branch.
    #[serde(default = "default_strength", alias = "weight")]
    #[validate(range(min = -5.0, max = 5.0))]
    pub strength_model: f64,
    /// Strength applied to the CLIP branch; defaults to `strength_model`.
    #[serde(default)]
    #[validate(range(min = -5.0, max = 5.0))]
    pub strength_clip: Option<f64>,
}

impl LoraSelection {
    pub fn clip_strength(&self) -> f64 {
        self.strength_clip.unwrap_or(self.strength_model)
    }
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = 128))]
    pub base_model_code: String,
    /// Positive prompt.
    #[serde(default)]
    #[validate(length(min = 1, max = 4000))]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 4000))]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 64, max = 4096))]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 64, max = 4096))]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 150))]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 30.0))]
    pub cfg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub sampler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub scheduler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub guidance: Option<f64>,
    /// Denoising strength, used by image-to-image workflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub denoise: Option<f64>,
    /// Number of images to produce in one batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 4))]
    pub count: Option<u8>,
    /// Reference image for image-to-image, relative to the upload area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image_path: Option<String>,
    /// Further reference images blended in by fusion templates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate(length(max = 2))]
    pub extra_reference_image_paths: Vec<String>,
    /// Frame rate of a generated video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 60))]
    pub fps: Option<u32>,
    /// Length of a generated video in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 30))]
    pub duration: Option<u32>,
    #[serde(default)]
    #[validate(length(max = 4), nested)]
    pub loras: Vec<LoraSelection>,
}

impl GenerateRequest {
    /// Video length in frames, when both rate and duration are set.
    pub fn frames(&self) -> Option<u32> {
        Some(self.fps? * self.duration?)
    }

    /// Every reference image, primary first.
    pub fn reference_images(&self) -> impl Iterator<Item = &str> {
        self.reference_image_path
            .as_deref()
            .into_iter()
            .chain(self.extra_reference_image_paths.iter().map(String::as_str))
    }
}

/// Body of `POST /api/generate-video`: animate a reference image.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct VideoRequest {
    #[validate(length(min = 1, max = 128))]
    pub base_model_code: String,
    #[validate(length(min = 1, max = 4000))]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub negative_prompt: Option<String>,
    #[validate(length(min = 1, max = 1024))]
    pub reference_image_path: String,
    #[serde(default = "default_fps")]
    #[validate(range(min = 1, max = 60))]
    pub fps: u32,
    #[serde(default = "default_duration")]
    #[validate(range(min = 1, max = 30))]
    pub duration: u32,
    #[serde(default)]
    #[validate(range(min = 64, max = 4096))]
    pub width: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 64, max = 4096))]
    pub height: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    #[validate(length(max = 4), nested)]
    pub loras: Vec<LoraSelection>,
}

impl VideoRequest {
    pub fn into_generate(self) -> GenerateRequest {
        GenerateRequest {
            base_model_code: self.base_model_code,
            description: self.description,
            negative_prompt: self.negative_prompt,
            width: self.width,
            height: self.height,
            seed: self.seed,
            reference_image_path: Some(self.reference_image_path),
            fps: Some(self.fps),
            duration: Some(self.duration),
            loras: self.loras,
            ..Default::default()
        }
    }
}

/// Body of `POST /api/generate-image-fusion`: blend two or three reference
/// images under one prompt.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct FusionRequest {
    #[validate(length(min = 1, max = 128))]
    pub base_model_code: String,
    #[validate(length(min = 1, max = 4000))]
    pub description: String,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub negative_prompt: Option<String>,
    #[validate(length(min = 2, max = 3))]
    pub image_paths: Vec<String>,
    #[serde(default)]
    #[validate(range(min = 1, max = 150))]
    pub steps: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 30.0))]
    pub cfg: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    #[validate(range(min = 64, max = 4096))]
    pub width: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 64, max = 4096))]
    pub height: Option<u32>,
}

impl FusionRequest {
    pub fn into_generate(self) -> GenerateRequest {
        let mut images = self.image_paths.into_iter();
        GenerateRequest {
            base_model_code: self.base_model_code,
            description: self.description,
            negative_prompt: self.negative_prompt,
            width: self.width,
            height: self.height,
            seed: self.seed,
            steps: self.steps,
            cfg: self.cfg,
            reference_image_path: images.next(),
            extra_reference_image_paths: images.collect(),
            ..Default::default()
        }
    }
}

/// Body of `POST /api/upscale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpscaleRequest {
    #[validate(length(min = 1, max = 1024))]
    pub image_path: String,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: i32,
    #[serde(default)]
    pub algorithm: UpscaleAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 4000))]
    pub description: Option<String>,
}

impl UpscaleRequest {
    /// Scale factor must lie in `[1, 4]`.
    pub fn check_scale(&self) -> Result<u8, ResolutionError> {
        let min = i32::from(MIN_SCALE_FACTOR);
        let max = i32::from(MAX_SCALE_FACTOR);
        if (min..=max).contains(&self.scale_factor) {
            Ok(self.scale_factor as u8)
        } else {
            Err(ResolutionError::out_of_range(format!(
                "scale_factor must be between {min} and {max}, got {}",
                self.scale_factor
            )))
        }
    }
}

/// Body of `POST /api/upscale/batch`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BatchUpscaleRequest {
    #[validate(length(min = 1, max = 50))]
    pub image_paths: Vec<String>,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: i32,
    #[serde(default)]
    pub algorithm: UpscaleAlgorithm,
}

impl BatchUpscaleRequest {
    /// Split into one request per image path.
    pub fn into_requests(self) -> Vec<UpscaleRequest> {
        self.image_paths
            .into_iter()
            .map(|image_path| UpscaleRequest {
                image_path,
                scale_factor: self.scale_factor,
                algorithm: self.algorithm,
                description: None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Persisted parameters
// ---------------------------------------------------------------------------

/// Parameters stored with a generation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParameters {
    /// Family of the base model at submission time.
    pub model_type: ModelType,
    #[serde(flatten)]
    pub request: GenerateRequest,
}

/// Parameters stored with an upscale task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleParameters {
    pub image_path: String,
    pub scale_factor: u8,
    pub algorithm: UpscaleAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Structured parameters of a task, tagged by task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "lowercase")]
pub enum TaskParameters {
    Generate(GenerateParameters),
    Upscale(UpscaleParameters),
}

/// Which configured deadline applies to a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineClass {
    Model(ModelType),
    Upscale,
}

impl TaskParameters {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskParameters::Generate(_) => TaskType::Generate,
            TaskParameters::Upscale(_) => TaskType::Upscale,
        }
    }

    pub fn deadline_class(&self) -> DeadlineClass {
        match self {
            TaskParameters::Generate(p) => DeadlineClass::Model(p.model_type),
            TaskParameters::Upscale(_) => DeadlineClass::Upscale,
        }
    }

    /// Primary reference image the task reads, if any.
    pub fn reference_image_path(&self) -> Option<&str> {
        match self {
            TaskParameters::Generate(p) => p.request.reference_image_path.as_deref(),
            TaskParameters::Upscale(p) => Some(p.image_path.as_str()),
        }
    }

    /// Record the seed actually used so the task can be reproduced.
    pub fn set_seed(&mut self, seed: u64) {
        match self {
            TaskParameters::Generate(p) => p.request.seed = Some(seed),
            TaskParameters::Upscale(p) => p.seed = Some(seed),
        }
    }
}
