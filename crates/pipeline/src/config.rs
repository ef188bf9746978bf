//! Pipeline configuration: engine location, filesystem layout, polling and
//! deadlines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use yeepay_core::model::ModelType;
use yeepay_core::request::DeadlineClass;

/// Bounds applied to `POLL_INTERVAL_MS`.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment flavour; selects filesystem defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "development" | "dev" => Ok(Environment::Local),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::Invalid {
                var: "ENVIRONMENT",
                value: value.to_string(),
                reason: "expected 'local' or 'production'".into(),
            }),
        }
    }

    fn default_dir(self, local: &str, production: &str) -> PathBuf {
        match self {
            Environment::Local => PathBuf::from(local),
            Environment::Production => PathBuf::from(production),
        }
    }
}

/// Hard deadlines for running tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadlines {
    pub flux: Duration,
    pub qwen: Duration,
    pub wan: Duration,
    pub gemini: Duration,
    pub seedream4: Duration,
    pub upscale: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            flux: Duration::from_secs(300),
            qwen: Duration::from_secs(300),
            wan: Duration::from_secs(900),
            gemini: Duration::from_secs(300),
            seedream4: Duration::from_secs(300),
            upscale: Duration::from_secs(600),
        }
    }
}

impl Deadlines {
    pub fn for_class(&self, class: DeadlineClass) -> Duration {
        match class {
            DeadlineClass::Model(ModelType::Flux) => self.flux,
            DeadlineClass::Model(ModelType::Qwen) => self.qwen,
            DeadlineClass::Model(ModelType::Wan) => self.wan,
            DeadlineClass::Model(ModelType::Gemini) => self.gemini,
            DeadlineClass::Model(ModelType::Seedream4) => self.seedream4,
            DeadlineClass::Upscale => self.upscale,
        }
    }
}

/// Configuration of the generation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    /// Base URL of the ComfyUI engine.
    pub comfyui_url: String,
    /// Engine directory whose files are addressed by `filename` alone.
    pub comfyui_output_dir: PathBuf,
    /// Engine output root; history entries are relative to it via `subfolder`.
    pub comfyui_main_output_dir: PathBuf,
    /// Engine input directory that image-load nodes read from.
    pub comfyui_input_dir: PathBuf,
    pub comfyui_models_dir: PathBuf,
    pub comfyui_loras_dir: PathBuf,
    pub yeepay_models_dir: PathBuf,
    /// Service-owned output area, one directory per task.
    pub output_dir: PathBuf,
    /// User uploads, including reference images.
    pub upload_dir: PathBuf,
    pub poll_interval: Duration,
    pub reconcile_workers: usize,
    pub relocate_max_attempts: u32,
    pub relocate_backoff: Duration,
    pub deadlines: Deadlines,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default (local)            |
    /// |---------------------------|----------------------------|
    /// | `ENVIRONMENT`             | `local`                    |
    /// | `COMFYUI_URL`             | `http://127.0.0.1:8188`    |
    /// | `COMFYUI_OUTPUT_DIR`      | `comfyui/output/yeepay`    |
    /// | `COMFYUI_MAIN_OUTPUT_DIR` | `comfyui/output`           |
    /// | `COMFYUI_INPUT_DIR`       | `comfyui/input`            |
    /// | `COMFYUI_MODELS_DIR`      | `comfyui/models`           |
    /// | `COMFYUI_LORAS_DIR`       | `comfyui/models/loras`     |
    /// | `YEEPAY_MODELS_DIR`       | `models`                   |
    /// | `OUTPUT_DIR`              | `outputs`                  |
    /// | `UPLOAD_DIR`              | `uploads`                  |
    /// | `POLL_INTERVAL_MS`        | `2000` (clamped 1000-3000) |
    /// | `RECONCILE_WORKERS`       | `4`                        |
    /// | `RELOCATE_MAX_ATTEMPTS`   | `5`                        |
    /// | `RELOCATE_BACKOFF_MS`     | `500`                      |
    /// | `DEADLINE_SECS_<TYPE>`    | see [`Deadlines`]          |
    ///
    /// With `ENVIRONMENT=production` the directory defaults move under
    /// `/app` (`/app/comfyui/output`, `/app/outputs`, ...).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("ENVIRONMENT") {
            Some(value) => Environment::parse(&value)?,
            None => Environment::Local,
        };

        let dir = |var: &str, local: &str, production: &str| -> PathBuf {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| environment.default_dir(local, production))
        };

        let poll_ms: u64 = parse_var(&lookup, "POLL_INTERVAL_MS", 2000)?;
        let poll_interval =
            Duration::from_millis(poll_ms).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);

        let reconcile_workers: usize = parse_var(&lookup, "RECONCILE_WORKERS", 4)?;
        if reconcile_workers == 0 {
            return Err(ConfigError::Invalid {
                var: "RECONCILE_WORKERS",
                value: "0".into(),
                reason: "at least one worker is required".into(),
            });
        }

        let defaults = Deadlines::default();
        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_var(&lookup, var, default.as_secs()).map(Duration::from_secs)
        };
        let deadlines = Deadlines {
            flux: secs("DEADLINE_SECS_FLUX", defaults.flux)?,
            qwen: secs("DEADLINE_SECS_QWEN", defaults.qwen)?,
            wan: secs("DEADLINE_SECS_WAN", defaults.wan)?,
            gemini: secs("DEADLINE_SECS_GEMINI", defaults.gemini)?,
            seedream4: secs("DEADLINE_SECS_SEEDREAM4", defaults.seedream4)?,
            upscale: secs("DEADLINE_SECS_UPSCALE", defaults.upscale)?,
        };

        Ok(Self {
            environment,
            comfyui_url: lookup("COMFYUI_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into()),
            comfyui_output_dir: dir(
                "COMFYUI_OUTPUT_DIR",
                "comfyui/output/yeepay",
                "/app/comfyui/output/yeepay",
            ),
            comfyui_main_output_dir: dir(
                "COMFYUI_MAIN_OUTPUT_DIR",
                "comfyui/output",
                "/app/comfyui/output",
            ),
            comfyui_input_dir: dir("COMFYUI_INPUT_DIR", "comfyui/input", "/app/comfyui/input"),
            comfyui_models_dir: dir("COMFYUI_MODELS_DIR", "comfyui/models", "/app/comfyui/models"),
            comfyui_loras_dir: dir(
                "COMFYUI_LORAS_DIR",
                "comfyui/models/loras",
                "/app/comfyui/models/loras",
            ),
            yeepay_models_dir: dir("YEEPAY_MODELS_DIR", "models", "/app/models"),
            output_dir: dir("OUTPUT_DIR", "outputs", "/app/outputs"),
            upload_dir: dir("UPLOAD_DIR", "uploads", "/app/uploads"),
            poll_interval,
            reconcile_workers,
            relocate_max_attempts: parse_var(&lookup, "RELOCATE_MAX_ATTEMPTS", 5)?,
            relocate_backoff: Duration::from_millis(parse_var(
                &lookup,
                "RELOCATE_BACKOFF_MS",
                500,
            )?),
            deadlines,
        })
    }

    /// Every directory under `root`, with fast polling. Used by tests and
    /// local tooling; no clamping is applied.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            environment: Environment::Local,
            comfyui_url: "http://127.0.0.1:8188".into(),
            comfyui_output_dir: root.join("comfyui/output/yeepay"),
            comfyui_main_output_dir: root.join("comfyui/output"),
            comfyui_input_dir: root.join("comfyui/input"),
            comfyui_models_dir: root.join("comfyui/models"),
            comfyui_loras_dir: root.join("comfyui/models/loras"),
            yeepay_models_dir: root.join("models"),
            output_dir: root.join("outputs"),
            upload_dir: root.join("uploads"),
            poll_interval: Duration::from_millis(20),
            reconcile_workers: 2,
            relocate_max_attempts: 3,
            relocate_backoff: Duration::from_millis(10),
            deadlines: Deadlines::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
