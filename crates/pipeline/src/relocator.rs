//! Copies engine outputs into the service's output area.
//!
//! Outputs of a task land in `<output_dir>/<task_id>/<filename>`. Copies are
//! idempotent: a destination that already holds a file of the same length is
//! left alone, and new files are written to a temporary name first and then
//! renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use yeepay_comfyui::OutputFile;
use yeepay_core::task::TaskType;
use yeepay_core::types::TaskId;
use yeepay_core::urls::{image_url, is_plain_filename, normalize_separators, relative_output_path};

use crate::config::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum RelocationError {
    #[error("OutputMissing: {0}")]
    OutputMissing(String),

    #[error("Failed to relocate {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where a task's outputs ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocated {
    /// Relative path of the first output.
    pub result_path: String,
    /// Stable URLs of every output, in engine order.
    pub image_urls: Vec<String>,
}

pub struct Relocator {
    config: Arc<PipelineConfig>,
}

impl Relocator {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    /// Directory holding the outputs of one task.
    pub fn task_dir(&self, task_id: TaskId) -> PathBuf {
        self.config.output_dir.join(task_id.to_string())
    }

    /// Copy every output file of a finished prompt.
    pub async fn relocate(
        &self,
        task_id: TaskId,
        task_type: TaskType,
        files: &[&OutputFile],
    ) -> Result<Relocated, RelocationError> {
        if files.is_empty() {
            return Err(RelocationError::OutputMissing(
                "engine reported no output files".into(),
            ));
        }

        let mut filenames = Vec::with_capacity(files.len());
        for file in files {
            filenames.push(self.relocate_one(task_id, file).await?);
        }

        tracing::info!(
            task_id = %task_id,
            count = filenames.len(),
            "Relocated engine outputs",
        );

        Ok(Relocated {
            result_path: relative_output_path(task_id, &filenames[0]),
            image_urls: filenames
                .iter()
                .map(|name| image_url(task_type, task_id, name))
                .collect(),
        })
    }

    async fn relocate_one(&self, task_id: TaskId, file: &OutputFile) -> Result<String, RelocationError> {
        let filename = output_filename(&file.filename)
            .ok_or_else(|| RelocationError::OutputMissing(file.filename.clone()))?;
        let dest_dir = self.task_dir(task_id);
        let dest = dest_dir.join(&filename);

        let source = self.find_source(file, &filename).await?;
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|source| RelocationError::Io {
                path: dest_dir.clone(),
                source,
            })?;
        copy_idempotent(&source, &dest)
            .await
            .map_err(|source| RelocationError::Io {
                path: dest.clone(),
                source,
            })?;
        Ok(filename)
    }

    /// Wait for the engine's file to appear, with linear backoff.
    async fn find_source(&self, file: &OutputFile, filename: &str) -> Result<PathBuf, RelocationError> {
        let candidates = self.source_candidates(file, filename);
        let attempts = self.config.relocate_max_attempts.max(1);

        for attempt in 1..=attempts {
            for candidate in &candidates {
                if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
                    return Ok(candidate.clone());
                }
            }
            if attempt < attempts {
                tracing::debug!(filename, attempt, "Engine output not visible yet, retrying");
                tokio::time::sleep(self.config.relocate_backoff * attempt).await;
            }
        }

        tracing::warn!(filename, attempts, "Engine output never appeared");
        Err(RelocationError::OutputMissing(filename.to_string()))
    }

    fn source_candidates(&self, file: &OutputFile, filename: &str) -> Vec<PathBuf> {
        let subfolder = normalize_separators(&file.subfolder);
        let mut main = self.config.comfyui_main_output_dir.clone();
        for part in subfolder.split('/').filter(|p| is_plain_filename(p)) {
            main.push(part);
        }
        vec![
            main.join(filename),
            self.config.comfyui_output_dir.join(filename),
        ]
    }
}

/// The bare file name of an engine output, if it is a usable one.
fn output_filename(raw: &str) -> Option<String> {
    let normalized = normalize_separators(raw);
    let name = normalized.rsplit('/').next()?;
    is_plain_filename(name).then(|| name.to_string())
}

async fn copy_idempotent(source: &Path, dest: &Path) -> std::io::Result<()> {
    let source_len = tokio::fs::metadata(source).await?.len();
    if let Ok(existing) = tokio::fs::metadata(dest).await {
        if existing.len() == source_len {
            return Ok(());
        }
    }

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    tokio::fs::copy(source, &partial).await?;
    tokio::fs::rename(&partial, dest).await
}
