//! Mirrors LoRA preview images into the upload area.
//!
//! Previews are registered relative to the engine's LoRA directory and served
//! from `<upload_dir>/lora_previews/`. A preview is copied when missing or
//! when the source is newer or a different size.

use std::path::{Component, Path, PathBuf};

use yeepay_db::catalog::Catalog;
use yeepay_db::store::StoreError;

use crate::config::PipelineConfig;

/// Sub-directory of the upload area holding mirrored previews.
pub const PREVIEW_DIR: &str = "lora_previews";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreviewSyncReport {
    pub copied: usize,
    pub up_to_date: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Copy every registered LoRA preview that is missing or stale.
pub async fn sync_lora_previews(
    catalog: &dyn Catalog,
    config: &PipelineConfig,
) -> Result<PreviewSyncReport, StoreError> {
    let loras = catalog.loras_with_previews().await?;
    let target_dir = config.upload_dir.join(PREVIEW_DIR);
    let mut report = PreviewSyncReport::default();

    for lora in loras {
        let Some(preview) = lora.preview_image_path.as_deref() else {
            continue;
        };
        let Some(source) = preview_source(&config.comfyui_loras_dir, preview) else {
            tracing::warn!(lora = %lora.code, preview, "Preview path escapes the LoRA directory");
            report.failed += 1;
            continue;
        };
        let Some(filename) = source.file_name().map(|n| n.to_owned()) else {
            report.failed += 1;
            continue;
        };
        let dest = target_dir.join(&filename);

        match sync_one(&source, &dest).await {
            Ok(SyncOutcome::Copied) => report.copied += 1,
            Ok(SyncOutcome::UpToDate) => report.up_to_date += 1,
            Ok(SyncOutcome::SourceMissing) => {
                tracing::debug!(lora = %lora.code, source = %source.display(), "Preview source missing");
                report.missing += 1;
            }
            Err(e) => {
                tracing::warn!(lora = %lora.code, error = %e, "Failed to copy LoRA preview");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        copied = report.copied,
        up_to_date = report.up_to_date,
        missing = report.missing,
        failed = report.failed,
        "LoRA preview sync finished",
    );
    Ok(report)
}

enum SyncOutcome {
    Copied,
    UpToDate,
    SourceMissing,
}

fn preview_source(loras_dir: &Path, preview: &str) -> Option<PathBuf> {
    let normalized = yeepay_core::urls::normalize_separators(preview);
    let relative = Path::new(&normalized);
    let safe = !normalized.is_empty()
        && relative.components().all(|c| matches!(c, Component::Normal(_)));
    safe.then(|| loras_dir.join(relative))
}

async fn sync_one(source: &Path, dest: &Path) -> std::io::Result<SyncOutcome> {
    let source_meta = match tokio::fs::metadata(source).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SyncOutcome::SourceMissing),
        Err(e) => return Err(e),
    };

    if let Ok(dest_meta) = tokio::fs::metadata(dest).await {
        let same_size = dest_meta.len() == source_meta.len();
        let not_older = match (dest_meta.modified(), source_meta.modified()) {
            (Ok(d), Ok(s)) => d >= s,
            _ => true,
        };
        if same_size && not_older {
            return Ok(SyncOutcome::UpToDate);
        }
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, dest).await?;
    Ok(SyncOutcome::Copied)
}
