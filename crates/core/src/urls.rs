//! Stable image URLs and the relative output paths they map to.
//!
//! Outputs of a task live at `<output_dir>/<task_id>/<filename>`; the stored
//! `result_path` is the relative part `<task_id>/<filename>`, always with
//! forward slashes.

use crate::task::TaskType;
use crate::types::TaskId;

/// URL prefix for generated images.
pub const GENERATE_IMAGE_PREFIX: &str = "/api/image/";
/// URL prefix for upscaled images.
pub const UPSCALE_IMAGE_PREFIX: &str = "/api/upscale/image/";

pub fn image_url_prefix(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Generate => GENERATE_IMAGE_PREFIX,
        TaskType::Upscale => UPSCALE_IMAGE_PREFIX,
    }
}

/// Stable URL of one output of a task.
pub fn image_url(task_type: TaskType, task_id: TaskId, filename: &str) -> String {
    format!("{}{task_id}/{filename}", image_url_prefix(task_type))
}

/// Relative output path of one output of a task.
pub fn relative_output_path(task_id: TaskId, filename: &str) -> String {
    format!("{task_id}/{filename}")
}

/// Decode an image URL back into its relative output path.
///
/// Returns `None` when the URL does not carry one of the known prefixes.
pub fn relative_path_from_url(url: &str) -> Option<&str> {
    url.strip_prefix(UPSCALE_IMAGE_PREFIX)
        .or_else(|| url.strip_prefix(GENERATE_IMAGE_PREFIX))
}

/// Replace backslashes so stored paths never depend on the engine's OS.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// A bare file name: non-empty, no separators, no parent references.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
