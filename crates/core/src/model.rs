//! Base model families and the upscale algorithm catalog.

use serde::Serialize;

define_text_enum! {
    /// Family of a base model; selects the workflow substitution contract.
    ModelType {
        Flux => "flux",
        Qwen => "qwen",
        Wan => "wan",
        Gemini => "gemini",
        Seedream4 => "seedream4",
    }
}

impl ModelType {
    /// Hosted models run behind an engine API node and need no local weights.
    pub fn is_hosted(self) -> bool {
        matches!(self, ModelType::Gemini | ModelType::Seedream4)
    }

    /// Whether LoRAs can be attached to this family.
    pub fn supports_loras(self) -> bool {
        !self.is_hosted()
    }

    /// Families whose templates turn a reference image into a video.
    pub fn makes_video(self) -> bool {
        matches!(self, ModelType::Wan)
    }

    /// Families whose templates blend several reference images into one.
    pub fn supports_fusion(self) -> bool {
        matches!(self, ModelType::Qwen | ModelType::Gemini)
    }
}

define_text_enum! {
    /// Upscale algorithm requested by the caller.
    UpscaleAlgorithm {
        Ultimate => "ultimate",
        Lanczos => "lanczos",
        Bicubic => "bicubic",
        Nearest => "nearest",
    }
}

/// Largest accepted upscale factor.
pub const MAX_SCALE_FACTOR: u8 = 4;
/// Smallest accepted upscale factor.
pub const MIN_SCALE_FACTOR: u8 = 1;

/// One entry of the `GET /api/upscale/algorithms` catalog.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmInfo {
    pub id: UpscaleAlgorithm,
    pub name: &'static str,
    pub description: &'static str,
    pub max_scale: u8,
    /// Only algorithms backed by a workflow reach the engine.
    pub supported: bool,
}

impl UpscaleAlgorithm {
    /// Whether a workflow exists for this algorithm.
    pub fn is_supported(self) -> bool {
        matches!(self, UpscaleAlgorithm::Ultimate)
    }

    /// Name of the workflow template that implements the algorithm.
    pub fn workflow_name(self) -> String {
        format!("upscale_{}", self.as_str())
    }

    pub fn info(self) -> AlgorithmInfo {
        let (name, description) = match self {
            UpscaleAlgorithm::Ultimate => (
                "Ultimate SD Upscale",
                "Tiled diffusion upscale, best quality",
            ),
            UpscaleAlgorithm::Lanczos => ("Lanczos", "Sharp resampling filter"),
            UpscaleAlgorithm::Bicubic => ("Bicubic", "Smooth resampling filter"),
            UpscaleAlgorithm::Nearest => ("Nearest", "Nearest-neighbour, keeps hard edges"),
        };
        AlgorithmInfo {
            id: self,
            name,
            description,
            max_scale: MAX_SCALE_FACTOR,
            supported: self.is_supported(),
        }
    }

    /// The full catalog, declared order.
    pub fn catalog() -> Vec<AlgorithmInfo> {
        Self::ALL.iter().map(|a| a.info()).collect()
    }
}

impl Default for UpscaleAlgorithm {
    fn default() -> Self {
        UpscaleAlgorithm::Ultimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_models_reject_loras() {
        assert!(ModelType::Gemini.is_hosted());
        assert!(!ModelType::Seedream4.supports_loras());
        assert!(ModelType::Flux.supports_loras());
    }

    #[test]
    fn video_and_fusion_families() {
        assert!(ModelType::Wan.makes_video());
        assert!(!ModelType::Flux.makes_video());
        assert!(ModelType::Qwen.supports_fusion());
        assert!(ModelType::Gemini.supports_fusion());
        assert!(!ModelType::Wan.supports_fusion());
    }

    #[test]
    fn only_ultimate_is_supported() {
        let supported: Vec<_> = UpscaleAlgorithm::catalog()
            .into_iter()
            .filter(|a| a.supported)
            .map(|a| a.id)
            .collect();
        assert_eq!(supported, vec![UpscaleAlgorithm::Ultimate]);
        assert_eq!(UpscaleAlgorithm::Ultimate.workflow_name(), "upscale_ultimate");
    }
}
