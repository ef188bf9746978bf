//! Reasons a request cannot be turned into a workflow graph.

use serde::Serialize;

/// Discriminating reason of a failed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionReason {
    BaseModelNotFound,
    BaseModelUnavailable,
    LoRAIncompatible,
    LoRANotFound,
    TemplateMalformed,
    TemplateNotFound,
    ReferenceImageMissing,
    ParameterOutOfRange,
    AlgorithmUnsupported,
    ModelTypeUnsupported,
}

impl ResolutionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionReason::BaseModelNotFound => "BaseModelNotFound",
            ResolutionReason::BaseModelUnavailable => "BaseModelUnavailable",
            ResolutionReason::LoRAIncompatible => "LoRAIncompatible",
            ResolutionReason::LoRANotFound => "LoRANotFound",
            ResolutionReason::TemplateMalformed => "TemplateMalformed",
            ResolutionReason::TemplateNotFound => "TemplateNotFound",
            ResolutionReason::ReferenceImageMissing => "ReferenceImageMissing",
            ResolutionReason::ParameterOutOfRange => "ParameterOutOfRange",
            ResolutionReason::AlgorithmUnsupported => "AlgorithmUnsupported",
            ResolutionReason::ModelTypeUnsupported => "ModelTypeUnsupported",
        }
    }
}

impl std::fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolution failure: the reason plus a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {message}")]
pub struct ResolutionError {
    pub reason: ResolutionReason,
    pub message: String,
}

impl ResolutionError {
    pub fn new(reason: ResolutionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn base_model_not_found(code: &str) -> Self {
        Self::new(
            ResolutionReason::BaseModelNotFound,
            format!("base model '{code}' is not registered"),
        )
    }

    pub fn template_malformed(message: impl Into<String>) -> Self {
        Self::new(ResolutionReason::TemplateMalformed, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ResolutionReason::ParameterOutOfRange, message)
    }
}
