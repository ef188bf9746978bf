//! The generation task pipeline.
//!
//! [`Orchestrator`] accepts requests and drives each task through the
//! engine; [`Resolver`] turns parameters into a workflow graph and
//! [`Relocator`] copies finished outputs into the service's output area.

pub mod config;
pub mod locks;
pub mod orchestrator;
pub mod previews;
pub mod relocator;
pub mod resolver;

pub use config::{ConfigError, Environment, PipelineConfig};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use relocator::{Relocated, RelocationError, Relocator};
pub use resolver::{ResolveError, Resolver};
