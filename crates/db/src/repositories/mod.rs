//! One repository per table. Each is a zero-sized struct whose associated
//! functions take a pool or executor.

pub mod base_model_repo;
pub mod lora_repo;
pub mod task_event_repo;
pub mod task_repo;
pub mod workflow_repo;

pub use base_model_repo::BaseModelRepo;
pub use lora_repo::LoraRepo;
pub use task_event_repo::TaskEventRepo;
pub use task_repo::TaskRepo;
pub use workflow_repo::WorkflowRepo;
