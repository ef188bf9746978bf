pub mod registry;
pub mod task;
