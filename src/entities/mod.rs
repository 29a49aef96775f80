pub mod actor;
pub mod task;
