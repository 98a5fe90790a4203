pub mod config;
pub mod constants;
pub mod data_backend;
pub mod data_types;
pub mod db_operations;
pub mod errors;
pub mod shared_main;
pub mod sync_coordinator;
pub mod task_scheduler_funcs;
