pub mod agent;
pub mod network;
pub mod task_pool;
