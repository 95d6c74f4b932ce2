pub mod advantage;
pub mod batching;
pub mod buffer;
pub mod env;
pub mod envs;
pub mod error;
pub mod ipc;
pub mod network;
pub mod optimizer;
pub mod rng;
pub mod task_pool;
pub mod tensors;
