use anyhow::Result;
use lrl_core::{
    env::Task,
    envs::ChainTask,
    task_pool::{ProcessWorker, TaskPool, Worker},
};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

static POOL_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub enum TaskPoolType {
    /// Every environment is stepped on the calling thread.
    InProcess,
    /// One thread per environment.
    Thread,
    /// One `lrl-subproc-env` process per environment.
    Process { program: PathBuf },
}

pub struct TaskPoolBuilder {
    pub pool_type: TaskPoolType,
    pub num_workers: usize,
    pub chain_length: usize,
    pub max_steps: usize,
    pub seed: u64,
}

impl Default for TaskPoolBuilder {
    fn default() -> Self {
        Self {
            pool_type: TaskPoolType::InProcess,
            num_workers: 4,
            chain_length: 5,
            max_steps: 20,
            seed: 0,
        }
    }
}

impl TaskPoolBuilder {
    /// A pool of the built-in chain tasks, worker `i` seeded with `seed + i`.
    pub fn build(&self) -> Result<TaskPool> {
        match &self.pool_type {
            TaskPoolType::Process { program } => self.spawn_processes(program),
            _ => self.build_with(|idx| {
                ChainTask::new(self.chain_length, self.max_steps, self.seed + idx as u64)
            }),
        }
    }

    /// A pool of custom tasks. Worker processes only host built-in tasks, so the process
    /// transport falls back to [`Self::build`].
    pub fn build_with<T, F>(&self, make_task: F) -> Result<TaskPool>
    where
        T: Task + 'static,
        F: Fn(usize) -> T,
    {
        let tasks = (0..self.num_workers).map(make_task).collect();
        match &self.pool_type {
            TaskPoolType::InProcess => TaskPool::in_process(tasks),
            TaskPoolType::Thread => TaskPool::threaded(tasks),
            TaskPoolType::Process { .. } => self.build(),
        }
    }

    fn spawn_processes(&self, program: &Path) -> Result<TaskPool> {
        let pool_idx = POOL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let workers = (0..self.num_workers)
            .map(|idx| {
                let socket_name = format!("lrl-{}-{pool_idx}-{idx}.sock", std::process::id());
                let args = [
                    "--task".to_string(),
                    "chain".to_string(),
                    "--seed".to_string(),
                    (self.seed + idx as u64).to_string(),
                    "--chain-length".to_string(),
                    self.chain_length.to_string(),
                    "--max-steps".to_string(),
                    self.max_steps.to_string(),
                ];
                let worker = ProcessWorker::spawn(program, &args, &socket_name)?;
                Ok(Box::new(worker) as Box<dyn Worker>)
            })
            .collect::<Result<Vec<_>>>()?;
        TaskPool::new(workers)
    }
}
