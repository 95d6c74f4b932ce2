mod process_worker;
mod protocol;
mod thread_worker;

pub use process_worker::{ProcessWorker, SocketChannel};
pub use protocol::{Request, Response, ServerChannel, handle_request, serve};
pub use thread_worker::ThreadWorker;

use crate::{
    env::{SnapShot, Task, TaskInfo, TaskSpecs},
    error::Error,
};
use anyhow::{Result, ensure};

/// Client side of one environment worker. `send` must be followed by exactly one `recv`
/// before the next `send`, except for `Exit` which has no reply.
pub trait Worker: Send {
    fn send(&mut self, request: Request) -> Result<()>;

    fn recv(&mut self) -> Result<Response>;
}

/// Runs the task on the calling thread. The reply is computed eagerly on `send`.
pub struct InProcessWorker<T: Task> {
    task: T,
    reply: Option<Response>,
}

impl<T: Task> InProcessWorker<T> {
    pub fn new(task: T) -> Self {
        Self { task, reply: None }
    }
}

impl<T: Task> Worker for InProcessWorker<T> {
    fn send(&mut self, request: Request) -> Result<()> {
        self.reply = handle_request(&mut self.task, request);
        Ok(())
    }

    fn recv(&mut self) -> Result<Response> {
        self.reply.take().ok_or_else(|| Error::WorkerGone.into())
    }
}

macro_rules! expect_response {
    ($response:expr, $variant:ident) => {
        match $response {
            Response::$variant(value) => Ok(value),
            other => Err(other.unexpected(stringify!($variant))),
        }
    };
}

/// A set of parallel environments driven in lock step. Every call sends one request to each
/// worker and then waits for all replies.
pub struct TaskPool {
    workers: Vec<Box<dyn Worker>>,
    specs: TaskSpecs,
    closed: bool,
}

impl TaskPool {
    pub fn new(mut workers: Vec<Box<dyn Worker>>) -> Result<Self> {
        ensure!(!workers.is_empty(), "a task pool needs at least one worker");
        workers[0].send(Request::Specs)?;
        let specs = expect_response!(workers[0].recv()?, Specs)?;
        Ok(Self {
            workers,
            specs,
            closed: false,
        })
    }

    pub fn in_process<T: Task + 'static>(tasks: Vec<T>) -> Result<Self> {
        Self::new(
            tasks
                .into_iter()
                .map(|task| Box::new(InProcessWorker::new(task)) as Box<dyn Worker>)
                .collect(),
        )
    }

    pub fn threaded<T: Task + 'static>(tasks: Vec<T>) -> Result<Self> {
        let workers = tasks
            .into_iter()
            .enumerate()
            .map(|(idx, task)| Ok(Box::new(ThreadWorker::spawn(idx, task)?) as Box<dyn Worker>))
            .collect::<Result<Vec<_>>>()?;
        Self::new(workers)
    }

    pub fn specs(&self) -> &TaskSpecs {
        &self.specs
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn broadcast(&mut self, requests: Vec<Request>) -> Result<Vec<Response>> {
        for (worker, request) in self.workers.iter_mut().zip(requests) {
            worker.send(request)?;
        }
        self.workers.iter_mut().map(|worker| worker.recv()).collect()
    }

    fn broadcast_same(&mut self, request: Request) -> Result<Vec<Response>> {
        let requests = vec![request; self.workers.len()];
        self.broadcast(requests)
    }

    pub fn step(&mut self, actions: &[usize]) -> Result<Vec<SnapShot>> {
        ensure!(
            actions.len() == self.workers.len(),
            "got {} actions for {} workers",
            actions.len(),
            self.workers.len()
        );
        let requests = actions.iter().map(|action| Request::Step(*action)).collect();
        self.broadcast(requests)?
            .into_iter()
            .map(|response| expect_response!(response, Step))
            .collect()
    }

    pub fn reset(&mut self) -> Result<Vec<Vec<f32>>> {
        self.broadcast_same(Request::Reset)?
            .into_iter()
            .map(|response| expect_response!(response, State))
            .collect()
    }

    pub fn reset_task(&mut self, task: &TaskInfo) -> Result<Vec<Vec<f32>>> {
        self.broadcast_same(Request::ResetTask(task.clone()))?
            .into_iter()
            .map(|response| expect_response!(response, State))
            .collect()
    }

    pub fn set_task(&mut self, task: &TaskInfo) -> Result<()> {
        for response in self.broadcast_same(Request::SetTask(task.clone()))? {
            if response != Response::Ack {
                return Err(response.unexpected("Ack"));
            }
        }
        Ok(())
    }

    /// Reseeds every worker's task generator, worker `i` with `seed + i`.
    pub fn seed(&mut self, seed: u64) -> Result<()> {
        let requests = (0..self.workers.len() as u64)
            .map(|idx| Request::Seed(seed + idx))
            .collect();
        for response in self.broadcast(requests)? {
            if response != Response::Ack {
                return Err(response.unexpected("Ack"));
            }
        }
        Ok(())
    }

    /// The task of the first worker, all workers share it.
    pub fn get_task(&mut self) -> Result<TaskInfo> {
        self.workers[0].send(Request::GetTask)?;
        expect_response!(self.workers[0].recv()?, Task)
    }

    pub fn get_all_tasks(&mut self, requires_task_label: bool) -> Result<Vec<TaskInfo>> {
        self.workers[0].send(Request::GetAllTasks {
            requires_task_label,
        })?;
        expect_response!(self.workers[0].recv()?, Tasks)
    }

    pub fn random_tasks(
        &mut self,
        num_tasks: usize,
        requires_task_label: bool,
    ) -> Result<Vec<TaskInfo>> {
        self.workers[0].send(Request::RandomTasks {
            num_tasks,
            requires_task_label,
        })?;
        expect_response!(self.workers[0].recv()?, Tasks)
    }

    /// Asks every worker to exit. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for worker in self.workers.iter_mut() {
            worker.send(Request::Exit)?;
        }
        tracing::debug!(workers = self.workers.len(), "task pool closed");
        Ok(())
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!("failed to close task pool: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envs::ChainTask;

    fn chains(n: usize) -> Vec<ChainTask> {
        (0..n).map(|seed| ChainTask::new(5, 10, seed as u64)).collect()
    }

    #[test]
    fn in_process_and_threaded_pools_agree() {
        let right = ChainTask::tasks()[1].clone();
        let mut sequential = TaskPool::in_process(chains(3)).unwrap();
        let mut threaded = TaskPool::threaded(chains(3)).unwrap();
        assert_eq!(sequential.specs(), threaded.specs());
        assert_eq!(
            sequential.reset_task(&right).unwrap(),
            threaded.reset_task(&right).unwrap()
        );
        for actions in [[1, 0, 1], [1, 1, 0]] {
            assert_eq!(
                sequential.step(&actions).unwrap(),
                threaded.step(&actions).unwrap()
            );
        }
        assert_eq!(threaded.get_task().unwrap(), right);
        threaded.close().unwrap();
        threaded.close().unwrap();
    }

    #[test]
    fn worker_failures_are_reported() {
        let mut pool = TaskPool::in_process(chains(2)).unwrap();
        pool.reset().unwrap();
        assert!(pool.step(&[0, 5]).is_err());
        assert!(pool.step(&[0]).is_err());
    }

    #[test]
    fn task_listing_comes_from_first_worker() {
        let mut pool = TaskPool::in_process(chains(2)).unwrap();
        assert_eq!(pool.get_all_tasks(false).unwrap(), ChainTask::tasks());
        assert_eq!(pool.random_tasks(3, false).unwrap().len(), 3);
        pool.set_task(&ChainTask::tasks()[1]).unwrap();
        assert_eq!(pool.get_task().unwrap().name, "chain_right");
    }

    #[test]
    fn reseeded_pools_draw_the_same_random_tasks() {
        let mut first = TaskPool::in_process(chains(2)).unwrap();
        let mut second = TaskPool::threaded(chains(3)).unwrap();
        first.seed(11).unwrap();
        second.seed(11).unwrap();
        assert_eq!(
            first.random_tasks(4, true).unwrap(),
            second.random_tasks(4, true).unwrap()
        );
    }
}
