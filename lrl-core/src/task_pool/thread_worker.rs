use super::{
    Worker,
    protocol::{Request, Response, ServerChannel, serve},
};
use crate::{env::Task, error::Error};
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::thread::JoinHandle;

struct ThreadChannel {
    request_rx: Receiver<Request>,
    response_tx: Sender<Response>,
}

impl ServerChannel for ThreadChannel {
    fn recv_request(&mut self) -> Result<Request> {
        self.request_rx.recv().map_err(|_| Error::WorkerGone.into())
    }

    fn send_response(&mut self, response: Response) -> Result<()> {
        self.response_tx
            .send(response)
            .map_err(|_| Error::WorkerGone.into())
    }
}

/// One environment on a dedicated thread, talking over a pair of crossbeam channels.
pub struct ThreadWorker {
    request_tx: Sender<Request>,
    response_rx: Receiver<Response>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    pub fn spawn<T: Task + 'static>(idx: usize, mut task: T) -> Result<Self> {
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name(format!("task-worker-{idx}"))
            .spawn(move || {
                let mut channel = ThreadChannel {
                    request_rx,
                    response_tx,
                };
                if let Err(err) = serve(&mut task, &mut channel) {
                    tracing::debug!(worker = idx, "worker stopped: {err:#}");
                }
            })?;
        tracing::debug!(worker = idx, "spawned thread worker");
        Ok(Self {
            request_tx,
            response_rx,
            handle: Some(handle),
        })
    }
}

impl Worker for ThreadWorker {
    fn send(&mut self, request: Request) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| Error::WorkerGone.into())
    }

    fn recv(&mut self) -> Result<Response> {
        self.response_rx.recv().map_err(|_| Error::WorkerGone.into())
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        // the worker may already be gone after an explicit exit
        let _ = self.request_tx.send(Request::Exit);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envs::ChainTask;

    #[test]
    fn round_trip_and_exit() {
        let mut worker = ThreadWorker::spawn(0, ChainTask::new(5, 10, 0)).unwrap();
        worker.send(Request::Reset).unwrap();
        assert_eq!(
            worker.recv().unwrap(),
            Response::State(vec![0., 0., 1., 0., 0.])
        );
        worker.send(Request::Exit).unwrap();
        if let Some(handle) = worker.handle.take() {
            handle.join().unwrap();
        }
        assert!(worker.send(Request::Reset).is_err() || worker.recv().is_err());
    }
}
