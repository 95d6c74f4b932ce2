use crate::{
    env::{SnapShot, Task, TaskInfo, TaskSpecs},
    error::Error,
};
use anyhow::{Result, anyhow};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Request {
    Step(usize),
    Reset,
    ResetTask(TaskInfo),
    SetTask(TaskInfo),
    Seed(u64),
    GetTask,
    GetAllTasks {
        requires_task_label: bool,
    },
    RandomTasks {
        num_tasks: usize,
        requires_task_label: bool,
    },
    Specs,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Response {
    Step(SnapShot),
    State(Vec<f32>),
    Ack,
    Task(TaskInfo),
    Tasks(Vec<TaskInfo>),
    Specs(TaskSpecs),
    Failed(String),
}

impl Response {
    fn tag(&self) -> &'static str {
        match self {
            Self::Step(_) => "Step",
            Self::State(_) => "State",
            Self::Ack => "Ack",
            Self::Task(_) => "Task",
            Self::Tasks(_) => "Tasks",
            Self::Specs(_) => "Specs",
            Self::Failed(_) => "Failed",
        }
    }

    /// The error to report when this response does not answer the request that was sent.
    pub fn unexpected(self, expected: &'static str) -> anyhow::Error {
        match self {
            Self::Failed(reason) => anyhow!("worker failed: {reason}"),
            other => Error::ProtocolDesync {
                tag: format!("expected {expected} response, got {}", other.tag()),
            }
            .into(),
        }
    }
}

/// Executes one request against a task. `None` means the worker was asked to exit.
pub fn handle_request<T: Task + ?Sized>(task: &mut T, request: Request) -> Option<Response> {
    let response = match request {
        Request::Step(action) => task.step(action).map(Response::Step),
        Request::Reset => task.reset().map(Response::State),
        Request::ResetTask(info) => task.reset_task(&info).map(Response::State),
        Request::SetTask(info) => task.set_task(&info).map(|_| Response::Ack),
        Request::Seed(seed) => {
            task.seed(seed);
            Ok(Response::Ack)
        }
        Request::GetTask => Ok(Response::Task(task.get_task())),
        Request::GetAllTasks {
            requires_task_label,
        } => Ok(Response::Tasks(task.get_all_tasks(requires_task_label))),
        Request::RandomTasks {
            num_tasks,
            requires_task_label,
        } => task
            .random_tasks(num_tasks, requires_task_label)
            .map(Response::Tasks),
        Request::Specs => Ok(Response::Specs(task.specs())),
        Request::Exit => return None,
    };
    Some(response.unwrap_or_else(|err| Response::Failed(format!("{err:#}"))))
}

/// The worker side of a duplex channel.
pub trait ServerChannel {
    fn recv_request(&mut self) -> Result<Request>;

    fn send_response(&mut self, response: Response) -> Result<()>;
}

/// Serves requests until `Exit` arrives or the channel breaks.
pub fn serve<T: Task, C: ServerChannel>(task: &mut T, channel: &mut C) -> Result<()> {
    loop {
        let request = channel.recv_request()?;
        match handle_request(task, request) {
            Some(response) => channel.send_response(response)?,
            None => {
                tracing::debug!("worker received exit");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envs::ChainTask;

    #[test]
    fn requests_map_to_matching_responses() {
        let mut task = ChainTask::new(5, 10, 0);
        let right = ChainTask::tasks()[1].clone();
        assert!(matches!(
            handle_request(&mut task, Request::ResetTask(right.clone())),
            Some(Response::State(_))
        ));
        assert_eq!(
            handle_request(&mut task, Request::GetTask),
            Some(Response::Task(right))
        );
        assert!(matches!(
            handle_request(&mut task, Request::Step(1)),
            Some(Response::Step(_))
        ));
        assert_eq!(handle_request(&mut task, Request::Seed(3)), Some(Response::Ack));
        assert!(handle_request(&mut task, Request::Exit).is_none());
    }

    #[test]
    fn task_errors_become_failed_responses() {
        let mut task = ChainTask::new(5, 10, 0);
        let response = handle_request(&mut task, Request::Step(9)).unwrap();
        assert!(matches!(response, Response::Failed(_)));
        let err = response.unexpected("Step");
        assert!(err.downcast_ref::<Error>().is_none());
        let err = Response::Ack.unexpected("Step");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ProtocolDesync { .. })
        ));
    }
}
