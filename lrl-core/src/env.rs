use anyhow::Result;
use bincode::{Decode, Encode};

/// Dimensions of a task family. Observations are flat `f32` vectors, actions are discrete.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TaskSpecs {
    pub name: String,
    pub state_dim: usize,
    pub action_dim: usize,
}

/// Describes one task of a family. `payload` is interpreted by the environment, `label` is
/// what the agent sees and uses to recognise the task.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TaskInfo {
    pub name: String,
    pub payload: Vec<f32>,
    pub label: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SnapShot {
    pub state: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

impl SnapShot {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }

    /// 0 when the episode ended on this step, 1 otherwise.
    pub fn continuation(&self) -> f32 {
        if self.done() { 0. } else { 1. }
    }
}

/// The narrow interface the agents need from an environment.
///
/// `step` resets the environment on its own once an episode is over: the returned state is
/// then the first state of the next episode while reward and flags belong to the finished one.
pub trait Task: Send {
    fn specs(&self) -> TaskSpecs;

    fn seed(&mut self, seed: u64);

    fn reset(&mut self) -> Result<Vec<f32>>;

    fn step(&mut self, action: usize) -> Result<SnapShot>;

    fn set_task(&mut self, task: &TaskInfo) -> Result<()>;

    fn get_task(&self) -> TaskInfo;

    fn get_all_tasks(&mut self, requires_task_label: bool) -> Vec<TaskInfo>;

    fn random_tasks(&mut self, num_tasks: usize, requires_task_label: bool)
    -> Result<Vec<TaskInfo>>;

    fn reset_task(&mut self, task: &TaskInfo) -> Result<Vec<f32>> {
        self.set_task(task)?;
        self.reset()
    }
}
